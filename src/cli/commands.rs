use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "hoji", about = "A single-node UTXO ledger")]
pub struct Opt {
    /// Config file to use instead of ./hoji.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(help = "The address to send genesis block reward to")]
        address: String,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(
        name = "getbalance",
        about = "Get the wallet balance of the target address"
    )]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "send", about = "Send coins and mine the block that holds the transfer")]
    Send {
        #[arg(help = "Source wallet address")]
        from: String,
        #[arg(help = "Destination wallet address")]
        to: String,
        #[arg(help = "Amount to send, in satoshis", value_parser = clap::value_parser!(u64).range(1..))]
        amount: u64,
    },
    #[command(name = "printchain", about = "Print blockchain all block")]
    Printchain,
    #[command(name = "reindexutxo", about = "Rebuild UTXO index set")]
    Reindexutxo,
    #[command(name = "verifychain", about = "Check every block's hash and proof-of-work")]
    Verifychain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let opt = Opt::try_parse_from(["hoji", "send", "a", "b", "10"]).unwrap();
        match opt.command {
            Command::Send { from, to, amount } => {
                assert_eq!(from, "a");
                assert_eq!(to, "b");
                assert_eq!(amount, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_send_rejects_zero_amount() {
        assert!(Opt::try_parse_from(["hoji", "send", "a", "b", "0"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let opt = Opt::try_parse_from(["hoji", "--config", "x.toml", "printchain"]).unwrap();
        assert_eq!(opt.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(opt.command, Command::Printchain));
    }
}
