use clap::Parser;
use hoji::core::monetary::format_satoshis;
use hoji::{
    validate_address, Blockchain, BlockchainError, Command, Config, Opt, ProofOfWork, Transaction,
    UTXOSet, Wallets, GLOBAL_CONFIG,
};
use log::{error, info};
use std::process;

fn main() {
    // Info by default; RUST_LOG still wins when set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::parse();
    let config = match opt.config.as_deref() {
        Some(path) => match Config::load_from(Some(path)) {
            Ok(config) => config,
            Err(e) => {
                error!("Error: {e}");
                process::exit(1);
            }
        },
        None => GLOBAL_CONFIG.clone(),
    };

    if let Err(e) = run_command(opt.command, &config) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn ensure_valid(address: &str) -> Result<(), BlockchainError> {
    if !validate_address(address) {
        return Err(BlockchainError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

fn run_command(command: Command, config: &Config) -> Result<(), BlockchainError> {
    match command {
        Command::Createblockchain { address } => {
            ensure_valid(&address)?;
            let blockchain = Blockchain::create_blockchain(&address, config)?;
            let utxo_set = UTXOSet::new(blockchain)?;
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::from_config(config);
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}");
        }
        Command::GetBalance { address } => {
            ensure_valid(&address)?;
            let blockchain = Blockchain::open(config)?;
            let utxo_set = UTXOSet::new(blockchain)?;
            let balance = utxo_set.get_balance(&address)?;
            println!(
                "Balance of {address}: {balance} ({})",
                format_satoshis(balance)
            );
        }
        Command::ListAddresses => {
            let wallets = Wallets::from_config(config);
            for address in wallets.get_addresses() {
                println!("{address}");
            }
        }
        Command::Send { from, to, amount } => {
            ensure_valid(&from)?;
            ensure_valid(&to)?;
            let blockchain = Blockchain::open(config)?;
            let utxo_set = UTXOSet::new(blockchain.clone())?;
            let wallets = Wallets::from_config(config);

            let transaction =
                Transaction::new_utxo_transaction(&from, &to, amount, &utxo_set, &wallets)?;
            // The sender also mines, so the reward goes to them.
            let coinbase = Transaction::new_coinbase_tx(&from, &config.reward_data)?;

            let block = blockchain.mine_block(&[coinbase, transaction])?;
            utxo_set.update(&block)?;
            info!("Block {} holds the transfer", block.get_hash_hex());
            println!("Success!");
        }
        Command::Printchain => {
            let blockchain = Blockchain::open(config)?;
            for block in blockchain.iterator() {
                let block = block?;
                println!("Pre block hash: {}", hex_or_none(block.get_pre_block_hash()));
                println!("Cur block hash: {}", block.get_hash_hex());
                println!("Timestamp: {}", block.get_timestamp());
                println!("Difficulty: {}  Nonce: {}", block.get_difficulty(), block.get_nonce());
                println!(
                    "PoW: {}",
                    ProofOfWork::validate_with_difficulty(&block, blockchain.get_target_bits())
                );
                for tx in block.get_transactions() {
                    println!("- Transaction {}", tx.get_id_hex());
                    for (idx, output) in tx.get_vout().iter().enumerate() {
                        println!(
                            "    Output {idx}: {} to {}",
                            output.get_value(),
                            hoji::convert_address(output.get_pub_key_hash())
                        );
                    }
                }
                println!();
            }
        }
        Command::Reindexutxo => {
            let blockchain = Blockchain::open(config)?;
            let utxo_set = UTXOSet::new(blockchain)?;
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::Verifychain => {
            let blockchain = Blockchain::open(config)?;
            let checked = blockchain.verify_chain()?;
            println!("Chain is valid: {checked} blocks checked.");
        }
    }
    Ok(())
}

fn hex_or_none(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        String::from("(none)")
    } else {
        data_encoding::HEXLOWER.encode(bytes)
    }
}
