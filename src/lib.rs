//! # Hoji - a single-node UTXO ledger
//!
//! Coins live in unspent transaction outputs, blocks are sealed with a
//! hash-below-target proof-of-work, and everything is kept in one sled
//! database next to a flat wallet file.
//!
//! ## Layout
//! - `core/`: blocks, transactions, proof-of-work and the chain store
//! - `storage/`: the UTXO index derived from the chain
//! - `wallet/`: key pairs, Base58Check addresses and the wallet file
//! - `config/`: data directory, wallet file and difficulty settings
//! - `utils/`: hashing, signing, Base58 and the serialization helpers
//! - `cli/`: argument parsing for the `hoji` binary
//!
//! ## Typical flow
//! 1. `Wallets::create_wallet` for a sender and a receiver
//! 2. `Blockchain::create_blockchain` pays the genesis reward to the sender
//! 3. `UTXOSet::reindex` builds the index
//! 4. `Transaction::new_utxo_transaction`, then `Blockchain::mine_block`
//!    with a coinbase first, then `UTXOSet::update` with the new block

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, ProofOfWork, TXInput, TXOutput, Transaction,
    TransactionLookup, BLOCK_REWARD,
};
pub use error::{BlockchainError, Result};
pub use storage::UTXOSet;
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
