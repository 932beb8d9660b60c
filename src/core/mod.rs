//! Core ledger functionality
//!
//! Blocks, transactions, the chain store and proof-of-work.

pub mod block;
pub mod blockchain;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator, OutputsByIndex};
pub use monetary::{BLOCK_REWARD, SATOSHIS_PER_COIN};
pub use proof_of_work::ProofOfWork;
pub use transaction::{TXInput, TXOutput, Transaction, TransactionLookup};
