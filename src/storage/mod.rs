//! Derived storage
//!
//! The UTXO index kept next to the chain in the same sled database.

pub mod utxo_set;

pub use utxo_set::UTXOSet;
