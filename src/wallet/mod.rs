//! Wallet management and address encoding
//!
//! Key pair generation, the address codec, and the file-backed
//! collection of local wallets.

pub mod address;
pub mod wallet;
pub mod wallets;

pub use address::{
    address_to_pub_key_hash, convert_address, derive_address, hash_pub_key, validate_address,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallet::Wallet;
pub use wallets::Wallets;
