//! Error handling for the ledger
//!
//! Every failure the engine can report is a variant of [`BlockchainError`].
//! None of them abort the process; callers decide what to do.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Malformed address or checksum mismatch
    InvalidAddress(String),
    /// A chain already exists where one was about to be created
    AlreadyExists(String),
    /// No chain, block or record where one was expected
    NotFound(String),
    /// The address has no wallet in the local wallet store
    UnknownAddress(String),
    /// Spend exceeds the value held by the sender
    InsufficientFunds {
        address: String,
        required: u64,
        available: u64,
    },
    /// Signature failure, bad reference, or double spend
    InvalidTransaction(String),
    /// A stored block does not satisfy its difficulty target
    InvalidProofOfWork(String),
    /// Database-related errors
    Database(String),
    /// File I/O errors
    Io(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Key generation, signing, clock errors
    Crypto(String),
    /// Nonce space exhausted or empty block
    Mining(String),
    /// Configuration errors
    Config(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::AlreadyExists(msg) => write!(f, "Already exists: {msg}"),
            BlockchainError::NotFound(msg) => write!(f, "Not found: {msg}"),
            BlockchainError::UnknownAddress(addr) => {
                write!(f, "No local wallet holds the key for address {addr}")
            }
            BlockchainError::InsufficientFunds {
                address,
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds for {address}: required {required}, available {available}, missing {}",
                    required.saturating_sub(*available)
                )
            }
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::InvalidProofOfWork(msg) => write!(f, "Invalid proof of work: {msg}"),
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}
