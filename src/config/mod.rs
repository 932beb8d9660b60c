//! Configuration management
//!
//! Paths of the chain database and wallet file, proof-of-work difficulty,
//! and coinbase payloads. Built from defaults, an optional TOML file and
//! environment variables.

pub mod settings;

pub use settings::{Config, CONFIG_FILE, DEFAULT_TARGET_BITS, GLOBAL_CONFIG};
