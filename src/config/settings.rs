use crate::error::{BlockchainError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Process-wide configuration for the binary. Library entry points take a `&Config`.
pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::load().unwrap_or_else(|e| {
        log::warn!("Falling back to default configuration: {e}");
        Config::default()
    })
});

pub const CONFIG_FILE: &str = "hoji.toml";
pub const DEFAULT_TARGET_BITS: u32 = 16;
pub const MAX_TARGET_BITS: u32 = 255;

const CONFIG_PATH_KEY: &str = "HOJI_CONFIG";
const DATA_DIR_KEY: &str = "HOJI_DATA_DIR";
const WALLET_FILE_KEY: &str = "HOJI_WALLET_FILE";
const TARGET_BITS_KEY: &str = "HOJI_TARGET_BITS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory of the sled database holding blocks and the UTXO index
    pub data_dir: PathBuf,
    /// File holding the serialized wallet collection
    pub wallet_file: PathBuf,
    /// Proof-of-work difficulty in leading zero bits
    pub target_bits: u32,
    /// Payload of the genesis coinbase
    pub genesis_data: String,
    /// Payload of the coinbase mined alongside each payment
    pub reward_data: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            wallet_file: PathBuf::from("wallet.dat"),
            target_bits: DEFAULT_TARGET_BITS,
            genesis_data: String::from("genesis"),
            reward_data: String::from("reward tx"),
        }
    }
}

impl Config {
    /// Defaults, then `hoji.toml` (or `$HOJI_CONFIG`), then environment overrides.
    /// Relative paths are resolved against the working directory.
    pub fn load() -> Result<Config> {
        Config::load_from(None)
    }

    /// Like `load`, but an explicit file takes precedence over `$HOJI_CONFIG`.
    pub fn load_from(explicit: Option<&Path>) -> Result<Config> {
        let cwd = env::current_dir()?;
        let file = match explicit {
            Some(path) => path.to_path_buf(),
            None => env::var(CONFIG_PATH_KEY)
                .map(PathBuf::from)
                .unwrap_or_else(|_| cwd.join(CONFIG_FILE)),
        };
        if explicit.is_some() && !file.exists() {
            return Err(BlockchainError::Config(format!(
                "config file {} does not exist",
                file.display()
            )));
        }

        let mut config = if file.exists() {
            Config::from_file(&file)?
        } else {
            Config::default()
        };
        config.apply_overrides(|key| env::var(key).ok())?;

        if config.data_dir.is_relative() {
            config.data_dir = cwd.join(&config.data_dir);
        }
        if config.wallet_file.is_relative() {
            config.wallet_file = cwd.join(&config.wallet_file);
        }
        config.validate()?;
        Ok(config)
    }

    /// Configuration rooted in a single directory; used for isolated stores.
    pub fn for_dir(dir: &Path) -> Config {
        Config {
            data_dir: dir.join("data"),
            wallet_file: dir.join("wallet.dat"),
            ..Config::default()
        }
    }

    pub fn with_target_bits(mut self, target_bits: u32) -> Config {
        self.target_bits = target_bits;
        self
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        Config::from_toml_str(&text)
            .map_err(|e| BlockchainError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(text).map_err(|e| BlockchainError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup(WALLET_FILE_KEY) {
            self.wallet_file = PathBuf::from(file);
        }
        if let Some(bits) = lookup(TARGET_BITS_KEY) {
            self.target_bits = bits.trim().parse().map_err(|e| {
                BlockchainError::Config(format!("{TARGET_BITS_KEY}={bits}: {e}"))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_bits == 0 || self.target_bits > MAX_TARGET_BITS {
            return Err(BlockchainError::Config(format!(
                "target_bits must be within 1..={MAX_TARGET_BITS}, got {}",
                self.target_bits
            )));
        }
        Ok(())
    }
}
