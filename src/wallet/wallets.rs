use crate::config::Config;
use crate::error::Result;
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Address → wallet, persisted as one file.
///
/// Saving rewrites the whole file, so two processes adding wallets at the
/// same time will lose one of the updates.
pub struct Wallets {
    wallets: BTreeMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    pub fn from_config(config: &Config) -> Wallets {
        Wallets::load(&config.wallet_file)
    }

    /// An absent or unreadable file yields an empty collection.
    pub fn load(path: &Path) -> Wallets {
        let mut wallets = Wallets {
            wallets: BTreeMap::new(),
            path: path.to_path_buf(),
        };
        match wallets.load_from_file() {
            Ok(count) if count > 0 => log::debug!("Loaded {count} wallets from {}", path.display()),
            Ok(_) => {}
            Err(e) => log::warn!("Could not load wallets from {}: {e}", path.display()),
        }
        wallets
    }

    /// Generate a key pair, store it, and return its address.
    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address().to_string();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        log::info!("Created wallet {address}");
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    fn load_from_file(&mut self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let buf = fs::read(&self.path)?;
        self.wallets = deserialize(&buf[..])?;
        Ok(self.wallets.len())
    }

    pub fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_empty_collection() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::load(&dir.path().join("absent.dat"));
        assert!(wallets.is_empty());
    }

    #[test]
    fn test_corrupt_file_yields_empty_collection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        fs::write(&path, [0xFF, 0x00, 0x13, 0x37]).unwrap();
        let wallets = Wallets::load(&path);
        assert!(wallets.is_empty());
    }

    #[test]
    fn test_wallets_persist_and_reload_exactly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");

        let mut wallets = Wallets::load(&path);
        let first = wallets.create_wallet().unwrap();
        let second = wallets.create_wallet().unwrap();

        let reloaded = Wallets::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get_wallet(&first), wallets.get_wallet(&first));
        assert_eq!(reloaded.get_wallet(&second), wallets.get_wallet(&second));
    }

    #[test]
    fn test_addresses_are_listed_in_sorted_order() {
        let dir = tempdir().unwrap();
        let mut wallets = Wallets::load(&dir.path().join("wallet.dat"));
        for _ in 0..4 {
            wallets.create_wallet().unwrap();
        }
        let addresses = wallets.get_addresses();
        let mut sorted = addresses.clone();
        sorted.sort();
        assert_eq!(addresses, sorted);
        assert_eq!(addresses.len(), 4);
    }

    #[test]
    fn test_unknown_address_lookup() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::load(&dir.path().join("wallet.dat"));
        assert!(wallets.get_wallet("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").is_none());
    }
}
