// The chain store. Blocks live in a sled tree keyed by their hash, next to a
// sentinel key holding the tip hash. Each block only knows its predecessor,
// so the chain is walked backwards from the tip until the empty genesis
// back-link.

use crate::config::Config;
use crate::core::{Block, ProofOfWork, TXOutput, Transaction, TransactionLookup, BLOCK_REWARD};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use log::{info, warn};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const TARGET_BITS_KEY: &str = "target_bits";
const BLOCKS_TREE: &str = "blocks";

/// Unspent outputs of one transaction, keyed by output index.
pub type OutputsByIndex = BTreeMap<usize, TXOutput>;

/// Handle to one open chain. Clones share the database, the cached tip and
/// the write locks.
#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>,
    db: Db,
    blocks: Tree,
    db_path: PathBuf,
    target_bits: u32,
    mining_lock: Arc<Mutex<()>>,
    index_lock: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Mine the genesis block paying `genesis_address` and persist it as the tip.
    pub fn create_blockchain(genesis_address: &str, config: &Config) -> Result<Blockchain> {
        config.validate()?;
        let (db, blocks) = Self::open_store(&config.data_dir)?;

        if blocks.get(TIP_BLOCK_HASH_KEY)?.is_some() {
            return Err(BlockchainError::AlreadyExists(format!(
                "a blockchain already exists at {}",
                config.data_dir.display()
            )));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, &config.genesis_data)?;
        let block = Block::generate_genesis_block(&coinbase_tx, config.target_bits)?;
        let block_data = block.serialize()?;
        let target_bits = config.target_bits.to_be_bytes();

        blocks
            .transaction(|tx_db| {
                if tx_db.get(TIP_BLOCK_HASH_KEY)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(
                        BlockchainError::AlreadyExists("blockchain created concurrently".to_string()),
                    ));
                }
                tx_db.insert(block.get_hash(), block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                tx_db.insert(TARGET_BITS_KEY, &target_bits[..])?;
                Ok(())
            })
            .map_err(Self::transaction_error)?;
        db.flush()?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(block.get_hash().to_vec())),
            db,
            blocks,
            db_path: config.data_dir.clone(),
            target_bits: config.target_bits,
            mining_lock: Arc::new(Mutex::new(())),
            index_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Open the chain persisted at `config.data_dir`.
    ///
    /// The difficulty recorded at creation wins over the configured one.
    pub fn open(config: &Config) -> Result<Blockchain> {
        if !config.data_dir.exists() {
            return Err(Self::no_chain(&config.data_dir));
        }
        let (db, blocks) = Self::open_store(&config.data_dir)?;

        let tip_hash = blocks
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| Self::no_chain(&config.data_dir))?
            .to_vec();

        let target_bits = match blocks.get(TARGET_BITS_KEY)? {
            Some(bytes) => {
                let raw = <[u8; 4]>::try_from(&bytes[..]).map_err(|_| {
                    BlockchainError::Database("stored target bits are malformed".to_string())
                })?;
                u32::from_be_bytes(raw)
            }
            None => config.target_bits,
        };
        if target_bits != config.target_bits {
            warn!(
                "Chain at {} was created with difficulty {target_bits}; ignoring configured {}",
                config.data_dir.display(),
                config.target_bits
            );
        }

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            blocks,
            db_path: config.data_dir.clone(),
            target_bits,
            mining_lock: Arc::new(Mutex::new(())),
            index_lock: Arc::new(Mutex::new(())),
        })
    }

    fn open_store(path: &Path) -> Result<(Db, Tree)> {
        let db = sled::open(path).map_err(|e| {
            BlockchainError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        Ok((db, blocks))
    }

    fn no_chain(path: &Path) -> BlockchainError {
        BlockchainError::NotFound(format!(
            "no blockchain at {}; create one first",
            path.display()
        ))
    }

    fn transaction_error(err: TransactionError<BlockchainError>) -> BlockchainError {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => {
                BlockchainError::Database(format!("Failed to update blocks tree: {e}"))
            }
        }
    }

    /// Flush pending writes and release this handle.
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self.tip_hash.write().unwrap_or_else(PoisonError::into_inner);
        *tip_hash = new_tip_hash.to_vec();
    }

    /// Serializes every mutation of the UTXO index built on this chain.
    pub(crate) fn lock_index(&self) -> MutexGuard<'_, ()> {
        self.index_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Verify `transactions`, mine them into a block on the current tip and
    /// append it. Only one call runs at a time per chain.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        let _guard = self.mining_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if transactions.is_empty() {
            return Err(BlockchainError::Mining(
                "Block must contain at least one transaction".to_string(),
            ));
        }
        Self::check_coinbase_placement(transactions)?;

        for transaction in transactions {
            if !transaction.verify(self)? {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "transaction {} failed verification",
                    transaction.get_id_hex()
                )));
            }
        }
        self.check_for_double_spending(transactions)?;

        let tip = self
            .blocks
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| Self::no_chain(&self.db_path))?
            .to_vec();

        let block = Block::new_block(tip.clone(), transactions, self.target_bits)?;
        let block_data = block.serialize()?;

        // Block and tip move together, and only if nobody else moved the tip.
        self.blocks
            .transaction(|tx_db| {
                let current = tx_db.get(TIP_BLOCK_HASH_KEY)?;
                if current.as_deref() != Some(tip.as_slice()) {
                    return Err(ConflictableTransactionError::Abort(BlockchainError::Database(
                        "tip moved while mining".to_string(),
                    )));
                }
                tx_db.insert(block.get_hash(), block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                Ok(())
            })
            .map_err(Self::transaction_error)?;
        self.set_tip_hash(block.get_hash());

        info!(
            "Successfully mined block: {} ({} transactions)",
            block.get_hash_hex(),
            transactions.len()
        );
        Ok(block)
    }

    // Exactly one coinbase, at the front, minting exactly the block reward.
    fn check_coinbase_placement(transactions: &[Transaction]) -> Result<()> {
        if !transactions.first().is_some_and(Transaction::is_coinbase) {
            return Err(BlockchainError::InvalidTransaction(
                "block must start with a coinbase transaction".to_string(),
            ));
        }
        for (idx, tx) in transactions.iter().enumerate() {
            if !tx.is_coinbase() {
                continue;
            }
            if idx != 0 {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "coinbase {} must be the first transaction of its block",
                    tx.get_id_hex()
                )));
            }
            if tx.get_output_value()? != BLOCK_REWARD {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "coinbase {} does not mint exactly {BLOCK_REWARD}",
                    tx.get_id_hex()
                )));
            }
        }
        Ok(())
    }

    fn check_for_double_spending(&self, transactions: &[Transaction]) -> Result<()> {
        let spent_on_chain = self.spent_outpoints()?;
        let mut spent_in_block: HashSet<(Vec<u8>, usize)> = HashSet::new();

        for transaction in transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in transaction.get_vin() {
                let outpoint = (input.get_txid().to_vec(), input.get_vout());
                let already_spent = spent_on_chain.contains(&outpoint)
                    || !spent_in_block.insert(outpoint);
                if already_spent {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "transaction {} spends output {}:{} twice",
                        transaction.get_id_hex(),
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every (txid, index) referenced by an input anywhere on the chain.
    fn spent_outpoints(&self) -> Result<HashSet<(Vec<u8>, usize)>> {
        let mut spent = HashSet::new();
        for block in self.iterator() {
            for tx in block?.get_transactions() {
                if tx.is_coinbase() {
                    continue;
                }
                for input in tx.get_vin() {
                    spent.insert((input.get_txid().to_vec(), input.get_vout()));
                }
            }
        }
        Ok(spent)
    }

    /// Backward traversal starting at the current tip.
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.blocks.clone())
    }

    /// Unspent outputs of the whole chain, computed by a full scan.
    pub fn find_utxo(&self) -> Result<BTreeMap<Vec<u8>, OutputsByIndex>> {
        let mut utxo: BTreeMap<Vec<u8>, OutputsByIndex> = BTreeMap::new();
        let mut spent_txos: HashMap<Vec<u8>, HashSet<usize>> = HashMap::new();

        for block in self.iterator() {
            let block = block?;
            // Newest first, so spends are seen before the outputs they consume.
            for tx in block.get_transactions().iter().rev() {
                let spent = spent_txos.get(tx.get_id());
                let unspent: OutputsByIndex = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !spent.is_some_and(|s| s.contains(idx)))
                    .map(|(idx, out)| (idx, out.clone()))
                    .collect();
                if !unspent.is_empty() {
                    utxo.insert(tx.get_id().to_vec(), unspent);
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent_txos
                        .entry(txin.get_txid().to_vec())
                        .or_default()
                        .insert(txin.get_vout());
                }
            }
        }
        Ok(utxo)
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        for block in self.iterator() {
            if let Some(tx) = block?
                .get_transactions()
                .iter()
                .find(|tx| tx.get_id() == txid)
            {
                return Ok(Some(tx.clone()));
            }
        }
        Ok(None)
    }

    pub fn block_count(&self) -> Result<usize> {
        self.iterator().try_fold(0, |count, block| block.map(|_| count + 1))
    }

    /// Walk the whole chain checking links, difficulty and proof of work.
    /// Returns the number of blocks checked.
    pub fn verify_chain(&self) -> Result<usize> {
        let mut expected = self.get_tip_hash();
        let mut count = 0;
        for block in self.iterator() {
            let block = block?;
            if block.get_hash() != expected.as_slice() {
                return Err(BlockchainError::Database(format!(
                    "block stored under {} claims hash {}",
                    HEXLOWER.encode(&expected),
                    block.get_hash_hex()
                )));
            }
            if !ProofOfWork::validate_with_difficulty(&block, self.target_bits) {
                return Err(BlockchainError::InvalidProofOfWork(block.get_hash_hex()));
            }
            expected = block.get_pre_block_hash().to_vec();
            count += 1;
        }
        Ok(count)
    }
}

impl TransactionLookup for Blockchain {
    fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        Blockchain::find_transaction(self, txid)
    }
}

/// Lazy walk from a tip back to genesis. A block that cannot be read is
/// yielded as an error and ends the walk.
pub struct BlockchainIterator {
    blocks: Tree,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, blocks: Tree) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            blocks,
        }
    }

    fn load_current(&self) -> Result<Block> {
        let data = self.blocks.get(&self.current_hash)?.ok_or_else(|| {
            BlockchainError::NotFound(format!(
                "block {} is missing from the store",
                HEXLOWER.encode(&self.current_hash)
            ))
        })?;
        Block::deserialize(data.as_ref())
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        let result = self.load_current();
        match &result {
            Ok(block) => self.current_hash = block.get_pre_block_hash().to_vec(),
            Err(_) => self.current_hash.clear(),
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> Config {
        Config::for_dir(dir).with_target_bits(4)
    }

    #[test]
    fn test_create_then_open() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let miner = Wallet::new().unwrap();

        let tip = {
            let chain = Blockchain::create_blockchain(miner.get_address(), &config).unwrap();
            let tip = chain.get_tip_hash();
            chain.close().unwrap();
            tip
        };

        let chain = Blockchain::open(&config).unwrap();
        assert_eq!(chain.get_tip_hash(), tip);
        assert_eq!(chain.block_count().unwrap(), 1);
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let miner = Wallet::new().unwrap();

        let chain = Blockchain::create_blockchain(miner.get_address(), &config).unwrap();
        chain.close().unwrap();

        let err = Blockchain::create_blockchain(miner.get_address(), &config)
            .err()
            .unwrap();
        assert!(matches!(err, BlockchainError::AlreadyExists(_)));
    }

    #[test]
    fn test_open_without_chain_fails() {
        let dir = tempdir().unwrap();
        let err = Blockchain::open(&test_config(dir.path())).err().unwrap();
        assert!(matches!(err, BlockchainError::NotFound(_)));
    }

    #[test]
    fn test_open_keeps_creation_difficulty() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let miner = Wallet::new().unwrap();
        Blockchain::create_blockchain(miner.get_address(), &config)
            .unwrap()
            .close()
            .unwrap();

        let chain = Blockchain::open(&config.clone().with_target_bits(20)).unwrap();
        assert_eq!(chain.get_target_bits(), 4);
    }

    #[test]
    fn test_iterator_walks_back_to_genesis() {
        let dir = tempdir().unwrap();
        let miner = Wallet::new().unwrap();
        let chain = Blockchain::create_blockchain(miner.get_address(), &test_config(dir.path()))
            .unwrap();

        for _ in 0..3 {
            let coinbase = Transaction::new_coinbase_tx(miner.get_address(), "reward").unwrap();
            chain.mine_block(&[coinbase]).unwrap();
        }

        let blocks: Vec<Block> = chain.iterator().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].get_hash(), chain.get_tip_hash().as_slice());
        assert!(blocks[3].is_genesis());
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].get_pre_block_hash(), pair[1].get_hash());
        }
        assert_eq!(chain.verify_chain().unwrap(), 4);
    }

    #[test]
    fn test_misplaced_coinbase_rejected() {
        let dir = tempdir().unwrap();
        let miner = Wallet::new().unwrap();
        let chain = Blockchain::create_blockchain(miner.get_address(), &test_config(dir.path()))
            .unwrap();

        let a = Transaction::new_coinbase_tx(miner.get_address(), "a").unwrap();
        let b = Transaction::new_coinbase_tx(miner.get_address(), "b").unwrap();
        let err = chain.mine_block(&[a, b]).unwrap_err();
        assert!(matches!(err, BlockchainError::InvalidTransaction(_)));
        assert_eq!(chain.block_count().unwrap(), 1);
    }

    #[test]
    fn test_find_transaction() {
        let dir = tempdir().unwrap();
        let miner = Wallet::new().unwrap();
        let chain = Blockchain::create_blockchain(miner.get_address(), &test_config(dir.path()))
            .unwrap();
        let coinbase = Transaction::new_coinbase_tx(miner.get_address(), "reward").unwrap();
        chain.mine_block(std::slice::from_ref(&coinbase)).unwrap();

        assert_eq!(chain.find_transaction(coinbase.get_id()).unwrap(), Some(coinbase));
        assert_eq!(chain.find_transaction(&[0u8; 32]).unwrap(), None);
    }

    #[test]
    fn test_corrupt_block_surfaces_as_error() {
        let dir = tempdir().unwrap();
        let miner = Wallet::new().unwrap();
        let chain = Blockchain::create_blockchain(miner.get_address(), &test_config(dir.path()))
            .unwrap();

        chain
            .blocks
            .insert(chain.get_tip_hash(), &[0xFFu8, 0xFF, 0xFF][..])
            .unwrap();

        let mut iter = chain.iterator();
        assert!(matches!(iter.next(), Some(Err(BlockchainError::Serialization(_)))));
        assert!(iter.next().is_none());
        assert!(chain.block_count().is_err());
    }
}
