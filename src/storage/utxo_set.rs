use crate::core::{Block, Blockchain, OutputsByIndex, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::address_to_pub_key_hash;
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Tree};
use std::collections::BTreeMap;

const UTXO_TREE: &str = "chainstate";

/// Cache of unspent outputs: txid → (output index → output).
///
/// The chain is the source of truth; `reindex` rebuilds this from it and
/// `update` keeps it current one block at a time.
pub struct UTXOSet {
    blockchain: Blockchain,
    tree: Tree,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> Result<UTXOSet> {
        let tree = blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))?;
        Ok(UTXOSet { blockchain, tree })
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Replace the index with a full scan of the chain. Returns the number of
    /// transactions that still have unspent outputs.
    pub fn reindex(&self) -> Result<usize> {
        let _guard = self.blockchain.lock_index();
        let utxo_map = self.blockchain.find_utxo()?;

        let mut batch = Batch::default();
        for key in self.tree.iter().keys() {
            batch.remove(key?);
        }
        for (txid, outs) in &utxo_map {
            batch.insert(txid.as_slice(), serialize(outs)?);
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| BlockchainError::Database(format!("Failed to rebuild UTXO tree: {e}")))?;

        info!("Reindexed UTXO set: {} transactions", utxo_map.len());
        Ok(utxo_map.len())
    }

    /// Apply one newly appended block.
    ///
    /// Must run exactly once per block, in chain order. A block that was
    /// already applied is rejected and the index is left untouched.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.blockchain.lock_index();
        let block_hex = block.get_hash_hex();

        self.tree
            .transaction(|tx_tree| {
                for tx in block.get_transactions() {
                    if !tx.is_coinbase() {
                        for vin in tx.get_vin() {
                            let outpoint =
                                format!("{}:{}", HEXLOWER.encode(vin.get_txid()), vin.get_vout());
                            let not_unspent = || {
                                ConflictableTransactionError::Abort(
                                    BlockchainError::InvalidTransaction(format!(
                                        "block {block_hex} spends {outpoint}, which the UTXO index does not hold as unspent; was the block applied twice or out of order?"
                                    )),
                                )
                            };

                            let outs_bytes = tx_tree.get(vin.get_txid())?.ok_or_else(not_unspent)?;
                            let mut outs: OutputsByIndex = deserialize(outs_bytes.as_ref())
                                .map_err(ConflictableTransactionError::Abort)?;
                            if outs.remove(&vin.get_vout()).is_none() {
                                return Err(not_unspent());
                            }

                            if outs.is_empty() {
                                tx_tree.remove(vin.get_txid())?;
                            } else {
                                let bytes = serialize(&outs).map_err(ConflictableTransactionError::Abort)?;
                                tx_tree.insert(vin.get_txid(), bytes)?;
                            }
                        }
                    }

                    if tx_tree.get(tx.get_id())?.is_some() {
                        return Err(ConflictableTransactionError::Abort(
                            BlockchainError::InvalidTransaction(format!(
                                "transaction {} of block {block_hex} is already indexed",
                                tx.get_id_hex()
                            )),
                        ));
                    }
                    let new_outputs: OutputsByIndex =
                        tx.get_vout().iter().cloned().enumerate().collect();
                    let bytes = serialize(&new_outputs).map_err(ConflictableTransactionError::Abort)?;
                    tx_tree.insert(tx.get_id(), bytes)?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<BlockchainError>| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => {
                    BlockchainError::Database(format!("Failed to update UTXO tree: {e}"))
                }
            })?;

        debug!("Applied block {block_hex} to the UTXO set");
        Ok(())
    }

    /// Snapshot of the whole index in key order.
    pub fn entries(&self) -> Result<BTreeMap<Vec<u8>, OutputsByIndex>> {
        let mut entries = BTreeMap::new();
        for item in self.tree.iter() {
            let (k, v) = item?;
            let outs: OutputsByIndex = deserialize(v.as_ref())?;
            entries.insert(k.to_vec(), outs);
        }
        Ok(entries)
    }

    /// Spendable outputs of `pub_key_hash`, accumulated in (txid, index)
    /// order until they reach `amount`.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, Vec<(Vec<u8>, usize)>)> {
        let mut unspent_outputs = vec![];
        let mut accumulated = 0u64;

        'scan: for (txid, outs) in self.entries()? {
            for (idx, out) in outs {
                if accumulated >= amount {
                    break 'scan;
                }
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(out.get_value());
                    unspent_outputs.push((txid.clone(), idx));
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        Ok(self
            .entries()?
            .into_values()
            .flat_map(|outs| outs.into_values())
            .filter(|out| out.is_locked_with_key(pub_key_hash))
            .collect())
    }

    pub fn find_utxo_for_address(&self, address: &str) -> Result<Vec<TXOutput>> {
        self.find_utxo(&address_to_pub_key_hash(address)?)
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        Ok(self
            .find_utxo_for_address(address)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    pub fn count_transactions(&self) -> Result<usize> {
        let mut counter = 0;
        for item in self.tree.iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }
}
