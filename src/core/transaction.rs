// Transactions follow the UTXO model: inputs consume earlier outputs, outputs
// lock value to a public key hash. The only way value enters the ledger is the
// coinbase transaction at the front of each block.

use crate::core::BLOCK_REWARD;
use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{ecdsa_p256_sha256_sign_verify, put_bytes, put_len, serialize, deserialize, sha256_digest};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Wallet, Wallets};
use data_encoding::HEXLOWER;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Resolves a transaction id to the confirmed transaction carrying it.
pub trait TransactionLookup {
    fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>>;
}

impl TransactionLookup for HashMap<Vec<u8>, Transaction> {
    fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        Ok(self.get(txid).cloned())
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,      // transaction holding the output being spent
    vout: usize,        // index of that output
    signature: Vec<u8>, // over the spending transaction's id; coinbase data for a coinbase input
    pub_key: Vec<u8>,   // raw public key of the spender
}

impl TXInput {
    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> usize {
        self.vout
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }

    fn is_coinbase_input(&self) -> bool {
        self.txid.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        if value == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "output value must be positive".to_string(),
            ));
        }
        Ok(TXOutput {
            value,
            pub_key_hash: address_to_pub_key_hash(address)?,
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Block reward paid to `to`. The data payload stands in for a signature
    /// and is salted so two coinbases to one address never share an id.
    pub fn new_coinbase_tx(to: &str, data: &str) -> Result<Transaction> {
        let txout = TXOutput::new(BLOCK_REWARD, to)?;

        let mut payload = data.as_bytes().to_vec();
        payload.extend_from_slice(Uuid::new_v4().as_bytes());
        let tx_input = TXInput {
            signature: payload,
            ..Default::default()
        };

        let vin = vec![tx_input];
        let vout = vec![txout];
        Ok(Transaction {
            id: Self::compute_id(&vin, &vout),
            vin,
            vout,
        })
    }

    /// Pay `amount` from `from` to `to`, returning change to `from`.
    ///
    /// Outputs are consumed in ascending (txid, index) order until they cover
    /// the amount. Funds are checked before the key: every input is then
    /// signed with the key `wallets` holds for `from`.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
        wallets: &Wallets,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "amount must be positive".to_string(),
            ));
        }
        let from_hash = address_to_pub_key_hash(from)?;
        address_to_pub_key_hash(to)?;

        let (accumulated, spendable) = utxo_set.find_spendable_outputs(&from_hash, amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                address: from.to_string(),
                required: amount,
                available: accumulated,
            });
        }

        let wallet = wallets
            .get_wallet(from)
            .ok_or_else(|| BlockchainError::UnknownAddress(from.to_string()))?;

        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new(change, from)?);
        }

        let tx = Transaction::new_signed(spendable, outputs, wallet)?;
        debug!(
            "Built transaction {} spending {} outputs of {from}",
            tx.get_id_hex(),
            tx.vin.len()
        );
        Ok(tx)
    }

    /// Spend `outpoints` into `outputs`, signing every input with `wallet`.
    pub fn new_signed(
        outpoints: Vec<(Vec<u8>, usize)>,
        outputs: Vec<TXOutput>,
        wallet: &Wallet,
    ) -> Result<Transaction> {
        let mut vin: Vec<TXInput> = outpoints
            .into_iter()
            .map(|(txid, vout)| TXInput {
                txid,
                vout,
                signature: vec![],
                pub_key: wallet.get_public_key().to_vec(),
            })
            .collect();

        let id = Self::compute_id(&vin, &outputs);
        for input in vin.iter_mut() {
            input.signature = wallet.sign(&id)?;
        }

        Ok(Transaction {
            id,
            vin,
            vout: outputs,
        })
    }

    /// Transaction id: SHA-256 of the signing payload. Signatures of spending
    /// inputs are left out, so attaching them never changes the id.
    pub fn compute_id(vin: &[TXInput], vout: &[TXOutput]) -> Vec<u8> {
        sha256_digest(&Self::signing_payload(vin, vout))
    }

    fn signing_payload(vin: &[TXInput], vout: &[TXOutput]) -> Vec<u8> {
        let mut buf = vec![];
        put_len(&mut buf, vin.len());
        for input in vin {
            put_bytes(&mut buf, &input.txid);
            buf.extend_from_slice(&(input.vout as u64).to_be_bytes());
            if input.is_coinbase_input() {
                put_bytes(&mut buf, &input.signature);
            }
            put_bytes(&mut buf, &input.pub_key);
        }
        Self::put_outputs(&mut buf, vout);
        buf
    }

    fn put_outputs(buf: &mut Vec<u8>, vout: &[TXOutput]) {
        put_len(buf, vout.len());
        for output in vout {
            buf.extend_from_slice(&output.value.to_be_bytes());
            put_bytes(buf, &output.pub_key_hash);
        }
    }

    /// Canonical encoding of every field, signatures included. This is what
    /// proof-of-work commits to.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];
        put_bytes(&mut buf, &self.id);
        put_len(&mut buf, self.vin.len());
        for input in &self.vin {
            put_bytes(&mut buf, &input.txid);
            buf.extend_from_slice(&(input.vout as u64).to_be_bytes());
            put_bytes(&mut buf, &input.signature);
            put_bytes(&mut buf, &input.pub_key);
        }
        Self::put_outputs(&mut buf, &self.vout);
        buf
    }

    /// Check signatures, references and value balance against confirmed
    /// transactions. Store failures are errors; every rule violation is `Ok(false)`.
    pub fn verify<L: TransactionLookup + ?Sized>(&self, lookup: &L) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(self.verify_coinbase());
        }

        let txid_hex = self.get_id_hex();
        if self.vin.is_empty() || self.vout.is_empty() {
            warn!("Transaction {txid_hex} has no inputs or no outputs");
            return Ok(false);
        }
        if self.id != self.hash() {
            warn!("Transaction {txid_hex} id does not match its contents");
            return Ok(false);
        }

        let mut seen = HashSet::new();
        let mut input_value = 0u64;
        for vin in &self.vin {
            if vin.is_coinbase_input() || !seen.insert((vin.txid.as_slice(), vin.vout)) {
                warn!("Transaction {txid_hex} has a malformed or repeated input");
                return Ok(false);
            }

            let prev_tx = match lookup.find_transaction(vin.get_txid())? {
                Some(tx) => tx,
                None => {
                    warn!(
                        "Transaction {txid_hex} references unknown transaction {}",
                        HEXLOWER.encode(vin.get_txid())
                    );
                    return Ok(false);
                }
            };
            let prev_out = match prev_tx.vout.get(vin.vout) {
                Some(out) => out,
                None => {
                    warn!(
                        "Transaction {txid_hex} references missing output {}:{}",
                        prev_tx.get_id_hex(),
                        vin.vout
                    );
                    return Ok(false);
                }
            };

            if !vin.uses_key(prev_out.get_pub_key_hash()) {
                warn!("Transaction {txid_hex} spends an output locked to another key");
                return Ok(false);
            }
            if !ecdsa_p256_sha256_sign_verify(&vin.pub_key, &vin.signature, &self.id) {
                warn!("Transaction {txid_hex} carries a bad signature");
                return Ok(false);
            }

            input_value = match input_value.checked_add(prev_out.get_value()) {
                Some(sum) => sum,
                None => return Ok(false),
            };
        }

        let output_value = match self.get_output_value() {
            Ok(value) => value,
            Err(_) => return Ok(false),
        };
        if input_value < output_value {
            warn!("Transaction {txid_hex} creates value: inputs={input_value}, outputs={output_value}");
            return Ok(false);
        }
        Ok(true)
    }

    fn verify_coinbase(&self) -> bool {
        if self.vout.is_empty() {
            warn!("Coinbase {} pays nobody", self.get_id_hex());
            return false;
        }
        self.id == self.hash()
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].is_coinbase_input()
    }

    fn hash(&self) -> Vec<u8> {
        Self::compute_id(&self.vin, &self.vout)
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_hex(&self) -> String {
        HEXLOWER.encode(&self.id)
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn get_output_value(&self) -> Result<u64> {
        self.vout.iter().try_fold(0u64, |total, out| {
            total
                .checked_add(out.get_value())
                .ok_or_else(|| BlockchainError::InvalidTransaction("output value overflow".to_string()))
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed(txs: &[&Transaction]) -> HashMap<Vec<u8>, Transaction> {
        txs.iter()
            .map(|tx| (tx.get_id().to_vec(), (*tx).clone()))
            .collect()
    }

    fn funded_wallet() -> (Wallet, Transaction) {
        let wallet = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(wallet.get_address(), "reward").unwrap();
        (wallet, coinbase)
    }

    #[test]
    fn test_coinbase_shape() {
        let (wallet, coinbase) = funded_wallet();
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.get_vout().len(), 1);
        assert_eq!(coinbase.get_vout()[0].get_value(), BLOCK_REWARD);
        assert!(coinbase.get_vout()[0].is_locked_with_key(&wallet.get_pub_key_hash()));
        assert!(coinbase.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn test_coinbase_ids_are_unique_for_same_recipient() {
        let wallet = Wallet::new().unwrap();
        let a = Transaction::new_coinbase_tx(wallet.get_address(), "reward tx").unwrap();
        let b = Transaction::new_coinbase_tx(wallet.get_address(), "reward tx").unwrap();
        assert_ne!(a.get_id(), b.get_id());
    }

    #[test]
    fn test_coinbase_rejects_invalid_address() {
        let err = Transaction::new_coinbase_tx("Addr1", "reward").unwrap_err();
        assert!(matches!(err, BlockchainError::InvalidAddress(_)));
    }

    #[test]
    fn test_signed_spend_verifies() {
        let (sender, coinbase) = funded_wallet();
        let recipient = Wallet::new().unwrap();
        let outputs = vec![
            TXOutput::new(BLOCK_REWARD / 2, recipient.get_address()).unwrap(),
            TXOutput::new(BLOCK_REWARD / 2, sender.get_address()).unwrap(),
        ];
        let tx = Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 0)], outputs, &sender)
            .unwrap();

        assert!(!tx.is_coinbase());
        assert!(tx.verify(&confirmed(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_id_is_stable_across_signing() {
        let (sender, coinbase) = funded_wallet();
        let outputs = vec![TXOutput::new(10, sender.get_address()).unwrap()];
        let tx = Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 0)], outputs, &sender)
            .unwrap();

        let mut blanked = tx.get_vin().to_vec();
        for input in blanked.iter_mut() {
            input.signature.clear();
        }
        assert_eq!(Transaction::compute_id(&blanked, tx.get_vout()), tx.get_id());
    }

    #[test]
    fn test_tampered_amount_fails() {
        let (sender, coinbase) = funded_wallet();
        let outputs = vec![TXOutput::new(10, sender.get_address()).unwrap()];
        let mut tx =
            Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 0)], outputs, &sender)
                .unwrap();
        tx.vout[0].value = 20;
        assert!(!tx.verify(&confirmed(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_spending_someone_elses_output_fails() {
        let (_owner, coinbase) = funded_wallet();
        let thief = Wallet::new().unwrap();
        let outputs = vec![TXOutput::new(10, thief.get_address()).unwrap()];
        let tx = Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 0)], outputs, &thief)
            .unwrap();
        assert!(!tx.verify(&confirmed(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_swapped_signature_fails() {
        let (sender, coinbase) = funded_wallet();
        let outputs = vec![TXOutput::new(10, sender.get_address()).unwrap()];
        let mut tx =
            Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 0)], outputs, &sender)
                .unwrap();
        tx.vin[0].signature = sender.sign(b"some other message").unwrap();
        assert!(!tx.verify(&confirmed(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_unknown_reference_fails() {
        let (sender, coinbase) = funded_wallet();
        let outputs = vec![TXOutput::new(10, sender.get_address()).unwrap()];
        let tx = Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 0)], outputs, &sender)
            .unwrap();
        assert!(!tx.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn test_out_of_range_output_index_fails() {
        let (sender, coinbase) = funded_wallet();
        let outputs = vec![TXOutput::new(10, sender.get_address()).unwrap()];
        let tx = Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 3)], outputs, &sender)
            .unwrap();
        assert!(!tx.verify(&confirmed(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_value_creation_fails() {
        let (sender, coinbase) = funded_wallet();
        let outputs = vec![TXOutput::new(BLOCK_REWARD + 1, sender.get_address()).unwrap()];
        let tx = Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 0)], outputs, &sender)
            .unwrap();
        assert!(!tx.verify(&confirmed(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_repeated_input_fails() {
        let (sender, coinbase) = funded_wallet();
        let outputs = vec![TXOutput::new(BLOCK_REWARD, sender.get_address()).unwrap()];
        let outpoint = (coinbase.get_id().to_vec(), 0);
        let tx = Transaction::new_signed(vec![outpoint.clone(), outpoint], outputs, &sender)
            .unwrap();
        assert!(!tx.verify(&confirmed(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_serialize_round_trip_keeps_id() {
        let (sender, coinbase) = funded_wallet();
        let outputs = vec![TXOutput::new(7, sender.get_address()).unwrap()];
        let tx = Transaction::new_signed(vec![(coinbase.get_id().to_vec(), 0)], outputs, &sender)
            .unwrap();

        let decoded = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.get_id());
        assert_eq!(decoded.to_bytes(), tx.to_bytes());
    }

    #[test]
    fn test_zero_value_output_rejected() {
        let wallet = Wallet::new().unwrap();
        assert!(TXOutput::new(0, wallet.get_address()).is_err());
    }
}
