use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::{put_bytes, sha256_digest};
use data_encoding::HEXLOWER;
use log::debug;
use num_bigint::BigUint;
use std::ops::ShlAssign;

/// Nonce search over a block candidate.
///
/// A hash is accepted when, read as a big-endian integer, it is strictly
/// below `2^(256 - difficulty)`.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigUint,
    // Hash input minus the trailing nonce; fixed for the whole search.
    prefix: Vec<u8>,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> ProofOfWork<'a> {
        let difficulty = block.get_difficulty();
        ProofOfWork {
            block,
            target: Self::target_for(difficulty),
            prefix: Self::prepare_prefix(block),
        }
    }

    pub fn target_for(difficulty: u32) -> BigUint {
        let mut target = BigUint::from(1u32);
        target.shl_assign(256u32.saturating_sub(difficulty));
        target
    }

    /// Recompute the hash for the stored nonce and check it against the
    /// stored hash and the target.
    pub fn validate(block: &Block) -> bool {
        let pow = ProofOfWork::new_proof_of_work(block);
        let hash = pow.hash_with_nonce(block.get_nonce());
        hash.as_slice() == block.get_hash() && pow.meets_target(&hash)
    }

    /// `validate`, plus the block must declare the difficulty its chain runs at.
    pub fn validate_with_difficulty(block: &Block, difficulty: u32) -> bool {
        block.get_difficulty() == difficulty && ProofOfWork::validate(block)
    }

    fn prepare_prefix(block: &Block) -> Vec<u8> {
        let mut data_bytes = vec![];
        put_bytes(&mut data_bytes, block.get_pre_block_hash());
        data_bytes.extend(block.hash_transactions());
        data_bytes.extend(block.get_timestamp().to_be_bytes());
        data_bytes.extend(block.get_difficulty().to_be_bytes());
        data_bytes
    }

    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data_bytes = Vec::with_capacity(self.prefix.len() + 8);
        data_bytes.extend_from_slice(&self.prefix);
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    fn hash_with_nonce(&self, nonce: u64) -> Vec<u8> {
        sha256_digest(self.prepare_data(nonce).as_slice())
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigUint::from_bytes_be(hash) < self.target
    }

    /// Search nonces from zero upward; returns the first that meets the target.
    pub fn run(&self) -> Result<(u64, Vec<u8>)> {
        debug!(
            "Mining on top of {} at difficulty {}",
            HEXLOWER.encode(self.block.get_pre_block_hash()),
            self.block.get_difficulty()
        );
        let mut nonce = 0u64;
        loop {
            let hash = self.hash_with_nonce(nonce);
            if self.meets_target(&hash) {
                debug!("Found nonce {nonce}: {}", HEXLOWER.encode(&hash));
                return Ok((nonce, hash));
            }
            nonce = nonce.checked_add(1).ok_or_else(|| {
                BlockchainError::Mining("nonce space exhausted".to_string())
            })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    fn create_test_block(difficulty: u32) -> Block {
        let wallet = Wallet::new().unwrap();
        let coinbase_tx = Transaction::new_coinbase_tx(wallet.get_address(), "test").unwrap();
        Block::new_block(vec![], &[coinbase_tx], difficulty).unwrap()
    }

    #[test]
    fn test_mined_block_validates() {
        let block = create_test_block(8);
        assert!(ProofOfWork::validate(&block));
    }

    #[test]
    fn test_next_nonce_fails_at_nontrivial_difficulty() {
        let mut block = create_test_block(16);
        assert!(ProofOfWork::validate(&block));
        block.set_nonce_for_test(block.get_nonce() + 1);
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_easier_block_fails_chain_difficulty() {
        let block = create_test_block(1);
        assert!(ProofOfWork::validate(&block));
        assert!(ProofOfWork::validate_with_difficulty(&block, 1));
        assert!(!ProofOfWork::validate_with_difficulty(&block, 16));
    }

    #[test]
    fn test_higher_difficulty_has_smaller_target() {
        assert!(ProofOfWork::target_for(2) < ProofOfWork::target_for(1));
        assert_eq!(ProofOfWork::target_for(256 - 8), BigUint::from(256u32));
    }

    #[test]
    fn test_hash_meets_declared_leading_zero_bits() {
        let block = create_test_block(12);
        let hash = block.get_hash();
        assert_eq!(hash[0], 0);
        assert_eq!(hash[1] & 0xF0, 0);
    }

    #[test]
    fn test_prepare_data_depends_on_nonce() {
        let block = create_test_block(1);
        let pow = ProofOfWork::new_proof_of_work(&block);
        assert_eq!(pow.prepare_data(12345), pow.prepare_data(12345));
        assert_ne!(pow.prepare_data(12345), pow.prepare_data(54321));
    }
}
