use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::sync::atomic::{AtomicBool, Ordering};

use super::transaction::Transaction;

/// Previous-hash value carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Errors that can stop a proof-of-work search
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MiningError {
    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Transactions included in this block, in pool order
    pub(crate) transactions: Vec<Transaction>,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub(crate) timestamp: DateTime<Utc>,

    /// Hash of the previous block
    pub(crate) previous_hash: String,

    /// Proof-of-work counter
    pub(crate) nonce: u64,

    /// Hash of this block
    pub(crate) hash: String,
}

impl Block {
    /// Creates a new, un-mined block
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include in the block
    /// * `timestamp` - Creation time of the block
    /// * `previous_hash` - The hash of the previous block
    pub fn new(transactions: Vec<Transaction>, timestamp: DateTime<Utc>, previous_hash: String) -> Self {
        let mut block = Block {
            transactions,
            timestamp,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The canonical first block: no transactions, epoch timestamp, never mined
    pub fn genesis() -> Self {
        Block::new(Vec::new(), DateTime::<Utc>::UNIX_EPOCH, GENESIS_PREVIOUS_HASH.to_string())
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the transactions, previous hash, timestamp and
    /// nonce as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        let block_data = serde_json::json!({
            "transactions": self.transactions,
            "previous_hash": self.previous_hash,
            "timestamp": self.timestamp,
            "nonce": self.nonce,
        });

        let mut hasher = Sha256::new();
        hasher.update(block_data.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether the stored hash starts with `difficulty` zero hex digits
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.len() >= difficulty && self.hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// Searches nonces until the hash meets `difficulty`.
    ///
    /// Blocks the calling thread until a hash is found; there is no upper
    /// bound on the number of attempts.
    pub fn mine(&mut self, difficulty: usize) {
        while !self.meets_difficulty(difficulty) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
        }

        info!("Block mined: {}", self.hash);
    }

    /// Like [`Block::mine`], but gives up once `cancel` is set.
    ///
    /// A cancelled block is reset to nonce 0 so that it is left exactly as
    /// it was constructed.
    pub fn mine_with_cancel(&mut self, difficulty: usize, cancel: &AtomicBool) -> Result<(), MiningError> {
        let mut attempts = 0u64;

        while !self.meets_difficulty(difficulty) {
            if cancel.load(Ordering::Relaxed) {
                self.nonce = 0;
                self.hash = self.calculate_hash();
                debug!("Mining cancelled after {} attempts", attempts);
                return Err(MiningError::Cancelled { attempts });
            }

            self.nonce += 1;
            self.hash = self.calculate_hash();
            attempts += 1;
        }

        info!("Block mined: {}", self.hash);
        Ok(())
    }

    /// Returns true iff every contained transaction verifies.
    ///
    /// A transaction whose verification errors counts as invalid.
    pub fn verify_transactions(&self) -> bool {
        self.transactions
            .iter()
            .all(|transaction| matches!(transaction.verify(), Ok(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wallet;

    fn reward_block() -> Block {
        let miner = Wallet::new();
        let transactions = vec![Transaction::new_reward(miner.address().clone(), 100.0)];
        Block::new(transactions, Utc::now(), "previous_hash".to_string())
    }

    #[test]
    fn test_new_block() {
        let block = reward_block();

        assert_eq!(block.nonce(), 0);
        assert_eq!(block.previous_hash(), "previous_hash");
        assert_eq!(block.transactions().len(), 1);
        assert_eq!(block.hash(), block.calculate_hash());
    }

    #[test]
    fn test_calculate_hash() {
        let block = reward_block();

        let hash = block.calculate_hash();
        assert_eq!(hash.len(), 64); // SHA-256 hash is 64 characters in hex
        assert_eq!(hash, block.calculate_hash());
    }

    #[test]
    fn test_hash_depends_on_nonce() {
        let mut block = reward_block();
        let before = block.calculate_hash();

        block.nonce += 1;

        assert_ne!(before, block.calculate_hash());
    }

    #[test]
    fn test_genesis_is_canonical() {
        let genesis = Block::genesis();

        assert_eq!(genesis, Block::genesis());
        assert_eq!(genesis.previous_hash(), "0");
        assert!(genesis.transactions().is_empty());
        assert_eq!(genesis.nonce(), 0);
    }

    #[test]
    fn test_mine_meets_difficulty() {
        let mut block = reward_block();

        block.mine(2);

        assert!(block.hash().starts_with("00"));
        assert_eq!(block.hash(), block.calculate_hash());
    }

    #[test]
    fn test_mine_with_zero_difficulty_keeps_nonce() {
        let mut block = reward_block();

        block.mine(0);

        assert_eq!(block.nonce(), 0);
    }

    #[test]
    fn test_mine_with_cancel_completes_when_not_cancelled() {
        let mut block = reward_block();
        let cancel = AtomicBool::new(false);

        block.mine_with_cancel(1, &cancel).unwrap();

        assert!(block.meets_difficulty(1));
    }

    #[test]
    fn test_cancelled_mining_leaves_block_untouched() {
        let mut block = reward_block();
        let original = block.clone();
        let cancel = AtomicBool::new(true);

        // 64 zero digits is unreachable, so only the flag can end the loop
        let result = block.mine_with_cancel(64, &cancel);

        assert_eq!(result, Err(MiningError::Cancelled { attempts: 0 }));
        assert_eq!(block, original);
    }

    #[test]
    fn test_verify_transactions() {
        let sender = Wallet::new();
        let recipient = Wallet::new();

        let mut signed = Transaction::new(sender.address().clone(), recipient.address().clone(), 3.0);
        signed.sign(&sender).unwrap();
        let unsigned = Transaction::new(sender.address().clone(), recipient.address().clone(), 3.0);

        let good = Block::new(vec![signed.clone()], Utc::now(), "0".to_string());
        assert!(good.verify_transactions());

        let bad = Block::new(vec![signed, unsigned], Utc::now(), "0".to_string());
        assert!(!bad.verify_transactions());
    }
}
