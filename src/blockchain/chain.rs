use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::sync::atomic::AtomicBool;

use super::block::{Block, MiningError};
use super::crypto::Address;
use super::transaction::{Sender, Transaction, TransactionError};
use crate::config::{ChainConfig, ConfigError};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction must include both a sender and a recipient address")]
    AddressMissing,

    #[error("Transaction signature is not valid")]
    SignatureInvalid,

    #[error("Amount must be a positive number, got {0}")]
    AmountInvalid(f64),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Mining error: {0}")]
    MiningError(#[from] MiningError),

    #[error("Block does not extend the current chain tip or pending pool")]
    StaleBlock,

    #[error("Block hash does not meet difficulty {0}")]
    InsufficientWork(usize),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),
}

/// Discriminant of a refused operation, independent of its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AddressMissing,
    SignatureMissing,
    SignatureInvalid,
    AmountInvalid,
    InsufficientBalance,
    UnauthorizedSigner,
    /// A supplied private key could not be decoded; never produced by the ledger
    InvalidKey,
    Other,
}

impl BlockchainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockchainError::AddressMissing => ErrorKind::AddressMissing,
            BlockchainError::SignatureInvalid => ErrorKind::SignatureInvalid,
            BlockchainError::AmountInvalid(_) => ErrorKind::AmountInvalid,
            BlockchainError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            BlockchainError::TransactionError(TransactionError::SignatureMissing) => {
                ErrorKind::SignatureMissing
            }
            BlockchainError::TransactionError(TransactionError::UnauthorizedSigner) => {
                ErrorKind::UnauthorizedSigner
            }
            _ => ErrorKind::Other,
        }
    }
}

/// The ledger: an append-only chain of mined blocks plus the pool of
/// accepted transactions waiting for the next block.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    chain: Vec<Block>,

    /// Accepted transactions, in insertion order
    pending_transactions: Vec<Transaction>,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: usize,

    /// Mining reward
    mining_reward: f64,
}

impl Blockchain {
    /// Creates a new blockchain with the default parameters
    pub fn new() -> Self {
        Self::from_valid_config(ChainConfig::default())
    }

    /// Creates a new blockchain holding only the genesis block
    ///
    /// Refuses a difficulty above 64, which no hex SHA-256 hash can meet, and
    /// a reward that is not a positive number.
    pub fn with_config(config: ChainConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: ChainConfig) -> Self {
        Blockchain {
            chain: vec![Self::create_genesis_block()],
            pending_transactions: Vec::new(),
            difficulty: config.difficulty,
            mining_reward: config.mining_reward,
        }
    }

    /// Creates the genesis block (first block in the chain)
    pub fn create_genesis_block() -> Block {
        Block::genesis()
    }

    /// Gets the last block in the chain
    pub fn latest_block(&self) -> &Block {
        // The chain is created with a genesis block and never shrinks
        &self.chain[self.chain.len() - 1]
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Number of blocks, genesis included; never zero
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    /// Validates a transaction and adds it to the pending pool
    ///
    /// Checks run in order: addresses, signature, amount, sender balance.
    /// The chain itself is not touched.
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<(), BlockchainError> {
        let sender = match transaction.sender() {
            Sender::Wallet(address) if !address.is_empty() => address.clone(),
            _ => return Err(BlockchainError::AddressMissing),
        };

        if transaction.recipient().is_empty() {
            return Err(BlockchainError::AddressMissing);
        }

        if !transaction.verify()? {
            return Err(BlockchainError::SignatureInvalid);
        }

        let amount = transaction.amount();
        if !(amount.is_finite() && amount > 0.0) {
            return Err(BlockchainError::AmountInvalid(amount));
        }

        let available = self.balance_of(&sender);
        if available < amount {
            return Err(BlockchainError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        debug!("Accepted transaction of {} from {} to {}", amount, sender, transaction.recipient());
        self.pending_transactions.push(transaction);

        Ok(())
    }

    /// Mines every pending transaction plus a reward for `miner_address`
    ///
    /// Blocks until proof-of-work completes, then appends the block and
    /// clears the pool.
    pub fn mine_pending_transactions(&mut self, miner_address: &Address) -> Result<&Block, BlockchainError> {
        let mut block = self.prepare_block(miner_address)?;
        block.mine(self.difficulty);
        self.commit_block(block)
    }

    /// Like [`Blockchain::mine_pending_transactions`], but stops when
    /// `cancel` is set, in which case the ledger is left unchanged.
    pub fn mine_pending_transactions_with_cancel(
        &mut self,
        miner_address: &Address,
        cancel: &AtomicBool,
    ) -> Result<&Block, BlockchainError> {
        let mut block = self.prepare_block(miner_address)?;
        block.mine_with_cancel(self.difficulty, cancel)?;
        self.commit_block(block)
    }

    /// Builds the un-mined candidate block for the current pool and tip
    ///
    /// The pending pool is not modified; the reward transaction only exists
    /// in the returned block.
    pub fn prepare_block(&self, miner_address: &Address) -> Result<Block, BlockchainError> {
        if miner_address.is_empty() {
            return Err(BlockchainError::AddressMissing);
        }

        let mut transactions = self.pending_transactions.clone();
        transactions.push(Transaction::new_reward(miner_address.clone(), self.mining_reward));

        Ok(Block::new(
            transactions,
            Utc::now(),
            self.latest_block().hash().to_string(),
        ))
    }

    /// Appends a mined candidate from [`Blockchain::prepare_block`]
    ///
    /// The block must extend the current tip, carry enough work, hash
    /// correctly and contain a prefix of the pending pool followed by exactly
    /// one reward. The committed transactions leave the pool.
    pub fn commit_block(&mut self, block: Block) -> Result<&Block, BlockchainError> {
        if block.previous_hash() != self.latest_block().hash() {
            return Err(BlockchainError::StaleBlock);
        }

        if !block.meets_difficulty(self.difficulty) {
            return Err(BlockchainError::InsufficientWork(self.difficulty));
        }

        if block.hash() != block.calculate_hash() {
            return Err(BlockchainError::InvalidBlock("stored hash does not match contents".to_string()));
        }

        let (rewards, transfers): (Vec<&Transaction>, Vec<&Transaction>) =
            block.transactions().iter().partition(|tx| tx.is_reward());

        match rewards.as_slice() {
            [reward] if reward.amount() == self.mining_reward => {}
            _ => {
                return Err(BlockchainError::InvalidBlock(format!(
                    "expected exactly one reward of {}",
                    self.mining_reward
                )))
            }
        }

        let committed = transfers.len();
        let is_pool_prefix = committed <= self.pending_transactions.len()
            && transfers
                .iter()
                .zip(&self.pending_transactions)
                .all(|(included, pending)| *included == pending);
        if !is_pool_prefix {
            return Err(BlockchainError::StaleBlock);
        }

        if !block.verify_transactions() {
            return Err(BlockchainError::InvalidBlock("transaction failed verification".to_string()));
        }

        self.pending_transactions.drain(..committed);
        self.chain.push(block);

        let block = self.latest_block();
        info!(
            "Appended block {} at height {} with {} transactions",
            block.hash(),
            self.chain.len() - 1,
            block.transactions().len()
        );

        Ok(block)
    }

    /// Replays the chain to compute the balance of `address`
    ///
    /// Pending transactions are not counted.
    pub fn balance_of(&self, address: &Address) -> f64 {
        let mut balance = 0.0;

        for transaction in self.chain.iter().flat_map(|block| block.transactions()) {
            if transaction.sender().address() == Some(address) {
                balance -= transaction.amount();
            }

            if transaction.recipient() == address {
                balance += transaction.amount();
            }
        }

        balance
    }

    /// Validates the blockchain
    ///
    /// # Returns
    ///
    /// true if the blockchain is valid, false at the first violation
    pub fn is_valid(&self) -> bool {
        match self.chain.first() {
            Some(genesis) if *genesis == Self::create_genesis_block() => {}
            _ => {
                warn!("Genesis block is not canonical");
                return false;
            }
        }

        for (height, pair) in self.chain.windows(2).enumerate() {
            let previous_block = &pair[0];
            let current_block = &pair[1];
            let height = height + 1;

            if !current_block.verify_transactions() {
                warn!("Block {} contains an invalid transaction", height);
                return false;
            }

            if current_block.previous_hash() != previous_block.hash() {
                warn!("Block {} does not link to its predecessor", height);
                return false;
            }

            if current_block.hash() != current_block.calculate_hash() {
                warn!("Block {} hash does not match its contents", height);
                return false;
            }
        }

        true
    }

    /// All chained transactions sent or received by `address`
    ///
    /// The iterator borrows the chain; clone it to walk the sequence again.
    pub fn transactions_for<'a>(
        &'a self,
        address: &'a Address,
    ) -> impl Iterator<Item = &'a Transaction> + Clone + 'a {
        self.chain
            .iter()
            .flat_map(|block| block.transactions().iter())
            .filter(move |transaction| transaction.involves(address))
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}
