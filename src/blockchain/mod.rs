// Blockchain module
//
// This module contains the ledger core:
// - Block structure and proof of work
// - Blockchain structure (chain, pending pool, balances, validation)
// - Transaction structure
// - Cryptography utilities

pub mod block;
pub mod chain;
pub mod crypto;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, MiningError};
pub use chain::{Blockchain, BlockchainError, ErrorKind};
pub use crypto::{Address, CryptoError, DigitalSignature, Wallet};
pub use transaction::{Sender, Transaction, TransactionError};
