//! catcoin: a minimal proof-of-work ledger.
//!
//! [`blockchain`] holds the core entities: signed [`Transaction`]s, mined
//! [`Block`]s and the [`Blockchain`] that owns them together with the pool of
//! pending transactions. [`api`] exposes a ledger over HTTP and [`config`]
//! loads the parameters of both.

pub mod api;
pub mod blockchain;
pub mod config;

pub use blockchain::{Address, Block, Blockchain, BlockchainError, Transaction, Wallet};
