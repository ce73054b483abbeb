use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{verify_signature, Address, DigitalSignature, Wallet};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Signing key does not belong to the sender address")]
    UnauthorizedSigner,

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Transaction not signed")]
    SignatureMissing,
}

/// Who a transaction originates from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// Issued by the ledger itself, e.g. a mining reward
    System,
    /// Sent by the holder of the address' private key
    Wallet(Address),
}

impl Sender {
    pub fn address(&self) -> Option<&Address> {
        match self {
            Sender::System => None,
            Sender::Wallet(address) => Some(address),
        }
    }
}

/// A transfer of `amount` from `sender` to `recipient`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    #[schema(value_type = Object)]
    pub(crate) sender: Sender,

    pub(crate) recipient: Address,

    pub(crate) amount: f64,

    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub(crate) timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a new unsigned transfer between two wallets
    pub fn new(sender: Address, recipient: Address, amount: f64) -> Self {
        Transaction {
            sender: Sender::Wallet(sender),
            recipient,
            amount,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    /// Creates a system-issued transaction crediting `recipient`
    pub fn new_reward(recipient: Address, amount: f64) -> Self {
        Transaction {
            sender: Sender::System,
            recipient,
            amount,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn signature(&self) -> Option<&DigitalSignature> {
        self.signature.as_ref()
    }

    pub fn is_reward(&self) -> bool {
        matches!(self.sender, Sender::System)
    }

    /// Whether `address` sends or receives this transaction
    pub fn involves(&self, address: &Address) -> bool {
        self.sender.address() == Some(address) || &self.recipient == address
    }

    /// SHA-256 digest of the signed content, hex encoded
    pub fn calculate_hash(&self) -> String {
        let content = serde_json::json!({
            "sender": self.sender.address(),
            "recipient": self.recipient,
            "amount": self.amount,
            "timestamp": self.timestamp,
        });

        let mut hasher = Sha256::new();
        hasher.update(content.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Signs the transaction with the sender's wallet
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.sender.address() != Some(wallet.address()) {
            return Err(TransactionError::UnauthorizedSigner);
        }

        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        let hash = self.calculate_hash();
        self.signature = Some(wallet.sign(hash.as_bytes()));

        Ok(())
    }

    /// Checks that the transaction was authorised by its sender.
    ///
    /// System-issued transactions carry no signature and are always
    /// authentic. A wallet transaction without a signature is an error; one
    /// whose key or signature cannot be decoded simply fails verification.
    pub fn verify(&self) -> Result<bool, TransactionError> {
        let address = match &self.sender {
            Sender::System => return Ok(true),
            Sender::Wallet(address) => address,
        };

        let signature = self
            .signature
            .as_ref()
            .ok_or(TransactionError::SignatureMissing)?;

        let public_key = match address.to_public_key() {
            Ok(key) => key,
            Err(err) => {
                debug!("Sender address {} is not a public key: {}", address, err);
                return Ok(false);
            }
        };

        let hash = self.calculate_hash();
        match verify_signature(hash.as_bytes(), signature, &public_key) {
            Ok(valid) => Ok(valid),
            Err(err) => {
                debug!("Malformed signature on transaction from {}: {}", address, err);
                Ok(false)
            }
        }
    }
}
