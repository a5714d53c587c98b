//! Chain transactions and their shape validation

use crate::{now_millis, pow, ChainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque key-value payload attached to a transaction.
///
/// A `BTreeMap` keeps the canonical serialization (and so the hash) independent
/// of insertion order. Size is bounded by `ChainConfig::max_payload_entries` and
/// `ChainConfig::max_payload_bytes`.
pub type Payload = BTreeMap<String, String>;

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Token transfer between two addresses
    Transfer,
    /// Reward issued by the system
    Reward,
    /// Firmware update record submitted by device tooling
    FirmwareUpdate,
    /// Device or identity registration record
    DeviceRegistration,
    /// The system transaction carried by block 0
    Genesis,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Reward => "reward",
            TransactionKind::FirmwareUpdate => "firmware_update",
            TransactionKind::DeviceRegistration => "device_registration",
            TransactionKind::Genesis => "genesis",
        }
    }
}

/// Where a transaction currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// In the pending pool
    Pending,
    /// Included in an appended block
    Confirmed,
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender address
    pub sender: String,
    /// Recipient address
    pub recipient: String,
    /// Amount in base units
    pub amount: u128,
    /// Transaction kind
    pub kind: TransactionKind,
    /// Opaque payload
    #[serde(default)]
    pub payload: Payload,
    /// Creation timestamp (unix milliseconds)
    pub timestamp: u64,
    /// Content hash, assigned on submission and immutable afterwards
    #[serde(default)]
    pub hash: Option<String>,
    /// Opaque signature; verification happens outside the chain core
    #[serde(default)]
    pub signature: Option<String>,
}

impl Transaction {
    /// Create new transaction stamped with the current time
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: u128,
        kind: TransactionKind,
        payload: Payload,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            kind,
            payload,
            timestamp: now_millis(),
            hash: None,
            signature: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Recompute the content hash from the economic fields
    pub fn compute_hash(&self) -> String {
        pow::transaction_hash(self)
    }

    /// Assign the content hash, or check a caller-provided one against the content.
    pub fn assign_hash(&mut self) -> Result<&str> {
        let computed = self.compute_hash();
        match &self.hash {
            Some(existing) if *existing != computed => {
                return Err(ChainError::Validation(format!(
                    "hash {} does not match content hash {}",
                    existing, computed
                )));
            }
            Some(_) => {}
            None => self.hash = Some(computed),
        }
        Ok(self.hash.as_deref().unwrap_or_default())
    }

    /// Basic shape checks applied before a transaction enters the pool
    pub fn validate(&self, max_payload_entries: usize, max_payload_bytes: usize) -> Result<()> {
        if self.sender.trim().is_empty() {
            return Err(ChainError::Validation("sender address cannot be empty".to_string()));
        }

        if self.recipient.trim().is_empty() {
            return Err(ChainError::Validation(
                "recipient address cannot be empty".to_string(),
            ));
        }

        if self.kind == TransactionKind::Genesis {
            return Err(ChainError::Validation(
                "genesis transactions cannot be submitted".to_string(),
            ));
        }

        if self.payload.len() > max_payload_entries {
            return Err(ChainError::Validation(format!(
                "payload has {} entries, limit is {}",
                self.payload.len(),
                max_payload_entries
            )));
        }

        let payload_bytes: usize = self.payload.iter().map(|(k, v)| k.len() + v.len()).sum();
        if payload_bytes > max_payload_bytes {
            return Err(ChainError::Validation(format!(
                "payload is {} bytes, limit is {}",
                payload_bytes, max_payload_bytes
            )));
        }

        Ok(())
    }
}
