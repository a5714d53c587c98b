//! Block structures and the builder that assembles mining templates

use crate::transaction::{Transaction, TransactionKind};
use crate::{now_millis, pow, Payload, ZERO_HASH};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fields covered by the block hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: u64,
    pub nonce: u64,
    pub difficulty: u32,
    pub miner: String,
}

/// Complete block structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number, 0 for genesis
    pub number: u64,
    /// Hash of the previous block
    pub previous_hash: String,
    /// Merkle root of `transactions`
    pub merkle_root: String,
    /// Included transactions in template order
    pub transactions: Vec<Transaction>,
    /// Template timestamp (unix milliseconds)
    pub timestamp: u64,
    /// Nonce found by the miner
    pub nonce: u64,
    /// Leading hex zeros in effect when mined
    pub difficulty: u32,
    /// Address credited for this block
    pub miner: String,
    /// Block hash
    pub hash: String,
}

impl Block {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            number: self.number,
            previous_hash: self.previous_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce,
            difficulty: self.difficulty,
            miner: self.miner.clone(),
        }
    }

    /// Recompute the hash from the header fields
    pub fn compute_hash(&self) -> String {
        pow::block_hash(&self.header())
    }

    pub fn transaction_hashes(&self) -> Vec<String> {
        self.transactions
            .iter()
            .map(|tx| tx.hash.clone().unwrap_or_else(|| tx.compute_hash()))
            .collect()
    }

    /// Genesis block carrying a single zero-amount system transaction.
    ///
    /// Genesis is recorded with difficulty 0 so its hash satisfies the
    /// proof-of-work check without any nonce search.
    pub fn genesis(timestamp: u64) -> Self {
        let mut payload = Payload::new();
        payload.insert("message".to_string(), "QuantumShield genesis".to_string());

        let mut system_tx = Transaction::new("system", "genesis", 0, TransactionKind::Genesis, payload)
            .with_timestamp(timestamp);
        system_tx.hash = Some(system_tx.compute_hash());

        let template = BlockTemplate {
            number: 0,
            previous_hash: ZERO_HASH.to_string(),
            merkle_root: pow::merkle_root(std::slice::from_ref(&system_tx)),
            transactions: vec![system_tx],
            timestamp,
            difficulty: 0,
        };

        let hash = template.hash_for(0, "system");
        template.seal(0, hash, "system".to_string())
    }
}

/// Block contents minus nonce, hash and miner: what a mining task hands out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub number: u64,
    pub previous_hash: String,
    pub merkle_root: String,
    pub transactions: Vec<Transaction>,
    pub timestamp: u64,
    pub difficulty: u32,
}

impl BlockTemplate {
    /// Header a miner hashes for a given nonce and payout address
    pub fn header_for(&self, nonce: u64, miner: &str) -> BlockHeader {
        BlockHeader {
            number: self.number,
            previous_hash: self.previous_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            timestamp: self.timestamp,
            nonce,
            difficulty: self.difficulty,
            miner: miner.to_string(),
        }
    }

    pub fn hash_for(&self, nonce: u64, miner: &str) -> String {
        pow::block_hash(&self.header_for(nonce, miner))
    }

    pub fn transaction_hashes(&self) -> Vec<String> {
        self.transactions
            .iter()
            .map(|tx| tx.hash.clone().unwrap_or_else(|| tx.compute_hash()))
            .collect()
    }

    /// Turn the template into an immutable block
    pub fn seal(self, nonce: u64, hash: String, miner: String) -> Block {
        Block {
            number: self.number,
            previous_hash: self.previous_hash,
            merkle_root: self.merkle_root,
            transactions: self.transactions,
            timestamp: self.timestamp,
            nonce,
            difficulty: self.difficulty,
            miner,
            hash,
        }
    }
}

/// Block builder for constructing templates on top of a chain head
pub struct BlockBuilder {
    number: u64,
    previous_hash: String,
    difficulty: u32,
    timestamp: Option<u64>,
}

impl BlockBuilder {
    /// Create a builder for the block after `head`
    pub fn on_top_of(head: &Block, difficulty: u32) -> Self {
        Self {
            number: head.number + 1,
            previous_hash: head.hash.clone(),
            difficulty,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Build the template; transaction order is preserved into the Merkle root
    pub fn build(self, transactions: Vec<Transaction>) -> BlockTemplate {
        let merkle_root = pow::merkle_root(&transactions);
        let timestamp = self.timestamp.unwrap_or_else(now_millis);

        debug!(
            "Built template #{} with {} transactions, merkle root {}",
            self.number,
            transactions.len(),
            &merkle_root[..16]
        );

        BlockTemplate {
            number: self.number,
            previous_hash: self.previous_hash,
            merkle_root,
            transactions,
            timestamp,
            difficulty: self.difficulty,
        }
    }
}
