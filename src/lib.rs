//! Private blockchain and distributed mining engine for QuantumShield
//!
//! This crate implements the chain core behind the QuantumShield platform:
//! - SHA-256 transaction hashes, Merkle roots and leading-zero proof of work
//! - An append-only block log with a pending transaction pool
//! - A single-task-in-flight mining coordinator for external miners
//! - A threshold difficulty controller and a reward distributor
//!
//! Brute-force nonce search happens in external miner processes. The core
//! only builds work, verifies submissions and appends blocks.

pub mod block;
pub mod blockchain;
pub mod chain_store;
pub mod difficulty_adjustment;
pub mod miner;
pub mod mining;
pub mod node;
pub mod pow;
pub mod reward_distribution;
pub mod scheduler;
pub mod transaction;

pub use block::{Block, BlockBuilder, BlockHeader, BlockTemplate};
pub use blockchain::{BlockchainService, ChainStats};
pub use chain_store::{ChainStore, CorruptionReason, ValidationFailure, ValidationReport};
pub use difficulty_adjustment::{
    DifficultyAdjustmentRecord, DifficultyController, DifficultyHandle, DifficultyStats,
};
pub use miner::{Miner, MinerRegistry};
pub use mining::{MiningCoordinator, MiningStats, MiningTask, TaskStatus};
pub use node::ChainNode;
pub use pow::{block_hash, is_valid_proof_of_work, merkle_root, transaction_hash};
pub use reward_distribution::{
    BlockRewardRecord, InMemoryLedger, RewardDistributor, RewardStats, TokenLedger,
};
pub use scheduler::BackgroundTasks;
pub use transaction::{Payload, Transaction, TransactionKind, TransactionStatus};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Smallest indivisible token units per whole token.
pub const BASE_UNITS_PER_TOKEN: u128 = 100_000_000;

/// Previous-hash value carried by the genesis block.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Invalid transaction: {0}")]
    Validation(String),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Invalid linkage: expected previous hash {expected}, got {found}")]
    InvalidLinkage { expected: String, found: String },

    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    #[error("Mining task not found: {0}")]
    TaskNotFound(String),

    #[error("Mining task expired: {0}")]
    TaskExpired(String),

    #[error("Mining task already completed: {0}")]
    TaskAlreadyCompleted(String),

    #[error("Chain corruption at block {index}: {reason}")]
    ChainCorruption { index: u64, reason: String },

    #[error("Chain not initialized: genesis block missing")]
    NotReady,

    #[error("Token ledger error: {0}")]
    Ledger(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// Whether the caller may retry the same operation and expect a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidLinkage { .. }
                | ChainError::Ledger(_)
                | ChainError::Storage(_)
                | ChainError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Tunables for the chain core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Leading hex zeros required when the chain starts
    pub initial_difficulty: u32,
    /// Difficulty floor
    pub min_difficulty: u32,
    /// Difficulty ceiling (a SHA-256 hex digest has 64 characters)
    pub max_difficulty: u32,
    /// Target interval between blocks
    pub target_block_time_secs: u64,
    /// Number of recent blocks inspected by the difficulty controller
    pub difficulty_window: usize,
    /// Raise difficulty when the mean interval is below this fraction of target
    pub difficulty_lower_band: f64,
    /// Lower difficulty when the mean interval is above this fraction of target
    pub difficulty_upper_band: f64,
    /// Period of the difficulty loop
    pub difficulty_adjust_interval_secs: u64,
    /// Maximum pending transactions packed into one mining task
    pub max_transactions_per_block: usize,
    /// Lifetime of a mining task before it expires
    pub task_timeout_secs: u64,
    /// Period of the coordinator loop (expiry + task creation)
    pub task_poll_interval_secs: u64,
    /// Fixed reward credited to the miner of each block
    pub block_reward: u128,
    /// Reward credited to every recently active miner each participation period
    pub participation_reward: u128,
    /// Trailing activity window for participation rewards
    pub participation_window_secs: u64,
    /// Period of the participation reward loop
    pub participation_interval_secs: u64,
    /// Attempts before a failed credit is dropped from the outbox
    pub max_credit_attempts: u32,
    /// Maximum number of payload entries per transaction
    pub max_payload_entries: usize,
    /// Maximum total payload size (keys + values) per transaction
    pub max_payload_bytes: usize,
    /// Directory for the durable block log; in-memory when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: 4,
            min_difficulty: 1,
            max_difficulty: 64,
            target_block_time_secs: 60,
            difficulty_window: 10,
            difficulty_lower_band: 0.8,
            difficulty_upper_band: 1.2,
            difficulty_adjust_interval_secs: 3_600,
            max_transactions_per_block: 100,
            task_timeout_secs: 300,
            task_poll_interval_secs: 5,
            block_reward: 50 * BASE_UNITS_PER_TOKEN,
            participation_reward: BASE_UNITS_PER_TOKEN,
            participation_window_secs: 3_600,
            participation_interval_secs: 3_600,
            max_credit_attempts: 5,
            max_payload_entries: 32,
            max_payload_bytes: 4_096,
            data_dir: None,
        }
    }
}

impl ChainConfig {
    /// Load a configuration from a TOML file; missing keys fall back to defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: ChainConfig = toml::from_str(&raw)
            .map_err(|e| ChainError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_difficulty == 0 {
            return Err(ChainError::Config("min_difficulty must be at least 1".to_string()));
        }
        if self.min_difficulty > self.max_difficulty {
            return Err(ChainError::Config(format!(
                "min_difficulty {} exceeds max_difficulty {}",
                self.min_difficulty, self.max_difficulty
            )));
        }
        if self.max_difficulty > 64 {
            return Err(ChainError::Config("max_difficulty cannot exceed 64".to_string()));
        }
        if self.initial_difficulty < self.min_difficulty
            || self.initial_difficulty > self.max_difficulty
        {
            return Err(ChainError::Config(format!(
                "initial_difficulty {} outside [{}, {}]",
                self.initial_difficulty, self.min_difficulty, self.max_difficulty
            )));
        }
        if self.difficulty_window < 2 {
            return Err(ChainError::Config("difficulty_window must be at least 2".to_string()));
        }
        if !(self.difficulty_lower_band > 0.0
            && self.difficulty_lower_band < 1.0
            && self.difficulty_upper_band > 1.0)
        {
            return Err(ChainError::Config(format!(
                "difficulty bands must satisfy 0 < lower < 1 < upper, got {} / {}",
                self.difficulty_lower_band, self.difficulty_upper_band
            )));
        }
        if self.target_block_time_secs == 0 {
            return Err(ChainError::Config("target_block_time_secs must be positive".to_string()));
        }
        if self.task_timeout_secs == 0 {
            return Err(ChainError::Config("task_timeout_secs must be positive".to_string()));
        }
        if self.max_transactions_per_block == 0 {
            return Err(ChainError::Config(
                "max_transactions_per_block must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
