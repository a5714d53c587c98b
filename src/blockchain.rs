//! Blockchain service: genesis, transaction intake and chain-level queries

use crate::block::Block;
use crate::chain_store::{ChainStore, ValidationReport};
use crate::difficulty_adjustment::DifficultyHandle;
use crate::transaction::{Transaction, TransactionStatus};
use crate::{now_millis, ChainConfig, ChainError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Aggregate chain statistics, computed fresh on every call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStats {
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub pending_count: usize,
    /// Timestamp of the head block (unix milliseconds)
    pub last_block_time: Option<u64>,
    pub current_difficulty: u32,
}

/// Blockchain service
pub struct BlockchainService {
    store: Arc<ChainStore>,
    difficulty: DifficultyHandle,
    max_payload_entries: usize,
    max_payload_bytes: usize,
    genesis_lock: Mutex<()>,
}

impl BlockchainService {
    pub fn new(store: Arc<ChainStore>, difficulty: DifficultyHandle, config: &ChainConfig) -> Self {
        Self {
            store,
            difficulty,
            max_payload_entries: config.max_payload_entries,
            max_payload_bytes: config.max_payload_bytes,
            genesis_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    pub fn difficulty(&self) -> &DifficultyHandle {
        &self.difficulty
    }

    /// Create block 0 if it does not exist yet. Idempotent.
    pub async fn initialize_genesis(&self) -> Result<Block> {
        let _guard = self.genesis_lock.lock().await;

        if let Some(genesis) = self.store.block_by_number(0).await {
            debug!("Genesis already present: {}", genesis.hash);
            return Ok(genesis);
        }

        let genesis = Block::genesis(now_millis());
        self.store.append_block(genesis.clone()).await?;
        info!("Genesis block created: {}", genesis.hash);
        Ok(genesis)
    }

    /// True once the genesis block exists
    pub async fn is_ready(&self) -> bool {
        self.store.block_count().await > 0
    }

    async fn ensure_ready(&self) -> Result<()> {
        if self.is_ready().await {
            Ok(())
        } else {
            Err(ChainError::NotReady)
        }
    }

    /// Validate and enqueue a transaction; returns its hash
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<String> {
        self.ensure_ready().await?;
        tx.validate(self.max_payload_entries, self.max_payload_bytes)?;

        let kind = tx.kind;
        let hash = self.store.add_pending_transaction(tx).await?;
        info!("Transaction submitted to pending pool: {} ({})", hash, kind.as_str());
        Ok(hash)
    }

    pub async fn pending_transactions(&self, limit: usize) -> Vec<Transaction> {
        self.store.drain_pending_for_task(limit).await
    }

    pub async fn head_block(&self) -> Option<Block> {
        self.store.head_block().await
    }

    pub async fn block_by_number(&self, number: u64) -> Option<Block> {
        self.store.block_by_number(number).await
    }

    pub async fn transaction_by_hash(&self, hash: &str) -> Option<Transaction> {
        self.store.transaction_by_hash(hash).await
    }

    pub async fn transaction_status(&self, hash: &str) -> Option<TransactionStatus> {
        self.store.transaction_status(hash).await
    }

    /// Get chain statistics
    pub async fn get_stats(&self) -> ChainStats {
        ChainStats {
            total_blocks: self.store.block_count().await,
            total_transactions: self.store.confirmed_count().await,
            pending_count: self.store.pending_count().await,
            last_block_time: self.store.head_block().await.map(|b| b.timestamp),
            current_difficulty: self.difficulty.get(),
        }
    }

    /// Full validation report with the first failing block
    pub async fn validation_report(&self) -> ValidationReport {
        self.store.validate_chain().await
    }

    /// Pass/fail chain validation; the failure detail is only logged
    pub async fn validate_chain(&self) -> bool {
        let report = self.store.validate_chain().await;
        match &report.failure {
            None => {
                debug!("Chain valid ({} blocks)", report.blocks_checked);
                true
            }
            Some(failure) => {
                warn!(
                    "Chain validation failed at block {}: {}",
                    failure.index, failure.reason
                );
                false
            }
        }
    }
}
