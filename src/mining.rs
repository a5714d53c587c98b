//! Mining task coordinator
//!
//! Packages pending transactions into a single outstanding task, hands the
//! same task to every requesting miner and accepts the first valid result.
//! Expiry is cooperative: it is checked on every interaction and by the
//! periodic sweep, never enforced preemptively.

use crate::block::{Block, BlockBuilder, BlockTemplate};
use crate::blockchain::BlockchainService;
use crate::miner::MinerRegistry;
use crate::pow;
use crate::reward_distribution::RewardDistributor;
use crate::{now_millis, ChainConfig, ChainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Terminal tasks kept around for lookups and late-submission rejection
const MAX_TASK_HISTORY: usize = 256;

/// Task state. `Completed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Completed,
    Expired,
}

/// Unit of proof-of-work offered to external miners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningTask {
    pub id: String,
    pub template: BlockTemplate,
    /// Leading zero hex characters required
    pub difficulty: u32,
    /// Creation time (unix milliseconds)
    pub created_at: u64,
    /// Deadline (unix milliseconds)
    pub expires_at: u64,
    pub status: TaskStatus,
    /// Set on the first accepted submission
    pub miner: Option<String>,
}

impl MiningTask {
    pub fn is_open(&self) -> bool {
        self.status == TaskStatus::Open
    }

    pub fn is_past_deadline(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Coordinator statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MiningStats {
    pub tasks_created: u64,
    pub tasks_completed: u64,
    pub tasks_expired: u64,
    pub rejected_submissions: u64,
    pub outstanding_task: Option<String>,
}

#[derive(Default)]
struct CoordinatorState {
    tasks: HashMap<String, MiningTask>,
    order: VecDeque<String>,
    outstanding: Option<String>,
    stats: MiningStats,
}

impl CoordinatorState {
    fn insert(&mut self, task: MiningTask) {
        self.order.push_back(task.id.clone());
        self.tasks.insert(task.id.clone(), task);

        while self.order.len() > MAX_TASK_HISTORY {
            let Some(oldest) = self.order.front() else { break };
            let terminal = self
                .tasks
                .get(oldest)
                .map(|t| !t.is_open())
                .unwrap_or(true);
            if !terminal {
                break;
            }
            if let Some(id) = self.order.pop_front() {
                self.tasks.remove(&id);
            }
        }
    }

    /// Mark the task expired if it is still open. Returns true on transition.
    fn expire(&mut self, task_id: &str) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if !task.is_open() {
            return false;
        }
        task.status = TaskStatus::Expired;
        self.stats.tasks_expired += 1;
        if self.outstanding.as_deref() == Some(task_id) {
            self.outstanding = None;
        }
        true
    }

    fn expire_outstanding_if_due(&mut self, now: u64) -> bool {
        let due = self
            .outstanding
            .as_ref()
            .and_then(|id| self.tasks.get(id))
            .filter(|t| t.is_open() && t.is_past_deadline(now))
            .map(|t| t.id.clone());

        match due {
            Some(id) => {
                info!("Mining task {} expired", id);
                self.expire(&id)
            }
            None => false,
        }
    }

    fn open_outstanding(&self) -> Option<&MiningTask> {
        self.outstanding
            .as_ref()
            .and_then(|id| self.tasks.get(id))
            .filter(|t| t.is_open())
    }
}

/// Mining task coordinator
pub struct MiningCoordinator {
    chain: Arc<BlockchainService>,
    miners: MinerRegistry,
    rewards: Arc<RewardDistributor>,
    state: Mutex<CoordinatorState>,
    max_transactions: usize,
    task_timeout_ms: u64,
}

impl MiningCoordinator {
    pub fn new(
        chain: Arc<BlockchainService>,
        miners: MinerRegistry,
        rewards: Arc<RewardDistributor>,
        config: &ChainConfig,
    ) -> Self {
        Self {
            chain,
            miners,
            rewards,
            state: Mutex::new(CoordinatorState::default()),
            max_transactions: config.max_transactions_per_block.max(1),
            task_timeout_ms: config.task_timeout_secs.saturating_mul(1000),
        }
    }

    /// Create a task when there is pending work and nothing is in flight.
    ///
    /// Returns `Ok(None)` when the pool is empty or a task is already open.
    pub async fn create_task_if_work(&self) -> Result<Option<MiningTask>> {
        let mut state = self.state.lock().await;
        let now = now_millis();
        state.expire_outstanding_if_due(now);

        if state.open_outstanding().is_some() {
            return Ok(None);
        }

        let head = self.chain.head_block().await.ok_or(ChainError::NotReady)?;
        let transactions = self.chain.pending_transactions(self.max_transactions).await;
        if transactions.is_empty() {
            return Ok(None);
        }

        let difficulty = self.chain.difficulty().get();
        let template = BlockBuilder::on_top_of(&head, difficulty)
            .with_timestamp(now)
            .build(transactions);

        let task = MiningTask {
            id: Uuid::new_v4().to_string(),
            template,
            difficulty,
            created_at: now,
            expires_at: now.saturating_add(self.task_timeout_ms),
            status: TaskStatus::Open,
            miner: None,
        };

        info!(
            "Created mining task {} for block #{} ({} transactions, difficulty {})",
            task.id,
            task.template.number,
            task.template.transactions.len(),
            difficulty
        );

        state.outstanding = Some(task.id.clone());
        state.stats.tasks_created += 1;
        state.insert(task.clone());
        Ok(Some(task))
    }

    /// Register the miner and hand out the outstanding task, if any
    pub async fn request_task(&self, miner_address: &str) -> Option<MiningTask> {
        self.miners.touch(miner_address).await;

        let mut state = self.state.lock().await;
        state.expire_outstanding_if_due(now_millis());
        let task = state.open_outstanding().cloned();

        match &task {
            Some(t) => debug!("Miner {} received task {}", miner_address, t.id),
            None => debug!("No task available for miner {}", miner_address),
        }
        task
    }

    /// Verify a result and finalize the block; the first valid submission wins.
    ///
    /// Guard failures leave the task untouched except for an overdue task,
    /// which is expired on the spot.
    pub async fn try_submit_result(
        &self,
        task_id: &str,
        nonce: u64,
        hash: &str,
        miner_address: &str,
    ) -> Result<Block> {
        self.miners.touch(miner_address).await;

        let mut state = self.state.lock().await;
        let now = now_millis();

        let verdict = Self::check_submission(&state, task_id, nonce, hash, miner_address, now);
        let task = match verdict {
            Ok(task) => task,
            Err(e) => {
                if matches!(e, ChainError::TaskExpired(_)) {
                    state.expire(task_id);
                }
                state.stats.rejected_submissions += 1;
                debug!("Rejected submission for task {} from {}: {}", task_id, miner_address, e);
                return Err(e);
            }
        };

        let included = task.template.transaction_hashes();
        let block = task
            .template
            .clone()
            .seal(nonce, hash.to_string(), miner_address.to_string());

        if let Err(e) = self.chain.store().finalize_block(block.clone(), &included).await {
            warn!("Finalizing block for task {} failed: {}", task_id, e);
            state.expire(task_id);
            state.stats.rejected_submissions += 1;
            return Err(e);
        }

        if let Some(entry) = state.tasks.get_mut(task_id) {
            entry.status = TaskStatus::Completed;
            entry.miner = Some(miner_address.to_string());
        }
        state.outstanding = None;
        state.stats.tasks_completed += 1;
        drop(state);

        info!(
            "Task {} completed by {}: block #{} {}",
            task_id, miner_address, block.number, block.hash
        );

        let elapsed_secs = now.saturating_sub(task.created_at).max(1) as f64 / 1000.0;
        let expected_hashes = 16f64.powi(task.difficulty as i32);
        self.miners
            .report_hash_rate(miner_address, expected_hashes / elapsed_secs)
            .await;

        self.rewards.reward_block(&block).await;
        Ok(block)
    }

    fn check_submission(
        state: &CoordinatorState,
        task_id: &str,
        nonce: u64,
        hash: &str,
        miner_address: &str,
        now: u64,
    ) -> Result<MiningTask> {
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| ChainError::TaskNotFound(task_id.to_string()))?;

        match task.status {
            TaskStatus::Completed => {
                return Err(ChainError::TaskAlreadyCompleted(task_id.to_string()))
            }
            TaskStatus::Expired => return Err(ChainError::TaskExpired(task_id.to_string())),
            TaskStatus::Open if task.is_past_deadline(now) => {
                return Err(ChainError::TaskExpired(task_id.to_string()))
            }
            TaskStatus::Open => {}
        }

        if miner_address.trim().is_empty() {
            return Err(ChainError::Validation("miner address is empty".to_string()));
        }

        let expected = task.template.hash_for(nonce, miner_address);
        if expected != hash {
            return Err(ChainError::InvalidProofOfWork(format!(
                "hash {} does not match block contents",
                hash
            )));
        }

        if !pow::is_valid_proof_of_work(hash, task.difficulty) {
            return Err(ChainError::InvalidProofOfWork(format!(
                "hash {} has fewer than {} leading zeros",
                hash, task.difficulty
            )));
        }

        Ok(task.clone())
    }

    /// Boolean form of [`try_submit_result`](Self::try_submit_result)
    pub async fn submit_result(
        &self,
        task_id: &str,
        nonce: u64,
        hash: &str,
        miner_address: &str,
    ) -> bool {
        self.try_submit_result(task_id, nonce, hash, miner_address)
            .await
            .is_ok()
    }

    /// Expire the outstanding task if its deadline has passed
    pub async fn expire_stale_tasks(&self) -> usize {
        self.expire_stale_tasks_at(now_millis()).await
    }

    /// Expiry sweep against an explicit clock; repeated calls are no-ops
    pub async fn expire_stale_tasks_at(&self, now: u64) -> usize {
        let mut state = self.state.lock().await;
        let due: Vec<String> = state
            .tasks
            .values()
            .filter(|t| t.is_open() && t.is_past_deadline(now))
            .map(|t| t.id.clone())
            .collect();

        let mut expired = 0;
        for id in due {
            if state.expire(&id) {
                info!("Mining task {} expired", id);
                expired += 1;
            }
        }
        expired
    }

    pub async fn task(&self, task_id: &str) -> Option<MiningTask> {
        self.state.lock().await.tasks.get(task_id).cloned()
    }

    pub async fn outstanding_task(&self) -> Option<MiningTask> {
        self.state.lock().await.open_outstanding().cloned()
    }

    /// Self-reported hash rate from a miner worker
    pub async fn report_hash_rate(&self, miner_address: &str, hashes_per_sec: f64) {
        self.miners.report_hash_rate(miner_address, hashes_per_sec).await;
    }

    pub fn miners(&self) -> &MinerRegistry {
        &self.miners
    }

    pub async fn get_stats(&self) -> MiningStats {
        let state = self.state.lock().await;
        MiningStats {
            outstanding_task: state.open_outstanding().map(|t| t.id.clone()),
            ..state.stats.clone()
        }
    }
}
