//! Mining reward distribution
//!
//! Block rewards are credited through the external token ledger after a block
//! is already final. A failed credit is queued in an outbox and retried by the
//! reward loop; it never affects the block.

use crate::block::Block;
use crate::miner::MinerRegistry;
use crate::{now_millis, ChainConfig, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Block reward records kept for `get_reward_history`
const MAX_REWARD_HISTORY: usize = 1_000;

/// Credit records kept by `InMemoryLedger` by default
const DEFAULT_CREDIT_LOG_CAPACITY: usize = 10_000;

/// External token balance keeper. Delivery is at-least-once.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn credit(&self, address: &str, amount: u128, reason: &str) -> Result<()>;
}

/// Ledger credit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRecord {
    pub address: String,
    pub amount: u128,
    pub reason: String,
    pub timestamp: u64,
}

/// Token ledger kept in memory, used by the node binary and tests
#[derive(Debug)]
pub struct InMemoryLedger {
    balances: RwLock<HashMap<String, u128>>,
    credits: RwLock<VecDeque<CreditRecord>>,
    credit_log_capacity: usize,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::with_credit_log_capacity(DEFAULT_CREDIT_LOG_CAPACITY)
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` recent credit records; balances are unaffected
    pub fn with_credit_log_capacity(capacity: usize) -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            credits: RwLock::new(VecDeque::new()),
            credit_log_capacity: capacity.max(1),
        }
    }

    pub async fn balance(&self, address: &str) -> u128 {
        self.balances.read().await.get(address).copied().unwrap_or(0)
    }

    /// Most recent credits, oldest first
    pub async fn credits(&self) -> Vec<CreditRecord> {
        self.credits.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl TokenLedger for InMemoryLedger {
    async fn credit(&self, address: &str, amount: u128, reason: &str) -> Result<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(address.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount);

        let mut credits = self.credits.write().await;
        credits.push_back(CreditRecord {
            address: address.to_string(),
            amount,
            reason: reason.to_string(),
            timestamp: now_millis(),
        });
        while credits.len() > self.credit_log_capacity {
            credits.pop_front();
        }
        Ok(())
    }
}

/// Block reward record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRewardRecord {
    pub block_number: u64,
    pub block_hash: String,
    pub miner: String,
    pub amount: u128,
    /// False while the credit sits in the outbox
    pub credited: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
struct PendingCredit {
    address: String,
    amount: u128,
    reason: String,
    block_number: Option<u64>,
    attempts: u32,
}

/// Reward distributor
pub struct RewardDistributor {
    ledger: Arc<dyn TokenLedger>,
    miners: MinerRegistry,
    block_reward: u128,
    participation_reward: u128,
    participation_window_ms: u64,
    max_credit_attempts: u32,
    outbox: Mutex<VecDeque<PendingCredit>>,
    history: RwLock<VecDeque<BlockRewardRecord>>,
    totals: RwLock<RewardTotals>,
}

/// Running totals; unlike the history they are never trimmed
#[derive(Debug, Default)]
struct RewardTotals {
    blocks_rewarded: u64,
    block_rewards_credited: u128,
    participation_rewards_credited: u128,
    credits_dropped: u64,
}

impl RewardDistributor {
    pub fn new(ledger: Arc<dyn TokenLedger>, miners: MinerRegistry, config: &ChainConfig) -> Self {
        Self {
            ledger,
            miners,
            block_reward: config.block_reward,
            participation_reward: config.participation_reward,
            participation_window_ms: config.participation_window_secs.saturating_mul(1000),
            max_credit_attempts: config.max_credit_attempts.max(1),
            outbox: Mutex::new(VecDeque::new()),
            history: RwLock::new(VecDeque::new()),
            totals: RwLock::new(RewardTotals::default()),
        }
    }

    /// Credit the block reward to the block's miner and update its counters.
    ///
    /// Never fails: a ledger error queues the credit for retry.
    pub async fn reward_block(&self, block: &Block) {
        self.miners.record_block_mined(&block.miner).await;

        let reason = format!("block reward #{}", block.number);
        let credited = match self.ledger.credit(&block.miner, self.block_reward, &reason).await {
            Ok(()) => {
                self.miners.add_reward(&block.miner, self.block_reward).await;
                info!(
                    "Block reward credited: block={}, miner={}, amount={}",
                    block.number, block.miner, self.block_reward
                );
                true
            }
            Err(e) => {
                warn!(
                    "Block reward for #{} to {} failed, queued for retry: {}",
                    block.number, block.miner, e
                );
                self.outbox.lock().await.push_back(PendingCredit {
                    address: block.miner.clone(),
                    amount: self.block_reward,
                    reason,
                    block_number: Some(block.number),
                    attempts: 1,
                });
                false
            }
        };

        {
            let mut totals = self.totals.write().await;
            totals.blocks_rewarded += 1;
            if credited {
                totals.block_rewards_credited =
                    totals.block_rewards_credited.saturating_add(self.block_reward);
            }
        }

        let mut history = self.history.write().await;
        history.push_back(BlockRewardRecord {
            block_number: block.number,
            block_hash: block.hash.clone(),
            miner: block.miner.clone(),
            amount: self.block_reward,
            credited,
            timestamp: now_millis(),
        });
        while history.len() > MAX_REWARD_HISTORY {
            history.pop_front();
        }
    }

    /// Credit the participation reward to every miner active in the trailing window
    pub async fn distribute_participation_rewards(&self) -> usize {
        if self.participation_reward == 0 {
            return 0;
        }

        let since = now_millis().saturating_sub(self.participation_window_ms);
        let active = self.miners.active_since(since).await;
        let mut credited = 0usize;

        for miner in &active {
            let reason = "participation reward".to_string();
            match self
                .ledger
                .credit(&miner.address, self.participation_reward, &reason)
                .await
            {
                Ok(()) => {
                    self.miners.add_reward(&miner.address, self.participation_reward).await;
                    let mut totals = self.totals.write().await;
                    totals.participation_rewards_credited = totals
                        .participation_rewards_credited
                        .saturating_add(self.participation_reward);
                    credited += 1;
                }
                Err(e) => {
                    warn!("Participation reward to {} failed, queued: {}", miner.address, e);
                    self.outbox.lock().await.push_back(PendingCredit {
                        address: miner.address.clone(),
                        amount: self.participation_reward,
                        reason,
                        block_number: None,
                        attempts: 1,
                    });
                }
            }
        }

        info!(
            "Participation rewards: {} of {} active miners credited",
            credited,
            active.len()
        );
        credited
    }

    /// Retry queued credits once each; returns how many succeeded
    pub async fn retry_outbox(&self) -> usize {
        let queued: Vec<PendingCredit> = self.outbox.lock().await.drain(..).collect();
        if queued.is_empty() {
            return 0;
        }

        let mut succeeded = 0usize;
        let mut requeue = Vec::new();

        for mut credit in queued {
            match self
                .ledger
                .credit(&credit.address, credit.amount, &credit.reason)
                .await
            {
                Ok(()) => {
                    succeeded += 1;
                    self.miners.add_reward(&credit.address, credit.amount).await;
                    self.mark_credited(&credit).await;
                    debug!("Outbox credit to {} delivered", credit.address);
                }
                Err(e) => {
                    credit.attempts += 1;
                    if credit.attempts >= self.max_credit_attempts {
                        error!(
                            "Dropping credit of {} to {} after {} attempts: {}",
                            credit.amount, credit.address, credit.attempts, e
                        );
                        self.totals.write().await.credits_dropped += 1;
                    } else {
                        requeue.push(credit);
                    }
                }
            }
        }

        self.outbox.lock().await.extend(requeue);
        succeeded
    }

    async fn mark_credited(&self, credit: &PendingCredit) {
        match credit.block_number {
            Some(number) => {
                {
                    let mut totals = self.totals.write().await;
                    totals.block_rewards_credited =
                        totals.block_rewards_credited.saturating_add(credit.amount);
                }
                let mut history = self.history.write().await;
                match history
                    .iter_mut()
                    .find(|r| r.block_number == number && r.miner == credit.address && !r.credited)
                {
                    Some(record) => record.credited = true,
                    None => debug!("Reward record for block #{} already trimmed", number),
                }
            }
            None => {
                let mut totals = self.totals.write().await;
                totals.participation_rewards_credited = totals
                    .participation_rewards_credited
                    .saturating_add(credit.amount);
            }
        }
    }

    pub async fn outbox_len(&self) -> usize {
        self.outbox.lock().await.len()
    }

    pub async fn get_reward_history(&self) -> Vec<BlockRewardRecord> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Get reward statistics
    pub async fn get_stats(&self) -> RewardStats {
        let total_miners = self.miners.count().await;
        let credits_pending = self.outbox.lock().await.len();
        let totals = self.totals.read().await;

        RewardStats {
            total_miners,
            blocks_rewarded: totals.blocks_rewarded,
            block_rewards_credited: totals.block_rewards_credited,
            participation_rewards_credited: totals.participation_rewards_credited,
            credits_pending,
            credits_dropped: totals.credits_dropped,
        }
    }
}

/// Reward statistics
#[derive(Debug, Clone, Serialize)]
pub struct RewardStats {
    pub total_miners: usize,
    pub blocks_rewarded: u64,
    pub block_rewards_credited: u128,
    pub participation_rewards_credited: u128,
    pub credits_pending: usize,
    pub credits_dropped: u64,
}

/// Ledger that fails a configurable number of times, for exercising the outbox
#[cfg(test)]
pub(crate) struct FlakyLedger {
    pub inner: InMemoryLedger,
    pub failures_left: Mutex<u32>,
}

#[cfg(test)]
#[async_trait]
impl TokenLedger for FlakyLedger {
    async fn credit(&self, address: &str, amount: u128, reason: &str) -> Result<()> {
        let mut left = self.failures_left.lock().await;
        if *left > 0 {
            *left -= 1;
            return Err(crate::ChainError::Ledger("ledger unavailable".to_string()));
        }
        drop(left);
        self.inner.credit(address, amount, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, miner: &str) -> Block {
        let mut block = Block::genesis(1_000);
        block.number = number;
        block.miner = miner.to_string();
        block.hash = format!("hash{}", number);
        block
    }

    fn config() -> ChainConfig {
        ChainConfig {
            block_reward: 5_000,
            participation_reward: 10,
            max_credit_attempts: 3,
            ..ChainConfig::default()
        }
    }

    #[tokio::test]
    async fn test_block_reward_credited() {
        let ledger = Arc::new(InMemoryLedger::new());
        let miners = MinerRegistry::new();
        let distributor = RewardDistributor::new(ledger.clone(), miners.clone(), &config());

        distributor.reward_block(&block(1, "m1")).await;

        assert_eq!(ledger.balance("m1").await, 5_000);
        let miner = miners.get("m1").await.unwrap();
        assert_eq!(miner.blocks_mined, 1);
        assert_eq!(miner.total_rewards, 5_000);

        let stats = distributor.get_stats().await;
        assert_eq!(stats.blocks_rewarded, 1);
        assert_eq!(stats.block_rewards_credited, 5_000);
    }

    #[tokio::test]
    async fn test_failed_credit_goes_to_outbox() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(),
            failures_left: Mutex::new(1),
        });
        let miners = MinerRegistry::new();
        let distributor = RewardDistributor::new(ledger.clone(), miners.clone(), &config());

        distributor.reward_block(&block(1, "m1")).await;
        assert_eq!(distributor.outbox_len().await, 1);
        assert_eq!(miners.get("m1").await.unwrap().blocks_mined, 1);
        assert_eq!(miners.get("m1").await.unwrap().total_rewards, 0);

        assert_eq!(distributor.retry_outbox().await, 1);
        assert_eq!(distributor.outbox_len().await, 0);
        assert_eq!(ledger.inner.balance("m1").await, 5_000);
        assert!(distributor.get_reward_history().await[0].credited);
        assert_eq!(distributor.get_stats().await.block_rewards_credited, 5_000);
    }

    #[tokio::test]
    async fn test_outbox_drops_after_max_attempts() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(),
            failures_left: Mutex::new(10),
        });
        let distributor = RewardDistributor::new(ledger, MinerRegistry::new(), &config());

        distributor.reward_block(&block(1, "m1")).await;
        distributor.retry_outbox().await;
        assert_eq!(distributor.outbox_len().await, 1);
        distributor.retry_outbox().await;
        assert_eq!(distributor.outbox_len().await, 0);
        assert_eq!(distributor.get_stats().await.credits_dropped, 1);
    }

    #[tokio::test]
    async fn test_participation_rewards_active_miners() {
        let ledger = Arc::new(InMemoryLedger::new());
        let miners = MinerRegistry::new();
        miners.touch("m1").await;
        miners.touch("m2").await;
        let distributor = RewardDistributor::new(ledger.clone(), miners, &config());

        assert_eq!(distributor.distribute_participation_rewards().await, 2);
        assert_eq!(ledger.balance("m1").await, 10);
        assert_eq!(ledger.balance("m2").await, 10);
        assert_eq!(distributor.get_stats().await.participation_rewards_credited, 20);
    }

    #[tokio::test]
    async fn test_reward_history_is_bounded() {
        let ledger = Arc::new(InMemoryLedger::new());
        let distributor = RewardDistributor::new(ledger.clone(), MinerRegistry::new(), &config());

        let total = MAX_REWARD_HISTORY as u64 + 5;
        for number in 1..=total {
            distributor.reward_block(&block(number, "m1")).await;
        }

        let history = distributor.get_reward_history().await;
        assert_eq!(history.len(), MAX_REWARD_HISTORY);
        assert_eq!(history[0].block_number, 6);
        assert_eq!(history[history.len() - 1].block_number, total);

        // Totals still count every block
        let stats = distributor.get_stats().await;
        assert_eq!(stats.blocks_rewarded, total);
        assert_eq!(stats.block_rewards_credited, 5_000 * total as u128);
        assert_eq!(ledger.balance("m1").await, 5_000 * total as u128);
    }

    #[tokio::test]
    async fn test_ledger_credit_log_is_bounded() {
        let ledger = InMemoryLedger::with_credit_log_capacity(3);
        for amount in 1..=5u128 {
            ledger.credit("m1", amount, "block_reward").await.unwrap();
        }

        let credits = ledger.credits().await;
        assert_eq!(credits.len(), 3);
        assert_eq!(
            credits.iter().map(|c| c.amount).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert_eq!(ledger.balance("m1").await, 15);
    }
}
