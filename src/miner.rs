//! Miner records kept by the coordinator and the reward distributor

use crate::now_millis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Weight of a new hash-rate sample against the previous estimate
const HASH_RATE_SMOOTHING: f64 = 0.3;

/// Historical record of a miner address. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Miner {
    pub address: String,
    /// First seen (unix milliseconds)
    pub registered_at: u64,
    /// Last request or submission (unix milliseconds)
    pub last_active_at: u64,
    pub blocks_mined: u64,
    /// Rewards credited so far, in base units
    pub total_rewards: u128,
    /// Hashes per second, self-reported or observed
    pub hash_rate: f64,
}

impl Miner {
    pub fn new(address: String, now: u64) -> Self {
        Self {
            address,
            registered_at: now,
            last_active_at: now,
            blocks_mined: 0,
            total_rewards: 0,
            hash_rate: 0.0,
        }
    }

    fn blend_hash_rate(&mut self, sample: f64) {
        if !sample.is_finite() || sample < 0.0 {
            return;
        }
        self.hash_rate = if self.hash_rate == 0.0 {
            sample
        } else {
            self.hash_rate * (1.0 - HASH_RATE_SMOOTHING) + sample * HASH_RATE_SMOOTHING
        };
    }
}

/// Shared registry of miners keyed by address
#[derive(Debug, Clone, Default)]
pub struct MinerRegistry {
    miners: Arc<RwLock<HashMap<String, Miner>>>,
}

impl MinerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unseen address or refresh its activity timestamp
    pub async fn touch(&self, address: &str) -> Miner {
        let now = now_millis();
        let mut miners = self.miners.write().await;
        let miner = miners.entry(address.to_string()).or_insert_with(|| {
            info!("Registered new miner {}", address);
            Miner::new(address.to_string(), now)
        });
        miner.last_active_at = now;
        miner.clone()
    }

    pub async fn report_hash_rate(&self, address: &str, hashes_per_sec: f64) {
        self.touch(address).await;
        if let Some(miner) = self.miners.write().await.get_mut(address) {
            miner.blend_hash_rate(hashes_per_sec);
            debug!("Miner {} hash rate {:.2} H/s", address, miner.hash_rate);
        }
    }

    pub async fn record_block_mined(&self, address: &str) {
        let now = now_millis();
        let mut miners = self.miners.write().await;
        let miner = miners
            .entry(address.to_string())
            .or_insert_with(|| Miner::new(address.to_string(), now));
        miner.blocks_mined = miner.blocks_mined.saturating_add(1);
        miner.last_active_at = now;
    }

    pub async fn add_reward(&self, address: &str, amount: u128) {
        let now = now_millis();
        let mut miners = self.miners.write().await;
        let miner = miners
            .entry(address.to_string())
            .or_insert_with(|| Miner::new(address.to_string(), now));
        miner.total_rewards = miner.total_rewards.saturating_add(amount);
    }

    pub async fn get(&self, address: &str) -> Option<Miner> {
        self.miners.read().await.get(address).cloned()
    }

    pub async fn all(&self) -> Vec<Miner> {
        self.miners.read().await.values().cloned().collect()
    }

    /// Miners whose last activity is at or after `since` (unix milliseconds)
    pub async fn active_since(&self, since: u64) -> Vec<Miner> {
        let mut active: Vec<Miner> = self
            .miners
            .read()
            .await
            .values()
            .filter(|m| m.last_active_at >= since)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.address.cmp(&b.address));
        active
    }

    pub async fn count(&self) -> usize {
        self.miners.read().await.len()
    }
}
