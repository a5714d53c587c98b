//! Threshold difficulty controller
//!
//! Inspects the mean interval of the last K blocks and moves difficulty by
//! one step when it leaves the band around the target interval. This is a
//! proportional-threshold controller, not a moving-target retarget.

use crate::chain_store::ChainStore;
use crate::{now_millis, ChainConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Shared view of the difficulty currently required for new tasks
#[derive(Debug, Clone)]
pub struct DifficultyHandle {
    current: Arc<AtomicU32>,
}

impl DifficultyHandle {
    pub fn new(initial: u32) -> Self {
        Self {
            current: Arc::new(AtomicU32::new(initial)),
        }
    }

    pub fn get(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    pub fn set(&self, difficulty: u32) {
        self.current.store(difficulty, Ordering::Release);
    }
}

/// Difficulty adjustment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyAdjustmentRecord {
    /// Head block number when the adjustment ran
    pub block_number: u64,
    /// Previous difficulty
    pub previous_difficulty: u32,
    /// New difficulty
    pub new_difficulty: u32,
    /// Mean inter-block interval observed (milliseconds)
    pub mean_interval_ms: u64,
    /// Target interval (milliseconds)
    pub target_interval_ms: u64,
    /// Timestamp (unix milliseconds)
    pub timestamp: u64,
}

/// Difficulty controller
pub struct DifficultyController {
    store: Arc<ChainStore>,
    difficulty: DifficultyHandle,
    history: RwLock<Vec<DifficultyAdjustmentRecord>>,
    window: usize,
    target_interval_ms: u64,
    lower_band: f64,
    upper_band: f64,
    min_difficulty: u32,
    max_difficulty: u32,
}

impl DifficultyController {
    pub fn new(store: Arc<ChainStore>, difficulty: DifficultyHandle, config: &ChainConfig) -> Self {
        Self {
            store,
            difficulty,
            history: RwLock::new(Vec::new()),
            window: config.difficulty_window.max(2),
            target_interval_ms: config.target_block_time_secs.saturating_mul(1000),
            lower_band: config.difficulty_lower_band,
            upper_band: config.difficulty_upper_band,
            min_difficulty: config.min_difficulty.max(1),
            max_difficulty: config.max_difficulty,
        }
    }

    pub fn handle(&self) -> DifficultyHandle {
        self.difficulty.clone()
    }

    /// Compute the next difficulty from block timestamps without applying it
    pub fn next_difficulty(&self, current: u32, timestamps: &[u64]) -> Option<(u32, u64)> {
        if timestamps.len() < 2 {
            return None;
        }

        let first = timestamps[0];
        let last = timestamps[timestamps.len() - 1];
        let intervals = (timestamps.len() - 1) as u64;
        let mean_interval_ms = last.saturating_sub(first) / intervals;

        let mean = mean_interval_ms as f64;
        let target = self.target_interval_ms as f64;

        let next = if mean < target * self.lower_band {
            current.saturating_add(1).min(self.max_difficulty)
        } else if mean > target * self.upper_band {
            current.saturating_sub(1).max(self.min_difficulty)
        } else {
            current
        };

        Some((next, mean_interval_ms))
    }

    /// Run one controller pass; returns the difficulty now in effect
    pub async fn adjust(&self) -> u32 {
        let blocks = self.store.recent_blocks(self.window).await;
        let current = self.difficulty.get();

        let timestamps: Vec<u64> = blocks.iter().map(|b| b.timestamp).collect();
        let Some((next, mean_interval_ms)) = self.next_difficulty(current, &timestamps) else {
            debug!("Not enough blocks for difficulty adjustment: {}", blocks.len());
            return current;
        };

        if next == current {
            debug!(
                "Difficulty {} unchanged (mean interval {} ms, target {} ms)",
                current, mean_interval_ms, self.target_interval_ms
            );
            return current;
        }

        self.difficulty.set(next);

        let block_number = blocks.last().map(|b| b.number).unwrap_or_default();
        info!(
            "Difficulty adjustment at block {}: {} -> {} (mean interval {} ms, target {} ms)",
            block_number, current, next, mean_interval_ms, self.target_interval_ms
        );

        self.history.write().await.push(DifficultyAdjustmentRecord {
            block_number,
            previous_difficulty: current,
            new_difficulty: next,
            mean_interval_ms,
            target_interval_ms: self.target_interval_ms,
            timestamp: now_millis(),
        });

        next
    }

    /// Get adjustment history
    pub async fn get_adjustment_history(&self) -> Vec<DifficultyAdjustmentRecord> {
        self.history.read().await.clone()
    }

    /// Get difficulty statistics
    pub async fn get_stats(&self) -> DifficultyStats {
        let current = self.difficulty.get();
        let history = self.history.read().await;

        DifficultyStats {
            current_difficulty: current,
            lowest_difficulty: history
                .iter()
                .map(|r| r.new_difficulty)
                .chain(std::iter::once(current))
                .min()
                .unwrap_or(current),
            highest_difficulty: history
                .iter()
                .map(|r| r.new_difficulty)
                .chain(std::iter::once(current))
                .max()
                .unwrap_or(current),
            total_adjustments: history.len(),
            window: self.window,
            target_interval_ms: self.target_interval_ms,
        }
    }
}

/// Difficulty statistics
#[derive(Debug, Clone, Serialize)]
pub struct DifficultyStats {
    pub current_difficulty: u32,
    pub lowest_difficulty: u32,
    pub highest_difficulty: u32,
    pub total_adjustments: usize,
    pub window: usize,
    pub target_interval_ms: u64,
}
