//! Long-lived background loops with broadcast shutdown
//!
//! Three independent timers: the mining coordinator loop (expiry sweep, task
//! creation, credit retries), the difficulty controller and the participation
//! reward loop. A failed iteration is logged and the loop keeps running.

use crate::difficulty_adjustment::DifficultyController;
use crate::mining::MiningCoordinator;
use crate::reward_distribution::RewardDistributor;
use crate::ChainConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Handles of the running loops plus the shutdown channel they listen on
pub struct BackgroundTasks {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn spawn(
        coordinator: Arc<MiningCoordinator>,
        difficulty: Arc<DifficultyController>,
        rewards: Arc<RewardDistributor>,
        config: &ChainConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = Vec::with_capacity(3);

        let poll = Duration::from_secs(config.task_poll_interval_secs.max(1));
        let mining_rewards = rewards.clone();
        handles.push((
            "mining",
            Self::spawn_loop("mining", poll, false, shutdown_tx.subscribe(), move || {
                let coordinator = coordinator.clone();
                let rewards = mining_rewards.clone();
                async move { mining_tick(&coordinator, &rewards).await }
            }),
        ));

        let adjust = Duration::from_secs(config.difficulty_adjust_interval_secs.max(1));
        handles.push((
            "difficulty",
            Self::spawn_loop("difficulty", adjust, true, shutdown_tx.subscribe(), move || {
                let difficulty = difficulty.clone();
                async move {
                    difficulty.adjust().await;
                    Ok(())
                }
            }),
        ));

        let participation = Duration::from_secs(config.participation_interval_secs.max(1));
        handles.push((
            "rewards",
            Self::spawn_loop(
                "rewards",
                participation,
                true,
                shutdown_tx.subscribe(),
                move || {
                    let rewards = rewards.clone();
                    async move {
                        let credited = rewards.distribute_participation_rewards().await;
                        debug!("Participation rewards credited to {} miners", credited);
                        Ok(())
                    }
                },
            ),
        ));

        info!(
            "Background loops started (task poll {:?}, difficulty {:?}, rewards {:?})",
            poll, adjust, participation
        );

        Self {
            shutdown_tx,
            handles,
        }
    }

    fn spawn_loop<F, Fut>(
        name: &'static str,
        period: Duration,
        delay_first: bool,
        mut shutdown_rx: broadcast::Receiver<()>,
        mut tick: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            let start = if delay_first {
                Instant::now() + period
            } else {
                Instant::now()
            };
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("{} loop stopping", name);
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = tick().await {
                            error!("{} loop iteration failed: {}", name, e);
                        }
                    }
                }
            }
        })
    }

    /// Signal every loop and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!("{} loop terminated abnormally: {}", name, e);
            }
        }
        info!("Background loops stopped");
    }
}

async fn mining_tick(coordinator: &MiningCoordinator, rewards: &RewardDistributor) -> crate::Result<()> {
    let expired = coordinator.expire_stale_tasks().await;
    if expired > 0 {
        info!("Expired {} stale mining tasks", expired);
    }

    let retried = rewards.retry_outbox().await;
    if retried > 0 {
        info!("Delivered {} queued reward credits", retried);
    }

    if let Some(task) = coordinator.create_task_if_work().await? {
        debug!("Mining loop published task {}", task.id);
    }
    Ok(())
}
