//! Service graph for a running chain node
//!
//! Every component is constructed once here and shared through `Arc`s; there
//! are no module-level singletons.

use crate::block::Block;
use crate::blockchain::BlockchainService;
use crate::chain_store::ChainStore;
use crate::difficulty_adjustment::{DifficultyController, DifficultyHandle};
use crate::miner::MinerRegistry;
use crate::mining::MiningCoordinator;
use crate::reward_distribution::{RewardDistributor, TokenLedger};
use crate::scheduler::BackgroundTasks;
use crate::{ChainConfig, Result};
use std::sync::Arc;
use tracing::info;

pub struct ChainNode {
    config: ChainConfig,
    store: Arc<ChainStore>,
    chain: Arc<BlockchainService>,
    miners: MinerRegistry,
    coordinator: Arc<MiningCoordinator>,
    difficulty: Arc<DifficultyController>,
    rewards: Arc<RewardDistributor>,
}

impl ChainNode {
    /// Validate the config, open the store and wire the services together
    pub async fn new(config: ChainConfig, ledger: Arc<dyn TokenLedger>) -> Result<Self> {
        config.validate()?;

        let store = match &config.data_dir {
            Some(dir) => {
                info!("Opening chain store at {}", dir.display());
                Arc::new(ChainStore::open(dir).await?)
            }
            None => {
                info!("Using in-memory chain store");
                Arc::new(ChainStore::in_memory())
            }
        };

        let handle = DifficultyHandle::new(Self::resume_difficulty(&store, &config).await);
        let chain = Arc::new(BlockchainService::new(store.clone(), handle.clone(), &config));
        let miners = MinerRegistry::new();
        let rewards = Arc::new(RewardDistributor::new(ledger, miners.clone(), &config));
        let coordinator = Arc::new(MiningCoordinator::new(
            chain.clone(),
            miners.clone(),
            rewards.clone(),
            &config,
        ));
        let difficulty = Arc::new(DifficultyController::new(store.clone(), handle, &config));

        Ok(Self {
            config,
            store,
            chain,
            miners,
            coordinator,
            difficulty,
            rewards,
        })
    }

    /// Difficulty of the last mined block, or the configured start for a fresh chain
    async fn resume_difficulty(store: &ChainStore, config: &ChainConfig) -> u32 {
        match store.head_block().await {
            Some(head) if head.number > 0 => {
                let difficulty = head
                    .difficulty
                    .clamp(config.min_difficulty, config.max_difficulty);
                info!(
                    "Resuming at difficulty {} from block #{}",
                    difficulty, head.number
                );
                difficulty
            }
            _ => config.initial_difficulty,
        }
    }

    /// Ensure genesis exists; safe to call on every start
    pub async fn start(&self) -> Result<Block> {
        let genesis = self.chain.initialize_genesis().await?;
        info!(
            "Node ready: {} blocks, difficulty {}",
            self.store.block_count().await,
            self.difficulty.handle().get()
        );
        Ok(genesis)
    }

    pub fn spawn_background_tasks(&self) -> BackgroundTasks {
        BackgroundTasks::spawn(
            self.coordinator.clone(),
            self.difficulty.clone(),
            self.rewards.clone(),
            &self.config,
        )
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<BlockchainService> {
        &self.chain
    }

    pub fn coordinator(&self) -> &Arc<MiningCoordinator> {
        &self.coordinator
    }

    pub fn difficulty(&self) -> &Arc<DifficultyController> {
        &self.difficulty
    }

    pub fn rewards(&self) -> &Arc<RewardDistributor> {
        &self.rewards
    }

    pub fn miners(&self) -> &MinerRegistry {
        &self.miners
    }
}
