//! Integration tests for the chain core: transaction intake through mining and validation

use qshield_chain::pow::search_nonce;
use qshield_chain::{
    Block, BlockBuilder, ChainConfig, ChainError, ChainNode, ChainStore, CorruptionReason,
    DifficultyController, DifficultyHandle, InMemoryLedger, MiningTask, Payload, TaskStatus,
    Transaction, TransactionKind, TransactionStatus,
};
use std::sync::Arc;

async fn node_with(config: ChainConfig) -> (ChainNode, Arc<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::new());
    let node = ChainNode::new(config, ledger.clone()).await.unwrap();
    node.start().await.unwrap();
    (node, ledger)
}

async fn easy_node() -> (ChainNode, Arc<InMemoryLedger>) {
    node_with(ChainConfig {
        initial_difficulty: 1,
        ..ChainConfig::default()
    })
    .await
}

fn transfer(sender: &str, amount: u128) -> Transaction {
    Transaction::new(sender, "treasury", amount, TransactionKind::Transfer, Payload::new())
}

fn solve(task: &MiningTask, miner: &str, start: u64) -> (u64, String) {
    search_nonce(&task.template.header_for(0, miner), start, 1_000_000).unwrap()
}

#[tokio::test]
async fn test_scenario_a_three_transactions_become_one_block() {
    let (node, ledger) = easy_node().await;
    let chain = node.chain();

    let mut hashes = Vec::new();
    for (i, sender) in ["alice", "bob", "carol"].iter().enumerate() {
        hashes.push(chain.submit_transaction(transfer(sender, i as u128 + 1)).await.unwrap());
    }

    let task = node.coordinator().create_task_if_work().await.unwrap().unwrap();
    let mut in_task = task.template.transaction_hashes();
    in_task.sort();
    let mut submitted = hashes.clone();
    submitted.sort();
    assert_eq!(in_task, submitted);

    let offered = node.coordinator().request_task("miner-1").await.unwrap();
    let (nonce, hash) = solve(&offered, "miner-1", 0);
    assert!(node.coordinator().submit_result(&offered.id, nonce, &hash, "miner-1").await);

    let head = chain.head_block().await.unwrap();
    assert_eq!(head.number, 1);
    assert_eq!(head.transactions.len(), 3);
    assert_eq!(head.hash, hash);

    let stats = chain.get_stats().await;
    assert_eq!(stats.pending_count, 0);
    assert_eq!(stats.total_blocks, 2);
    for h in &hashes {
        assert_eq!(chain.transaction_status(h).await, Some(TransactionStatus::Confirmed));
    }

    assert_eq!(ledger.balance("miner-1").await, node.config().block_reward);
    assert!(chain.validate_chain().await);
}

#[tokio::test]
async fn test_scenario_b_genesis_is_idempotent() {
    let (node, _) = easy_node().await;
    let first = node.chain().initialize_genesis().await.unwrap();
    let second = node.chain().initialize_genesis().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(node.chain().get_stats().await.total_blocks, 1);
}

#[tokio::test]
async fn test_scenario_c_tampering_detected_at_block() {
    let dir = tempfile::tempdir().unwrap();
    let config = ChainConfig {
        initial_difficulty: 1,
        data_dir: Some(dir.path().to_path_buf()),
        ..ChainConfig::default()
    };

    {
        let (node, _) = node_with(config.clone()).await;
        for amount in [777u128, 888, 999] {
            node.chain().submit_transaction(transfer("alice", amount)).await.unwrap();
            let task = node.coordinator().create_task_if_work().await.unwrap().unwrap();
            let (nonce, hash) = solve(&task, "miner-1", 0);
            node.coordinator()
                .try_submit_result(&task.id, nonce, &hash, "miner-1")
                .await
                .unwrap();
        }
        assert_eq!(node.chain().get_stats().await.total_blocks, 4);
        assert!(node.chain().validate_chain().await);
    }

    // Rewrite the amount of the transaction in block 2 directly in the log
    let log = dir.path().join("blocks.jsonl");
    let raw = std::fs::read_to_string(&log).unwrap();
    assert!(raw.contains("\"amount\":888"));
    std::fs::write(&log, raw.replace("\"amount\":888", "\"amount\":8880")).unwrap();

    let (node, _) = node_with(config).await;
    let report = node.chain().validation_report().await;
    let failure = report.failure.clone().unwrap();
    assert_eq!(failure.index, 2);
    assert_eq!(report.blocks_checked, 2);
    assert!(matches!(
        failure.reason,
        CorruptionReason::TransactionHashMismatch { position: 0 }
    ));
    assert!(!node.chain().validate_chain().await);
    assert!(matches!(
        report.into_result(),
        Err(ChainError::ChainCorruption { index: 2, .. })
    ));
}

#[tokio::test]
async fn test_scenario_d_fast_blocks_raise_difficulty_by_one() {
    let config = ChainConfig {
        initial_difficulty: 4,
        target_block_time_secs: 60,
        difficulty_window: 10,
        ..ChainConfig::default()
    };
    let store = Arc::new(ChainStore::in_memory());
    let genesis = Block::genesis(1_700_000_000_000);
    store.append_block(genesis.clone()).await.unwrap();

    let mut head = genesis;
    for i in 1..=10u64 {
        let template = BlockBuilder::on_top_of(&head, 1)
            .with_timestamp(1_700_000_000_000 + i * 30_000)
            .build(Vec::new());
        let (nonce, hash) = search_nonce(&template.header_for(0, "miner-1"), 0, 1_000_000).unwrap();
        let block = template.seal(nonce, hash, "miner-1".to_string());
        store.append_block(block.clone()).await.unwrap();
        head = block;
    }

    let handle = DifficultyHandle::new(config.initial_difficulty);
    let controller = DifficultyController::new(store, handle.clone(), &config);

    assert_eq!(controller.adjust().await, 5);
    assert_eq!(handle.get(), 5);

    let history = controller.get_adjustment_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous_difficulty, 4);
    assert_eq!(history[0].mean_interval_ms, 30_000);
}

#[tokio::test]
async fn test_at_most_one_winner() {
    let (node, _) = easy_node().await;
    node.chain().submit_transaction(transfer("alice", 42)).await.unwrap();
    let task = node.coordinator().create_task_if_work().await.unwrap().unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let coordinator = node.coordinator().clone();
        let miner = format!("miner-{}", i);
        let (nonce, hash) = solve(&task, &miner, 0);
        let task_id = task.id.clone();
        handles.push(tokio::spawn(async move {
            coordinator.submit_result(&task_id, nonce, &hash, &miner).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(node.chain().get_stats().await.total_blocks, 2);

    let stats = node.coordinator().get_stats().await;
    assert_eq!(stats.tasks_completed, 1);
    assert_eq!(stats.rejected_submissions, 7);

    let mined: u64 = node.miners().all().await.iter().map(|m| m.blocks_mined).sum();
    assert_eq!(mined, 1);
}

#[tokio::test]
async fn test_expiry_is_idempotent_and_terminal() {
    let (node, _) = easy_node().await;
    let tx_hash = node.chain().submit_transaction(transfer("alice", 7)).await.unwrap();
    let task = node.coordinator().create_task_if_work().await.unwrap().unwrap();

    let after_deadline = task.expires_at + 1_000;
    assert_eq!(node.coordinator().expire_stale_tasks_at(after_deadline).await, 1);
    for _ in 0..3 {
        assert_eq!(node.coordinator().expire_stale_tasks_at(after_deadline).await, 0);
    }

    let stored = node.coordinator().task(&task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Expired);
    assert_eq!(node.coordinator().get_stats().await.tasks_expired, 1);

    // A late but otherwise valid submission is rejected
    let (nonce, hash) = solve(&task, "miner-1", 0);
    let late = node.coordinator().try_submit_result(&task.id, nonce, &hash, "miner-1").await;
    assert!(matches!(late, Err(ChainError::TaskExpired(_))));
    assert_eq!(
        node.chain().transaction_status(&tx_hash).await,
        Some(TransactionStatus::Pending)
    );

    // The same transactions are offered again under a new task
    let retry = node.coordinator().create_task_if_work().await.unwrap().unwrap();
    assert_ne!(retry.id, task.id);
    assert_eq!(retry.template.transaction_hashes(), vec![tx_hash]);
}

#[tokio::test]
async fn test_duplicate_transaction_rejected() {
    let (node, _) = easy_node().await;
    let tx = transfer("alice", 5).with_timestamp(1_700_000_000_000);

    node.chain().submit_transaction(tx.clone()).await.unwrap();
    let again = node.chain().submit_transaction(tx).await;
    assert!(matches!(again, Err(ChainError::DuplicateTransaction(_))));
}

#[tokio::test]
async fn test_pending_pool_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ChainConfig {
        initial_difficulty: 1,
        data_dir: Some(dir.path().to_path_buf()),
        ..ChainConfig::default()
    };

    let hash = {
        let (node, _) = node_with(config.clone()).await;
        node.chain().submit_transaction(transfer("alice", 9)).await.unwrap()
    };

    let (node, _) = node_with(config).await;
    assert_eq!(
        node.chain().transaction_status(&hash).await,
        Some(TransactionStatus::Pending)
    );

    let task = node.coordinator().create_task_if_work().await.unwrap().unwrap();
    let (nonce, block_hash) = solve(&task, "miner-2", 0);
    assert!(node.coordinator().submit_result(&task.id, nonce, &block_hash, "miner-2").await);
    assert_eq!(
        node.chain().transaction_status(&hash).await,
        Some(TransactionStatus::Confirmed)
    );
}
