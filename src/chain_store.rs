//! Append-only block log with a pending transaction pool
//!
//! The store is the single writer for block and pool state. Every mutation
//! happens under one write lock, so linkage checks and appends are serialized
//! and a finalized transaction is never visible in both the pending pool and
//! the confirmed index.
//!
//! With a data directory the block log is kept as `blocks.jsonl` (one block
//! per line, appended and synced before memory changes) and the pool as the
//! `pending.jsonl` journal. Journal lines are appended under the state write
//! lock before the pool changes, and the journal is compacted when a block is
//! finalized. Entries already confirmed by the block log are dropped on open.

use crate::block::Block;
use crate::transaction::{Transaction, TransactionStatus};
use crate::{pow, ChainError, Result, ZERO_HASH};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;
use tracing::{debug, info, warn};

const BLOCK_LOG_FILE: &str = "blocks.jsonl";
const PENDING_JOURNAL_FILE: &str = "pending.jsonl";

/// Why a block failed chain validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorruptionReason {
    /// Stored block number does not match its position
    NumberMismatch { expected: u64, found: u64 },
    /// Recomputed block hash differs from the stored one
    HashMismatch { stored: String, computed: String },
    /// Previous-hash does not point at the preceding block
    BrokenLinkage { expected: String, found: String },
    /// Stored hash lacks the required leading zeros
    InsufficientWork { difficulty: u32 },
    /// A transaction's stored hash differs from its content hash
    TransactionHashMismatch { position: usize },
    /// Merkle root does not match the transaction list
    MerkleRootMismatch { stored: String, computed: String },
}

impl std::fmt::Display for CorruptionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorruptionReason::NumberMismatch { expected, found } => {
                write!(f, "block number {} at position {}", found, expected)
            }
            CorruptionReason::HashMismatch { stored, computed } => {
                write!(f, "stored hash {} but computed {}", stored, computed)
            }
            CorruptionReason::BrokenLinkage { expected, found } => {
                write!(f, "previous hash {} does not match {}", found, expected)
            }
            CorruptionReason::InsufficientWork { difficulty } => {
                write!(f, "hash does not meet difficulty {}", difficulty)
            }
            CorruptionReason::TransactionHashMismatch { position } => {
                write!(f, "transaction {} hash does not match its content", position)
            }
            CorruptionReason::MerkleRootMismatch { stored, computed } => {
                write!(f, "merkle root {} but transactions give {}", stored, computed)
            }
        }
    }
}

/// First validation failure found while walking the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub index: u64,
    pub reason: CorruptionReason,
}

/// Outcome of a full chain walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub blocks_checked: u64,
    pub failure: Option<ValidationFailure>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.failure.is_none()
    }

    /// Convert a failed report into `ChainError::ChainCorruption`
    pub fn into_result(self) -> Result<u64> {
        match self.failure {
            None => Ok(self.blocks_checked),
            Some(failure) => Err(ChainError::ChainCorruption {
                index: failure.index,
                reason: failure.reason.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingEntry {
    seq: u64,
    tx: Transaction,
}

#[derive(Debug, Clone, Copy)]
struct TxLocation {
    block: u64,
    position: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    blocks: Vec<Block>,
    pending: HashMap<String, PendingEntry>,
    confirmed: HashMap<String, TxLocation>,
    next_seq: u64,
}

impl StoreState {
    fn head_hash(&self) -> Option<&str> {
        self.blocks.last().map(|b| b.hash.as_str())
    }

    fn check_linkage(&self, block: &Block) -> Result<()> {
        let expected_number = self.blocks.len() as u64;
        let expected_prev = self.head_hash().unwrap_or(ZERO_HASH);

        if block.previous_hash != expected_prev {
            return Err(ChainError::InvalidLinkage {
                expected: expected_prev.to_string(),
                found: block.previous_hash.clone(),
            });
        }

        if block.number != expected_number {
            return Err(ChainError::InvalidLinkage {
                expected: format!("block number {}", expected_number),
                found: format!("block number {}", block.number),
            });
        }

        Ok(())
    }

    fn index_block(&mut self, block: &Block) {
        for (position, hash) in block.transaction_hashes().into_iter().enumerate() {
            self.pending.remove(&hash);
            self.confirmed.insert(
                hash,
                TxLocation {
                    block: block.number,
                    position,
                },
            );
        }
    }

    fn pending_snapshot(&self) -> Vec<PendingEntry> {
        let mut entries: Vec<PendingEntry> = self.pending.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }
}

#[derive(Debug, Clone)]
struct Persistence {
    block_log: PathBuf,
    pending_journal: PathBuf,
}

impl Persistence {
    async fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn append_block(&self, block: &Block) -> Result<()> {
        Self::append_line(&self.block_log, block).await
    }

    async fn append_pending(&self, entry: &PendingEntry) -> Result<()> {
        Self::append_line(&self.pending_journal, entry).await
    }

    /// Replace the journal with exactly `entries`. Callers hold the state write lock.
    async fn compact_pending(&self, entries: &[PendingEntry]) -> Result<()> {
        let mut data = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut data, entry)?;
            data.push(b'\n');
        }

        let tmp = self
            .pending_journal
            .with_extension(format!("jsonl.{}.tmp", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_data().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.pending_journal).await?;
        Ok(())
    }

    /// Read journal entries, skipping lines that do not parse
    async fn load_pending(&self) -> Result<Vec<PendingEntry>> {
        if !tokio::fs::try_exists(&self.pending_journal).await? {
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read(&self.pending_journal).await?;
        let text = String::from_utf8_lossy(&raw);
        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PendingEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                "Skipped {} unreadable lines in {}",
                skipped,
                self.pending_journal.display()
            );
        }
        Ok(entries)
    }
}

/// Durable chain store
pub struct ChainStore {
    state: RwLock<StoreState>,
    persistence: Option<Persistence>,
}

impl ChainStore {
    /// Store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            persistence: None,
        }
    }

    /// Open (or create) a store under `dir`, replaying the block log
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let persistence = Persistence {
            block_log: dir.join(BLOCK_LOG_FILE),
            pending_journal: dir.join(PENDING_JOURNAL_FILE),
        };

        let mut state = StoreState::default();

        if tokio::fs::try_exists(&persistence.block_log).await? {
            let raw = tokio::fs::read_to_string(&persistence.block_log).await?;
            for (line_no, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let block: Block = serde_json::from_str(line).map_err(|e| {
                    ChainError::Storage(format!(
                        "{} line {}: {}",
                        persistence.block_log.display(),
                        line_no + 1,
                        e
                    ))
                })?;
                state.index_block(&block);
                state.blocks.push(block);
            }
        }

        for entry in persistence.load_pending().await? {
            let Some(hash) = entry.tx.hash.clone() else {
                warn!("Dropping pending transaction without hash from journal");
                continue;
            };
            if state.confirmed.contains_key(&hash) {
                debug!("Dropping confirmed transaction {} from pending journal", hash);
                continue;
            }
            state.next_seq = state.next_seq.max(entry.seq + 1);
            state.pending.entry(hash).or_insert(entry);
        }

        info!(
            "Opened chain store at {} ({} blocks, {} pending)",
            dir.display(),
            state.blocks.len(),
            state.pending.len()
        );

        Ok(Self {
            state: RwLock::new(state),
            persistence: Some(persistence),
        })
    }

    /// Append a block whose previous hash matches the current head.
    ///
    /// Genesis (number 0) is accepted only into an empty store and must carry
    /// the zero hash as its previous hash.
    pub async fn append_block(&self, block: Block) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_linkage(&block)?;

        if let Some(persistence) = &self.persistence {
            persistence.append_block(&block).await?;
        }

        state.index_block(&block);
        info!("Appended block #{} {}", block.number, block.hash);
        state.blocks.push(block);
        Ok(())
    }

    /// Append `block` and move `included` from pending to confirmed in one step.
    ///
    /// Fails without side effects if the linkage is stale, if an included
    /// transaction is not pending, or if the block does not carry exactly the
    /// included transactions.
    pub async fn finalize_block(&self, block: Block, included: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_linkage(&block)?;

        let block_hashes = block.transaction_hashes();
        if block_hashes.len() != included.len()
            || block_hashes.iter().zip(included).any(|(a, b)| a != b)
        {
            return Err(ChainError::Storage(format!(
                "block #{} transactions do not match the included set",
                block.number
            )));
        }

        if let Some(missing) = included.iter().find(|h| !state.pending.contains_key(*h)) {
            return Err(ChainError::Storage(format!(
                "transaction {} is no longer pending",
                missing
            )));
        }

        if let Some(persistence) = &self.persistence {
            persistence.append_block(&block).await?;
        }

        state.index_block(&block);
        info!(
            "Finalized block #{} {} with {} transactions",
            block.number,
            block.hash,
            included.len()
        );
        state.blocks.push(block);

        self.compact_pending(&state).await;
        Ok(())
    }

    /// Insert into the pending pool, assigning the hash if absent
    pub async fn add_pending_transaction(&self, mut tx: Transaction) -> Result<String> {
        let hash = tx.assign_hash()?.to_string();

        let mut state = self.state.write().await;
        if state.pending.contains_key(&hash) || state.confirmed.contains_key(&hash) {
            return Err(ChainError::DuplicateTransaction(hash));
        }

        let entry = PendingEntry {
            seq: state.next_seq,
            tx,
        };
        if let Some(persistence) = &self.persistence {
            persistence.append_pending(&entry).await?;
        }

        state.next_seq += 1;
        state.pending.insert(hash.clone(), entry);
        drop(state);

        debug!("Transaction {} added to pending pool", hash);
        Ok(hash)
    }

    /// Read-only snapshot of up to `limit` pending transactions, oldest first
    pub async fn drain_pending_for_task(&self, limit: usize) -> Vec<Transaction> {
        let state = self.state.read().await;
        state
            .pending_snapshot()
            .into_iter()
            .take(limit)
            .map(|e| e.tx)
            .collect()
    }

    pub async fn head_block(&self) -> Option<Block> {
        self.state.read().await.blocks.last().cloned()
    }

    pub async fn block_by_number(&self, number: u64) -> Option<Block> {
        let state = self.state.read().await;
        usize::try_from(number)
            .ok()
            .and_then(|i| state.blocks.get(i))
            .cloned()
    }

    /// Last `count` blocks in chain order
    pub async fn recent_blocks(&self, count: usize) -> Vec<Block> {
        let state = self.state.read().await;
        let start = state.blocks.len().saturating_sub(count);
        state.blocks[start..].to_vec()
    }

    pub async fn transaction_by_hash(&self, hash: &str) -> Option<Transaction> {
        let state = self.state.read().await;
        if let Some(location) = state.confirmed.get(hash) {
            return state
                .blocks
                .get(location.block as usize)
                .and_then(|b| b.transactions.get(location.position))
                .cloned();
        }
        state.pending.get(hash).map(|e| e.tx.clone())
    }

    pub async fn transaction_status(&self, hash: &str) -> Option<TransactionStatus> {
        let state = self.state.read().await;
        if state.confirmed.contains_key(hash) {
            Some(TransactionStatus::Confirmed)
        } else if state.pending.contains_key(hash) {
            Some(TransactionStatus::Pending)
        } else {
            None
        }
    }

    pub async fn block_count(&self) -> u64 {
        self.state.read().await.blocks.len() as u64
    }

    pub async fn confirmed_count(&self) -> u64 {
        self.state.read().await.confirmed.len() as u64
    }

    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending.len()
    }

    /// Walk the whole chain in order and report the first failing block
    pub async fn validate_chain(&self) -> ValidationReport {
        let state = self.state.read().await;
        let mut checked = 0u64;

        for (position, block) in state.blocks.iter().enumerate() {
            let index = position as u64;
            let previous = position.checked_sub(1).and_then(|p| state.blocks.get(p));

            if let Some(reason) = Self::check_block(index, block, previous) {
                return ValidationReport {
                    blocks_checked: checked,
                    failure: Some(ValidationFailure { index, reason }),
                };
            }
            checked += 1;
        }

        ValidationReport {
            blocks_checked: checked,
            failure: None,
        }
    }

    fn check_block(index: u64, block: &Block, previous: Option<&Block>) -> Option<CorruptionReason> {
        if block.number != index {
            return Some(CorruptionReason::NumberMismatch {
                expected: index,
                found: block.number,
            });
        }

        let computed = block.compute_hash();
        if computed != block.hash {
            return Some(CorruptionReason::HashMismatch {
                stored: block.hash.clone(),
                computed,
            });
        }

        let expected_prev = previous.map(|p| p.hash.as_str()).unwrap_or(ZERO_HASH);
        if block.previous_hash != expected_prev {
            return Some(CorruptionReason::BrokenLinkage {
                expected: expected_prev.to_string(),
                found: block.previous_hash.clone(),
            });
        }

        if !pow::is_valid_proof_of_work(&block.hash, block.difficulty) {
            return Some(CorruptionReason::InsufficientWork {
                difficulty: block.difficulty,
            });
        }

        for (position, tx) in block.transactions.iter().enumerate() {
            if tx.hash.as_deref() != Some(tx.compute_hash().as_str()) {
                return Some(CorruptionReason::TransactionHashMismatch { position });
            }
        }

        let merkle = pow::merkle_root(&block.transactions);
        if merkle != block.merkle_root {
            return Some(CorruptionReason::MerkleRootMismatch {
                stored: block.merkle_root.clone(),
                computed: merkle,
            });
        }

        None
    }

    /// Drop confirmed entries from the journal. Runs under the state write lock.
    async fn compact_pending(&self, state: &StoreState) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        // A failed compaction leaves confirmed lines behind; open filters them.
        if let Err(e) = persistence.compact_pending(&state.pending_snapshot()).await {
            warn!("Failed to compact pending journal: {}", e);
        }
    }

    #[cfg(test)]
    async fn tamper<F: FnOnce(&mut Block)>(&self, number: usize, f: F) {
        let mut state = self.state.write().await;
        f(&mut state.blocks[number]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockBuilder;
    use crate::transaction::{Payload, TransactionKind};

    fn tx(n: u128) -> Transaction {
        Transaction::new("alice", "bob", n, TransactionKind::Transfer, Payload::new())
            .with_timestamp(1_700_000_000_000 + n as u64)
    }

    fn mine(head: &Block, txs: Vec<Transaction>) -> Block {
        let template = BlockBuilder::on_top_of(head, 1).build(txs);
        let (nonce, hash) = pow::search_nonce(&template.header_for(0, "m"), 0, 1_000_000).unwrap();
        template.seal(nonce, hash, "m".to_string())
    }

    async fn store_with_genesis() -> ChainStore {
        let store = ChainStore::in_memory();
        store.append_block(Block::genesis(1_000)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_append_and_head() {
        let store = store_with_genesis().await;
        let head = store.head_block().await.unwrap();
        assert_eq!(head.number, 0);

        let block = mine(&head, Vec::new());
        store.append_block(block.clone()).await.unwrap();
        assert_eq!(store.head_block().await.unwrap(), block);
        assert_eq!(store.block_by_number(1).await.unwrap().hash, block.hash);
        assert!(store.block_by_number(2).await.is_none());
    }

    #[tokio::test]
    async fn test_append_rejects_stale_previous_hash() {
        let store = store_with_genesis().await;
        let genesis = store.head_block().await.unwrap();

        let first = mine(&genesis, vec![tx(1)]);
        let competing = mine(&genesis, vec![tx(2)]);
        store.append_block(first).await.unwrap();

        let result = store.append_block(competing).await;
        assert!(matches!(result, Err(ChainError::InvalidLinkage { .. })));
        assert_eq!(store.block_count().await, 2);
    }

    #[tokio::test]
    async fn test_second_genesis_rejected() {
        let store = store_with_genesis().await;
        let result = store.append_block(Block::genesis(2_000)).await;
        assert!(matches!(result, Err(ChainError::InvalidLinkage { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_pending_rejected() {
        let store = store_with_genesis().await;
        let hash = store.add_pending_transaction(tx(1)).await.unwrap();
        let result = store.add_pending_transaction(tx(1)).await;
        assert!(matches!(result, Err(ChainError::DuplicateTransaction(h)) if h == hash));
    }

    #[tokio::test]
    async fn test_drain_is_read_only_and_ordered() {
        let store = store_with_genesis().await;
        for i in 1..=5 {
            store.add_pending_transaction(tx(i)).await.unwrap();
        }

        let first = store.drain_pending_for_task(3).await;
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].amount, 1);
        assert_eq!(first[2].amount, 3);
        assert_eq!(store.pending_count().await, 5);
    }

    #[tokio::test]
    async fn test_finalize_moves_transactions() {
        let store = store_with_genesis().await;
        let mut hashes = Vec::new();
        for i in 1..=3 {
            hashes.push(store.add_pending_transaction(tx(i)).await.unwrap());
        }

        let txs = store.drain_pending_for_task(10).await;
        let head = store.head_block().await.unwrap();
        let block = mine(&head, txs);
        store.finalize_block(block, &hashes).await.unwrap();

        assert_eq!(store.pending_count().await, 0);
        for hash in &hashes {
            assert_eq!(
                store.transaction_status(hash).await,
                Some(TransactionStatus::Confirmed)
            );
            assert!(store.transaction_by_hash(hash).await.is_some());
        }

        // Confirmed transactions cannot be resubmitted
        let again = store.add_pending_transaction(tx(1)).await;
        assert!(matches!(again, Err(ChainError::DuplicateTransaction(_))));
    }

    #[tokio::test]
    async fn test_finalize_rejects_non_pending() {
        let store = store_with_genesis().await;
        let mut ghost = tx(9);
        let ghost_hash = ghost.assign_hash().unwrap().to_string();

        let head = store.head_block().await.unwrap();
        let block = mine(&head, vec![ghost]);
        let result = store.finalize_block(block, &[ghost_hash]).await;
        assert!(matches!(result, Err(ChainError::Storage(_))));
        assert_eq!(store.block_count().await, 1);
    }

    #[tokio::test]
    async fn test_validate_clean_chain() {
        let store = store_with_genesis().await;
        let mut head = store.head_block().await.unwrap();
        for i in 0..3 {
            let mut t = tx(i);
            t.assign_hash().unwrap();
            let block = mine(&head, vec![t]);
            store.append_block(block.clone()).await.unwrap();
            head = block;
        }

        let report = store.validate_chain().await;
        assert!(report.is_valid());
        assert_eq!(report.blocks_checked, 4);
    }

    #[tokio::test]
    async fn test_validate_detects_tampered_transactions() {
        let store = store_with_genesis().await;
        let mut head = store.head_block().await.unwrap();
        for i in 0..4 {
            let mut t = tx(i);
            t.assign_hash().unwrap();
            let block = mine(&head, vec![t]);
            store.append_block(block.clone()).await.unwrap();
            head = block;
        }

        store.tamper(2, |b| b.transactions[0].amount = 1_000_000).await;

        let report = store.validate_chain().await;
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.index, 2);
        assert!(matches!(
            failure.reason,
            CorruptionReason::TransactionHashMismatch { position: 0 }
        ));
        assert!(matches!(
            report.into_result(),
            Err(ChainError::ChainCorruption { index: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_detects_broken_hash() {
        let store = store_with_genesis().await;
        let head = store.head_block().await.unwrap();
        store.append_block(mine(&head, Vec::new())).await.unwrap();

        store.tamper(1, |b| b.nonce += 1).await;

        let failure = store.validate_chain().await.failure.unwrap();
        assert_eq!(failure.index, 1);
        assert!(matches!(failure.reason, CorruptionReason::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn test_reopen_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let pending_hash;
        {
            let store = ChainStore::open(dir.path()).await.unwrap();
            store.append_block(Block::genesis(1_000)).await.unwrap();
            let confirmed = store.add_pending_transaction(tx(1)).await.unwrap();
            pending_hash = store.add_pending_transaction(tx(2)).await.unwrap();

            let head = store.head_block().await.unwrap();
            let txs: Vec<Transaction> = store
                .drain_pending_for_task(10)
                .await
                .into_iter()
                .filter(|t| t.hash.as_deref() == Some(confirmed.as_str()))
                .collect();
            let block = mine(&head, txs);
            store.finalize_block(block, &[confirmed]).await.unwrap();
        }

        let reopened = ChainStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.block_count().await, 2);
        assert_eq!(reopened.pending_count().await, 1);
        assert_eq!(
            reopened.transaction_status(&pending_hash).await,
            Some(TransactionStatus::Pending)
        );
        assert!(reopened.validate_chain().await.is_valid());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(ChainStore::open(dir.path()).await.unwrap());
        store.append_block(Block::genesis(1_000)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..64u128 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.add_pending_transaction(tx(i + 1)).await
            }));
        }
        let mut accepted = Vec::new();
        for handle in handles {
            accepted.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(store.pending_count().await, 64);
        drop(store);

        let reopened = ChainStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.pending_count().await, 64);
        for hash in &accepted {
            assert_eq!(
                reopened.transaction_status(hash).await,
                Some(TransactionStatus::Pending)
            );
        }
    }

    #[tokio::test]
    async fn test_unreadable_journal_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let kept;
        {
            let store = ChainStore::open(dir.path()).await.unwrap();
            store.append_block(Block::genesis(1_000)).await.unwrap();
            kept = store.add_pending_transaction(tx(1)).await.unwrap();
        }

        let journal = dir.path().join(PENDING_JOURNAL_FILE);
        let mut raw = std::fs::read(&journal).unwrap();
        raw.extend_from_slice(b"{\"seq\":7,\"tx\":{\"sen\n\xff\xfe garbage\n");
        std::fs::write(&journal, raw).unwrap();

        let reopened = ChainStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.block_count().await, 1);
        assert_eq!(reopened.pending_count().await, 1);
        assert_eq!(
            reopened.transaction_status(&kept).await,
            Some(TransactionStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_garbage_journal_opens_with_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ChainStore::open(dir.path()).await.unwrap();
            store.append_block(Block::genesis(1_000)).await.unwrap();
        }
        std::fs::write(dir.path().join(PENDING_JOURNAL_FILE), b"not json at all").unwrap();

        let reopened = ChainStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.pending_count().await, 0);
        assert!(reopened.add_pending_transaction(tx(3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_finalize_compacts_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).await.unwrap();
        store.append_block(Block::genesis(1_000)).await.unwrap();

        let included = store.add_pending_transaction(tx(1)).await.unwrap();
        let left = store.add_pending_transaction(tx(2)).await.unwrap();

        let txs: Vec<Transaction> = store
            .drain_pending_for_task(10)
            .await
            .into_iter()
            .filter(|t| t.hash.as_deref() == Some(included.as_str()))
            .collect();
        let head = store.head_block().await.unwrap();
        store.finalize_block(mine(&head, txs), &[included.clone()]).await.unwrap();

        let journal = std::fs::read_to_string(dir.path().join(PENDING_JOURNAL_FILE)).unwrap();
        assert_eq!(journal.lines().count(), 1);
        assert!(journal.contains(&left));
        assert!(!journal.contains(&included));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
