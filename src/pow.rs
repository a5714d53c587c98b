//! Hashing and proof-of-work primitives with SHA-256
//!
//! All hashes are lowercase hex strings. Canonical serializations are JSON
//! objects built from `BTreeMap`s, so keys are always emitted sorted.

use crate::block::BlockHeader;
use crate::transaction::Transaction;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 of arbitrary bytes as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn canonical_hash(fields: BTreeMap<&'static str, Value>) -> String {
    // Serializing a map of strings and plain values cannot fail.
    let encoded = serde_json::to_vec(&fields).unwrap_or_default();
    sha256_hex(&encoded)
}

/// Content hash of a transaction over sender, recipient, amount, kind,
/// timestamp and payload. Hash and signature fields are not covered.
pub fn transaction_hash(tx: &Transaction) -> String {
    let payload: serde_json::Map<String, Value> = tx
        .payload
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut fields = BTreeMap::new();
    // u128 does not fit a JSON number portably.
    fields.insert("amount", Value::String(tx.amount.to_string()));
    fields.insert("kind", Value::String(tx.kind.as_str().to_string()));
    fields.insert("payload", Value::Object(payload));
    fields.insert("recipient", Value::String(tx.recipient.clone()));
    fields.insert("sender", Value::String(tx.sender.clone()));
    fields.insert("timestamp", Value::from(tx.timestamp));
    canonical_hash(fields)
}

/// Merkle root over already computed transaction hashes.
///
/// Empty input hashes the empty byte string. Each level concatenates pairs of
/// hex digests and hashes them, duplicating the last digest on odd levels.
pub fn merkle_root_from_hashes(hashes: &[String]) -> String {
    if hashes.is_empty() {
        return sha256_hex(b"");
    }

    let mut level: Vec<String> = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut joined = String::with_capacity(left.len() + right.len());
            joined.push_str(left);
            joined.push_str(right);
            next.push(sha256_hex(joined.as_bytes()));
        }
        level = next;
    }

    level.swap_remove(0)
}

/// Merkle root of a transaction list in the given order.
///
/// Leaves are recomputed content hashes, so a tampered transaction changes the
/// root even if its stored `hash` field was left alone.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    let hashes: Vec<String> = transactions.iter().map(transaction_hash).collect();
    merkle_root_from_hashes(&hashes)
}

/// Block hash over number, previous hash, Merkle root, timestamp, nonce,
/// difficulty and miner address.
pub fn block_hash(header: &BlockHeader) -> String {
    let mut fields = BTreeMap::new();
    fields.insert("difficulty", Value::from(header.difficulty));
    fields.insert("merkle_root", Value::String(header.merkle_root.clone()));
    fields.insert("miner", Value::String(header.miner.clone()));
    fields.insert("nonce", Value::from(header.nonce));
    fields.insert("number", Value::from(header.number));
    fields.insert("previous_hash", Value::String(header.previous_hash.clone()));
    fields.insert("timestamp", Value::from(header.timestamp));
    canonical_hash(fields)
}

/// True iff `hash` starts with `difficulty` literal `'0'` characters.
///
/// This is a prefix check on the hex string, not a numeric target comparison.
pub fn is_valid_proof_of_work(hash: &str, difficulty: u32) -> bool {
    let required = difficulty as usize;
    hash.len() >= required && hash.bytes().take(required).all(|b| b == b'0')
}

/// Reference nonce search for miner tooling, tests and benchmarks.
///
/// The chain core never calls this; miners run it out of process. Returns the
/// first `(nonce, hash)` found within `max_iterations` starting at `start_nonce`.
pub fn search_nonce(
    header: &BlockHeader,
    start_nonce: u64,
    max_iterations: u64,
) -> Option<(u64, String)> {
    let mut candidate = header.clone();
    for offset in 0..max_iterations {
        candidate.nonce = start_nonce.wrapping_add(offset);
        let hash = block_hash(&candidate);
        if is_valid_proof_of_work(&hash, candidate.difficulty) {
            return Some((candidate.nonce, hash));
        }
    }
    None
}
