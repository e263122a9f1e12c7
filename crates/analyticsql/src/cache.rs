//! Question-keyed result cache.
//!
//! Successful (question → SQL + result) pairs are memoized so a repeated
//! question skips the generator and the database entirely. Keys are the
//! SHA-256 of the normalized question text (trimmed, lowercased, internal
//! whitespace collapsed), so trivial rephrasings of whitespace and case hit
//! the same entry. Entries never expire; operators evict via `clear`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// A memoized successful query result.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    /// The SQL that produced the result
    pub sql: String,
    /// Result column names
    pub columns: Vec<String>,
    /// Result rows, one JSON object per row
    pub rows: Vec<serde_json::Value>,
    /// Number of rows returned
    pub row_count: usize,
    /// Number of rows the statement produced before the row cap
    pub total_rows: usize,
    /// When the entry was stored
    pub created_at: DateTime<Utc>,
}

/// Cache counters, reported by `stats`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    /// Entries currently stored
    pub entries: usize,
    /// Lookup hits since creation
    pub hits: u64,
    /// Lookup misses since creation
    pub misses: u64,
}

/// Concurrent question → result cache. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for a question, counting the hit or miss.
    pub fn get(&self, question: &str) -> Option<CacheEntry> {
        let key = cache_key(question);
        match self.entries.get(&key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "query cache hit");
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a successful result for a question, replacing any prior entry.
    pub fn insert(&self, question: &str, entry: CacheEntry) {
        let key = cache_key(question);
        debug!(key = %key, rows = entry.row_count, "query cache store");
        self.entries.insert(key, entry);
    }

    /// Drop every entry, returning how many were evicted.
    pub fn clear(&self) -> usize {
        let evicted = self.entries.len();
        self.entries.clear();
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Collapse whitespace and case so near-identical questions share a key.
fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn cache_key(question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_question(question).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(sql: &str) -> CacheEntry {
        CacheEntry {
            sql: sql.to_string(),
            columns: vec!["n".to_string()],
            rows: vec![json!({"n": 1})],
            row_count: 1,
            total_rows: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip() {
        let cache = QueryCache::new();
        assert!(cache.get("how many users?").is_none());

        cache.insert("how many users?", entry("SELECT count(*) FROM users"));
        let hit = cache.get("how many users?").expect("entry");
        assert_eq!(hit.sql, "SELECT count(*) FROM users");
        assert_eq!(hit.row_count, 1);
    }

    #[test]
    fn test_normalization_collapses_case_and_whitespace() {
        let cache = QueryCache::new();
        cache.insert("How many   users?", entry("SELECT 1"));
        assert!(cache.get("  how many users?  ").is_some());
        assert!(cache.get("how many orders?").is_none());
    }

    #[test]
    fn test_insert_replaces() {
        let cache = QueryCache::new();
        cache.insert("q", entry("SELECT 1"));
        cache.insert("q", entry("SELECT 2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("q").expect("entry").sql, "SELECT 2");
    }

    #[test]
    fn test_clear_and_stats() {
        let cache = QueryCache::new();
        cache.insert("a", entry("SELECT 1"));
        cache.insert("b", entry("SELECT 2"));
        let _ = cache.get("a");
        let _ = cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_are_stable_hashes() {
        assert_eq!(cache_key("Hello  World"), cache_key("hello world"));
        assert_ne!(cache_key("hello"), cache_key("world"));
        assert_eq!(cache_key("x").len(), 64);
    }
}
