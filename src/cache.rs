// src/cache.rs
//! In-process TTL cache for aggregated result lists.
//!
//! Keys are content-addressed: a sha256 over a schema-version tag, the
//! sorted source-key list and the sorted filter pairs, so key derivation is
//! order-independent. Reads re-validate the entry shape and evict anything
//! that looks like a stale schema. Writes are last-writer-wins; a slightly
//! stale overwrite is acceptable by design.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::model::NormalizedBiddingRecord;

/// Bump when the cached record shape changes so old entries self-invalidate.
const KEY_VERSION: &str = "v1";

pub fn generate_key(source_keys: &[String], filter_pairs: &[(String, String)]) -> String {
    let mut sources: Vec<&str> = source_keys.iter().map(String::as_str).collect();
    sources.sort_unstable();

    let mut pairs: Vec<(&str, &str)> = filter_pairs
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(KEY_VERSION.as_bytes());
    for s in &sources {
        hasher.update(b"|s:");
        hasher.update(s.as_bytes());
    }
    for (k, v) in &pairs {
        hasher.update(b"|f:");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

struct Entry {
    deadline: Instant,
    data: Vec<NormalizedBiddingRecord>,
}

pub struct ResultCache {
    ttl_secs: i64,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ResultCache {
    /// `ttl_secs <= 0` disables caching: every read misses, writes are
    /// dropped.
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.ttl_secs > 0
    }

    pub fn get(&self, key: &str) -> Option<Vec<NormalizedBiddingRecord>> {
        if !self.enabled() {
            return None;
        }

        let expired_or_invalid = {
            let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match guard.get(key) {
                None => return None,
                Some(entry) => {
                    if Instant::now() >= entry.deadline || !shape_is_valid(&entry.data) {
                        true
                    } else {
                        debug!(key, count = entry.data.len(), "cache hit");
                        return Some(entry.data.clone());
                    }
                }
            }
        };

        if expired_or_invalid {
            let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
            guard.remove(key);
            debug!(key, "cache entry evicted");
        }
        None
    }

    pub fn put(&self, key: &str, data: Vec<NormalizedBiddingRecord>) {
        if !self.enabled() {
            return;
        }
        let deadline = Instant::now() + Duration::from_secs(self.ttl_secs as u64);
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        debug!(key, count = data.len(), "cache write");
        guard.insert(key.to_string(), Entry { deadline, data });
    }
}

/// Defensive shape check on read: an empty list is trusted, a non-empty one
/// must carry provenance and a bidding number on its first element.
fn shape_is_valid(data: &[NormalizedBiddingRecord]) -> bool {
    match data.first() {
        None => true,
        Some(first) => !first.bidding_number.is_empty() && !first.source.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NormalizedBiddingRecord;

    fn rec(number: &str) -> NormalizedBiddingRecord {
        let mut r = NormalizedBiddingRecord::for_source("pncp", "PNCP");
        r.bidding_number = number.to_string();
        r
    }

    #[test]
    fn key_is_order_independent() {
        let a = generate_key(
            &["b".into(), "a".into()],
            &[("y".into(), "2".into()), ("x".into(), "1".into())],
        );
        let b = generate_key(
            &["a".into(), "b".into()],
            &[("x".into(), "1".into()), ("y".into(), "2".into())],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_for_different_filters() {
        let a = generate_key(&["a".into()], &[("x".into(), "1".into())]);
        let b = generate_key(&["a".into()], &[("x".into(), "2".into())]);
        assert_ne!(a, b);
    }

    #[test]
    fn round_trip_and_disabled_ttl() {
        let cache = ResultCache::new(3600);
        cache.put("k", vec![rec("1/2025")]);
        assert_eq!(cache.get("k").unwrap().len(), 1);

        let off = ResultCache::new(0);
        off.put("k", vec![rec("1/2025")]);
        assert!(off.get("k").is_none());
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let cache = ResultCache::new(3600);
        cache.put("k", vec![rec("1/2025")]);
        // Rewind the deadline instead of sleeping out a real TTL.
        {
            let mut guard = cache.entries.write().unwrap();
            guard.get_mut("k").unwrap().deadline = Instant::now();
        }
        assert!(cache.get("k").is_none());
        // The expired entry is removed, not merely skipped.
        assert!(cache.entries.read().unwrap().is_empty());
    }

    #[test]
    fn invalid_shape_is_evicted() {
        let cache = ResultCache::new(3600);
        cache.put("k", vec![rec("")]); // no bidding number: stale schema stand-in
        assert!(cache.get("k").is_none());
        // Second read still a miss; the entry is gone, not re-validated.
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn empty_list_is_trusted() {
        let cache = ResultCache::new(3600);
        cache.put("k", Vec::new());
        assert_eq!(cache.get("k").unwrap().len(), 0);
    }
}
