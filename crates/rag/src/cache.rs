//! TTL query cache for ultra-low-latency mode

use std::time::{Duration, Instant};

use dashmap::DashMap;

use voxbridge_core::RetrievedChunk;

/// Cache entries live this long.
pub const CACHE_TTL: Duration = Duration::from_secs(60);

/// Normalised-query result cache.
pub struct QueryCache {
    entries: DashMap<String, (Instant, Vec<RetrievedChunk>)>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Normalise query text: case-folded, whitespace-collapsed.
    pub fn normalise(query: &str) -> String {
        query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn get(&self, query: &str) -> Option<Vec<RetrievedChunk>> {
        let key = Self::normalise(query);
        // The shard guard must drop before the remove below
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.0.elapsed() < self.ttl => return Some(entry.1.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    pub fn put(&self, query: &str, chunks: Vec<RetrievedChunk>) {
        self.entries
            .insert(Self::normalise(query), (Instant::now(), chunks));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> RetrievedChunk {
        RetrievedChunk {
            text: "cached".into(),
            source_id: "doc-1".into(),
            score: 0.9,
            rank: 0,
        }
    }

    #[test]
    fn test_hit_on_normalised_variant() {
        let cache = QueryCache::new();
        cache.put("What IS   the rate?", vec![chunk()]);

        let hit = cache.get("what is the rate?");
        assert!(hit.is_some());
        assert_eq!(hit.unwrap()[0].source_id, "doc-1");
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = QueryCache::with_ttl(Duration::ZERO);
        cache.put("query", vec![chunk()]);
        assert!(cache.get("query").is_none());
        assert!(cache.is_empty());
    }
}
