use super::types::{MediaInfo, MediaRequest};
use moka::{policy::EvictionPolicy, sync::Cache};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

/// Process-wide memo of extraction results, bounded by age and by count.
///
/// Concurrent misses for the same URL may both extract and both store; the
/// last write wins.
pub struct ResultCache {
    entries: Cache<String, MediaInfo>,
    capacity: u64,
}

pub fn cache_key(request: &MediaRequest) -> String {
    format!("{:x}", Sha256::digest(request.cleaned.as_bytes()))
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = capacity as u64;
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|key, _, cause| {
                debug!("Cache entry {} removed ({:?})", key, cause);
            })
            .build();

        Self { entries, capacity }
    }

    pub fn get(&self, request: &MediaRequest) -> Option<MediaInfo> {
        self.entries.get(&cache_key(request))
    }

    pub fn put(&self, request: &MediaRequest, value: MediaInfo) {
        if self.capacity == 0 {
            return;
        }
        self.entries.insert(cache_key(request), value);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }
}
