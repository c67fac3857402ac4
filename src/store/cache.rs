//! In-memory application cache, keyed by both id and client id.
//!
//! Entries are evicted by a per-entity change token fired when a write
//! path returns success; eviction policy is LRU-approximate over a fixed
//! size budget.

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;

use super::ApplicationRecord;

/// A thread-safe cache in front of an [`super::ApplicationStore`].
/// Process-wide and internally synchronized.
pub struct ApplicationCache {
    by_id: DashMap<String, ApplicationRecord>,
    by_client_id: DashMap<String, String>,
    // Approximate-recency order for eviction; front = least recently used.
    recency: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ApplicationCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            by_id: DashMap::new(),
            by_client_id: DashMap::new(),
            recency: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<ApplicationRecord> {
        let found = self.by_id.get(id).map(|r| r.clone());
        if found.is_some() {
            self.touch(id);
        }
        found
    }

    #[must_use]
    pub fn get_by_client_id(&self, client_id: &str) -> Option<ApplicationRecord> {
        let id = self.by_client_id.get(client_id)?.clone();
        self.get_by_id(&id)
    }

    pub fn put(&self, record: ApplicationRecord) {
        let id = record.id.clone();
        self.by_client_id.insert(record.client_id.clone(), id.clone());
        self.by_id.insert(id.clone(), record);
        self.touch(&id);
        self.evict_if_needed();
    }

    /// Evict an entry: called when a write path's change token fires.
    pub fn invalidate(&self, id: &str) {
        if let Some((_, record)) = self.by_id.remove(id) {
            self.by_client_id.remove(&record.client_id);
        }
        self.recency.lock().unwrap().retain(|cached| cached != id);
    }

    fn touch(&self, id: &str) {
        let mut recency = self.recency.lock().unwrap();
        recency.retain(|cached| cached != id);
        recency.push_back(id.to_string());
    }

    fn evict_if_needed(&self) {
        let mut recency = self.recency.lock().unwrap();
        while recency.len() > self.capacity {
            if let Some(oldest) = recency.pop_front() {
                if let Some((_, record)) = self.by_id.remove(&oldest) {
                    self.by_client_id.remove(&record.client_id);
                }
            }
        }
    }
}
