//! In-memory record of engaged candidates.
//!
//! Nothing here is persisted: a process restart starts from an empty store.
//! The set is bounded; once `capacity` ids are held, the oldest id is evicted
//! to make room for a new one.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct DedupStore {
    capacity: usize,
    ids: HashSet<String>,
    order: VecDeque<String>,
    last_creation_at: Option<DateTime<Utc>>,
}

impl DedupStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ids: HashSet::new(),
            order: VecDeque::new(),
            last_creation_at: None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn last_creation_at(&self) -> Option<DateTime<Utc>> {
        self.last_creation_at
    }

    /// Record a successfully engaged id. Returns `false` if it was already present.
    pub fn record_engaged(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    /// Record a successful create-post.
    pub fn record_creation(&mut self, at: DateTime<Utc>) {
        self.last_creation_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reports_membership() {
        let mut store = DedupStore::new(8);
        assert!(store.is_empty());
        assert!(store.record_engaged("a"));
        assert!(!store.record_engaged("a"));
        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut store = DedupStore::new(2);
        store.record_engaged("a");
        store.record_engaged("b");
        store.record_engaged("c");
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("c"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn creation_timestamp_starts_unset() {
        let mut store = DedupStore::new(1);
        assert_eq!(store.last_creation_at(), None);
        let now = Utc::now();
        store.record_creation(now);
        assert_eq!(store.last_creation_at(), Some(now));
    }
}
