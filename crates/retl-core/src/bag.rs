//! Concurrent `key -> set<value>` bag backing per-key uniqueness filters.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Mutex-guarded map of sets. All operations are linearizable; contention is
/// low because bag keys are typically partitioned per input file.
#[derive(Debug, Default)]
pub struct ConcurrentKeyBag {
    content: Mutex<HashMap<String, HashSet<String>>>,
}

impl ConcurrentKeyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `bag_key`; returns true when it was absent.
    pub fn add_if_absent(&self, bag_key: &str, value: &str) -> bool {
        let mut content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        content
            .entry(bag_key.to_owned())
            .or_default()
            .insert(value.to_owned())
    }

    /// Empty the set stored under `bag_key`.
    pub fn clear(&self, bag_key: &str) {
        let mut content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bag) = content.get_mut(bag_key) {
            bag.clear();
        }
    }

    pub fn clear_all(&self) {
        self.content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn contains(&self, bag_key: &str, value: &str) -> bool {
        self.content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(bag_key)
            .is_some_and(|bag| bag.contains(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn add_if_absent_reports_first_insert_only() {
        let bag = ConcurrentKeyBag::new();
        assert!(bag.add_if_absent("f1", "alpha"));
        assert!(!bag.add_if_absent("f1", "alpha"));
        // same value under a different key is independent
        assert!(bag.add_if_absent("f2", "alpha"));
        assert!(bag.contains("f1", "alpha"));
    }

    #[test]
    fn clear_is_per_key() {
        let bag = ConcurrentKeyBag::new();
        bag.add_if_absent("f1", "a");
        bag.add_if_absent("f2", "b");
        bag.clear("f1");
        assert!(!bag.contains("f1", "a"));
        assert!(bag.contains("f2", "b"));
        bag.clear_all();
        assert!(!bag.contains("f2", "b"));
    }

    #[test]
    fn concurrent_inserts_admit_exactly_one_winner() {
        let bag = Arc::new(ConcurrentKeyBag::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let bag = bag.clone();
            handles.push(std::thread::spawn(move || bag.add_if_absent("k", "v")));
        }
        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|added| *added)
            .count();
        assert_eq!(winners, 1);
    }
}
