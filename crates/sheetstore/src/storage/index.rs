//! Materialized directory listings.
//!
//! Each directory owns a [`DirectoryIndex`]: its child names in insertion
//! order. Backends update the index as part of every child create or delete;
//! it is never derived by scanning, except by an explicit reconciliation pass.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered, duplicate-free list of child names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryIndex {
    names: Vec<String>,
}

/// Outcome of [`DirectoryIndex::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRepair {
    /// Names present on the medium but missing from the index.
    pub adopted: Vec<String>,
    /// Names in the index with no backing entity.
    pub dropped: Vec<String>,
}

impl IndexRepair {
    /// True when the index already matched.
    pub fn is_clean(&self) -> bool {
        self.adopted.is_empty() && self.dropped.is_empty()
    }
}

impl DirectoryIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a name. Returns false, leaving the index unchanged, if it is already listed.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    /// Remove a name. Returns false if it was not listed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.names.iter().position(|n| n == name) {
            Some(pos) => {
                self.names.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn into_names(self) -> Vec<String> {
        self.names
    }

    /// Bring the index in line with the entities actually present.
    ///
    /// Surviving names keep their order, dangling names are dropped, and
    /// unlisted entities are appended in sorted order.
    pub fn reconcile(&mut self, present: &[String]) -> IndexRepair {
        let present_set: HashSet<&str> = present.iter().map(String::as_str).collect();

        let mut repair = IndexRepair::default();
        self.names.retain(|name| {
            let keep = present_set.contains(name.as_str());
            if !keep {
                repair.dropped.push(name.clone());
            }
            keep
        });

        let listed: HashSet<String> = self.names.iter().cloned().collect();
        let mut adopted: Vec<String> = present
            .iter()
            .filter(|name| !listed.contains(*name))
            .cloned()
            .collect();
        adopted.sort();
        adopted.dedup();

        self.names.extend(adopted.iter().cloned());
        repair.adopted = adopted;
        repair
    }
}

impl From<Vec<String>> for DirectoryIndex {
    /// Builds an index, keeping the first occurrence of any duplicate.
    fn from(names: Vec<String>) -> Self {
        let mut index = Self::new();
        for name in &names {
            index.insert(name);
        }
        index
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn insertion_order_and_no_duplicates() {
        let mut index = DirectoryIndex::new();
        assert!(index.insert("b"));
        assert!(index.insert("a"));
        assert!(!index.insert("b"));
        assert_eq!(index.names(), names(&["b", "a"]).as_slice());
    }

    #[test]
    fn remove_keeps_order() {
        let mut index = DirectoryIndex::from(names(&["x", "y", "z"]));
        assert!(index.remove("y"));
        assert!(!index.remove("y"));
        assert_eq!(index.into_names(), names(&["x", "z"]));
    }

    #[test]
    fn serializes_as_json_array() {
        let index = DirectoryIndex::from(names(&["sheet1", "notes"]));
        let json = serde_json::to_string(&index).unwrap();
        assert_eq!(json, r#"["sheet1","notes"]"#);
        let back: DirectoryIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn reconcile_adopts_and_drops() {
        let mut index = DirectoryIndex::from(names(&["c", "gone", "a"]));
        let repair = index.reconcile(&names(&["a", "z", "c", "b"]));

        assert_eq!(index.names(), names(&["c", "a", "b", "z"]).as_slice());
        assert_eq!(repair.adopted, names(&["b", "z"]));
        assert_eq!(repair.dropped, names(&["gone"]));
        assert!(!repair.is_clean());
    }

    #[test]
    fn reconcile_clean_index_is_noop() {
        let mut index = DirectoryIndex::from(names(&["b", "a"]));
        let repair = index.reconcile(&names(&["a", "b"]));
        assert!(repair.is_clean());
        assert_eq!(index.names(), names(&["b", "a"]).as_slice());
    }
}
