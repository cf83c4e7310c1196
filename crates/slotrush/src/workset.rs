// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending work: the resources still to be acquired.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One resource to acquire and the sub-allocation (section) wanted for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub resource_id: String,
    pub section: String,
}

impl WorkItem {
    pub fn new(resource_id: impl Into<String>, section: impl Into<String>) -> Self {
        Self { resource_id: resource_id.into(), section: section.into() }
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_id, self.section)
    }
}

/// Insertion-ordered set of work items keyed by resource id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkSet {
    items: IndexMap<String, WorkItem>,
}

impl WorkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item, replacing the section of an existing key in place.
    /// Returns the replaced item, if any.
    pub fn insert(&mut self, item: WorkItem) -> Option<WorkItem> {
        self.items.insert(item.resource_id.clone(), item)
    }

    /// Remove an item, keeping the relative order of the rest.
    pub fn remove(&mut self, resource_id: &str) -> Option<WorkItem> {
        self.items.shift_remove(resource_id)
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.items.contains_key(resource_id)
    }

    pub fn get(&self, resource_id: &str) -> Option<&WorkItem> {
        self.items.get(resource_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values()
    }

    pub fn resource_ids(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    /// Items in dispatch order: those named in `priority` first (in priority
    /// order, unknown names skipped), then the rest in insertion order.
    pub fn ordered(&self, priority: &[String]) -> Vec<WorkItem> {
        let mut out = Vec::with_capacity(self.items.len());
        for id in priority {
            if let Some(item) = self.items.get(id) {
                if !out.iter().any(|o: &WorkItem| o.resource_id == *id) {
                    out.push(item.clone());
                }
            }
        }
        for item in self.items.values() {
            if !priority.contains(&item.resource_id) {
                out.push(item.clone());
            }
        }
        out
    }
}

impl FromIterator<WorkItem> for WorkSet {
    fn from_iter<I: IntoIterator<Item = WorkItem>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

#[cfg(test)]
#[path = "workset_tests.rs"]
mod tests;
