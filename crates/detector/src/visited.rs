//! Copy-on-write membership sets threaded through recursive search

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

/// Immutable set value; `with` returns an extended copy and leaves `self` alone
///
/// Sibling search branches each hold their own value, so one branch marking
/// a token visited is never observed by another.
#[derive(Debug, Clone)]
pub struct VisitedSet<T: Eq + Hash + Clone> {
    items: Arc<HashSet<T>>,
}

impl<T: Eq + Hash + Clone> VisitedSet<T> {
    pub fn new() -> Self {
        Self { items: Arc::new(HashSet::new()) }
    }

    pub fn from_item(item: T) -> Self {
        Self::new().with(item)
    }

    pub fn with(&self, item: T) -> Self {
        if self.items.contains(&item) {
            return self.clone();
        }
        let mut items = (*self.items).clone();
        items.insert(item);
        Self { items: Arc::new(items) }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Eq + Hash + Clone> Default for VisitedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
