//! Named event counters

use std::collections::BTreeMap;

/// Monotonic counters keyed by static names.
///
/// Backed by a `BTreeMap` so snapshots come out in a stable order.
#[derive(Debug, Default)]
pub struct Counter {
    counters: BTreeMap<&'static str, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            counters: BTreeMap::new(),
        }
    }

    pub fn increment(&mut self, name: &'static str, value: usize) {
        *self.counters.entry(name).or_insert(0) += value;
    }

    pub fn get(&self, name: &str) -> usize {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }

    pub fn snapshot(&self) -> Vec<(&'static str, usize)> {
        self.counters.iter().map(|(name, value)| (*name, *value)).collect()
    }
}
