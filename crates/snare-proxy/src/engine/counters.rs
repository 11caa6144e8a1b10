//! Per-rule invocation counters.
//!
//! One [`CounterStore`] belongs to exactly one configuration generation. The
//! cells form a flat arena laid out endpoint by endpoint, so a rule's identity
//! `(endpoint, rule)` maps to a fixed slot without hashing or locking. A reload
//! builds a fresh store; counters never carry over to a new generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity of a failure rule inside one configuration generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId {
    pub endpoint: usize,
    pub rule: usize,
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.endpoint, self.rule)
    }
}

pub struct CounterStore {
    /// First slot of each endpoint
    offsets: Vec<usize>,
    cells: Box<[AtomicU64]>,
}

impl CounterStore {
    /// Build a store for the given number of rules per endpoint.
    pub fn with_layout<I>(rules_per_endpoint: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut offsets = Vec::new();
        let mut total = 0;
        for count in rules_per_endpoint {
            offsets.push(total);
            total += count;
        }
        let cells = (0..total).map(|_| AtomicU64::new(0)).collect();
        Self { offsets, cells }
    }

    fn cell(&self, id: RuleId) -> Option<&AtomicU64> {
        let start = *self.offsets.get(id.endpoint)?;
        let end = self
            .offsets
            .get(id.endpoint + 1)
            .copied()
            .unwrap_or(self.cells.len());
        if start + id.rule >= end {
            return None;
        }
        self.cells.get(start + id.rule)
    }

    /// Atomically bump the counter and return the new value.
    ///
    /// Each caller racing on the same rule observes a distinct value, so
    /// `count`/`every` boundaries are crossed by exactly one request.
    /// Returns 0 for an identity outside this generation's layout.
    pub fn increment(&self, id: RuleId) -> u64 {
        match self.cell(id) {
            Some(cell) => cell.fetch_add(1, Ordering::AcqRel) + 1,
            None => 0,
        }
    }

    pub fn get(&self, id: RuleId) -> u64 {
        self.cell(id)
            .map(|cell| cell.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn reset_all(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Release);
        }
    }

    /// Number of rule cells in this store.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl std::fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterStore")
            .field("endpoints", &self.offsets.len())
            .field("rules", &self.cells.len())
            .finish()
    }
}
