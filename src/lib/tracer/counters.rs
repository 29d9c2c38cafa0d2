use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cheap counters of what the data path did, for diagnostics and tests.
#[derive(Debug, Default)]
pub struct HotPathCounters {
    role_lookups: AtomicU64,
    topology_lookups: AtomicU64,
    stamped: AtomicU64,
    skipped_immutable: AtomicU64,
    node_samples: AtomicU64,
    branch_samples: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub role_lookups: u64,
    pub topology_lookups: u64,
    pub stamped: u64,
    pub skipped_immutable: u64,
    pub node_samples: u64,
    pub branch_samples: u64,
}

impl CountersSnapshot {
    pub fn cache_lookups(&self) -> u64 {
        self.role_lookups + self.topology_lookups
    }
}

impl HotPathCounters {
    #[inline]
    pub(crate) fn role_lookup(&self) {
        self.role_lookups.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn topology_lookup(&self) {
        self.topology_lookups.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn stamp(&self) {
        self.stamped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn skip_immutable(&self) {
        self.skipped_immutable.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn node_sample(&self) {
        self.node_samples.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn branch_sample(&self) {
        self.branch_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            role_lookups: self.role_lookups.load(Ordering::Relaxed),
            topology_lookups: self.topology_lookups.load(Ordering::Relaxed),
            stamped: self.stamped.load(Ordering::Relaxed),
            skipped_immutable: self.skipped_immutable.load(Ordering::Relaxed),
            node_samples: self.node_samples.load(Ordering::Relaxed),
            branch_samples: self.branch_samples.load(Ordering::Relaxed),
        }
    }
}
