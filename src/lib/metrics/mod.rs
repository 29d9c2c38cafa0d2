//! Record schemas and the registry that fans them out to sinks.

pub mod records;
pub mod sink;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwap;

use records::{Record, RecordKind};
use sink::RecordSink;

/// Process context through which every record is emitted.
///
/// Constructed once when the tracer starts and handed to every component by
/// `Arc`; it is never reachable through a global.
pub struct MetricsRegistry {
    sinks: ArcSwap<Vec<Arc<dyn RecordSink>>>,
    emitted: [AtomicU64; 4],
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            sinks: ArcSwap::from_pointee(Vec::new()),
            emitted: Default::default(),
        }
    }

    pub fn with_sink(self, sink: Arc<dyn RecordSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn add_sink(&self, sink: Arc<dyn RecordSink>) {
        self.sinks.rcu(|sinks| {
            let mut sinks = Vec::clone(sinks);
            sinks.push(sink.clone());
            sinks
        });
    }

    pub fn clear_sinks(&self) {
        self.sinks.store(Arc::new(Vec::new()));
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.load().len()
    }

    pub fn emit(&self, record: Record) {
        self.emitted[record.kind() as usize].fetch_add(1, Ordering::Relaxed);
        for sink in self.sinks.load().iter() {
            sink.emit(&record);
        }
    }

    /// Number of records of `kind` emitted so far.
    pub fn emitted(&self, kind: RecordKind) -> u64 {
        self.emitted[kind as usize].load(Ordering::Relaxed)
    }

    pub fn total_emitted(&self) -> u64 {
        RecordKind::ALL.iter().map(|kind| self.emitted(*kind)).sum()
    }
}
