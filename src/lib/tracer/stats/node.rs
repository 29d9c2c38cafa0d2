use std::sync::{Arc, Mutex};

use crate::{
    graph::types::ClockTime,
    metrics::{
        records::{ElementIntervalRecord, ElementRecord, Record},
        MetricsRegistry,
    },
};

use super::{lock, Running, Window};

/// Latency statistics of one processing node.
#[derive(Debug)]
pub struct NodeStats {
    name: Arc<str>,
    is_composite: bool,
    running: Mutex<Running>,
    window: Mutex<Window>,
}

impl NodeStats {
    pub fn new(name: Arc<str>, is_composite: bool, now: ClockTime) -> Self {
        Self {
            name,
            is_composite,
            running: Mutex::new(Running::default()),
            window: Mutex::new(Window::new(now)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_composite(&self) -> bool {
        self.is_composite
    }

    pub fn frame_count(&self) -> u64 {
        lock(&self.running).snapshot().count
    }

    /// Record the latency of one data unit leaving the node at `ts`.
    pub fn record(&self, latency_ms: f64, ts: ClockTime, interval_ms: u32, registry: &MetricsRegistry) {
        let snapshot = lock(&self.running).add(latency_ms);

        registry.emit(Record::Element(ElementRecord {
            name: self.name.clone(),
            frame_latency: latency_ms,
            avg: snapshot.avg,
            min: snapshot.min,
            max: snapshot.max,
            frame_count: snapshot.count,
            is_composite: self.is_composite,
        }));

        let summary = lock(&self.window).add(latency_ms, ts, interval_ms);
        if let Some(summary) = summary {
            registry.emit(Record::ElementInterval(ElementIntervalRecord {
                name: self.name.clone(),
                interval_ms: summary.interval_ms,
                avg: summary.avg,
                min: summary.min,
                max: summary.max,
            }));
        }
    }
}
