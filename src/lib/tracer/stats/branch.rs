use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::{
    graph::types::{clock_diff_ms, ClockTime, NodeId},
    metrics::{
        records::{BranchIntervalRecord, BranchRecord, Record},
        MetricsRegistry,
    },
};

use super::{fps, lock, Running, Window};

/// Identifies one measured path. The pipeline is part of the key so that
/// independent pipelines never share statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BranchKey {
    pub source: NodeId,
    pub sink: NodeId,
    pub pipeline: NodeId,
}

#[derive(Debug, Clone)]
pub struct BranchNames {
    pub pipeline: Arc<str>,
    pub source: Arc<str>,
    pub sink: Arc<str>,
}

/// End-to-end statistics of one source → sink branch.
#[derive(Debug)]
pub struct BranchStats {
    names: BranchNames,
    first_frame_init_ts: ClockTime,
    running: Mutex<Running>,
    window: Mutex<Window>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchSample {
    pub frame_latency: f64,
    pub pipeline_latency: f64,
    pub fps: f64,
    pub frame_count: u64,
}

impl BranchStats {
    /// `first_frame_init_ts` is the init timestamp of the unit that revealed
    /// the branch; the window starts at `now`.
    pub fn new(names: BranchNames, first_frame_init_ts: ClockTime, now: ClockTime) -> Self {
        Self {
            names,
            first_frame_init_ts,
            running: Mutex::new(Running::default()),
            window: Mutex::new(Window::new(now)),
        }
    }

    pub fn names(&self) -> &BranchNames {
        &self.names
    }

    pub fn first_frame_init_ts(&self) -> ClockTime {
        self.first_frame_init_ts
    }

    pub fn frame_count(&self) -> u64 {
        lock(&self.running).snapshot().count
    }

    /// Record a unit stamped at `init_ts` reaching the sink at `ts`.
    pub fn record(
        &self,
        ts: ClockTime,
        init_ts: ClockTime,
        interval_ms: u32,
        registry: &MetricsRegistry,
    ) -> BranchSample {
        let frame_latency = clock_diff_ms(init_ts, ts);
        let (snapshot, pipeline_latency) = {
            let mut running = lock(&self.running);
            let snapshot = running.add(frame_latency);
            let pipeline_latency =
                clock_diff_ms(self.first_frame_init_ts, ts) / snapshot.count as f64;
            (snapshot, pipeline_latency)
        };
        let sample = BranchSample {
            frame_latency,
            pipeline_latency,
            fps: fps(pipeline_latency),
            frame_count: snapshot.count,
        };

        registry.emit(Record::Branch(BranchRecord {
            pipeline_name: self.names.pipeline.clone(),
            source_name: self.names.source.clone(),
            sink_name: self.names.sink.clone(),
            frame_latency,
            avg: snapshot.avg,
            min: snapshot.min,
            max: snapshot.max,
            pipeline_latency,
            fps: sample.fps,
            frame_count: snapshot.count,
        }));

        let summary = lock(&self.window).add(frame_latency, ts, interval_ms);
        if let Some(summary) = summary {
            registry.emit(Record::BranchInterval(BranchIntervalRecord {
                pipeline_name: self.names.pipeline.clone(),
                source_name: self.names.source.clone(),
                sink_name: self.names.sink.clone(),
                interval_ms: summary.interval_ms,
                avg: summary.avg,
                min: summary.min,
                max: summary.max,
                pipeline_latency: summary.pipeline_latency(),
                fps: summary.fps(),
            }));
        }

        sample
    }
}
