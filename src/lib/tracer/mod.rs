//! Topology-aware latency tracer.
//!
//! ## Measurements
//!
//! - **Element** (`flags=element`): for every processing node, the time a
//!   data unit spent since it was last seen by a measured node.
//! - **Pipeline** (`flags=pipeline`): for every source → sink branch, the
//!   time since the unit was stamped at its source, plus the derived
//!   pipeline latency and fps.
//!
//! ## Lifecycle
//!
//! Construction only subscribes to node creation and state changes. When a
//! pipeline goes to `Playing` its nodes are discovered and classified, and
//! the hot-path hooks are registered (once per tracer). When it goes back
//! to `Null` everything recorded for it is dropped.
//!
//! The hot path never allocates when tracing is disabled and otherwise only
//! takes the locks of the records it updates.

pub mod config;
pub mod counters;
pub mod meta;
pub mod role;
pub mod stats;
pub mod topology;

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
    Arc, Mutex,
};

use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde::Serialize;
use tracing::*;

use crate::{
    error::{Error, Result},
    graph::{
        host::{GraphHost, HookReceiver},
        types::{clock_diff_ms, ClockTime, HookKind, NodeId, NodeState, PortId, StateChange},
    },
    metrics::MetricsRegistry,
};

use config::{NodeBaseline, TracerConfig, TracerFlags};
use counters::{CountersSnapshot, HotPathCounters};
use meta::DataUnit;
use role::{Role, RoleCache};
use stats::{
    branch::{BranchKey, BranchNames, BranchStats},
    lock,
    node::NodeStats,
};
use topology::{owning_pipeline, real_port_owner, TopologyCache};

// ── Pipeline runs ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Uninitialized,
    Discovering,
    Armed,
    TornDown,
}

#[derive(Debug, Default)]
struct PipelineRun {
    state: RunState,
    sources: Vec<NodeId>,
    sinks: Vec<NodeId>,
    processing: Vec<NodeId>,
}

impl PipelineRun {
    fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sources
            .iter()
            .chain(&self.sinks)
            .chain(&self.processing)
            .copied()
    }
}

/// What discovery found in one pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySummary {
    pub pipeline: Arc<str>,
    pub state: RunState,
    pub sources: Vec<Arc<str>>,
    pub sinks: Vec<Arc<str>>,
    pub processing: Vec<Arc<str>>,
}

// ── Tracer ──

pub struct LatencyTracer<H: GraphHost> {
    host: Arc<H>,
    registry: Arc<MetricsRegistry>,
    flags: AtomicU8,
    interval_ms: AtomicU32,
    baseline: NodeBaseline,
    roles: RoleCache,
    topology: TopologyCache,
    nodes: DashMap<NodeId, Arc<NodeStats>, FxBuildHasher>,
    branches: DashMap<BranchKey, Arc<BranchStats>, FxBuildHasher>,
    runs: Mutex<FxHashMap<NodeId, PipelineRun>>,
    hooks_armed: AtomicBool,
    counters: HotPathCounters,
}

impl<H: GraphHost> LatencyTracer<H> {
    /// Create a tracer and subscribe it to the lifecycle hooks of `host`.
    pub fn new(host: Arc<H>, config: TracerConfig, registry: Arc<MetricsRegistry>) -> Arc<Self> {
        host.register_hook(HookKind::NodeCreated);
        host.register_hook(HookKind::NodeStateChanged);

        info!(
            "Latency tracer flags: {}, interval set to {} ms, node baseline: {}",
            config.flags, config.interval_ms, config.baseline
        );

        Arc::new(Self {
            host,
            registry,
            flags: AtomicU8::new(config.flags.to_bits()),
            interval_ms: AtomicU32::new(config.interval_ms),
            baseline: config.baseline,
            roles: RoleCache::new(),
            topology: TopologyCache::new(),
            nodes: DashMap::with_hasher(FxBuildHasher),
            branches: DashMap::with_hasher(FxBuildHasher),
            runs: Mutex::new(FxHashMap::default()),
            hooks_armed: AtomicBool::new(false),
            counters: HotPathCounters::default(),
        })
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    #[inline]
    pub fn flags(&self) -> TracerFlags {
        TracerFlags::from_bits(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_flags(&self, flags: TracerFlags) {
        self.flags.store(flags.to_bits(), Ordering::Relaxed);
        info!("Latency tracer flags set to {flags}");
    }

    #[inline]
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    pub fn set_interval_ms(&self, interval_ms: u32) -> Result<()> {
        if interval_ms == 0 {
            return Err(Error::InvalidInterval(interval_ms.to_string()));
        }
        self.interval_ms.store(interval_ms, Ordering::Relaxed);
        info!("Latency tracer interval set to {interval_ms} ms");
        Ok(())
    }

    pub fn baseline(&self) -> NodeBaseline {
        self.baseline
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn roles(&self) -> &RoleCache {
        &self.roles
    }

    pub fn topology(&self) -> &TopologyCache {
        &self.topology
    }

    pub fn node_stats(&self, node: NodeId) -> Option<Arc<NodeStats>> {
        self.nodes.get(&node).map(|stats| stats.clone())
    }

    pub fn node_stats_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn branch(&self, key: &BranchKey) -> Option<Arc<BranchStats>> {
        self.branches.get(key).map(|stats| stats.clone())
    }

    pub fn branches(&self) -> Vec<(BranchKey, Arc<BranchStats>)> {
        self.branches
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn run_state(&self, pipeline: NodeId) -> RunState {
        lock(&self.runs)
            .get(&pipeline)
            .map(|run| run.state)
            .unwrap_or_default()
    }

    pub fn discovery(&self, pipeline: NodeId) -> Option<DiscoverySummary> {
        let runs = lock(&self.runs);
        let run = runs.get(&pipeline)?;
        let names = |nodes: &[NodeId]| -> Vec<Arc<str>> {
            nodes.iter().map(|node| self.name_of(*node)).collect()
        };

        Some(DiscoverySummary {
            pipeline: self.name_of(pipeline),
            state: run.state,
            sources: names(&run.sources),
            sinks: names(&run.sinks),
            processing: names(&run.processing),
        })
    }

    // ── Hot path ──

    pub fn on_pre_push(&self, ts: ClockTime, port: PortId, unit: &mut DataUnit) {
        let flags = self.flags();
        if flags.is_disabled() {
            return;
        }

        let host = &*self.host;
        let Some(node) = real_port_owner(host, port) else {
            return;
        };
        let Some(pipeline) = owning_pipeline(host, node) else {
            return;
        };

        if unit.timestamp().is_none() {
            if self.roles.classify(host, Some(node), &self.counters) == Role::Source {
                self.stamp(ts, node, unit);
            }
            return;
        }

        if flags.element && self.roles.classify(host, Some(node), &self.counters) == Role::Processing
        {
            self.record_node(ts, node, unit);
        }

        if flags.pipeline {
            let Some(peer) = host
                .port_peer(port)
                .and_then(|peer| real_port_owner(host, peer))
            else {
                return;
            };
            if self.roles.classify(host, Some(peer), &self.counters) == Role::Sink {
                self.record_branch(ts, peer, pipeline, unit);
            }
        }
    }

    pub fn on_pre_push_batch(&self, ts: ClockTime, port: PortId, units: &mut [DataUnit]) {
        if self.flags().is_disabled() {
            return;
        }
        for unit in units.iter_mut() {
            self.on_pre_push(ts, port, unit);
        }
    }

    /// Units pulled by a downstream node never go through a push at their
    /// producer, so they are stamped when they come out of the pull.
    pub fn on_post_pull(&self, ts: ClockTime, port: PortId, unit: &mut DataUnit) {
        if self.flags().is_disabled() || unit.timestamp().is_some() {
            return;
        }
        let host = &*self.host;
        let Some(node) = real_port_owner(host, port) else {
            return;
        };
        if owning_pipeline(host, node).is_none() {
            return;
        }
        self.stamp(ts, node, unit);
    }

    fn stamp(&self, ts: ClockTime, node: NodeId, unit: &mut DataUnit) {
        if unit.stamp(ts) {
            self.counters.stamp();
        } else {
            self.counters.skip_immutable();
            debug!("Skipping non-writable data unit at node {node}");
        }
    }

    fn record_node(&self, ts: ClockTime, node: NodeId, unit: &mut DataUnit) {
        let Some(record) = unit.timestamp_mut() else {
            return;
        };
        if ts <= record.last_seen_timestamp {
            return;
        }

        let baseline_only = self.baseline == NodeBaseline::SkipFirst && record.hops == 0;
        if !baseline_only {
            let stats = self.node_stats_or_create(node, ts);
            stats.record(
                clock_diff_ms(record.last_seen_timestamp, ts),
                ts,
                self.interval_ms(),
                &self.registry,
            );
            self.counters.node_sample();
        }
        record.advance(ts);
    }

    fn record_branch(&self, ts: ClockTime, sink: NodeId, pusher_pipeline: NodeId, unit: &DataUnit) {
        let Some(record) = unit.timestamp() else {
            return;
        };
        let host = &*self.host;
        let Some(source) = self
            .topology
            .resolve_source(host, &self.roles, sink, &self.counters)
        else {
            return;
        };
        let pipeline = owning_pipeline(host, sink).unwrap_or(pusher_pipeline);

        let key = BranchKey {
            source,
            sink,
            pipeline,
        };
        let branch = self.find_or_create_branch(key, record.init_timestamp, ts);
        branch.record(ts, record.init_timestamp, self.interval_ms(), &self.registry);
        self.counters.branch_sample();
    }

    /// Look up the branch of `key`, creating it if this is its first frame.
    /// Concurrent callers for the same key share a single instance.
    pub fn find_or_create_branch(
        &self,
        key: BranchKey,
        first_frame_init_ts: ClockTime,
        now: ClockTime,
    ) -> Arc<BranchStats> {
        if let Some(branch) = self.branches.get(&key) {
            return branch.clone();
        }

        self.branches
            .entry(key)
            .or_insert_with(|| {
                let names = BranchNames {
                    pipeline: self.name_of(key.pipeline),
                    source: self.name_of(key.source),
                    sink: self.name_of(key.sink),
                };
                info!(
                    "Tracking new branch: {} -> {} in pipeline {}",
                    names.source, names.sink, names.pipeline
                );
                Arc::new(BranchStats::new(names, first_frame_init_ts, now))
            })
            .clone()
    }

    fn node_stats_or_create(&self, node: NodeId, now: ClockTime) -> Arc<NodeStats> {
        if let Some(stats) = self.nodes.get(&node) {
            return stats.clone();
        }

        self.nodes
            .entry(node)
            .or_insert_with(|| {
                Arc::new(NodeStats::new(
                    self.name_of(node),
                    self.host.is_composite(node),
                    now,
                ))
            })
            .clone()
    }

    fn name_of(&self, node: NodeId) -> Arc<str> {
        self.host
            .node_name(node)
            .unwrap_or_else(|| Arc::from(node.to_string()))
    }

    // ── Lifecycle ──

    pub fn on_node_created(&self, _ts: ClockTime, node: NodeId) {
        if !self.host.is_pipeline(node) {
            return;
        }
        lock(&self.runs).entry(node).or_default();
        info!("Pipeline {} created, it will be traced", self.name_of(node));
    }

    pub fn on_state_changed(&self, ts: ClockTime, node: NodeId, change: StateChange) {
        if !self.host.is_pipeline(node) {
            return;
        }
        match change.next {
            NodeState::Playing => self.discover(ts, node),
            NodeState::Null => self.teardown(node),
            _ => {}
        }
    }

    /// Classify every node of `pipeline` and arm the hot path.
    pub fn discover(&self, ts: ClockTime, pipeline: NodeId) {
        if !self.begin_discovery(pipeline) {
            debug!("Pipeline {pipeline} already discovered");
            return;
        }

        let host = &*self.host;
        let mut discovered = PipelineRun::default();
        for node in host.descendants(pipeline) {
            match self.roles.classify(host, Some(node), &self.counters) {
                Role::Source => discovered.sources.push(node),
                Role::Sink => discovered.sinks.push(node),
                Role::Processing => {
                    self.node_stats_or_create(node, ts);
                    discovered.processing.push(node);
                }
            }
        }

        info!(
            "Discovered pipeline {}: {} sources, {} sinks, {} processing nodes",
            self.name_of(pipeline),
            discovered.sources.len(),
            discovered.sinks.len(),
            discovered.processing.len()
        );

        if self.commit_discovery(pipeline, discovered) {
            self.arm_hooks();
        }
    }

    fn begin_discovery(&self, pipeline: NodeId) -> bool {
        let mut runs = lock(&self.runs);
        let run = runs.entry(pipeline).or_default();
        if matches!(run.state, RunState::Discovering | RunState::Armed) {
            return false;
        }
        run.state = RunState::Discovering;
        true
    }

    /// Store the result of a discovery unless the pipeline left the
    /// `Discovering` state meanwhile, in which case the stats created by the
    /// discovery are released.
    fn commit_discovery(&self, pipeline: NodeId, mut discovered: PipelineRun) -> bool {
        {
            let mut runs = lock(&self.runs);
            if let Some(run) = runs.get_mut(&pipeline) {
                if run.state == RunState::Discovering {
                    discovered.state = RunState::Armed;
                    *run = discovered;
                    return true;
                }
            }
        }

        debug!(
            "Pipeline {} changed state during discovery",
            self.name_of(pipeline)
        );
        for node in discovered.members() {
            self.forget_node(node);
        }
        false
    }

    fn arm_hooks(&self) {
        if self
            .hooks_armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        for kind in HookKind::HOT_PATH {
            self.host.register_hook(kind);
        }
        debug!("Registered hot-path hooks");
    }

    /// Drop everything recorded for `pipeline`.
    pub fn teardown(&self, pipeline: NodeId) {
        let run = {
            let mut runs = lock(&self.runs);
            let run = runs.entry(pipeline).or_default();
            let previous = std::mem::take(run);
            run.state = RunState::TornDown;
            previous
        };

        let branches_before = self.branches.len();
        self.branches.retain(|key, _| key.pipeline != pipeline);
        let dropped = branches_before.saturating_sub(self.branches.len());

        for node in run.members().chain(self.host.descendants(pipeline)) {
            self.forget_node(node);
        }
        self.forget_node(pipeline);

        info!(
            "Pipeline {} torn down, dropped {dropped} branches",
            self.name_of(pipeline)
        );
    }

    /// Release everything kept for `node`.
    pub fn forget_node(&self, node: NodeId) {
        self.roles.forget(node);
        self.topology.forget(node);
        self.nodes.remove(&node);
        self.branches
            .retain(|key, _| key.source != node && key.sink != node);
    }

    /// Release every cache and record.
    pub fn shutdown(&self) {
        lock(&self.runs).clear();
        self.branches.clear();
        self.nodes.clear();
        self.topology.clear();
        self.roles.clear();
        info!("Latency tracer shut down");
    }
}

impl<H: GraphHost> HookReceiver for LatencyTracer<H> {
    fn node_created(&self, ts: ClockTime, node: NodeId) {
        self.on_node_created(ts, node);
    }

    fn node_state_changed(&self, ts: ClockTime, node: NodeId, change: StateChange) {
        self.on_state_changed(ts, node, change);
    }

    fn pre_push(&self, ts: ClockTime, port: PortId, unit: &mut DataUnit) {
        self.on_pre_push(ts, port, unit);
    }

    fn pre_push_batch(&self, ts: ClockTime, port: PortId, units: &mut [DataUnit]) {
        self.on_pre_push_batch(ts, port, units);
    }

    fn post_pull(&self, ts: ClockTime, port: PortId, unit: &mut DataUnit) {
        self.on_post_pull(ts, port, unit);
    }

    fn node_disposed(&self, node: NodeId) {
        if lock(&self.runs).remove(&node).is_some() {
            self.branches.retain(|key, _| key.pipeline != node);
        }
        self.forget_node(node);
    }
}
