use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashSet};
use tracing::*;

use crate::graph::{
    host::{CursorStep, GraphHost, PortCursor},
    types::{NodeId, PortId, PortOwner},
};

use super::{
    counters::HotPathCounters,
    role::{Role, RoleCache},
};

/// The node a port really belongs to. The internal proxy of a ghost port
/// belongs to the composite that exposes the ghost.
pub fn real_port_owner<H: GraphHost>(host: &H, port: PortId) -> Option<NodeId> {
    match host.port_owner(port)? {
        PortOwner::Node(node) => Some(node),
        PortOwner::Proxy(ghost) => match host.port_owner(ghost)? {
            PortOwner::Node(node) => Some(node),
            PortOwner::Proxy(_) => None,
        },
    }
}

/// Nearest pipeline above `node`, or the node itself if it is one.
pub fn owning_pipeline<H: GraphHost>(host: &H, node: NodeId) -> Option<NodeId> {
    let mut current = Some(node);
    while let Some(candidate) = current {
        if host.is_pipeline(candidate) {
            return Some(candidate);
        }
        current = host.node_parent(candidate);
    }
    None
}

/// Memoized mapping from a node to the source feeding it.
///
/// Only successful resolutions are cached: while the graph is still being
/// linked an early walk may fail and a later one succeed.
#[derive(Debug, Default)]
pub struct TopologyCache {
    sources: DashMap<NodeId, NodeId, FxBuildHasher>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk upstream from `node` until a source is found.
    pub fn resolve_source<H: GraphHost>(
        &self,
        host: &H,
        roles: &RoleCache,
        node: NodeId,
        counters: &HotPathCounters,
    ) -> Option<NodeId> {
        self.walk(host, roles, node, counters, &mut Visited::default())
    }

    fn walk<H: GraphHost>(
        &self,
        host: &H,
        roles: &RoleCache,
        node: NodeId,
        counters: &HotPathCounters,
        visited: &mut Visited,
    ) -> Option<NodeId> {
        counters.topology_lookup();
        if let Some(source) = self.sources.get(&node) {
            return Some(*source);
        }
        if !visited.insert(node) {
            return None;
        }
        let mark = visited.mark();

        if roles.classify(host, Some(node), counters) == Role::Source {
            self.sources.insert(node, node);
            return Some(node);
        }

        let mut found = None;
        let mut cursor = host.inbound_ports(node);
        loop {
            match cursor.next() {
                CursorStep::Item(port) => {
                    let Some(upstream) = host
                        .port_peer(port)
                        .and_then(|peer| real_port_owner(host, peer))
                    else {
                        continue;
                    };
                    found = self.walk(host, roles, upstream, counters, visited);
                    if found.is_some() {
                        break;
                    }
                }
                CursorStep::Resync => {
                    visited.rewind(mark);
                    cursor.resync();
                }
                CursorStep::Error => {
                    warn!("Error while iterating inbound ports for node {node}");
                    break;
                }
                CursorStep::Done => break,
            }
        }

        if let Some(source) = found {
            self.sources.insert(node, source);
        }
        found
    }

    pub fn cached(&self, node: NodeId) -> Option<NodeId> {
        self.sources.get(&node).map(|source| *source)
    }

    /// Drop the entry of `node` and every entry resolving to it.
    pub fn forget(&self, node: NodeId) {
        self.sources.remove(&node);
        self.sources.retain(|_, source| *source != node);
    }

    pub fn clear(&self) {
        self.sources.clear();
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Nodes seen by one walk, in visiting order so a level can forget what it
/// explored before its enumeration was restarted.
#[derive(Debug, Default)]
struct Visited {
    seen: FxHashSet<NodeId>,
    order: Vec<NodeId>,
}

impl Visited {
    fn insert(&mut self, node: NodeId) -> bool {
        let inserted = self.seen.insert(node);
        if inserted {
            self.order.push(node);
        }
        inserted
    }

    fn mark(&self) -> usize {
        self.order.len()
    }

    fn rewind(&mut self, mark: usize) {
        for node in self.order.drain(mark..) {
            self.seen.remove(&node);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tracing_test::traced_test;

    use super::*;
    use crate::graph::{
        memory::{CursorFault, MemoryGraph},
        types::NodeClass,
    };

    struct Fixture {
        graph: MemoryGraph,
        roles: RoleCache,
        topology: TopologyCache,
        counters: HotPathCounters,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                graph: MemoryGraph::with_manual_clock(),
                roles: RoleCache::new(),
                topology: TopologyCache::new(),
                counters: HotPathCounters::default(),
            }
        }

        fn resolve(&self, node: NodeId) -> Option<NodeId> {
            self.topology
                .resolve_source(&self.graph, &self.roles, node, &self.counters)
        }
    }

    /// source → `depth` filters → sink, returning (source, sink).
    fn linear(graph: &MemoryGraph, parent: NodeId, tag: &str, depth: usize) -> (NodeId, NodeId) {
        let source = graph
            .add_node(parent, &format!("{tag}-src"), NodeClass::source("testsrc"))
            .unwrap();
        let mut last = source;
        for index in 0..depth {
            let filter = graph
                .add_node(parent, &format!("{tag}-f{index}"), NodeClass::filter("identity"))
                .unwrap();
            graph.link_nodes(last, filter).unwrap();
            last = filter;
        }
        let sink = graph
            .add_node(parent, &format!("{tag}-sink"), NodeClass::sink("fakesink"))
            .unwrap();
        graph.link_nodes(last, sink).unwrap();
        (source, sink)
    }

    #[test]
    fn resolves_through_any_number_of_processing_nodes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let fixture = Fixture::new();
            let pipeline = fixture.graph.add_pipeline("p0");
            let depth = rng.gen_range(0..12);
            let (source, sink) = linear(&fixture.graph, pipeline, "a", depth);

            assert_eq!(fixture.resolve(sink), Some(source));
            assert_eq!(fixture.resolve(sink), Some(source));
            assert_eq!(fixture.topology.cached(sink), Some(source));
        }
    }

    #[test]
    fn independent_branches_resolve_to_their_own_source() {
        let fixture = Fixture::new();
        let pipeline = fixture.graph.add_pipeline("p0");
        let (source_a, sink_a) = linear(&fixture.graph, pipeline, "a", 2);
        let (source_b, sink_b) = linear(&fixture.graph, pipeline, "b", 3);

        assert_eq!(fixture.resolve(sink_b), Some(source_b));
        assert_eq!(fixture.resolve(sink_a), Some(source_a));
    }

    #[test]
    fn resolves_through_ghost_ports_of_a_composite() {
        let fixture = Fixture::new();
        let graph = &fixture.graph;
        let pipeline = graph.add_pipeline("p0");
        let source = graph
            .add_node(pipeline, "src", NodeClass::source("testsrc"))
            .unwrap();
        let bin = graph
            .add_bin(pipeline, "decode", NodeClass::new("bin", Vec::new()))
            .unwrap();
        let parse = graph.add_node(bin, "parse", NodeClass::filter("parse")).unwrap();
        let decode = graph.add_node(bin, "dec", NodeClass::filter("decoder")).unwrap();
        graph.link_nodes(parse, decode).unwrap();
        let ghost_sink = graph
            .add_ghost_port(bin, "sink", graph.port(parse, "sink").unwrap())
            .unwrap();
        let ghost_src = graph
            .add_ghost_port(bin, "src", graph.port(decode, "src").unwrap())
            .unwrap();
        let sink = graph
            .add_node(pipeline, "sink", NodeClass::sink("fakesink"))
            .unwrap();
        graph
            .link(graph.port(source, "src").unwrap(), ghost_sink)
            .unwrap();
        graph
            .link(ghost_src, graph.port(sink, "sink").unwrap())
            .unwrap();

        assert_eq!(fixture.resolve(sink), Some(source));
        // Nodes inside the composite resolve through the ghost's proxy.
        assert_eq!(fixture.resolve(decode), Some(source));
        assert_eq!(fixture.topology.cached(bin), Some(source));
    }

    #[test]
    fn composite_holding_a_source_is_the_source() {
        let fixture = Fixture::new();
        let graph = &fixture.graph;
        let pipeline = graph.add_pipeline("p0");
        let camera = graph
            .add_bin(pipeline, "camera", NodeClass::new("bin", Vec::new()))
            .unwrap();
        let capture = graph
            .add_node(camera, "capture", NodeClass::source("v4l2src"))
            .unwrap();
        let convert = graph
            .add_node(camera, "convert", NodeClass::filter("convert"))
            .unwrap();
        graph.link_nodes(capture, convert).unwrap();
        let ghost_src = graph
            .add_ghost_port(camera, "src", graph.port(convert, "src").unwrap())
            .unwrap();
        let sink = graph
            .add_node(pipeline, "sink", NodeClass::sink("fakesink"))
            .unwrap();
        graph
            .link(ghost_src, graph.port(sink, "sink").unwrap())
            .unwrap();

        assert_eq!(fixture.resolve(sink), Some(camera));
        assert_eq!(fixture.resolve(convert), Some(capture));
    }

    #[test]
    fn resync_restarts_the_enumeration() {
        let fixture = Fixture::new();
        let pipeline = fixture.graph.add_pipeline("p0");
        let (source, sink) = linear(&fixture.graph, pipeline, "a", 1);
        fixture.graph.inject_cursor_fault(
            sink,
            CursorFault {
                resyncs: 3,
                errors: 0,
                ..Default::default()
            },
        );

        assert_eq!(fixture.resolve(sink), Some(source));
    }

    #[test]
    fn resync_explores_upstream_nodes_again() {
        let fixture = Fixture::new();
        let pipeline = fixture.graph.add_pipeline("p0");
        let graph = &fixture.graph;
        let source = graph
            .add_node(pipeline, "src", NodeClass::source("testsrc"))
            .unwrap();
        let filter = graph
            .add_node(pipeline, "filter", NodeClass::filter("identity"))
            .unwrap();
        let sink = graph
            .add_node(pipeline, "sink", NodeClass::sink("fakesink"))
            .unwrap();
        graph.link_nodes(source, filter).unwrap();
        graph.link_nodes(filter, sink).unwrap();
        fixture.graph.inject_cursor_fault(
            filter,
            CursorFault {
                errors: 1,
                ..Default::default()
            },
        );
        fixture.graph.inject_cursor_fault(
            sink,
            CursorFault {
                late_resyncs: 1,
                ..Default::default()
            },
        );

        assert_eq!(fixture.resolve(sink), Some(source));
        assert_eq!(fixture.topology.cached(filter), Some(source));
    }

    #[test]
    #[traced_test]
    fn errors_are_not_cached() {
        let fixture = Fixture::new();
        let pipeline = fixture.graph.add_pipeline("p0");
        let (source, sink) = linear(&fixture.graph, pipeline, "a", 1);
        fixture.graph.inject_cursor_fault(
            sink,
            CursorFault {
                resyncs: 0,
                errors: 1,
                ..Default::default()
            },
        );

        assert_eq!(fixture.resolve(sink), None);
        assert!(fixture.topology.cached(sink).is_none());
        assert!(logs_contain("Error while iterating inbound ports"));

        // The fault was transient: the next unit resolves the branch.
        assert_eq!(fixture.resolve(sink), Some(source));
    }

    #[test]
    fn unlinked_nodes_do_not_resolve() {
        let fixture = Fixture::new();
        let pipeline = fixture.graph.add_pipeline("p0");
        let sink = fixture
            .graph
            .add_node(pipeline, "sink", NodeClass::sink("fakesink"))
            .unwrap();

        assert_eq!(fixture.resolve(sink), None);
        assert!(fixture.topology.is_empty());
    }

    #[test]
    fn cycles_terminate() {
        let fixture = Fixture::new();
        let graph = &fixture.graph;
        let pipeline = graph.add_pipeline("p0");
        let a = graph.add_node(pipeline, "a", NodeClass::filter("identity")).unwrap();
        let b = graph.add_node(pipeline, "b", NodeClass::filter("identity")).unwrap();
        graph.link_nodes(a, b).unwrap();
        graph.link_nodes(b, a).unwrap();

        assert_eq!(fixture.resolve(a), None);
    }

    #[test]
    fn pipeline_is_found_through_composites() {
        let graph = MemoryGraph::with_manual_clock();
        let pipeline = graph.add_pipeline("p0");
        let bin = graph
            .add_bin(pipeline, "bin", NodeClass::new("bin", Vec::new()))
            .unwrap();
        let inner = graph.add_node(bin, "inner", NodeClass::filter("identity")).unwrap();

        assert_eq!(owning_pipeline(&graph, inner), Some(pipeline));
        assert_eq!(owning_pipeline(&graph, pipeline), Some(pipeline));
        assert_eq!(owning_pipeline(&graph, NodeId(42)), None);
    }
}
