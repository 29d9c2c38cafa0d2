use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use serde::Serialize;

use crate::graph::{
    host::GraphHost,
    types::{NodeClass, NodeId, PortDirection},
};

use super::counters::HotPathCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Produces data: outbound templates only.
    Source,
    /// Consumes data: inbound templates only.
    Sink,
    Processing,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Sink => write!(f, "sink"),
            Self::Processing => write!(f, "processing"),
        }
    }
}

/// A node with no inbound template and at least one outbound template.
pub fn is_source_class(class: &NodeClass) -> bool {
    if class.flags.source {
        return true;
    }
    let mut has_outbound = false;
    for template in class.templates.iter() {
        match template.direction {
            PortDirection::Inbound => return false,
            PortDirection::Outbound => has_outbound = true,
        }
    }
    has_outbound
}

/// A node with no outbound template and at least one inbound template.
pub fn is_sink_class(class: &NodeClass) -> bool {
    if class.flags.sink {
        return true;
    }
    let mut has_inbound = false;
    for template in class.templates.iter() {
        match template.direction {
            PortDirection::Outbound => return false,
            PortDirection::Inbound => has_inbound = true,
        }
    }
    has_inbound
}

/// Classification from the node class alone. Explicit flags win over the
/// template scan, and a source flag wins over a sink flag.
pub fn classify_class(class: &NodeClass) -> Role {
    if class.flags.source {
        Role::Source
    } else if class.flags.sink {
        Role::Sink
    } else if is_source_class(class) {
        Role::Source
    } else if is_sink_class(class) {
        Role::Sink
    } else {
        Role::Processing
    }
}

/// Memoized node classification.
#[derive(Debug, Default)]
pub struct RoleCache {
    roles: DashMap<NodeId, Role, FxBuildHasher>,
}

impl RoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `node`, computing and caching the role on first sight.
    ///
    /// A missing node is `Processing` and is never cached. Nodes the host no
    /// longer knows are classified `Processing` without caching too.
    pub fn classify<H: GraphHost>(
        &self,
        host: &H,
        node: Option<NodeId>,
        counters: &HotPathCounters,
    ) -> Role {
        let Some(node) = node else {
            return Role::Processing;
        };

        counters.role_lookup();
        if let Some(role) = self.roles.get(&node) {
            return *role;
        }

        let Some(class) = host.node_class(node) else {
            return Role::Processing;
        };
        let role = classify_class(&class);
        self.roles.insert(node, role);
        role
    }

    pub fn insert(&self, node: NodeId, role: Role) {
        self.roles.insert(node, role);
    }

    pub fn cached(&self, node: NodeId) -> Option<Role> {
        self.roles.get(&node).map(|role| *role)
    }

    pub fn forget(&self, node: NodeId) {
        self.roles.remove(&node);
    }

    pub fn clear(&self) {
        self.roles.clear();
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        memory::MemoryGraph,
        types::{PortPresence, PortTemplate, RoleFlags},
    };

    #[test]
    fn templates_decide_the_role() {
        assert_eq!(classify_class(&NodeClass::source("videotestsrc")), Role::Source);
        assert_eq!(classify_class(&NodeClass::sink("fakesink")), Role::Sink);
        assert_eq!(classify_class(&NodeClass::filter("identity")), Role::Processing);
        assert_eq!(
            classify_class(&NodeClass::new("empty", Vec::new())),
            Role::Processing
        );
    }

    #[test]
    fn any_inbound_template_prevents_source() {
        // A demuxer-like node creates outbound ports on the fly but still
        // declares an inbound template.
        let demux = NodeClass::new(
            "demux",
            vec![
                PortTemplate::inbound("sink"),
                PortTemplate::outbound("src_%u").with_presence(PortPresence::Sometimes),
                PortTemplate::outbound("private_%u").with_presence(PortPresence::Request),
            ],
        );
        assert!(!is_source_class(&demux));
        assert!(!is_sink_class(&demux));
        assert_eq!(classify_class(&demux), Role::Processing);
    }

    #[test]
    fn explicit_flags_override_templates() {
        let live = NodeClass::filter("appsrc-like").with_flags(RoleFlags::SOURCE);
        assert_eq!(classify_class(&live), Role::Source);

        let sink = NodeClass::filter("renderer").with_flags(RoleFlags::SINK);
        assert_eq!(classify_class(&sink), Role::Sink);

        let both = NodeClass::filter("odd").with_flags(RoleFlags {
            source: true,
            sink: true,
        });
        assert_eq!(classify_class(&both), Role::Source);
    }

    #[test]
    fn classification_is_cached_per_node() {
        let graph = MemoryGraph::with_manual_clock();
        let pipeline = graph.add_pipeline("p0");
        let src = graph
            .add_node(pipeline, "src", NodeClass::source("videotestsrc"))
            .unwrap();
        let counters = HotPathCounters::default();
        let cache = RoleCache::new();

        assert_eq!(cache.classify(&graph, None, &counters), Role::Processing);
        assert!(cache.is_empty());

        assert_eq!(cache.classify(&graph, Some(src), &counters), Role::Source);
        assert_eq!(cache.classify(&graph, Some(src), &counters), Role::Source);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cached(src), Some(Role::Source));
        assert_eq!(counters.snapshot().role_lookups, 2);

        // Unknown handles are not cached.
        assert_eq!(
            cache.classify(&graph, Some(NodeId(999)), &counters),
            Role::Processing
        );
        assert_eq!(cache.len(), 1);

        cache.forget(src);
        assert!(cache.cached(src).is_none());
    }
}
