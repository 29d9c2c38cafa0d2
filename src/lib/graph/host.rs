use std::sync::Arc;

use crate::tracer::meta::DataUnit;

use super::types::*;

/// One step of a host port enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep<T> {
    Item(T),
    /// The underlying collection changed; the enumeration must be restarted.
    Resync,
    /// The enumeration failed and cannot continue.
    Error,
    Done,
}

/// A restartable, pull-style enumeration over ports.
pub trait PortCursor {
    fn next(&mut self) -> CursorStep<PortId>;

    /// Rewind to the first item after a [`CursorStep::Resync`].
    fn resync(&mut self);
}

/// Read-only view of the graph runtime the tracer is attached to.
///
/// Every handle is owned by the host; the tracer never keeps anything alive.
pub trait GraphHost: Send + Sync {
    type Cursor<'a>: PortCursor
    where
        Self: 'a;

    /// Subscribe the attached tracer to `kind` events.
    fn register_hook(&self, kind: HookKind);

    fn clock_time(&self) -> ClockTime;

    fn node_name(&self, node: NodeId) -> Option<Arc<str>>;

    fn node_class(&self, node: NodeId) -> Option<NodeClass>;

    /// The composite the node lives in, if any.
    fn node_parent(&self, node: NodeId) -> Option<NodeId>;

    /// Is the node itself a sub-graph?
    fn is_composite(&self, node: NodeId) -> bool;

    /// Is the node a top-level pipeline?
    fn is_pipeline(&self, node: NodeId) -> bool;

    /// Every node inside `composite`, at any depth.
    fn descendants(&self, composite: NodeId) -> Vec<NodeId>;

    fn port_owner(&self, port: PortId) -> Option<PortOwner>;

    fn port_peer(&self, port: PortId) -> Option<PortId>;

    fn inbound_ports(&self, node: NodeId) -> Self::Cursor<'_>;
}

/// Callbacks the host invokes for the events a tracer registered.
pub trait HookReceiver: Send + Sync {
    fn node_created(&self, ts: ClockTime, node: NodeId);

    fn node_state_changed(&self, ts: ClockTime, node: NodeId, change: StateChange);

    fn pre_push(&self, ts: ClockTime, port: PortId, unit: &mut DataUnit);

    fn pre_push_batch(&self, ts: ClockTime, port: PortId, units: &mut [DataUnit]);

    fn post_pull(&self, ts: ClockTime, port: PortId, unit: &mut DataUnit);

    /// Not a registered hook: the host always reports node disposal so that
    /// per-node state can be released with the node.
    fn node_disposed(&self, node: NodeId);
}
