//! Arena-backed in-process graph host.
//!
//! Every node and port gets a stable index at creation time. Hooks are only
//! delivered for the kinds the attached receiver registered, and each
//! registration is counted so double registrations are observable.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
    },
    time::Instant,
};

use rustc_hash::FxHashMap;
use tracing::*;

use crate::{
    error::{Error, Result},
    tracer::{
        meta::DataUnit,
        role::{classify_class, Role},
    },
};

use super::{host::*, types::*};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Element,
    Bin,
    Pipeline,
}

#[derive(Debug)]
struct NodeEntry {
    name: Arc<str>,
    class: NodeClass,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    ports: Vec<PortId>,
    state: NodeState,
    alive: bool,
}

#[derive(Debug)]
struct PortEntry {
    name: String,
    direction: PortDirection,
    owner: PortOwner,
    peer: Option<PortId>,
    /// Set on ghost ports: the internal proxy that forwards to the child.
    proxy: Option<PortId>,
}

/// Failures injected into the inbound-port enumeration of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorFault {
    pub resyncs: u32,
    pub errors: u32,
    /// Resyncs reported only after the enumeration handed out a port.
    pub late_resyncs: u32,
}

#[derive(Debug)]
enum Clock {
    Manual(AtomicU64),
    Monotonic(Instant),
}

pub struct MemoryGraph {
    nodes: RwLock<Vec<NodeEntry>>,
    ports: RwLock<Vec<PortEntry>>,
    hooks: Mutex<FxHashMap<HookKind, u32>>,
    receiver: RwLock<Option<Weak<dyn HookReceiver>>>,
    faults: Mutex<FxHashMap<NodeId, CursorFault>>,
    clock: Clock,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    /// A graph driven by the monotonic system clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::Monotonic(Instant::now()))
    }

    /// A graph whose clock only moves through [`MemoryGraph::set_time`].
    pub fn with_manual_clock() -> Self {
        Self::with_clock(Clock::Manual(AtomicU64::new(0)))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            ports: RwLock::new(Vec::new()),
            hooks: Mutex::new(FxHashMap::default()),
            receiver: RwLock::new(None),
            faults: Mutex::new(FxHashMap::default()),
            clock,
        }
    }

    pub fn set_time(&self, ts: ClockTime) {
        match &self.clock {
            Clock::Manual(now) => now.store(ts, Ordering::Release),
            Clock::Monotonic(_) => warn!("Ignoring set_time on a monotonic clock"),
        }
    }

    /// Deliver hooks to `receiver`. Only a weak reference is kept.
    pub fn attach<R: HookReceiver + 'static>(&self, receiver: &Arc<R>) {
        let receiver: Arc<dyn HookReceiver> = receiver.clone();
        *self.receiver.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::downgrade(&receiver));
    }

    pub fn hook_registrations(&self, kind: HookKind) -> u32 {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn inject_cursor_fault(&self, node: NodeId, fault: CursorFault) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node, fault);
    }

    // ── Construction ──

    pub fn add_pipeline(&self, name: &str) -> NodeId {
        self.insert_node(name, NodeClass::new("pipeline", Vec::new()), NodeKind::Pipeline, None)
    }

    pub fn add_bin(&self, parent: NodeId, name: &str, class: NodeClass) -> Result<NodeId> {
        self.ensure_node(parent)?;
        Ok(self.insert_node(name, class, NodeKind::Bin, Some(parent)))
    }

    /// Add a leaf node. Ports are created for every `Always` template.
    pub fn add_node(&self, parent: NodeId, name: &str, class: NodeClass) -> Result<NodeId> {
        self.ensure_node(parent)?;
        Ok(self.insert_node(name, class, NodeKind::Element, Some(parent)))
    }

    fn insert_node(
        &self,
        name: &str,
        class: NodeClass,
        kind: NodeKind,
        parent: Option<NodeId>,
    ) -> NodeId {
        let always: Vec<PortTemplate> = class
            .templates
            .iter()
            .filter(|t| t.presence == PortPresence::Always)
            .cloned()
            .collect();
        let role = classify_class(&class);

        let id = {
            let mut nodes = self.nodes_mut();
            let id = NodeId(nodes.len() as u32);
            nodes.push(NodeEntry {
                name: Arc::from(name),
                class,
                kind,
                parent,
                children: Vec::new(),
                ports: Vec::new(),
                state: NodeState::Null,
                alive: true,
            });
            if let Some(parent) = parent {
                nodes[parent.0 as usize].children.push(id);
            }
            // Composites advertise the roles of what they contain.
            let mut ancestor = parent;
            while let Some(bin) = ancestor {
                let entry = &mut nodes[bin.0 as usize];
                if entry.kind != NodeKind::Bin {
                    break;
                }
                match role {
                    Role::Source => entry.class.flags.source = true,
                    Role::Sink => entry.class.flags.sink = true,
                    Role::Processing => break,
                }
                ancestor = entry.parent;
            }
            id
        };

        for template in always {
            self.insert_port(id, &template.name, template.direction, PortOwner::Node(id));
        }

        if let Some(receiver) = self.hooked(HookKind::NodeCreated) {
            receiver.node_created(self.clock_time(), id);
        }
        id
    }

    fn insert_port(
        &self,
        node: NodeId,
        name: &str,
        direction: PortDirection,
        owner: PortOwner,
    ) -> PortId {
        let id = {
            let mut ports = self.ports_mut();
            let id = PortId(ports.len() as u32);
            ports.push(PortEntry {
                name: name.to_string(),
                direction,
                owner,
                peer: None,
                proxy: None,
            });
            id
        };
        if matches!(owner, PortOwner::Node(_)) {
            self.nodes_mut()[node.0 as usize].ports.push(id);
        }
        id
    }

    /// Instantiate a `Request` or `Sometimes` port from the node's templates.
    pub fn request_port(&self, node: NodeId, template: &str) -> Result<PortId> {
        let (direction, count) = {
            let nodes = self.nodes();
            let entry = nodes.get(node.0 as usize).ok_or(Error::UnknownNode(node))?;
            let template = entry
                .class
                .templates
                .iter()
                .find(|t| t.name == template)
                .ok_or_else(|| Error::InvalidParameter(format!("no template {template:?}")))?;
            (template.direction, entry.ports.len())
        };
        let name = template.replace("%u", &count.to_string());
        Ok(self.insert_port(node, &name, direction, PortOwner::Node(node)))
    }

    /// Expose `target` (a port of a child) on the composite `bin`.
    pub fn add_ghost_port(&self, bin: NodeId, name: &str, target: PortId) -> Result<PortId> {
        self.ensure_node(bin)?;
        let direction = self.port_direction(target)?;
        let ghost = self.insert_port(bin, name, direction, PortOwner::Node(bin));
        let proxy_direction = match direction {
            PortDirection::Inbound => PortDirection::Outbound,
            PortDirection::Outbound => PortDirection::Inbound,
        };
        let proxy = self.insert_port(bin, name, proxy_direction, PortOwner::Proxy(ghost));
        {
            let mut ports = self.ports_mut();
            ports[ghost.0 as usize].proxy = Some(proxy);
        }
        match direction {
            PortDirection::Inbound => self.link(proxy, target)?,
            PortDirection::Outbound => self.link(target, proxy)?,
        }
        Ok(ghost)
    }

    pub fn ghost_proxy(&self, ghost: PortId) -> Option<PortId> {
        self.ports().get(ghost.0 as usize).and_then(|p| p.proxy)
    }

    pub fn port(&self, node: NodeId, name: &str) -> Option<PortId> {
        let nodes = self.nodes();
        let ports = self.ports();
        nodes.get(node.0 as usize)?.ports.iter().copied().find(|p| {
            ports
                .get(p.0 as usize)
                .map(|entry| entry.name == name)
                .unwrap_or(false)
        })
    }

    pub fn link(&self, from: PortId, to: PortId) -> Result<()> {
        let mut ports = self.ports_mut();
        let (Some(src), Some(dst)) = (ports.get(from.0 as usize), ports.get(to.0 as usize)) else {
            return Err(Error::UnknownPort(if (from.0 as usize) < ports.len() {
                to
            } else {
                from
            }));
        };
        if src.direction != PortDirection::Outbound || dst.direction != PortDirection::Inbound {
            return Err(Error::Link {
                from,
                to,
                reason: "direction mismatch",
            });
        }
        if src.peer.is_some() || dst.peer.is_some() {
            return Err(Error::Link {
                from,
                to,
                reason: "port already linked",
            });
        }
        ports[from.0 as usize].peer = Some(to);
        ports[to.0 as usize].peer = Some(from);
        Ok(())
    }

    /// Link the first free outbound port of `from` to the first free inbound
    /// port of `to`, requesting ports when no static one is free.
    pub fn link_nodes(&self, from: NodeId, to: NodeId) -> Result<()> {
        let src = self.free_port(from, PortDirection::Outbound)?;
        let dst = self.free_port(to, PortDirection::Inbound)?;
        self.link(src, dst)
    }

    fn free_port(&self, node: NodeId, direction: PortDirection) -> Result<PortId> {
        let found = {
            let nodes = self.nodes();
            let ports = self.ports();
            let entry = nodes.get(node.0 as usize).ok_or(Error::UnknownNode(node))?;
            entry.ports.iter().copied().find(|p| {
                let port = &ports[p.0 as usize];
                port.direction == direction && port.peer.is_none()
            })
        };
        if let Some(port) = found {
            return Ok(port);
        }

        let template = self
            .nodes()
            .get(node.0 as usize)
            .and_then(|entry| {
                entry
                    .class
                    .templates
                    .iter()
                    .find(|t| t.direction == direction && t.presence == PortPresence::Request)
                    .map(|t| t.name.clone())
            })
            .ok_or(Error::NoFreePort { node, direction })?;
        self.request_port(node, &template)
    }

    /// Remove a node (and everything inside it) from the graph.
    pub fn remove_node(&self, node: NodeId) -> Result<()> {
        self.ensure_node(node)?;
        let mut removed = self.descendants(node);
        removed.push(node);

        {
            let mut nodes = self.nodes_mut();
            let mut ports = self.ports_mut();
            for id in &removed {
                let entry = &mut nodes[id.0 as usize];
                entry.alive = false;
                for port in entry.ports.clone() {
                    let proxy = ports[port.0 as usize].proxy;
                    for port in std::iter::once(port).chain(proxy) {
                        if let Some(peer) = ports[port.0 as usize].peer.take() {
                            ports[peer.0 as usize].peer = None;
                        }
                    }
                }
            }
            if let Some(parent) = nodes[node.0 as usize].parent {
                nodes[parent.0 as usize].children.retain(|c| *c != node);
            }
        }

        if let Some(receiver) = self.receiver() {
            for id in removed {
                receiver.node_disposed(id);
            }
        }
        Ok(())
    }

    // ── Runtime ──

    pub fn state(&self, node: NodeId) -> Option<NodeState> {
        self.nodes().get(node.0 as usize).map(|entry| entry.state)
    }

    /// Walk the node through every intermediate state up to `target`.
    pub fn set_state(&self, node: NodeId, target: NodeState) -> Result<()> {
        let mut current = self.state(node).ok_or(Error::UnknownNode(node))?;
        while current != target {
            let next = match current.cmp(&target) {
                std::cmp::Ordering::Less => step(current, 1),
                _ => step(current, -1),
            };
            {
                let mut nodes = self.nodes_mut();
                for id in std::iter::once(node).chain(self.descendants_locked(&nodes, node)) {
                    nodes[id.0 as usize].state = next;
                }
            }
            if let Some(receiver) = self.hooked(HookKind::NodeStateChanged) {
                receiver.node_state_changed(
                    self.clock_time(),
                    node,
                    StateChange::new(current, next),
                );
            }
            current = next;
        }
        Ok(())
    }

    pub fn push(&self, port: PortId, unit: &mut DataUnit) {
        if let Some(receiver) = self.hooked(HookKind::PrePush) {
            receiver.pre_push(self.clock_time(), port, unit);
        }
    }

    pub fn push_batch(&self, port: PortId, units: &mut [DataUnit]) {
        if let Some(receiver) = self.hooked(HookKind::PrePushBatch) {
            receiver.pre_push_batch(self.clock_time(), port, units);
        }
    }

    pub fn pull(&self, port: PortId, unit: &mut DataUnit) {
        if let Some(receiver) = self.hooked(HookKind::PostPull) {
            receiver.post_pull(self.clock_time(), port, unit);
        }
    }

    /// Push `unit` from `start` and follow it downstream until it reaches a
    /// node with no outbound port. `work` runs before every push, with the
    /// port about to push.
    pub fn run_through(&self, start: PortId, unit: &mut DataUnit, mut work: impl FnMut(PortId)) {
        let mut port = start;
        loop {
            work(port);
            self.push(port, unit);
            match self.forward(port) {
                Some(next) => port = next,
                None => break,
            }
        }
    }

    /// The port the data continues on after being pushed through `port`.
    fn forward(&self, port: PortId) -> Option<PortId> {
        let (owner, proxy) = {
            let ports = self.ports();
            let peer = ports.get(port.0 as usize)?.peer?;
            let entry = ports.get(peer.0 as usize)?;
            (entry.owner, entry.proxy)
        };
        match owner {
            // An inbound ghost forwards through its proxy.
            PortOwner::Node(_) if proxy.is_some() => proxy,
            // The proxy of an outbound ghost hands over to the ghost itself.
            PortOwner::Proxy(ghost) => Some(ghost),
            PortOwner::Node(node) => {
                let nodes = self.nodes();
                let ports = self.ports();
                nodes.get(node.0 as usize)?.ports.iter().copied().find(|p| {
                    ports[p.0 as usize].direction == PortDirection::Outbound
                })
            }
        }
    }

    // ── Internals ──

    fn receiver(&self) -> Option<Arc<dyn HookReceiver>> {
        self.receiver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn hooked(&self, kind: HookKind) -> Option<Arc<dyn HookReceiver>> {
        if self.hook_registrations(kind) == 0 {
            return None;
        }
        self.receiver()
    }

    fn ensure_node(&self, node: NodeId) -> Result<()> {
        match self.nodes().get(node.0 as usize) {
            Some(entry) if entry.alive => Ok(()),
            _ => Err(Error::UnknownNode(node)),
        }
    }

    fn port_direction(&self, port: PortId) -> Result<PortDirection> {
        self.ports()
            .get(port.0 as usize)
            .map(|p| p.direction)
            .ok_or(Error::UnknownPort(port))
    }

    fn descendants_locked(&self, nodes: &[NodeEntry], root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for child in &nodes[id.0 as usize].children {
                out.push(*child);
                stack.push(*child);
            }
        }
        out
    }

    fn nodes(&self) -> RwLockReadGuard<'_, Vec<NodeEntry>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn nodes_mut(&self) -> RwLockWriteGuard<'_, Vec<NodeEntry>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ports(&self) -> RwLockReadGuard<'_, Vec<PortEntry>> {
        self.ports.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn ports_mut(&self) -> RwLockWriteGuard<'_, Vec<PortEntry>> {
        self.ports.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn step(state: NodeState, direction: i8) -> NodeState {
    use NodeState::*;
    match (state, direction > 0) {
        (Null, true) => Ready,
        (Ready, true) => Paused,
        (Paused, true) | (Playing, true) => Playing,
        (Playing, false) => Paused,
        (Paused, false) => Ready,
        (Ready, false) | (Null, false) => Null,
    }
}

impl GraphHost for MemoryGraph {
    type Cursor<'a> = MemoryCursor<'a>;

    fn register_hook(&self, kind: HookKind) {
        *self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_insert(0) += 1;
    }

    fn clock_time(&self) -> ClockTime {
        match &self.clock {
            Clock::Manual(now) => now.load(Ordering::Acquire),
            Clock::Monotonic(start) => start.elapsed().as_nanos() as ClockTime,
        }
    }

    fn node_name(&self, node: NodeId) -> Option<Arc<str>> {
        self.nodes().get(node.0 as usize).map(|e| e.name.clone())
    }

    fn node_class(&self, node: NodeId) -> Option<NodeClass> {
        self.nodes().get(node.0 as usize).map(|e| e.class.clone())
    }

    fn node_parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes().get(node.0 as usize).and_then(|e| e.parent)
    }

    fn is_composite(&self, node: NodeId) -> bool {
        self.nodes()
            .get(node.0 as usize)
            .map(|e| e.kind != NodeKind::Element)
            .unwrap_or(false)
    }

    fn is_pipeline(&self, node: NodeId) -> bool {
        self.nodes()
            .get(node.0 as usize)
            .map(|e| e.kind == NodeKind::Pipeline)
            .unwrap_or(false)
    }

    fn descendants(&self, composite: NodeId) -> Vec<NodeId> {
        let nodes = self.nodes();
        if composite.0 as usize >= nodes.len() {
            return Vec::new();
        }
        self.descendants_locked(&nodes, composite)
    }

    fn port_owner(&self, port: PortId) -> Option<PortOwner> {
        self.ports().get(port.0 as usize).map(|p| p.owner)
    }

    fn port_peer(&self, port: PortId) -> Option<PortId> {
        self.ports().get(port.0 as usize).and_then(|p| p.peer)
    }

    fn inbound_ports(&self, node: NodeId) -> MemoryCursor<'_> {
        let ports = {
            let nodes = self.nodes();
            let all = self.ports();
            nodes
                .get(node.0 as usize)
                .map(|entry| {
                    entry
                        .ports
                        .iter()
                        .copied()
                        .filter(|p| all[p.0 as usize].direction == PortDirection::Inbound)
                        .collect()
                })
                .unwrap_or_default()
        };
        MemoryCursor {
            graph: self,
            node,
            ports,
            index: 0,
        }
    }
}

pub struct MemoryCursor<'a> {
    graph: &'a MemoryGraph,
    node: NodeId,
    ports: Vec<PortId>,
    index: usize,
}

impl PortCursor for MemoryCursor<'_> {
    fn next(&mut self) -> CursorStep<PortId> {
        {
            let mut faults = self
                .graph
                .faults
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(fault) = faults.get_mut(&self.node) {
                if fault.resyncs > 0 {
                    fault.resyncs -= 1;
                    return CursorStep::Resync;
                }
                if fault.errors > 0 {
                    fault.errors -= 1;
                    return CursorStep::Error;
                }
                if fault.late_resyncs > 0 && self.index > 0 {
                    fault.late_resyncs -= 1;
                    return CursorStep::Resync;
                }
            }
        }

        match self.ports.get(self.index) {
            Some(port) => {
                self.index += 1;
                CursorStep::Item(*port)
            }
            None => CursorStep::Done,
        }
    }

    fn resync(&mut self) {
        self.index = 0;
    }
}
