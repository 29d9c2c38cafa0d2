use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Host clock time in nanoseconds.
pub type ClockTime = u64;

pub const NSECONDS_PER_MSECOND: f64 = 1_000_000.0;
pub const MSECONDS_PER_SECOND: f64 = 1_000.0;

/// Signed difference `to - from`, in milliseconds.
#[inline]
pub fn clock_diff_ms(from: ClockTime, to: ClockTime) -> f64 {
    (to as i64).wrapping_sub(from as i64) as f64 / NSECONDS_PER_MSECOND
}

#[inline]
pub fn ms_to_clock(ms: u64) -> ClockTime {
    ms * NSECONDS_PER_MSECOND as u64
}

/// Stable handle of a node, assigned by the host arena at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Stable handle of a port, assigned by the host arena at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    /// Data flows into the node through this port.
    Inbound,
    /// Data flows out of the node through this port.
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortPresence {
    Always,
    Sometimes,
    Request,
}

/// Class-level description of the ports a node may expose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTemplate {
    pub name: String,
    pub direction: PortDirection,
    pub presence: PortPresence,
}

impl PortTemplate {
    pub fn inbound(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: PortDirection::Inbound,
            presence: PortPresence::Always,
        }
    }

    pub fn outbound(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: PortDirection::Outbound,
            presence: PortPresence::Always,
        }
    }

    pub fn with_presence(mut self, presence: PortPresence) -> Self {
        self.presence = presence;
        self
    }
}

/// Static role flags a node class may declare about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleFlags {
    pub source: bool,
    pub sink: bool,
}

impl RoleFlags {
    pub const NONE: Self = Self {
        source: false,
        sink: false,
    };
    pub const SOURCE: Self = Self {
        source: true,
        sink: false,
    };
    pub const SINK: Self = Self {
        source: false,
        sink: true,
    };
}

/// Everything a node shares with the other instances of its type.
#[derive(Debug, Clone)]
pub struct NodeClass {
    pub type_name: String,
    pub templates: Arc<[PortTemplate]>,
    pub flags: RoleFlags,
}

impl NodeClass {
    pub fn new(type_name: &str, templates: Vec<PortTemplate>) -> Self {
        Self {
            type_name: type_name.to_string(),
            templates: templates.into(),
            flags: RoleFlags::NONE,
        }
    }

    pub fn with_flags(mut self, flags: RoleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// A producer: one outbound template, no inbound ones.
    pub fn source(type_name: &str) -> Self {
        Self::new(type_name, vec![PortTemplate::outbound("src")])
    }

    /// A consumer: one inbound template, no outbound ones.
    pub fn sink(type_name: &str) -> Self {
        Self::new(type_name, vec![PortTemplate::inbound("sink")])
    }

    /// A one-in one-out transform.
    pub fn filter(type_name: &str) -> Self {
        Self::new(
            type_name,
            vec![PortTemplate::inbound("sink"), PortTemplate::outbound("src")],
        )
    }
}

/// Who owns a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOwner {
    Node(NodeId),
    /// The internal proxy of a ghost port; the ghost port belongs to a composite.
    Proxy(PortId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Ready => write!(f, "ready"),
            Self::Paused => write!(f, "paused"),
            Self::Playing => write!(f, "playing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub current: NodeState,
    pub next: NodeState,
}

impl StateChange {
    pub fn new(current: NodeState, next: NodeState) -> Self {
        Self { current, next }
    }
}

/// Instrumentation events a tracer may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    NodeCreated,
    NodeStateChanged,
    PrePush,
    PrePushBatch,
    PostPull,
}

impl HookKind {
    pub const HOT_PATH: [HookKind; 3] = [HookKind::PrePush, HookKind::PrePushBatch, HookKind::PostPull];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeCreated => "node-created",
            Self::NodeStateChanged => "node-state-changed",
            Self::PrePush => "pre-push",
            Self::PrePushBatch => "pre-push-batch",
            Self::PostPull => "post-pull",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_diff_is_signed_and_in_milliseconds() {
        assert_eq!(clock_diff_ms(ms_to_clock(5), ms_to_clock(12)), 7.0);
        assert_eq!(clock_diff_ms(ms_to_clock(12), ms_to_clock(5)), -7.0);
        assert_eq!(clock_diff_ms(0, 1_500_000), 1.5);
    }
}
