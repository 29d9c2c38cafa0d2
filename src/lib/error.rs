use crate::graph::types::{NodeId, PortDirection, PortId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid tracer parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid interval {0:?}: expected a positive number of milliseconds")]
    InvalidInterval(String),

    #[error("Invalid baseline {0:?}: expected source|skip-first")]
    InvalidBaseline(String),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Unknown port: {0}")]
    UnknownPort(PortId),

    #[error("Node {node} has no free {direction:?} port")]
    NoFreePort {
        node: NodeId,
        direction: PortDirection,
    },

    #[error("Cannot link {from} to {to}: {reason}")]
    Link {
        from: PortId,
        to: PortId,
        reason: &'static str,
    },
}
