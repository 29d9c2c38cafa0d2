//! The graph runtime seen by the tracer, and an in-memory implementation of it.

pub mod host;
pub mod memory;
pub mod types;
