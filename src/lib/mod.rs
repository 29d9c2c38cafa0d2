pub mod cli;
pub mod error;
pub mod graph;
pub mod logger;
pub mod metrics;
pub mod tracer;
