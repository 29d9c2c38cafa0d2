use std::path::PathBuf;

use clap::Parser;

use crate::{
    error::Result,
    tracer::config::{parse_interval, NodeBaseline, TracerConfig, TracerFlags, DEFAULT_INTERVAL_MS},
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Trace per-node and per-branch latency of a simulated streaming pipeline"
)]
pub struct Args {
    /// Turns all log categories up to Debug, for more information check RUST_LOG env variable.
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory where hourly log files are written. Nothing is written to disk when omitted.
    #[arg(long, value_name = "DIR")]
    pub log_path: Option<PathBuf>,

    /// Measurements to perform, e.g. "pipeline+element".
    #[arg(long, env = "LATENCY_TRACER_FLAGS", default_value = "pipeline+element")]
    pub flags: TracerFlags,

    /// Length of the aggregation window, in milliseconds.
    #[arg(long, env = "LATENCY_TRACER_INTERVAL", value_parser = parse_interval, default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval: u32,

    /// What the first processing node is measured against: "source" or "skip-first".
    /// Applied on top of --params when given.
    #[arg(long)]
    pub baseline: Option<NodeBaseline>,

    /// Tracer params string, e.g. "flags=pipeline,interval=500". Overrides the flags above.
    #[arg(long, env = "LATENCY_TRACER_PARAMS", value_name = "PARAMS")]
    pub params: Option<String>,

    /// Number of independent source → sink branches.
    #[arg(long, default_value = "2")]
    pub branches: usize,

    /// Number of processing nodes in each branch.
    #[arg(long, default_value = "3")]
    pub depth: usize,

    /// Wrap the processing nodes of each branch in a composite exposed through ghost ports.
    #[arg(long)]
    pub bin: bool,

    /// Number of frames pushed by every source.
    #[arg(long, default_value = "100")]
    pub frames: u64,

    /// Delay between two frames of the same source.
    #[arg(long, default_value = "33")]
    pub frame_interval_ms: u64,

    /// Simulated work before every push, in microseconds.
    #[arg(long, default_value = "500")]
    pub work_us: u64,

    /// Write records as JSON lines to this file instead of the log.
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Keep the last N records in memory and summarize them on exit.
    #[arg(long, default_value = "0")]
    pub history: usize,
}

impl Args {
    pub fn tracer_config(&self) -> Result<TracerConfig> {
        let config = match &self.params {
            Some(params) => params.parse()?,
            None => TracerConfig::default()
                .with_flags(self.flags)
                .with_interval_ms(self.interval),
        };

        Ok(match self.baseline {
            Some(baseline) => config.with_baseline(baseline),
            None => config,
        })
    }
}

// Return the command line used to start this application
pub fn command_line_string() -> String {
    std::env::args().collect::<Vec<String>>().join(" ")
}
