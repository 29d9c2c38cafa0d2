use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::*;

use crate::error::{Error, Result};

pub const DEFAULT_INTERVAL_MS: u32 = 1000;

/// Which measurements the tracer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerFlags {
    /// Per-node latency of every processing node.
    pub element: bool,
    /// End-to-end latency of every source → sink branch.
    pub pipeline: bool,
}

impl Default for TracerFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl TracerFlags {
    pub const NONE: Self = Self {
        element: false,
        pipeline: false,
    };
    pub const ALL: Self = Self {
        element: true,
        pipeline: true,
    };

    #[inline]
    pub fn is_disabled(&self) -> bool {
        !self.element && !self.pipeline
    }

    pub(crate) fn to_bits(self) -> u8 {
        (self.element as u8) | ((self.pipeline as u8) << 1)
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            element: bits & 0b01 != 0,
            pipeline: bits & 0b10 != 0,
        }
    }
}

impl std::fmt::Display for TracerFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.pipeline, self.element) {
            (true, true) => write!(f, "pipeline+element"),
            (true, false) => write!(f, "pipeline"),
            (false, true) => write!(f, "element"),
            (false, false) => write!(f, "none"),
        }
    }
}

impl FromStr for TracerFlags {
    type Err = Error;

    /// Parses `pipeline+element`. Unknown names are ignored with a warning.
    fn from_str(s: &str) -> Result<Self> {
        let mut flags = Self::NONE;
        for name in s.split('+').map(str::trim).filter(|n| !n.is_empty()) {
            match name {
                "pipeline" => flags.pipeline = true,
                "element" => flags.element = true,
                "none" => {}
                other => warn!("Invalid latency tracer flags {other}"),
            }
        }
        Ok(flags)
    }
}

/// What the first processing node a unit reaches is measured against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeBaseline {
    /// Stamping sets the last-seen timestamp, so the first hop is measured
    /// from the moment the source pushed the unit.
    #[default]
    Source,
    /// The first measured hop only establishes the baseline.
    SkipFirst,
}

impl std::fmt::Display for NodeBaseline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::SkipFirst => write!(f, "skip-first"),
        }
    }
}

impl FromStr for NodeBaseline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "source" => Ok(Self::Source),
            "skip-first" | "skip_first" => Ok(Self::SkipFirst),
            other => Err(Error::InvalidBaseline(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerConfig {
    pub flags: TracerFlags,
    /// Length of the aggregation window, in milliseconds.
    pub interval_ms: u32,
    pub baseline: NodeBaseline,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            flags: TracerFlags::default(),
            interval_ms: DEFAULT_INTERVAL_MS,
            baseline: NodeBaseline::default(),
        }
    }
}

impl TracerConfig {
    pub fn with_flags(mut self, flags: TracerFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: u32) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_baseline(mut self, baseline: NodeBaseline) -> Self {
        self.baseline = baseline;
        self
    }
}

pub fn parse_interval(value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(interval) if interval > 0 => Ok(interval),
        _ => Err(Error::InvalidInterval(value.to_string())),
    }
}

impl FromStr for TracerConfig {
    type Err = Error;

    /// Parses tracer params such as `flags=pipeline+element,interval=1000`.
    /// Keys that are not given keep their defaults.
    fn from_str(params: &str) -> Result<Self> {
        let mut config = Self::default();
        for entry in params.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(Error::InvalidParameter(entry.to_string()));
            };
            match key.trim() {
                "flags" => config.flags = value.parse()?,
                "interval" => config.interval_ms = parse_interval(value)?,
                "baseline" => config.baseline = value.parse()?,
                other => return Err(Error::InvalidParameter(other.to_string())),
            }
        }
        Ok(config)
    }
}
