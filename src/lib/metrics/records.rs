use std::sync::Arc;

use serde::Serialize;

/// Latency of one data unit through a processing node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementRecord {
    pub name: Arc<str>,
    pub frame_latency: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub frame_count: u64,
    pub is_composite: bool,
}

/// Aggregate of a processing node over one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementIntervalRecord {
    pub name: Arc<str>,
    pub interval_ms: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// End-to-end latency of one data unit along a source → sink branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchRecord {
    pub pipeline_name: Arc<str>,
    pub source_name: Arc<str>,
    pub sink_name: Arc<str>,
    pub frame_latency: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    /// Time since the first frame of the branch, divided by the frame count.
    /// Frame drops make this value meaningless.
    pub pipeline_latency: f64,
    pub fps: f64,
    pub frame_count: u64,
}

/// Aggregate of a branch over one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchIntervalRecord {
    pub pipeline_name: Arc<str>,
    pub source_name: Arc<str>,
    pub sink_name: Arc<str>,
    pub interval_ms: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub pipeline_latency: f64,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Element(ElementRecord),
    ElementInterval(ElementIntervalRecord),
    Branch(BranchRecord),
    BranchInterval(BranchIntervalRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Element = 0,
    ElementInterval = 1,
    Branch = 2,
    BranchInterval = 3,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Element,
        RecordKind::ElementInterval,
        RecordKind::Branch,
        RecordKind::BranchInterval,
    ];

    /// Name of the record class, as the records are announced to consumers.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Element => "latency_tracer_element",
            Self::ElementInterval => "latency_tracer_element_interval",
            Self::Branch => "latency_tracer_pipeline",
            Self::BranchInterval => "latency_tracer_pipeline_interval",
        }
    }
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Element(_) => RecordKind::Element,
            Self::ElementInterval(_) => RecordKind::ElementInterval,
            Self::Branch(_) => RecordKind::Branch,
            Self::BranchInterval(_) => RecordKind::BranchInterval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_serialize_with_their_kind_tag() {
        let record = Record::ElementInterval(ElementIntervalRecord {
            name: Arc::from("queue0"),
            interval_ms: 1000.0,
            avg: 2.5,
            min: 1.0,
            max: 4.0,
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record"], "element_interval");
        assert_eq!(json["name"], "queue0");
        assert_eq!(json["interval_ms"], 1000.0);
        assert_eq!(record.kind().class_name(), "latency_tracer_element_interval");
    }
}
