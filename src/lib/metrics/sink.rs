use std::{
    io::Write,
    sync::{Mutex, PoisonError},
};

use ringbuffer::{AllocRingBuffer, RingBuffer};
use tracing::*;

use super::records::Record;

/// Destination of the records computed by the tracer.
///
/// `emit` is called from the data path, outside any statistics lock, and may
/// be called from many threads at once.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: &Record);
}

/// Writes every record as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn emit(&self, record: &Record) {
        match record {
            Record::Element(r) => trace!(
                target: "latency_tracer",
                name = %r.name,
                frame_latency = r.frame_latency,
                avg = r.avg,
                min = r.min,
                max = r.max,
                frame_count = r.frame_count,
                is_composite = r.is_composite,
                "[Latency Tracer] Element"
            ),
            Record::ElementInterval(r) => trace!(
                target: "latency_tracer",
                name = %r.name,
                interval_ms = r.interval_ms,
                avg = r.avg,
                min = r.min,
                max = r.max,
                "[Latency Tracer Interval] Element"
            ),
            Record::Branch(r) => trace!(
                target: "latency_tracer",
                pipeline = %r.pipeline_name,
                source = %r.source_name,
                sink = %r.sink_name,
                frame_latency = r.frame_latency,
                avg = r.avg,
                min = r.min,
                max = r.max,
                pipeline_latency = r.pipeline_latency,
                fps = r.fps,
                frame_count = r.frame_count,
                "[Latency Tracer] Pipeline"
            ),
            Record::BranchInterval(r) => trace!(
                target: "latency_tracer",
                pipeline = %r.pipeline_name,
                source = %r.source_name,
                sink = %r.sink_name,
                interval_ms = r.interval_ms,
                avg = r.avg,
                min = r.min,
                max = r.max,
                pipeline_latency = r.pipeline_latency,
                fps = r.fps,
                "[Latency Tracer Interval] Pipeline"
            ),
        }
    }
}

/// Serializes each record as one JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn emit(&self, record: &Record) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = serde_json::to_writer(&mut *writer, record)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"));
        if let Err(error) = result {
            warn!("Failed to write latency record: {error:?}");
        }
    }
}

/// Keeps the last records in memory.
pub struct HistorySink {
    history: Mutex<AllocRingBuffer<Record>>,
}

impl HistorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(AllocRingBuffer::new(capacity.max(1))),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RecordSink for HistorySink {
    fn emit(&self, record: &Record) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}
