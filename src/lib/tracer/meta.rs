use std::sync::Arc;

use serde::Serialize;

use crate::graph::types::ClockTime;

/// Timing record carried by a data unit from the node that first saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimestampRecord {
    /// When the unit was first observed at its source.
    pub init_timestamp: ClockTime,
    /// When the unit last crossed a measured node.
    pub last_seen_timestamp: ClockTime,
    /// Number of nodes that have measured this unit so far.
    pub hops: u32,
}

impl TimestampRecord {
    pub fn new(ts: ClockTime) -> Self {
        Self {
            init_timestamp: ts,
            last_seen_timestamp: ts,
            hops: 0,
        }
    }

    #[inline]
    pub(crate) fn advance(&mut self, ts: ClockTime) {
        self.last_seen_timestamp = ts;
        self.hops = self.hops.saturating_add(1);
    }
}

/// A unit of streamed content as it crosses a port.
///
/// The payload is shared between clones, so a unit that was duplicated (e.g.
/// by a fan-out) is no longer writable, exactly like a host buffer that has
/// more than one reference.
#[derive(Debug, Clone)]
pub struct DataUnit {
    payload: Arc<[u8]>,
    timestamp: Option<TimestampRecord>,
}

impl DataUnit {
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            payload: payload.into(),
            timestamp: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.payload) == 1
    }

    #[inline]
    pub fn timestamp(&self) -> Option<&TimestampRecord> {
        self.timestamp.as_ref()
    }

    #[inline]
    pub(crate) fn timestamp_mut(&mut self) -> Option<&mut TimestampRecord> {
        self.timestamp.as_mut()
    }

    /// Attach a fresh record. Returns `false` when the unit is shared and
    /// cannot be modified.
    pub(crate) fn stamp(&mut self, ts: ClockTime) -> bool {
        if !self.is_writable() {
            return false;
        }
        self.timestamp = Some(TimestampRecord::new(ts));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_units_are_not_stamped() {
        let mut unit = DataUnit::new(vec![1, 2, 3]);
        let copy = unit.clone();

        assert!(!unit.is_writable());
        assert!(!unit.stamp(10));
        assert!(unit.timestamp().is_none());

        drop(copy);
        assert!(unit.is_writable());
        assert!(unit.stamp(10));
        assert_eq!(unit.timestamp(), Some(&TimestampRecord::new(10)));
    }

    #[test]
    fn advancing_keeps_the_init_timestamp() {
        let mut record = TimestampRecord::new(5);
        record.advance(9);
        record.advance(14);

        assert_eq!(record.init_timestamp, 5);
        assert_eq!(record.last_seen_timestamp, 14);
        assert_eq!(record.hops, 2);
    }
}
