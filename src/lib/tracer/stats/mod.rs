//! Running and windowed latency statistics.
//!
//! Both record types keep two independent locks: one for the running totals
//! and one for the window. Neither lock is held while a record is emitted.

pub mod branch;
pub mod node;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::graph::types::{clock_diff_ms, ClockTime, MSECONDS_PER_SECOND};

#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cumulative {count, sum, min, max} of latency samples.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Running {
    total: f64,
    min: f64,
    max: f64,
    count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RunningSnapshot {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl Default for Running {
    fn default() -> Self {
        Self {
            total: 0.0,
            min: f64::MAX,
            max: 0.0,
            count: 0,
        }
    }
}

impl Running {
    #[inline]
    pub(crate) fn add(&mut self, sample: f64) -> RunningSnapshot {
        self.count += 1;
        self.total += sample;
        if sample < self.min {
            self.min = sample;
        }
        if sample > self.max {
            self.max = sample;
        }
        self.snapshot()
    }

    pub(crate) fn snapshot(&self) -> RunningSnapshot {
        RunningSnapshot {
            avg: if self.count > 0 {
                self.total / self.count as f64
            } else {
                0.0
            },
            min: if self.count > 0 { self.min } else { 0.0 },
            max: self.max,
            count: self.count,
        }
    }
}

/// Aggregation over a window whose length is measured in data-unit
/// timestamps, so it only advances while data flows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    running: Running,
    started_at: ClockTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WindowSummary {
    /// Elapsed window length, in milliseconds.
    pub interval_ms: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl WindowSummary {
    /// Window length divided by the frames it saw.
    pub fn pipeline_latency(&self) -> f64 {
        self.interval_ms / self.count as f64
    }

    pub fn fps(&self) -> f64 {
        fps(self.pipeline_latency())
    }
}

impl Window {
    pub(crate) fn new(now: ClockTime) -> Self {
        Self {
            running: Running::default(),
            started_at: now,
        }
    }

    pub(crate) fn reset(&mut self, now: ClockTime) {
        *self = Self::new(now);
    }

    /// Accumulate a sample taken at `now`. Once the window spans
    /// `interval_ms`, its summary is returned and the window restarts at `now`.
    pub(crate) fn add(
        &mut self,
        sample: f64,
        now: ClockTime,
        interval_ms: u32,
    ) -> Option<WindowSummary> {
        let snapshot = self.running.add(sample);
        let elapsed = clock_diff_ms(self.started_at, now);
        if elapsed < interval_ms as f64 {
            return None;
        }
        self.reset(now);
        Some(WindowSummary {
            interval_ms: elapsed,
            avg: snapshot.avg,
            min: snapshot.min,
            max: snapshot.max,
            count: snapshot.count,
        })
    }
}

#[inline]
pub(crate) fn fps(latency_ms: f64) -> f64 {
    if latency_ms > 0.0 {
        MSECONDS_PER_SECOND / latency_ms
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::ms_to_clock;

    #[test]
    fn running_tracks_extremes_and_average() {
        let mut running = Running::default();
        running.add(4.0);
        running.add(1.0);
        let snapshot = running.add(7.0);

        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.min, 1.0);
        assert_eq!(snapshot.max, 7.0);
        assert_eq!(snapshot.avg, 4.0);
    }

    #[test]
    fn empty_running_reports_zeroes() {
        let snapshot = Running::default().snapshot();
        assert_eq!(snapshot.avg, 0.0);
        assert_eq!(snapshot.min, 0.0);
        assert_eq!(snapshot.count, 0);
    }

    #[test]
    fn window_only_averages_frames_since_the_last_reset() {
        let mut window = Window::new(ms_to_clock(0));

        assert!(window.add(10.0, ms_to_clock(40), 100).is_none());
        assert!(window.add(20.0, ms_to_clock(80), 100).is_none());
        let summary = window.add(30.0, ms_to_clock(100), 100).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.avg, 20.0);
        assert_eq!(summary.interval_ms, 100.0);
        assert_eq!(summary.pipeline_latency(), 100.0 / 3.0);

        // The window restarted at the emitting frame.
        assert!(window.add(100.0, ms_to_clock(150), 100).is_none());
        let summary = window.add(2.0, ms_to_clock(200), 100).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.avg, 51.0);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 100.0);
    }

    #[test]
    fn fps_is_zero_without_a_positive_latency() {
        assert_eq!(fps(0.0), 0.0);
        assert_eq!(fps(-3.0), 0.0);
        assert_eq!(fps(20.0), 50.0);
    }
}
