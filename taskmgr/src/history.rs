//! Fixed-capacity rolling series for charts.

use std::collections::VecDeque;

/// Points kept per chart.
pub const SERIES_CAPACITY: usize = 60;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if dq.len() == cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// Value range a series clamps into before storing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeriesRange {
    /// 0..=100 %.
    Percent,
    /// 0..=ceiling, in whatever unit the series charts (MiB/s, Mbit/s).
    Ceiling(f64),
}

impl SeriesRange {
    pub fn clamp(self, v: f64) -> f64 {
        let hi = match self {
            SeriesRange::Percent => 100.0,
            SeriesRange::Ceiling(c) => c,
        };
        if v.is_nan() {
            return 0.0;
        }
        v.clamp(0.0, hi)
    }
}

/// Oldest-first series that always holds exactly `capacity` points once anything was pushed.
///
/// Before the series fills up, the deficit is backfilled with the first real sample so a fresh
/// chart starts flat instead of climbing from zero.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    points: VecDeque<f64>,
    real: usize,
    cap: usize,
    range: SeriesRange,
}

impl TimeSeries {
    pub fn new(range: SeriesRange) -> Self {
        Self::with_capacity(range, SERIES_CAPACITY)
    }

    pub fn with_capacity(range: SeriesRange, cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            points: VecDeque::with_capacity(cap),
            real: 0,
            cap,
            range,
        }
    }

    /// Clamp, append, and backfill. Returns the stored value.
    pub fn push(&mut self, value: f64) -> f64 {
        let v = self.range.clamp(value);
        if self.points.is_empty() {
            self.points.extend(std::iter::repeat(v).take(self.cap - 1));
        }
        push_capped(&mut self.points, v, self.cap);
        self.real = (self.real + 1).min(self.cap);
        v
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 0 before the first push, `capacity` after.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Number of points that came from real samples (the rest is backfill).
    pub fn real_samples(&self) -> usize {
        self.real
    }

    pub fn latest(&self) -> Option<f64> {
        self.points.back().copied()
    }

    pub fn range(&self) -> SeriesRange {
        self.range
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.points.iter().copied().collect()
    }
}
