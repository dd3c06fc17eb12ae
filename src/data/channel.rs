//! Per-channel telemetry storage.
//!
//! A [`ChannelBuffer`] keeps two parallel series: the raw `(timestamp, value)` samples
//! and the derived `(time since start, moving average)` points, one derived point per
//! raw sample. Both series grow together under one logical capacity that doubles when
//! full, so callers can tell when storage was reallocated and must be re-read.
//!
//! The buffer itself is not synchronised; [`crate::data::ChannelRegistry`] wraps each
//! one in its own `parking_lot::Mutex` so a sample is applied in a single critical
//! section.

use super::expression::ChannelExpression;
use std::collections::VecDeque;

/// One point of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Seconds since acquisition start
    pub x: f64,
    /// Value
    pub y: f64,
}

impl Point {
    /// Point at (`x`, `y`).
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Lag-less simple moving average over the most recent `window` values.
///
/// The new value is pushed and the mean taken before the queue is trimmed back below
/// `window`, so the newest sample always contributes. Changing the window never
/// discards state: a smaller window takes effect at the next trim and a larger one
/// just lets the queue fill further.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    values: VecDeque<f64>,
}

impl MovingAverage {
    /// `window` is clamped to at least one sample.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            values: VecDeque::with_capacity(window),
        }
    }

    /// Add `value` and return the mean including it.
    pub fn push(&mut self, value: f64) -> f64 {
        self.values.push_back(value);
        let mean = self.values.iter().sum::<f64>() / self.values.len() as f64;
        while self.values.len() >= self.window {
            self.values.pop_front();
        }
        mean
    }

    /// Current window length.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Clamped to at least one sample.
    pub fn set_window(&mut self, window: usize) {
        self.window = window.max(1);
    }

    /// Forget the queued values; the window is kept.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Raw and derived series of one channel, kept the same length.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    raw: Vec<Point>,
    calculated: Vec<Point>,
    capacity: usize,
    average: MovingAverage,
    start_time: f64,
    expression: Option<ChannelExpression>,
}

impl ChannelBuffer {
    /// `capacity` is clamped to at least one point.
    pub fn new(capacity: usize, window: usize, start_time: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            raw: Vec::with_capacity(capacity),
            calculated: Vec::with_capacity(capacity),
            capacity,
            average: MovingAverage::new(window),
            start_time,
            expression: None,
        }
    }

    /// Append one sample and its derived point.
    ///
    /// Returns `true` when the series had to be reallocated to make room.
    pub fn add_sample(&mut self, value: f64, timestamp: f64) -> bool {
        let grew = self.raw.len() >= self.capacity;
        if grew {
            self.capacity = (self.capacity * 2).max(1);
            let additional = self.capacity - self.raw.len();
            self.raw.reserve_exact(additional);
            self.calculated.reserve_exact(self.capacity - self.calculated.len());
        }

        self.raw.push(Point::new(timestamp, value));
        let mean = self.average.push(value);
        let point = self.derive(timestamp, mean);
        self.calculated.push(point);
        grew
    }

    /// Shrink both series to their occupied length.
    ///
    /// Returns `true` if there was unused capacity to release.
    pub fn trim(&mut self) -> bool {
        let len = self.raw.len();
        if self.capacity == len {
            return false;
        }
        self.raw.shrink_to_fit();
        self.calculated.shrink_to_fit();
        self.capacity = len;
        true
    }

    /// Empty both series and the averaging queue. Window and capacity are kept.
    pub fn clear(&mut self) {
        self.raw.clear();
        self.calculated.clear();
        self.average.clear();
    }

    /// Rebuild the derived series from the stored raw samples with the current
    /// window and expression.
    ///
    /// The new series is built aside and swapped in, so a reader holding the same
    /// lock never sees a half-replayed buffer.
    pub fn recalculate(&mut self) {
        let mut average = MovingAverage::new(self.average.window());
        let mut calculated = Vec::with_capacity(self.capacity.max(self.raw.len()));
        for sample in &self.raw {
            let mean = average.push(sample.y);
            calculated.push(self.derive(sample.x, mean));
        }
        self.calculated = calculated;
        self.average = average;
    }

    fn derive(&self, timestamp: f64, mean: f64) -> Point {
        let x = timestamp - self.start_time;
        let y = match &self.expression {
            Some(expression) => expression.evaluate(x, mean),
            None => mean,
        };
        Point::new(x, y)
    }

    /// Affects future samples only; call [`Self::recalculate`] to apply it retroactively.
    pub fn set_window(&mut self, window: usize) {
        self.average.set_window(window);
    }

    /// Averaging window in samples.
    pub fn window(&self) -> usize {
        self.average.window()
    }

    /// Replace the math expression; `None` passes the average through.
    pub fn set_expression(&mut self, expression: Option<ChannelExpression>) {
        self.expression = expression;
    }

    /// The math expression, if one is set.
    pub fn expression(&self) -> Option<&ChannelExpression> {
        self.expression.as_ref()
    }

    /// Origin of the relative time axis.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Number of points in each series.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// No samples stored yet.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Logical capacity shared by both series.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples as received, with absolute timestamps.
    pub fn raw(&self) -> &[Point] {
        &self.raw
    }

    /// Averaged and transformed points on the relative time axis.
    pub fn calculated(&self) -> &[Point] {
        &self.calculated
    }

    /// Newest derived point.
    pub fn last_calculated(&self) -> Option<Point> {
        self.calculated.last().copied()
    }
}
