//! Telemetry buffering: per-channel raw and averaged series.

pub mod channel;
pub mod expression;
pub mod registry;

pub use channel::{ChannelBuffer, MovingAverage, Point};
pub use expression::ChannelExpression;
pub use registry::{ChannelMeta, ChannelRegistry, ChannelSnapshot, TelemetryChannel};

use chrono::{DateTime, Utc};

/// Seconds since the Unix epoch, with microsecond resolution.
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1e6
}

/// Current wall-clock time as sample timestamp.
pub fn now_seconds() -> f64 {
    unix_seconds(Utc::now())
}
