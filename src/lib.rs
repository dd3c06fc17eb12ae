//! # ADC Control Link Library
//!
//! Host-side core for a laboratory ADC/DAC/motor controller on a line-oriented serial
//! link. It turns the device's byte stream into typed events, correlates commands with
//! their acknowledgements, keeps a growable raw and moving-average series per telemetry
//! channel, and marshals the device's typed register space.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Line framer, protocol state machine, link state flags, command
//!   wire encoding and the command/completion rendezvous.
//! - **`data`**: Per-channel telemetry buffers with the lag-less moving average, the
//!   channel registry and optional per-channel math.
//! - **`register`**: Typed device values, their little-endian word codec and the
//!   holding/input register map.
//! - **`controller`**: Owns one link: reader task, acquisition control, register writes.
//! - **`events`**: `DeviceEvent` notifications fanned out over a broadcast channel.
//! - **`transport`**: Serial port opening (`serial` feature) and the stream trait alias.
//! - **`config`**: Figment-based configuration (`config/adc_control.toml` + environment).
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`error`**: The crate-wide `DaqError` enum.

pub mod config;
pub mod controller;
pub mod data;
pub mod error;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod register;
pub mod transport;

pub use controller::Controller;
pub use error::{AppResult, DaqError};
pub use events::{DeviceEvent, EventBus};
