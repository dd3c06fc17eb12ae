//! Line classification and link state transitions.
//!
//! Every framed line passes through [`ProtocolMachine::handle_line`] in arrival order.
//! Checks run in a fixed order:
//!
//! 1. A line ending in `!` is a device error, whatever the state.
//! 2. `PARSED.` completes the outstanding command, whatever the state.
//! 3. While connected, `ACQ.` starts acquisition; anything else is terminal output.
//! 4. While acquiring, `END.` stops acquisition; anything else is telemetry
//!    (`<hex code>:<float>`). Malformed telemetry is reported and skipped.
//! 5. While disconnected, `READY...` confirms the device is alive and moves the link to
//!    connected. Other lines are terminal output.

use super::state::{LinkShared, LinkState};
use crate::data::{now_seconds, ChannelRegistry};
use crate::error::{DaqError, TelemetryParseError};
use crate::events::{DeviceEvent, EventBus};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sent by the device once after the port opens.
pub const CONNECTION_SIGNATURE: &str = "READY...";
/// Sent when acquisition starts.
pub const ACQUISITION_SIGNATURE: &str = "ACQ.";
/// Sent when acquisition ends, on request or on timeout.
pub const END_OF_ACQUISITION_SIGNATURE: &str = "END.";
/// Ends the processing of any command.
pub const COMPLETION_SIGNATURE: &str = "PARSED.";
/// Last character of a device error line.
pub const ERROR_SUFFIX: char = '!';
/// Separates channel code and value in telemetry.
pub const TELEMETRY_DELIMITER: char = ':';

/// What a line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// Ends in `!`; reported in every state
    DeviceError,
    /// `READY...` while disconnected
    ConnectionAck,
    /// `PARSED.`
    Completion,
    /// `ACQ.` while connected
    AcquisitionStart,
    /// `END.` while acquiring
    AcquisitionEnd,
    /// A parsed sample
    Telemetry {
        /// Channel code
        channel: u8,
        /// Sample value
        value: f64,
    },
    /// A line in the acquiring state that is not telemetry
    MalformedTelemetry(TelemetryParseError),
    /// Anything else, passed through for display
    Terminal,
}

/// Classify `line` as seen in `state`. Pure; no side effects.
pub fn classify(line: &str, state: LinkState) -> LineKind {
    if line.ends_with(ERROR_SUFFIX) {
        return LineKind::DeviceError;
    }
    if line == COMPLETION_SIGNATURE {
        return LineKind::Completion;
    }
    match state {
        LinkState::Connected if line == ACQUISITION_SIGNATURE => LineKind::AcquisitionStart,
        LinkState::Acquiring if line == END_OF_ACQUISITION_SIGNATURE => LineKind::AcquisitionEnd,
        LinkState::Acquiring => match parse_telemetry(line) {
            Ok((channel, value)) => LineKind::Telemetry { channel, value },
            Err(e) => LineKind::MalformedTelemetry(e),
        },
        LinkState::Disconnected if line == CONNECTION_SIGNATURE => LineKind::ConnectionAck,
        LinkState::Connected | LinkState::Disconnected => LineKind::Terminal,
    }
}

/// Parse `<hex code>:<float>`. Whitespace around either field is ignored.
pub fn parse_telemetry(line: &str) -> Result<(u8, f64), TelemetryParseError> {
    let (code, value) = line
        .split_once(TELEMETRY_DELIMITER)
        .ok_or(TelemetryParseError::MissingDelimiter)?;

    let code = code.trim();
    let channel =
        u8::from_str_radix(code, 16).map_err(|source| TelemetryParseError::BadChannel {
            text: code.to_string(),
            source,
        })?;

    let value = value.trim();
    let value = value
        .parse::<f64>()
        .map_err(|source| TelemetryParseError::BadValue {
            text: value.to_string(),
            source,
        })?;

    Ok((channel, value))
}

/// Drives link state from incoming lines. One per link; owned by the reader task.
pub struct ProtocolMachine {
    link: Arc<LinkShared>,
    registry: Arc<ChannelRegistry>,
    events: EventBus,
}

impl ProtocolMachine {
    /// Machine for one link; the reader task owns it.
    pub fn new(link: Arc<LinkShared>, registry: Arc<ChannelRegistry>, events: EventBus) -> Self {
        Self {
            link,
            registry,
            events,
        }
    }

    /// Handle one line stamped with the current time.
    pub fn handle_line(&self, line: &str) -> LineKind {
        self.handle_line_at(line, now_seconds())
    }

    /// Handle one line with an explicit receive timestamp.
    pub fn handle_line_at(&self, line: &str, timestamp: f64) -> LineKind {
        let kind = classify(line, self.link.state());
        match &kind {
            LineKind::DeviceError => {
                let error = DaqError::Device(line.to_string());
                warn!(%error, "Device reported error");
                self.events.publish(DeviceEvent::DeviceError(line.to_string()));
            }
            LineKind::ConnectionAck => {
                self.link.mark_connected();
                info!("Device ready");
                self.events.publish(DeviceEvent::Terminal(line.to_string()));
            }
            LineKind::Completion => {
                self.link.set_outstanding(false);
                self.events.publish(DeviceEvent::CommandCompleted);
            }
            LineKind::AcquisitionStart => {
                self.link.set_state(LinkState::Acquiring);
                self.registry.set_start_time(timestamp);
                info!("Acquisition started");
                self.events.publish(DeviceEvent::AcquisitionStarted);
            }
            LineKind::AcquisitionEnd => {
                self.link.set_state(LinkState::Connected);
                info!("Acquisition finished");
                self.events.publish(DeviceEvent::AcquisitionFinished);
            }
            LineKind::Telemetry { channel, value } => {
                self.registry.record(*channel, *value, timestamp);
            }
            LineKind::MalformedTelemetry(cause) => {
                let error = DaqError::ProtocolParse {
                    line: line.to_string(),
                    source: cause.clone(),
                };
                warn!(%error, "Dropping telemetry line");
                self.events.publish(DeviceEvent::DataError {
                    line: line.to_string(),
                    cause: cause.to_string(),
                });
            }
            LineKind::Terminal => {
                debug!(line, "Terminal output");
                self.events.publish(DeviceEvent::Terminal(line.to_string()));
            }
        }
        kind
    }
}
