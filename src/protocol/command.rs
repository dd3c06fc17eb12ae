//! Outbound commands and their wire encoding.
//!
//! Four shapes exist on the wire, all single ASCII lines:
//!
//! | Kind        | Encoding                                               |
//! |-------------|--------------------------------------------------------|
//! | simple      | `<designator>`                                         |
//! | integer     | `<designator><decimal digits>`                         |
//! | hex array   | `<designator><count:2 digits><byte as 2 hex digits>…`  |
//! | float array | `<designator><count:2 digits><value> <value> …`        |
//!
//! Hex digits are uppercase without separators. Floats carry six significant digits
//! in plain decimal form, never with an exponent. The terminator is appended by the
//! rendezvous, not here.

use crate::error::{AppResult, DaqError};
use std::fmt;

/// Start/stop acquisition. The device answers with `ACQ.` or `END.`.
///
/// A start may carry a duration in seconds (`A60`); the device then sends `END.`
/// by itself when that time is up.
pub const TOGGLE_ACQUISITION: char = 'A';
/// Write a run of holding registers: little-endian start address, then value words.
pub const WRITE_REGISTERS: char = 'W';

/// Array lengths are sent as two decimal digits.
pub const MAX_ARRAY_LEN: usize = 99;

const FLOAT_SEPARATOR: char = ' ';
const SIGNIFICANT_DIGITS: i32 = 6;

/// One command line, before the terminator is appended.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Designator only.
    Simple(char),
    /// Designator followed by an unsigned decimal argument.
    Integer {
        /// Command character
        designator: char,
        /// Argument, written in decimal
        value: u64,
    },
    /// Counted byte payload, two hex digits per byte.
    HexArray {
        /// Command character
        designator: char,
        /// Bytes to send, at most [`MAX_ARRAY_LEN`]
        payload: Vec<u8>,
    },
    /// Counted floats separated by spaces.
    FloatArray {
        /// Command character
        designator: char,
        /// Values to send, at most [`MAX_ARRAY_LEN`]
        values: Vec<f32>,
    },
}

impl Command {
    /// Bare toggle: stops a running acquisition or starts an open-ended one.
    pub fn toggle_acquisition() -> Self {
        Command::Simple(TOGGLE_ACQUISITION)
    }

    /// Start acquisition, limited to `duration_secs` on the device when given.
    pub fn start_acquisition(duration_secs: Option<u64>) -> Self {
        match duration_secs {
            Some(value) => Command::Integer {
                designator: TOGGLE_ACQUISITION,
                value,
            },
            None => Self::toggle_acquisition(),
        }
    }

    /// Counted byte array; at most [`MAX_ARRAY_LEN`] bytes.
    pub fn hex_array(designator: char, payload: Vec<u8>) -> AppResult<Self> {
        check_len(payload.len())?;
        Ok(Command::HexArray {
            designator,
            payload,
        })
    }

    /// Counted float array; at most [`MAX_ARRAY_LEN`] values.
    pub fn float_array(designator: char, values: Vec<f32>) -> AppResult<Self> {
        check_len(values.len())?;
        Ok(Command::FloatArray { designator, values })
    }

    /// Register write: start address, then each word, all as little-endian byte pairs.
    pub fn write_registers(address: u16, words: &[u16]) -> AppResult<Self> {
        let mut payload = Vec::with_capacity((words.len() + 1) * 2);
        payload.extend_from_slice(&address.to_le_bytes());
        for word in words {
            payload.extend_from_slice(&word.to_le_bytes());
        }
        Self::hex_array(WRITE_REGISTERS, payload)
    }

    /// First character of the wire form.
    pub fn designator(&self) -> char {
        match self {
            Command::Simple(designator)
            | Command::Integer { designator, .. }
            | Command::HexArray { designator, .. }
            | Command::FloatArray { designator, .. } => *designator,
        }
    }

    /// Encode without the line terminator.
    pub fn to_wire(&self) -> String {
        match self {
            Command::Simple(designator) => designator.to_string(),
            Command::Integer { designator, value } => format!("{designator}{value}"),
            Command::HexArray {
                designator,
                payload,
            } => {
                let mut line = format!("{designator}{:02}", payload.len());
                for byte in payload {
                    line.push_str(&format!("{byte:02X}"));
                }
                line
            }
            Command::FloatArray { designator, values } => {
                let body = values
                    .iter()
                    .map(|v| format_significant(*v))
                    .collect::<Vec<_>>()
                    .join(&FLOAT_SEPARATOR.to_string());
                format!("{designator}{:02}{body}", values.len())
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

fn check_len(len: usize) -> AppResult<()> {
    if len > MAX_ARRAY_LEN {
        return Err(DaqError::CommandPayload {
            len,
            max: MAX_ARRAY_LEN,
        });
    }
    Ok(())
}

/// Six significant digits in plain decimal form.
///
/// Large magnitudes are rounded to six digits and padded with zeros before the point
/// (`1234567` becomes `1234570`); small ones get as many leading zeros as they need.
/// Trailing zeros after the point are dropped.
pub fn format_significant(value: f32) -> String {
    let value = f64::from(value);
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }

    let scientific = format!("{:.*e}", (SIGNIFICANT_DIGITS - 1) as usize, value);
    let Some((mantissa, exponent)) = scientific.rsplit_once('e') else {
        return scientific;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return scientific;
    };

    if exponent >= SIGNIFICANT_DIGITS - 1 {
        // Rounding happened in the mantissa; scale it back to an integer
        let Ok(mantissa) = mantissa.parse::<f64>() else {
            return scientific;
        };
        format!("{:.0}", mantissa * 10f64.powi(exponent))
    } else {
        let decimals = (SIGNIFICANT_DIGITS - 1 - exponent) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
