//! Typed device values and their word encoding.
//!
//! The device stores everything as 16-bit words. Each [`DeviceType`] has a fixed word
//! length; values are encoded little-endian, words in address order, with composite
//! records laid out field by field at fixed byte offsets. Records whose fields end on
//! a 16-bit boundary carry a trailing pad word so every multi-word type keeps 32-bit
//! alignment.
//!
//! Decoding is total for a buffer of the right length.

use crate::error::{AppResult, DaqError};
use std::fmt;

/// Tag for every type a register can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// 32-bit float, two words
    F32,
    /// 32-bit unsigned, two words
    U32,
    /// One word
    U16,
    /// [`AdcChannelCal`]
    AdcChannelCal,
    /// [`DacCal`]
    DacCal,
    /// [`AioCal`]
    AioCal,
    /// [`MotorParams`]
    MotorParams,
    /// [`RegulatorParams`]
    RegulatorParams,
    /// Opaque block of `n` words.
    Words(u16),
}

impl DeviceType {
    /// Length in 16-bit words.
    pub const fn words(self) -> u16 {
        match self {
            DeviceType::F32 | DeviceType::U32 => 2,
            DeviceType::U16 => 1,
            DeviceType::AdcChannelCal => 6,
            DeviceType::DacCal => 8,
            DeviceType::AioCal => 4,
            DeviceType::MotorParams => 8,
            DeviceType::RegulatorParams => 14,
            DeviceType::Words(n) => n,
        }
    }

    /// Length in bytes.
    pub const fn byte_len(self) -> usize {
        self.words() as usize * 2
    }

    /// Reject lengths that break 32-bit alignment. `name` is used for the error only.
    pub fn validate(self, name: &str) -> AppResult<()> {
        let words = self.words();
        if words == 0 || (words > 1 && words % 2 != 0) {
            return Err(DaqError::RegisterLayout {
                name: name.to_string(),
                words,
            });
        }
        Ok(())
    }

    /// All-zero value of this type.
    pub fn default_value(self) -> DeviceValue {
        match self {
            DeviceType::F32 => DeviceValue::F32(0.0),
            DeviceType::U32 => DeviceValue::U32(0),
            DeviceType::U16 => DeviceValue::U16(0),
            DeviceType::AdcChannelCal => DeviceValue::AdcChannelCal(AdcChannelCal::default()),
            DeviceType::DacCal => DeviceValue::DacCal(DacCal::default()),
            DeviceType::AioCal => DeviceValue::AioCal(AioCal::default()),
            DeviceType::MotorParams => DeviceValue::MotorParams(MotorParams::default()),
            DeviceType::RegulatorParams => {
                DeviceValue::RegulatorParams(RegulatorParams::default())
            }
            DeviceType::Words(n) => DeviceValue::Words(vec![0; n as usize]),
        }
    }

    /// Decode little-endian `bytes`, which must be exactly [`Self::byte_len`] long.
    pub fn decode(self, bytes: &[u8]) -> AppResult<DeviceValue> {
        if bytes.len() != self.byte_len() {
            return Err(DaqError::RegisterSize {
                expected: self.byte_len(),
                actual: bytes.len(),
            });
        }

        let mut r = ByteReader::new(bytes);
        let value = match self {
            DeviceType::F32 => DeviceValue::F32(r.f32()),
            DeviceType::U32 => DeviceValue::U32(r.u32()),
            DeviceType::U16 => DeviceValue::U16(r.u16()),
            DeviceType::AdcChannelCal => DeviceValue::AdcChannelCal(AdcChannelCal {
                k: r.f32(),
                b: r.f32(),
                invert: r.u16(),
            }),
            DeviceType::DacCal => DeviceValue::DacCal(DacCal {
                k: r.f32(),
                b: r.f32(),
                current_k: r.f32(),
                current_b: r.f32(),
            }),
            DeviceType::AioCal => DeviceValue::AioCal(AioCal {
                k: r.f32(),
                b: r.f32(),
            }),
            DeviceType::MotorParams => DeviceValue::MotorParams(MotorParams {
                rate_to_speed: r.f32(),
                microsteps: r.u16(),
                teeth: r.u16(),
                invert_enable: r.u16(),
                invert_error: r.u16(),
                direction: r.u16(),
            }),
            DeviceType::RegulatorParams => {
                let kp = r.f32();
                let ki = r.f32();
                let kd = r.f32();
                let low_conc_motor = r.u16();
                let high_conc_motor = r.u16();
                let sensing_adc_channel = r.u16();
                let low_conc_dac_channel = r.u16();
                let high_conc_dac_channel = r.u16();
                r.skip(2);
                DeviceValue::RegulatorParams(RegulatorParams {
                    kp,
                    ki,
                    kd,
                    low_conc_motor,
                    high_conc_motor,
                    sensing_adc_channel,
                    low_conc_dac_channel,
                    high_conc_dac_channel,
                    total_flowrate: r.f32(),
                })
            }
            DeviceType::Words(n) => DeviceValue::Words((0..n).map(|_| r.u16()).collect()),
        };
        Ok(value)
    }

    /// Decode register words as read from the device.
    pub fn decode_words(self, words: &[u16]) -> AppResult<DeviceValue> {
        self.decode(&words_to_bytes(words))
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::F32 => f.write_str("f32"),
            DeviceType::U32 => f.write_str("u32"),
            DeviceType::U16 => f.write_str("u16"),
            DeviceType::AdcChannelCal => f.write_str("AdcChannelCal"),
            DeviceType::DacCal => f.write_str("DacCal"),
            DeviceType::AioCal => f.write_str("AioCal"),
            DeviceType::MotorParams => f.write_str("MotorParams"),
            DeviceType::RegulatorParams => f.write_str("RegulatorParams"),
            DeviceType::Words(n) => write!(f, "Words({n})"),
        }
    }
}

/// ADC channel calibration: `value * k + b`, optionally inverted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdcChannelCal {
    /// Gain
    pub k: f32,
    /// Offset
    pub b: f32,
    /// Non-zero to invert the reading
    pub invert: u16,
}

/// DAC calibration for the voltage output and its current readback.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DacCal {
    /// Voltage gain
    pub k: f32,
    /// Voltage offset
    pub b: f32,
    /// Current readback gain
    pub current_k: f32,
    /// Current readback offset
    pub current_b: f32,
}

/// Analog I/O and temperature calibration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AioCal {
    /// Gain
    pub k: f32,
    /// Offset
    pub b: f32,
}

/// Stepper motor drive settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorParams {
    /// Flow rate to step rate conversion
    pub rate_to_speed: f32,
    /// Driver microstepping factor
    pub microsteps: u16,
    /// Pulley teeth
    pub teeth: u16,
    /// Non-zero inverts the enable output
    pub invert_enable: u16,
    /// Non-zero inverts the driver fault input
    pub invert_error: u16,
    /// Non-zero reverses the motor
    pub direction: u16,
}

/// Concentration regulator: PID gains, the motors and channels it drives, and the
/// total flow rate. A reserved word sits before the flow rate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegulatorParams {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
    /// Motor feeding the low concentration
    pub low_conc_motor: u16,
    /// Motor feeding the high concentration
    pub high_conc_motor: u16,
    /// ADC channel the regulator reads
    pub sensing_adc_channel: u16,
    /// DAC channel driving the low concentration side
    pub low_conc_dac_channel: u16,
    /// DAC channel driving the high concentration side
    pub high_conc_dac_channel: u16,
    /// Combined flow of both motors
    pub total_flowrate: f32,
}

/// A decoded register value.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceValue {
    /// Single float
    F32(f32),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Single word
    U16(u16),
    /// ADC calibration
    AdcChannelCal(AdcChannelCal),
    /// DAC calibration
    DacCal(DacCal),
    /// Analog I/O calibration
    AioCal(AioCal),
    /// Motor settings
    MotorParams(MotorParams),
    /// Regulator settings
    RegulatorParams(RegulatorParams),
    /// Raw words of an opaque block
    Words(Vec<u16>),
}

impl DeviceValue {
    /// Type tag of this value.
    pub fn device_type(&self) -> DeviceType {
        match self {
            DeviceValue::F32(_) => DeviceType::F32,
            DeviceValue::U32(_) => DeviceType::U32,
            DeviceValue::U16(_) => DeviceType::U16,
            DeviceValue::AdcChannelCal(_) => DeviceType::AdcChannelCal,
            DeviceValue::DacCal(_) => DeviceType::DacCal,
            DeviceValue::AioCal(_) => DeviceType::AioCal,
            DeviceValue::MotorParams(_) => DeviceType::MotorParams,
            DeviceValue::RegulatorParams(_) => DeviceType::RegulatorParams,
            DeviceValue::Words(words) => DeviceType::Words(words.len() as u16),
        }
    }

    /// Little-endian encoding, padded to the type's full length.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.device_type().byte_len());
        match self {
            DeviceValue::F32(v) => w.f32(*v),
            DeviceValue::U32(v) => w.u32(*v),
            DeviceValue::U16(v) => w.u16(*v),
            DeviceValue::AdcChannelCal(cal) => {
                w.f32(cal.k);
                w.f32(cal.b);
                w.u16(cal.invert);
                w.u16(0);
            }
            DeviceValue::DacCal(cal) => {
                w.f32(cal.k);
                w.f32(cal.b);
                w.f32(cal.current_k);
                w.f32(cal.current_b);
            }
            DeviceValue::AioCal(cal) => {
                w.f32(cal.k);
                w.f32(cal.b);
            }
            DeviceValue::MotorParams(p) => {
                w.f32(p.rate_to_speed);
                w.u16(p.microsteps);
                w.u16(p.teeth);
                w.u16(p.invert_enable);
                w.u16(p.invert_error);
                w.u16(p.direction);
                w.u16(0);
            }
            DeviceValue::RegulatorParams(p) => {
                w.f32(p.kp);
                w.f32(p.ki);
                w.f32(p.kd);
                w.u16(p.low_conc_motor);
                w.u16(p.high_conc_motor);
                w.u16(p.sensing_adc_channel);
                w.u16(p.low_conc_dac_channel);
                w.u16(p.high_conc_dac_channel);
                w.u16(0);
                w.f32(p.total_flowrate);
            }
            DeviceValue::Words(words) => {
                for word in words {
                    w.u16(*word);
                }
            }
        }
        w.into_inner()
    }

    /// Encoding as register words, in address order.
    pub fn to_words(&self) -> Vec<u16> {
        bytes_to_words(&self.to_bytes())
    }

    /// The float, if this is an `F32`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            DeviceValue::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer, if this is a `U32`.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            DeviceValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// The word, if this is a `U16`.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            DeviceValue::U16(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f32> for DeviceValue {
    fn from(value: f32) -> Self {
        DeviceValue::F32(value)
    }
}

impl From<u32> for DeviceValue {
    fn from(value: u32) -> Self {
        DeviceValue::U32(value)
    }
}

impl From<u16> for DeviceValue {
    fn from(value: u16) -> Self {
        DeviceValue::U16(value)
    }
}

/// Pack words as little-endian byte pairs.
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Inverse of [`words_to_bytes`]. A trailing odd byte is zero-extended.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}

/// Sequential little-endian reader. Callers check the total length up front.
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.bytes.get(self.pos..self.pos + N) {
            out.copy_from_slice(src);
        }
        self.pos += N;
        out
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}
