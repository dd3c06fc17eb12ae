//! Typed register map and value codec.

pub mod codec;
pub mod layout;
pub mod map;

pub use codec::{
    AdcChannelCal, AioCal, DacCal, DeviceType, DeviceValue, MotorParams, RegulatorParams,
};
pub use layout::DeviceLayout;
pub use map::{Register, RegisterMap, RegisterRole, RegisterSpace};
