//! The controller's register layout.
//!
//! The device describes itself through a block of `u16` configuration input registers
//! at address 0. The host reads those first (see [`RegisterMap::configuration`]), turns
//! them into a [`DeviceLayout`], then builds the full map with
//! [`RegisterMap::standard`]. Address assignment depends only on declaration order
//! below, which mirrors the firmware's register structs.

use super::codec::DeviceType;
use super::map::{RegisterMap, RegisterRole, RegisterSpace};
use crate::error::AppResult;

/// Configuration input registers, in address order.
pub const CONFIG_REGISTERS: [&str; 7] = [
    "MAX_ADC_MODULES",
    "ADC_CHANNELS_PER_CHIP",
    "PRESENT_ADC_CHANNELS",
    "MAX_DAC_MODULES",
    "PRESENT_DAC_MODULES",
    "AIO_NUM",
    "MOTORS_NUM",
];

/// Per-channel ADC voltage, F32 input.
pub const ADC_VOLTAGE: &str = "ADC_VOLTAGE_";
/// Measured DAC output current.
pub const DAC_CURRENT: &str = "DAC_CURRENT_";
/// DAC output after correction.
pub const DAC_CORRECTED: &str = "DAC_CORRECTED_";
/// Auxiliary analog input.
pub const ANALOG_INPUT: &str = "A_IN_";
/// Board temperature.
pub const TEMPERATURE: &str = "TEMP";
/// Per-module DAC setpoint, F32 holding.
pub const DAC_SETPOINT: &str = "DAC_SETPOINT_";
/// Interval between automatic DAC corrections.
pub const DAC_CORRECTION_INTERVAL: &str = "DAC_CORRECTION_INTERVAL_";
/// Per-channel [`AdcChannelCal`](super::AdcChannelCal).
pub const ADC_CAL: &str = "ADC_CAL_";
/// Per-module DAC calibration.
pub const DAC_CAL: &str = "DAC_CAL_";
/// Per-input analog calibration.
pub const AIO_CAL: &str = "AIO_CAL_";
/// Temperature sensor calibration.
pub const TEMPERATURE_CAL: &str = "TEMP_CAL";
/// Per-motor [`MotorParams`](super::MotorParams).
pub const MOTOR_PARAMS: &str = "MOTOR_PARAMS_";
/// Depolarization pulse settings, per DAC module.
pub const DAC_DEPOLARIZATION_PERCENT: &str = "DAC_DEPO_PERCENT_";
/// Depolarization setpoint.
pub const DAC_DEPOLARIZATION_SETPOINT: &str = "DAC_DEPO_SETPOINT_";
/// Interval between depolarization pulses.
pub const DAC_DEPOLARIZATION_INTERVAL: &str = "DAC_DEPO_INTERVAL_";
/// Single [`RegulatorParams`](super::RegulatorParams) block.
pub const REGULATOR_PARAMS: &str = "REGULATOR_PARAMS";
/// Regulator target concentration, F32 holding.
pub const REGULATOR_SETPOINT: &str = "REGULATOR_SETPOINT";

/// Module counts reported by the configuration registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceLayout {
    /// ADC modules the firmware reserves registers for
    pub max_adc_modules: u16,
    /// Channels per ADC chip
    pub adc_channels_per_chip: u16,
    /// ADC channels actually fitted
    pub present_adc_channels: u16,
    /// DAC modules the firmware reserves registers for
    pub max_dac_modules: u16,
    /// DAC modules actually fitted
    pub present_dac_modules: u16,
    /// Analog I/O count
    pub aio_num: u16,
    /// Stepper motor count
    pub motors_num: u16,
}

impl DeviceLayout {
    /// Every ADC channel the firmware reserves registers for.
    pub fn adc_total(&self) -> usize {
        usize::from(self.max_adc_modules) * usize::from(self.adc_channels_per_chip)
    }

    /// DAC modules the firmware reserves registers for.
    pub fn dac_total(&self) -> usize {
        usize::from(self.max_dac_modules)
    }

    /// Read the counts out of a map whose configuration registers hold device values.
    pub fn from_config_registers(map: &RegisterMap) -> AppResult<Self> {
        let get = |name: &str| map.get_u16(RegisterSpace::Input, name);
        Ok(Self {
            max_adc_modules: get(CONFIG_REGISTERS[0])?,
            adc_channels_per_chip: get(CONFIG_REGISTERS[1])?,
            present_adc_channels: get(CONFIG_REGISTERS[2])?,
            max_dac_modules: get(CONFIG_REGISTERS[3])?,
            present_dac_modules: get(CONFIG_REGISTERS[4])?,
            aio_num: get(CONFIG_REGISTERS[5])?,
            motors_num: get(CONFIG_REGISTERS[6])?,
        })
    }
}

impl RegisterMap {
    /// Only the configuration registers, enough to discover the device layout.
    pub fn configuration() -> AppResult<Self> {
        let mut map = RegisterMap::new();
        for name in CONFIG_REGISTERS {
            map.add_with_role(RegisterSpace::Input, name, DeviceType::U16, 1, RegisterRole::CONFIG)?;
        }
        Ok(map)
    }

    /// The full register map for a device with `layout`.
    pub fn standard(layout: &DeviceLayout) -> AppResult<Self> {
        use DeviceType::*;
        use RegisterSpace::{Holding, Input};

        let adc = layout.adc_total();
        let dac = layout.dac_total();
        let aio = usize::from(layout.aio_num);
        let motors = usize::from(layout.motors_num);

        let mut map = Self::configuration()?;
        map.add_with_role(Input, ADC_VOLTAGE, F32, adc, RegisterRole::POLL)?;
        map.add_with_role(Input, DAC_CURRENT, F32, dac, RegisterRole::POLL)?;
        map.add_with_role(Input, DAC_CORRECTED, F32, dac, RegisterRole::POLL)?;
        map.add(Input, ANALOG_INPUT, F32, aio)?;
        map.add(Input, TEMPERATURE, F32, 1)?;

        map.add(Holding, DAC_SETPOINT, F32, dac)?;
        map.add(Holding, DAC_CORRECTION_INTERVAL, U32, dac)?;
        map.add(Holding, ADC_CAL, AdcChannelCal, adc)?;
        map.add(Holding, DAC_CAL, DacCal, dac)?;
        map.add(Holding, AIO_CAL, AioCal, aio)?;
        map.add(Holding, TEMPERATURE_CAL, AioCal, 1)?;
        map.add(Holding, MOTOR_PARAMS, MotorParams, motors)?;
        map.add(Holding, DAC_DEPOLARIZATION_PERCENT, F32, dac)?;
        map.add(Holding, DAC_DEPOLARIZATION_SETPOINT, F32, dac)?;
        map.add(Holding, DAC_DEPOLARIZATION_INTERVAL, U32, dac)?;
        map.add(Holding, REGULATOR_PARAMS, RegulatorParams, 1)?;
        map.add(Holding, REGULATOR_SETPOINT, F32, 1)?;
        Ok(map)
    }
}
