//! Register namespaces with contiguous address assignment.
//!
//! A [`RegisterMap`] holds two independent ordered namespaces, holding (writable) and
//! input (device-reported). Registers are appended with [`RegisterMap::add`]; each gets
//! the next free address in its namespace, so declaration order fixes the layout and
//! there is no way to pass an address explicitly.

use super::codec::{DeviceType, DeviceValue};
use crate::error::{AppResult, DaqError};
use std::collections::HashMap;
use std::fmt;

/// Holding and input registers have separate address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterSpace {
    /// Read/write
    Holding,
    /// Read-only, reported by the device
    Input,
}

impl fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterSpace::Holding => f.write_str("holding"),
            RegisterSpace::Input => f.write_str("input"),
        }
    }
}

/// How the host uses a register beyond plain reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterRole {
    /// Describes the device layout; read once after connecting
    pub config: bool,
    /// Refreshed periodically while connected
    pub poll: bool,
}

impl RegisterRole {
    /// Configuration register.
    pub const CONFIG: Self = Self {
        config: true,
        poll: false,
    };
    /// Polled register.
    pub const POLL: Self = Self {
        config: false,
        poll: true,
    };
}

/// One typed register and its last known value.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    name: String,
    address: u16,
    device_type: DeviceType,
    value: DeviceValue,
}

impl Register {
    fn new(name: String, address: u16, device_type: DeviceType) -> Self {
        Self {
            name,
            address,
            device_type,
            value: device_type.default_value(),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start address in words.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Length in words.
    pub fn len(&self) -> u16 {
        self.device_type.words()
    }

    /// Whether the register spans no words.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register type.
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Last value written or read.
    pub fn value(&self) -> &DeviceValue {
        &self.value
    }

    /// Replace the value; it must be of the register's type.
    pub fn set_value(&mut self, value: DeviceValue) -> AppResult<()> {
        let actual = value.device_type();
        if actual != self.device_type {
            return Err(DaqError::RegisterType {
                name: self.name.clone(),
                expected: self.device_type.to_string(),
                actual: actual.to_string(),
            });
        }
        self.value = value;
        Ok(())
    }

    /// Decode little-endian bytes read from the device.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.value = self.device_type.decode(bytes)?;
        Ok(())
    }

    /// Decode words read from the device.
    pub fn set_words(&mut self, words: &[u16]) -> AppResult<()> {
        self.value = self.device_type.decode_words(words)?;
        Ok(())
    }

    /// Little-endian words of the current value.
    pub fn to_words(&self) -> Vec<u16> {
        self.value.to_words()
    }
}

#[derive(Debug, Clone, Default)]
struct Namespace {
    registers: Vec<Register>,
    index: HashMap<String, usize>,
}

impl Namespace {
    fn next_address(&self) -> u32 {
        self.registers
            .last()
            .map_or(0, |r| u32::from(r.address) + u32::from(r.len()))
    }

    fn get(&self, name: &str) -> Option<&Register> {
        self.index.get(name).map(|&i| &self.registers[i])
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Register> {
        let i = *self.index.get(name)?;
        self.registers.get_mut(i)
    }

    fn clear(&mut self) {
        self.registers.clear();
        self.index.clear();
    }
}

/// Typed registers of both namespaces, addressed in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    holding: Namespace,
    input: Namespace,
    config: Vec<String>,
    poll: Vec<String>,
}

impl RegisterMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn space(&self, space: RegisterSpace) -> &Namespace {
        match space {
            RegisterSpace::Holding => &self.holding,
            RegisterSpace::Input => &self.input,
        }
    }

    fn space_mut(&mut self, space: RegisterSpace) -> &mut Namespace {
        match space {
            RegisterSpace::Holding => &mut self.holding,
            RegisterSpace::Input => &mut self.input,
        }
    }

    /// Append `count` registers of type `ty` at the next free address.
    ///
    /// With `count > 1` the registers are named `name0`, `name1`, … Fails without
    /// modifying the map if the type breaks alignment, a name is taken, or the
    /// namespace would run past the 16-bit address range.
    pub fn add(
        &mut self,
        space: RegisterSpace,
        name: &str,
        ty: DeviceType,
        count: usize,
    ) -> AppResult<()> {
        self.add_with_role(space, name, ty, count, RegisterRole::default())
    }

    /// [`Self::add`], recording the registers under `role` as well.
    pub fn add_with_role(
        &mut self,
        space: RegisterSpace,
        name: &str,
        ty: DeviceType,
        count: usize,
        role: RegisterRole,
    ) -> AppResult<()> {
        ty.validate(name)?;

        let names: Vec<String> = if count > 1 {
            (0..count).map(|i| format!("{name}{i}")).collect()
        } else {
            (0..count).map(|_| name.to_string()).collect()
        };

        let namespace = self.space(space);
        if let Some(taken) = names.iter().find(|n| namespace.index.contains_key(*n)) {
            return Err(DaqError::Configuration(format!(
                "Register '{taken}' already exists in {space} space"
            )));
        }
        let start = namespace.next_address();
        let end = start + u32::from(ty.words()) * count as u32;
        if end > u32::from(u16::MAX) + 1 {
            return Err(DaqError::Configuration(format!(
                "Register '{name}' runs past the end of {space} space"
            )));
        }

        let namespace = self.space_mut(space);
        let mut address = start;
        for register_name in &names {
            namespace
                .index
                .insert(register_name.clone(), namespace.registers.len());
            namespace
                .registers
                .push(Register::new(register_name.clone(), address as u16, ty));
            address += u32::from(ty.words());
        }

        if role.config {
            self.config.extend(names.iter().cloned());
        }
        if role.poll {
            self.poll.extend(names);
        }
        Ok(())
    }

    /// Look up by exact name.
    pub fn get(&self, space: RegisterSpace, name: &str) -> Option<&Register> {
        self.space(space).get(name)
    }

    /// Look up `template` followed by a numeric index, e.g. (`"ADC_CAL_"`, 3).
    pub fn get_indexed(&self, space: RegisterSpace, template: &str, index: usize) -> Option<&Register> {
        self.get(space, &format!("{template}{index}"))
    }

    /// Mutable lookup by exact name.
    pub fn get_mut(&mut self, space: RegisterSpace, name: &str) -> Option<&mut Register> {
        self.space_mut(space).get_mut(name)
    }

    /// Like [`Self::get`], but a missing register is an error.
    pub fn require(&self, space: RegisterSpace, name: &str) -> AppResult<&Register> {
        self.get(space, name)
            .ok_or_else(|| DaqError::RegisterNotFound(format!("{space}:{name}")))
    }

    /// Find `name` in either namespace, holding first.
    pub fn find(&self, name: &str) -> Option<(RegisterSpace, &Register)> {
        self.get(RegisterSpace::Holding, name)
            .map(|r| (RegisterSpace::Holding, r))
            .or_else(|| self.get(RegisterSpace::Input, name).map(|r| (RegisterSpace::Input, r)))
    }

    /// Read an F32 register; missing registers and other types are errors.
    pub fn get_f32(&self, space: RegisterSpace, name: &str) -> AppResult<f32> {
        let register = self.require(space, name)?;
        register
            .value()
            .as_f32()
            .ok_or_else(|| type_mismatch(register, DeviceType::F32))
    }

    /// Read a U16 register; see [`Self::get_f32`].
    pub fn get_u16(&self, space: RegisterSpace, name: &str) -> AppResult<u16> {
        let register = self.require(space, name)?;
        register
            .value()
            .as_u16()
            .ok_or_else(|| type_mismatch(register, DeviceType::U16))
    }

    /// Store a value, checking its type. Returns the updated register.
    pub fn set_value(
        &mut self,
        space: RegisterSpace,
        name: &str,
        value: DeviceValue,
    ) -> AppResult<&Register> {
        let register = self
            .get_mut(space, name)
            .ok_or_else(|| DaqError::RegisterNotFound(format!("{space}:{name}")))?;
        register.set_value(value)?;
        Ok(register)
    }

    /// Registers of `space` in address order.
    pub fn registers(&self, space: RegisterSpace) -> &[Register] {
        &self.space(space).registers
    }

    /// Address the next added register would get.
    pub fn next_address(&self, space: RegisterSpace) -> u32 {
        self.space(space).next_address()
    }

    /// Names of the configuration registers, in address order.
    pub fn config_registers(&self) -> &[String] {
        &self.config
    }

    /// Names of the polled registers.
    pub fn poll_registers(&self) -> &[String] {
        &self.poll
    }

    /// Remove every register from both namespaces.
    pub fn clear(&mut self) {
        self.holding.clear();
        self.input.clear();
        self.config.clear();
        self.poll.clear();
    }
}

fn type_mismatch(register: &Register, expected: DeviceType) -> DaqError {
    DaqError::RegisterType {
        name: register.name().to_string(),
        expected: expected.to_string(),
        actual: register.device_type().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_word_registers_are_contiguous() {
        let mut map = RegisterMap::new();
        map.add(RegisterSpace::Input, "V_", DeviceType::F32, 5).unwrap();
        let addresses: Vec<u16> = map
            .registers(RegisterSpace::Input)
            .iter()
            .map(Register::address)
            .collect();
        assert_eq!(addresses, vec![0, 2, 4, 6, 8]);
        assert_eq!(map.get_indexed(RegisterSpace::Input, "V_", 3).unwrap().address(), 6);
    }

    #[test]
    fn single_register_keeps_plain_name() {
        let mut map = RegisterMap::new();
        map.add(RegisterSpace::Input, "TEMP", DeviceType::F32, 1).unwrap();
        assert!(map.get(RegisterSpace::Input, "TEMP").is_some());
        assert!(map.get(RegisterSpace::Input, "TEMP0").is_none());
    }

    #[test]
    fn namespaces_are_independent() {
        let mut map = RegisterMap::new();
        map.add(RegisterSpace::Holding, "A", DeviceType::U16, 1).unwrap();
        map.add(RegisterSpace::Input, "B", DeviceType::U16, 1).unwrap();
        map.add(RegisterSpace::Holding, "C", DeviceType::DacCal, 1).unwrap();
        assert_eq!(map.get(RegisterSpace::Input, "B").unwrap().address(), 0);
        assert_eq!(map.get(RegisterSpace::Holding, "C").unwrap().address(), 1);
        assert_eq!(map.next_address(RegisterSpace::Holding), 9);
    }

    #[test]
    fn odd_block_fails_without_side_effects() {
        let mut map = RegisterMap::new();
        map.add(RegisterSpace::Holding, "OK", DeviceType::F32, 1).unwrap();
        let err = map
            .add(RegisterSpace::Holding, "BAD", DeviceType::Words(3), 2)
            .unwrap_err();
        assert!(matches!(err, DaqError::RegisterLayout { words: 3, .. }));
        assert_eq!(map.registers(RegisterSpace::Holding).len(), 1);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut map = RegisterMap::new();
        map.add(RegisterSpace::Holding, "X", DeviceType::F32, 2).unwrap();
        assert!(map.add(RegisterSpace::Holding, "X1", DeviceType::F32, 1).is_err());
        assert!(map.add(RegisterSpace::Input, "X1", DeviceType::F32, 1).is_ok());
    }

    #[test]
    fn address_space_overflow_rejected() {
        let mut map = RegisterMap::new();
        map.add(RegisterSpace::Holding, "BIG_", DeviceType::Words(2), 32768)
            .unwrap();
        assert!(map.add(RegisterSpace::Holding, "MORE", DeviceType::U16, 1).is_err());
    }

    #[test]
    fn typed_access() {
        let mut map = RegisterMap::new();
        map.add(RegisterSpace::Holding, "SETPOINT", DeviceType::F32, 1)
            .unwrap();
        map.add_with_role(RegisterSpace::Input, "COUNT", DeviceType::U16, 1, RegisterRole::CONFIG)
            .unwrap();

        map.set_value(RegisterSpace::Holding, "SETPOINT", DeviceValue::F32(1.25))
            .unwrap();
        assert_eq!(map.get_f32(RegisterSpace::Holding, "SETPOINT").unwrap(), 1.25);

        map.get_mut(RegisterSpace::Input, "COUNT")
            .unwrap()
            .set_words(&[7])
            .unwrap();
        assert_eq!(map.get_u16(RegisterSpace::Input, "COUNT").unwrap(), 7);
        assert_eq!(map.config_registers(), &["COUNT".to_string()]);

        assert!(matches!(
            map.get_u16(RegisterSpace::Holding, "SETPOINT"),
            Err(DaqError::RegisterType { .. })
        ));
        assert!(matches!(
            map.get_f32(RegisterSpace::Holding, "MISSING"),
            Err(DaqError::RegisterNotFound(_))
        ));
        assert!(map
            .set_value(RegisterSpace::Holding, "SETPOINT", DeviceValue::U16(1))
            .is_err());
    }

    #[test]
    fn find_prefers_holding() {
        let mut map = RegisterMap::new();
        map.add(RegisterSpace::Input, "V", DeviceType::F32, 1).unwrap();
        map.add(RegisterSpace::Holding, "V", DeviceType::F32, 1).unwrap();
        assert_eq!(map.find("V").unwrap().0, RegisterSpace::Holding);
        assert!(map.find("W").is_none());
    }
}
