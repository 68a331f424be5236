//! Static device table: which registers a part exposes, and the two the
//! catalog always guarantees (BYPASS and IDCODE).

use std::collections::{BTreeMap, HashMap};

use crate::error::{InvariantError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub address: u32,
    pub width: u8,
    pub name: &'static str,
}

/// One JTAG-addressable part on the chain.
#[derive(Debug, Clone)]
pub struct Device {
    pub ir_len: u8,
    pub idcode: u32,
    names: HashMap<&'static str, RegisterInfo>,
    addresses: BTreeMap<u32, RegisterInfo>,
}

impl Device {
    pub fn register(&self, name: &str) -> Option<&RegisterInfo> {
        self.names.get(name)
    }

    pub fn register_at(&self, address: u32) -> Option<&RegisterInfo> {
        self.addresses.get(&address)
    }

    pub fn bypass(&self) -> &RegisterInfo {
        self.names
            .get("BYPASS")
            .expect("DeviceBuilder guarantees a BYPASS entry")
    }

    pub fn idcode_register(&self) -> &RegisterInfo {
        self.names
            .get("IDCODE")
            .expect("DeviceBuilder guarantees an IDCODE entry")
    }
}

pub struct DeviceBuilder {
    ir_len: u8,
    idcode: u32,
    registers: Vec<RegisterInfo>,
}

impl DeviceBuilder {
    pub fn new(ir_len: u8, idcode: u32) -> Self {
        Self {
            ir_len,
            idcode,
            registers: Vec::new(),
        }
    }

    pub fn register(mut self, address: u32, width: u8, name: &'static str) -> Self {
        self.registers.push(RegisterInfo {
            address,
            width,
            name,
        });
        self
    }

    /// Fails only as a programmer error: the caller forgot BYPASS or IDCODE.
    pub fn build(self) -> Result<Device> {
        let bypass_all_ones = (1u32 << self.ir_len) - 1;
        let has_bypass = self
            .registers
            .iter()
            .any(|r| r.name == "BYPASS" && r.width == 1 && r.address == bypass_all_ones);
        let has_idcode = self
            .registers
            .iter()
            .any(|r| r.name == "IDCODE" && r.width == 32);

        if !has_bypass || !has_idcode {
            return Err(InvariantError::MissingBypass.into());
        }

        let mut names = HashMap::new();
        let mut addresses = BTreeMap::new();
        for r in self.registers {
            names.insert(r.name, r);
            addresses.insert(r.address, r);
        }

        Ok(Device {
            ir_len: self.ir_len,
            idcode: self.idcode,
            names,
            addresses,
        })
    }
}

/// A handful of Xilinx 7-series / UltraScale parts, carrying the registers
/// every scan in this crate touches (BYPASS, IDCODE, SAMPLE, EXTEST).
pub fn builtin() -> Vec<Device> {
    vec![
        // XC7A35T, 6-bit IR.
        DeviceBuilder::new(6, 0x0362_D093)
            .register(0x01, 1, "SAMPLE")
            .register(0x26, 1, "EXTEST")
            .register(0x09, 32, "IDCODE")
            .register(0x3F, 1, "BYPASS")
            .build()
            .expect("builtin table is internally consistent"),
        // XC7K325T, 6-bit IR.
        DeviceBuilder::new(6, 0x0373_6093)
            .register(0x01, 1, "SAMPLE")
            .register(0x26, 1, "EXTEST")
            .register(0x09, 32, "IDCODE")
            .register(0x3F, 1, "BYPASS")
            .build()
            .expect("builtin table is internally consistent"),
        // XCKU040, 6-bit IR.
        DeviceBuilder::new(6, 0x0398_2093)
            .register(0x01, 1, "SAMPLE")
            .register(0x26, 1, "EXTEST")
            .register(0x09, 32, "IDCODE")
            .register(0x3F, 1, "BYPASS")
            .build()
            .expect("builtin table is internally consistent"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_device_has_bypass_and_idcode() {
        for dev in builtin() {
            assert_eq!(dev.bypass().width, 1);
            assert_eq!(dev.idcode_register().width, 32);
        }
    }

    #[test]
    fn register_lookup_by_name_and_address() {
        let dev = &builtin()[0];
        let sample = dev.register("SAMPLE").unwrap();
        assert_eq!(dev.register_at(sample.address).unwrap().name, "SAMPLE");
        assert!(dev.register("NONEXISTENT").is_none());
    }
}
