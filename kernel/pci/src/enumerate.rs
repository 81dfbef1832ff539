//! Brute-force enumeration of every PCI function that answers.
//!
//! AxonOS does not bind drivers to PCI devices; enumeration exists so
//! boot can log what hardware is present. The scan matches the
//! original C implementation's shape exactly: all 256 buses, all 32
//! devices, function 0 probed first and the remaining 7 probed only
//! if the header type's multifunction bit is set.

use crate::cam::read_dword;
use alloc::vec::Vec;
use axon_driver_api::{PciAddress, PciClass};

/// One PCI function discovered during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDevice {
    /// Bus/device/function location.
    pub address: PciAddress,
    /// Vendor id from config offset `0x00`.
    pub vendor_id: u16,
    /// Device id from config offset `0x00`.
    pub device_id: u16,
    /// Class/subclass/prog-if from config offset `0x08`.
    pub class: PciClass,
    /// Header type byte from config offset `0x0C`, multifunction bit included.
    pub header_type: u8,
    /// Interrupt line from config offset `0x3C`, 0 if unassigned.
    pub irq_line: u8,
    /// Raw base address registers, offsets `0x10..=0x24`.
    pub bars: [u32; 6],
}

impl PciDevice {
    fn probe(address: PciAddress) -> Option<Self> {
        let dword0 = read_dword(address, 0x00);
        let vendor_id = (dword0 & 0xFFFF) as u16;
        if vendor_id == 0xFFFF {
            return None;
        }
        let device_id = ((dword0 >> 16) & 0xFFFF) as u16;

        let class = PciClass::from_register(read_dword(address, 0x08));
        let header_type = ((read_dword(address, 0x0C) >> 16) & 0xFF) as u8;
        let irq_line = (read_dword(address, 0x3C) & 0xFF) as u8;

        let mut bars = [0u32; 6];
        for (i, bar) in bars.iter_mut().enumerate() {
            *bar = read_dword(address, 0x10 + (i as u8) * 4);
        }

        Some(Self {
            address,
            vendor_id,
            device_id,
            class,
            header_type,
            irq_line,
            bars,
        })
    }

    /// Whether this function's header type declares the device
    /// multifunction, meaning functions 1..=7 should also be probed.
    #[must_use]
    pub const fn is_multifunction(&self) -> bool {
        self.header_type & 0x80 != 0
    }
}

/// Scans every bus/device/function and returns every function that
/// responded. Pure function of whatever [`crate::cam::register_backend`]
/// installed; safe to call repeatedly.
#[must_use]
pub fn enumerate() -> Vec<PciDevice> {
    let mut found = Vec::new();
    for bus in 0u16..256 {
        for device in 0u8..32 {
            let bus = bus as u8;
            let Some(function0) = PciDevice::probe(PciAddress::new(bus, device, 0)) else {
                continue;
            };
            let multifunction = function0.is_multifunction();
            found.push(function0);

            if multifunction {
                for function in 1u8..8 {
                    if let Some(dev) = PciDevice::probe(PciAddress::new(bus, device, function)) {
                        found.push(dev);
                    }
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cam::register_backend;
    use crate::cam::test_support::FakeBus;
    use axon_core::sync::SpinLock;
    use alloc::collections::BTreeMap;

    static FAKE: FakeBus = FakeBus {
        registers: SpinLock::new(BTreeMap::new()),
    };

    fn reset_and_register() {
        *FAKE.registers.lock() = BTreeMap::new();
        register_backend(&FAKE);
    }

    #[test]
    fn enumerate_finds_a_single_function_device() {
        reset_and_register();
        let addr = PciAddress::new(0, 3, 0);
        FAKE.set(addr, 0x00, 0x1234_8086);
        FAKE.set(addr, 0x08, 0x0108_0200);
        FAKE.set(addr, 0x0C, 0x0000_0000);

        let devices = enumerate();
        let found = devices.iter().find(|d| d.address == addr).unwrap();
        assert_eq!(found.vendor_id, 0x8086);
        assert_eq!(found.device_id, 0x1234);
        assert_eq!(found.class.base, 0x01);
        assert!(!found.is_multifunction());
    }

    #[test]
    fn multifunction_header_probes_all_functions() {
        reset_and_register();
        let addr0 = PciAddress::new(1, 5, 0);
        FAKE.set(addr0, 0x00, 0xBEEF_10DE);
        FAKE.set(addr0, 0x0C, 0x0080_0000);
        let addr1 = PciAddress::new(1, 5, 1);
        FAKE.set(addr1, 0x00, 0xCAFE_10DE);

        let devices = enumerate();
        assert!(devices.iter().any(|d| d.address == addr0));
        assert!(devices.iter().any(|d| d.address == addr1));
    }

    #[test]
    fn absent_device_is_not_reported() {
        reset_and_register();
        let devices = enumerate();
        assert!(devices.is_empty());
    }

    #[test]
    fn single_function_header_skips_remaining_functions() {
        reset_and_register();
        let addr0 = PciAddress::new(2, 1, 0);
        FAKE.set(addr0, 0x00, 0x0001_1111);
        // Function 1 answers too, but header type has no multifunction bit.
        let addr1 = PciAddress::new(2, 1, 1);
        FAKE.set(addr1, 0x00, 0x0002_1111);

        let devices = enumerate();
        assert!(devices.iter().any(|d| d.address == addr0));
        assert!(!devices.iter().any(|d| d.address == addr1));
    }
}
