//! The legacy CF8/CFC configuration access mechanism.
//!
//! Reading config space means writing a bus/device/function/offset
//! tuple to I/O port `0xCF8` then reading the 32-bit result back from
//! `0xCFC`. That's two port instructions this crate can't issue on the
//! host, so the actual backend is a registrable [`ConfigAccess`] —
//! `axon-kernel` installs the real port-I/O implementation at boot;
//! host tests install a fake device map instead.

use axon_core::sync::SpinLock;
use axon_driver_api::PciAddress;

/// A 32-bit config-space register read.
pub trait ConfigAccess: Sync {
    /// Reads the dword at `offset` (must be 4-byte aligned) in `addr`'s
    /// configuration space.
    fn read_dword(&self, addr: PciAddress, offset: u8) -> u32;
}

static BACKEND: SpinLock<Option<&'static dyn ConfigAccess>> = SpinLock::new(None);

/// Installs the configuration access backend. Only the first call
/// takes effect in production; tests may call this repeatedly via
/// `#[cfg(test)]`-local fixtures.
pub fn register_backend(backend: &'static dyn ConfigAccess) {
    *BACKEND.lock() = Some(backend);
}

/// Reads a dword, or `0xFFFF_FFFF` (PCI's "nothing here" value) if no
/// backend has been registered.
#[must_use]
pub fn read_dword(addr: PciAddress, offset: u8) -> u32 {
    match *BACKEND.lock() {
        Some(backend) => backend.read_dword(addr, offset),
        None => 0xFFFF_FFFF,
    }
}

/// The real CF8/CFC backend, driving I/O ports directly.
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
pub struct PortConfigAccess;

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
impl ConfigAccess for PortConfigAccess {
    fn read_dword(&self, addr: PciAddress, offset: u8) -> u32 {
        const CONFIG_ADDRESS: u16 = 0xCF8;
        const CONFIG_DATA: u16 = 0xCFC;
        // SAFETY: CF8/CFC is always present on x86_64 platforms with a
        // legacy PCI host bridge; the address/offset encoding is fixed.
        unsafe {
            core::arch::asm!(
                "out dx, eax",
                in("dx") CONFIG_ADDRESS,
                in("eax") addr.config_address(offset),
                options(nomem, nostack, preserves_flags),
            );
            let value: u32;
            core::arch::asm!(
                "in eax, dx",
                in("dx") CONFIG_DATA,
                out("eax") value,
                options(nomem, nostack, preserves_flags),
            );
            value
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{ConfigAccess, PciAddress};
    use alloc::collections::BTreeMap;
    use axon_core::sync::SpinLock;

    /// An in-memory config-space fake keyed by `(bdf, offset)`.
    pub struct FakeBus {
        pub registers: SpinLock<BTreeMap<(PciAddress, u8), u32>>,
    }

    impl FakeBus {
        pub fn new() -> Self {
            Self {
                registers: SpinLock::new(BTreeMap::new()),
            }
        }

        pub fn set(&self, addr: PciAddress, offset: u8, value: u32) {
            self.registers.lock().insert((addr, offset & 0xFC), value);
        }
    }

    impl ConfigAccess for FakeBus {
        fn read_dword(&self, addr: PciAddress, offset: u8) -> u32 {
            *self
                .registers
                .lock()
                .get(&(addr, offset & 0xFC))
                .unwrap_or(&0xFFFF_FFFF)
        }
    }
}
