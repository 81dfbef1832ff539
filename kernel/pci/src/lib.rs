//! PCI enumeration over the legacy CF8/CFC I/O port mechanism.
//!
//! Informational only: AxonOS logs what it finds at boot and binds no
//! drivers against it. The scan logic in [`enumerate`] is plain,
//! host-testable code; the port I/O it ultimately reads through is a
//! registrable [`cam::ConfigAccess`] backend so the scan can be
//! exercised against a fake bus without real hardware.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod cam;
pub mod enumerate;

pub use cam::{register_backend, ConfigAccess};
pub use enumerate::{enumerate, PciDevice};
