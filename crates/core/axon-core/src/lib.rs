//! Core types and synchronization primitives shared across the AxonOS
//! crates: canonical address newtypes, spin locks, and small
//! no-allocation helpers that the rest of the kernel builds on.
//!
//! Everything here is plain host-testable logic; no inline assembly
//! runs unless built for a `target_os = "none"` kernel target, so
//! `cargo test` exercises the real code path on the host.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod addr;
pub mod cell;
#[macro_use]
pub mod log;
pub mod static_assert;
pub mod sync;

pub use addr::{PhysAddr, VirtAddr};
pub use log::LogLevel;
