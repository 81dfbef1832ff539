//! Stack-allocated data structures with similar APIs to heap-allocated types.
//!
//! This crate provides fixed-size, stack-allocated alternatives to common
//! heap-allocated data structures from the standard library, for use in
//! environments where heap allocation is unavailable or undesirable —
//! kernels, interrupt handlers, and early boot code.
//!
//! # Overview
//!
//! - [`ringbuf::RingBuf`] — a fixed-capacity circular/ring buffer for FIFO operations
//!
//! All types in this crate avoid heap allocation, have a fixed maximum
//! capacity determined at compile time, and work in `no_std` environments.

#![no_std]

pub mod ringbuf;
