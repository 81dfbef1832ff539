//! Physical/virtual memory management: 2 MiB page tables, the MMIO
//! window allocator, and the kernel heap.
//!
//! All three are pure logic over plain memory buffers and are fully
//! exercised by `cargo test` on the host; only the code that actually
//! loads `CR3` or issues `invlpg` is gated to a real kernel target.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod heap;
pub mod mapper;
pub mod mmio;

pub use heap::Heap;
pub use mapper::{MapError, MapFlags, Mapper};
pub use mmio::MmioAllocator;
