//! Compile-time kernel configuration.
//!
//! AxonOS has a single build target, so a plain `const` module is the
//! whole story — no codegen crate, no profile matrix.

/// Maximum number of live threads the scheduler can hold at once.
pub const MAX_THREADS: usize = 32;

/// Maximum open file descriptors per thread.
pub const MAX_FD: usize = 16;

/// Maximum number of filesystem drivers the VFS registry can hold.
pub const MAX_FS_DRIVERS: usize = 8;

/// Maximum number of simultaneous mounts.
pub const MAX_FS_MOUNTS: usize = 8;

/// Number of virtual TTYs (`/dev/tty0`..`/dev/tty{N-1}`).
pub const TTY_COUNT: usize = 6;

/// Capacity of each TTY's input ring buffer, in bytes.
pub const TTY_RING_SIZE: usize = 256;

/// Kernel heap size in bytes.
pub const HEAP_SIZE: usize = 16 * 1024 * 1024;

/// Stack size for a kernel thread, in bytes.
pub const KERNEL_STACK_SIZE: usize = 8192;

/// PIT frequency in Hz; also the scheduler tick rate.
pub const PIT_HZ: u32 = 1000;

/// Base of the window used for allocating MMIO virtual mappings.
pub const MMIO_WINDOW_BASE: u64 = 4 * 1024 * 1024 * 1024;
