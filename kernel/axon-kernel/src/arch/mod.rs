//! Architecture-specific platform support.
//!
//! AxonOS targets x86_64 exclusively; this module exists as a seam so
//! the rest of the kernel never spells out the architecture directly.

pub mod x86_64;
