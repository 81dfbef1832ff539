//! MMIO window allocator.
//!
//! Hands out virtual address ranges for mapping device memory,
//! starting at a fixed 4 GiB virtual base and growing monotonically in
//! 2 MiB granules. Addresses are never recycled: `iounmap` only zeroes
//! the underlying page table entries, it does not return the virtual
//! range to a free list. This matches hardware reality closely enough
//! for a hobby kernel that never tears down and remaps the same
//! device twice in a hot loop.

use crate::mapper::{MapError, MapFlags, Mapper};
use axon_core::addr::{PhysAddr, VirtAddr};
use axon_core::sync::SpinLock;

const MMIO_VA_BASE: u64 = 0x1_0000_0000;
const GRANULE: u64 = 0x20_0000;

struct WindowState {
    next_va: u64,
}

/// Allocator for the MMIO virtual address window.
pub struct MmioAllocator {
    state: SpinLock<WindowState>,
}

impl MmioAllocator {
    /// Creates an allocator with the cursor at the start of the window.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(WindowState {
                next_va: MMIO_VA_BASE,
            }),
        }
    }

    /// Maps `size` bytes of physical memory at `phys` into the MMIO
    /// window as uncacheable, write-through, no-execute memory, and
    /// returns a pointer to the byte at `phys` (not necessarily the
    /// start of the mapped range, since `phys` is rounded down to the
    /// enclosing 2 MiB granule before mapping).
    pub fn ioremap(
        &self,
        mapper: &mut Mapper,
        phys: PhysAddr,
        size: u64,
    ) -> Result<VirtAddr, MapError> {
        let phys_base = phys.align_down(GRANULE);
        let offset = phys.as_u64() - phys_base.as_u64();
        let span = align_up(offset + size, GRANULE);

        let va_base = {
            let mut state = self.state.lock();
            let base = state.next_va;
            state.next_va += span;
            base
        };
        let va_base = VirtAddr::new(va_base);

        mapper.map_2mib(
            va_base,
            phys_base,
            span,
            MapFlags::WRITABLE | MapFlags::WRITE_THROUGH | MapFlags::CACHE_DISABLE,
        )?;

        Ok(va_base + offset)
    }

    /// Zeroes the page table entries covering `[virt_base, virt_base +
    /// size)`. The virtual range itself is not reclaimed.
    pub fn iounmap(&self, mapper: &mut Mapper, virt_base: VirtAddr, size: u64) {
        let aligned_base = virt_base.align_down(GRANULE);
        let span = align_up((virt_base.as_u64() - aligned_base.as_u64()) + size, GRANULE);
        let pages = span / GRANULE;
        for i in 0..pages {
            let _ = mapper.unmap_2mib(aligned_base + i * GRANULE);
        }
    }
}

impl Default for MmioAllocator {
    fn default() -> Self {
        Self::new()
    }
}

const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioremap_returns_offset_within_window() {
        let alloc = MmioAllocator::new();
        let mut mapper = Mapper::new();
        let va = alloc
            .ioremap(&mut mapper, PhysAddr::new(0xFEE0_0000), 0x1000)
            .unwrap();
        assert!(va.as_u64() >= MMIO_VA_BASE);
    }

    #[test]
    fn successive_ioremaps_do_not_overlap() {
        let alloc = MmioAllocator::new();
        let mut mapper = Mapper::new();
        let a = alloc
            .ioremap(&mut mapper, PhysAddr::new(0x1000_0000), 0x1000)
            .unwrap();
        let b = alloc
            .ioremap(&mut mapper, PhysAddr::new(0x2000_0000), 0x1000)
            .unwrap();
        assert!(b.as_u64() >= a.as_u64() + GRANULE);
    }

    #[test]
    fn ioremap_maps_translatable_memory() {
        let alloc = MmioAllocator::new();
        let mut mapper = Mapper::new();
        let phys = PhysAddr::new(0x3000_0000);
        let va = alloc.ioremap(&mut mapper, phys, 0x100).unwrap();
        assert_eq!(mapper.virtual_to_physical(va), Some(phys));
    }

    #[test]
    fn iounmap_clears_translation() {
        let alloc = MmioAllocator::new();
        let mut mapper = Mapper::new();
        let phys = PhysAddr::new(0x4000_0000);
        let va = alloc.ioremap(&mut mapper, phys, 0x100).unwrap();
        alloc.iounmap(&mut mapper, va, 0x100);
        assert_eq!(mapper.virtual_to_physical(va), None);
    }
}
