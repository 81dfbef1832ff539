//! 2 MiB page table mapper.
//!
//! AxonOS never maps anything smaller than a 2 MiB page: the kernel
//! image, heap, and MMIO windows are all multiples of that granule.
//! This keeps the page table walk to three levels (L4, L3, L2) with
//! L2 entries always leaf huge pages, and lets intermediate tables
//! come from a small static pool instead of a general frame
//! allocator.

use axon_core::addr::{PhysAddr, VirtAddr};
use core::sync::atomic::{AtomicPtr, Ordering};

/// Number of intermediate (L4/L3) page tables available for on-demand
/// allocation. AxonOS maps a handful of regions (identity map, heap,
/// MMIO window, kernel image), so this never needs to be large.
pub const TABLE_POOL_SIZE: usize = 16;

bitflags::bitflags! {
    /// Architecture-independent leaf entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u64 {
        /// Page is writable.
        const WRITABLE      = 1 << 0;
        /// Page is executable (if unset, NX is set on the leaf entry).
        const EXECUTABLE    = 1 << 1;
        /// Page is accessible from user mode.
        const USER          = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled entirely (uncacheable, used for MMIO).
        const CACHE_DISABLE = 1 << 4;
    }
}

const ENTRY_PRESENT: u64 = 1 << 0;
const ENTRY_WRITABLE: u64 = 1 << 1;
const ENTRY_USER: u64 = 1 << 2;
const ENTRY_WRITE_THROUGH: u64 = 1 << 3;
const ENTRY_CACHE_DISABLE: u64 = 1 << 4;
const ENTRY_PAGE_SIZE: u64 = 1 << 7;
const ENTRY_NX: u64 = 1 << 63;
const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Error returned when mapping or unmapping fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The static intermediate table pool is exhausted.
    TablePoolExhausted,
    /// `unmap_2mib` was called on an address with no mapping.
    NotMapped,
}

/// A page table page: 512 64-bit entries.
#[repr(align(4096))]
struct Table([u64; 512]);

impl Table {
    const fn zeroed() -> Self {
        Self([0u64; 512])
    }
}

/// Static pool of intermediate tables handed out by [`TablePool::alloc`].
struct TablePool {
    tables: [Table; TABLE_POOL_SIZE],
    next: usize,
}

impl TablePool {
    const fn new() -> Self {
        const ZERO: Table = Table::zeroed();
        Self {
            tables: [ZERO; TABLE_POOL_SIZE],
            next: 0,
        }
    }

    fn alloc(&mut self) -> Result<*mut Table, MapError> {
        if self.next >= TABLE_POOL_SIZE {
            return Err(MapError::TablePoolExhausted);
        }
        let table = &mut self.tables[self.next] as *mut Table;
        self.next += 1;
        Ok(table)
    }
}

/// The top-level mapper, holding the L4 root and the intermediate
/// table pool used to materialize L3 tables on demand.
pub struct Mapper {
    l4: Table,
    pool: TablePool,
}

impl Mapper {
    /// Creates an empty mapper with no mappings installed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            l4: Table::zeroed(),
            pool: TablePool::new(),
        }
    }

    /// Physical address of the L4 table, to be loaded into `CR3`.
    #[must_use]
    pub fn root_phys(&self) -> PhysAddr {
        PhysAddr::new_truncate(&self.l4 as *const Table as u64)
    }

    fn entry_to_table(entry: u64) -> *mut Table {
        (entry & ADDR_MASK) as *mut Table
    }

    /// Maps `size` bytes of virtual memory starting at `va` (must be 2
    /// MiB aligned) to physical memory starting at `pa` (must also be
    /// 2 MiB aligned), creating intermediate tables as needed.
    ///
    /// Rolls back any mappings installed in this call if it fails
    /// partway through (matching `ioremap`'s all-or-nothing contract).
    pub fn map_2mib(
        &mut self,
        va: VirtAddr,
        pa: PhysAddr,
        size: u64,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        const GRANULE: u64 = 0x20_0000;
        assert!(va.is_aligned(GRANULE), "va must be 2 MiB aligned");
        assert!(pa.is_aligned(GRANULE), "pa must be 2 MiB aligned");
        assert!(size % GRANULE == 0, "size must be a multiple of 2 MiB");

        let pages = size / GRANULE;
        for i in 0..pages {
            if let Err(e) =
                self.map_one_2mib(va + i * GRANULE, pa + i * GRANULE, flags)
            {
                for j in 0..i {
                    let _ = self.unmap_2mib(va + j * GRANULE);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn map_one_2mib(&mut self, va: VirtAddr, pa: PhysAddr, flags: MapFlags) -> Result<(), MapError> {
        let l4_index = (va.as_u64() >> 39) & 0x1FF;
        let l3_index = (va.as_u64() >> 30) & 0x1FF;
        let l2_index = (va.as_u64() >> 21) & 0x1FF;

        let l4_entry = &mut self.l4.0[l4_index as usize];
        if *l4_entry & ENTRY_PRESENT == 0 {
            let table = self.pool.alloc()?;
            *l4_entry = (table as u64 & ADDR_MASK) | ENTRY_PRESENT | ENTRY_WRITABLE | ENTRY_USER;
        }
        // SAFETY: the entry was just created or already points at a valid
        // pool table.
        let l3 = unsafe { &mut *Self::entry_to_table(*l4_entry) };

        let l3_entry = &mut l3.0[l3_index as usize];
        if *l3_entry & ENTRY_PRESENT == 0 {
            let table = self.pool.alloc()?;
            *l3_entry = (table as u64 & ADDR_MASK) | ENTRY_PRESENT | ENTRY_WRITABLE | ENTRY_USER;
        }
        // SAFETY: same as above.
        let l2 = unsafe { &mut *Self::entry_to_table(*l3_entry) };

        let mut entry = (pa.as_u64() & ADDR_MASK) | ENTRY_PRESENT | ENTRY_PAGE_SIZE;
        if flags.contains(MapFlags::WRITABLE) {
            entry |= ENTRY_WRITABLE;
        }
        if flags.contains(MapFlags::USER) {
            entry |= ENTRY_USER;
        }
        if flags.contains(MapFlags::WRITE_THROUGH) {
            entry |= ENTRY_WRITE_THROUGH;
        }
        if flags.contains(MapFlags::CACHE_DISABLE) {
            entry |= ENTRY_CACHE_DISABLE;
        }
        if !flags.contains(MapFlags::EXECUTABLE) {
            entry |= ENTRY_NX;
        }
        l2.0[l2_index as usize] = entry;
        Ok(())
    }

    /// Zeroes the leaf entry for `va` and flushes the TLB for that page.
    pub fn unmap_2mib(&mut self, va: VirtAddr) -> Result<(), MapError> {
        const GRANULE: u64 = 0x20_0000;
        assert!(va.is_aligned(GRANULE), "va must be 2 MiB aligned");

        let l4_index = (va.as_u64() >> 39) & 0x1FF;
        let l3_index = (va.as_u64() >> 30) & 0x1FF;
        let l2_index = (va.as_u64() >> 21) & 0x1FF;

        let l4_entry = self.l4.0[l4_index as usize];
        if l4_entry & ENTRY_PRESENT == 0 {
            return Err(MapError::NotMapped);
        }
        // SAFETY: present entry points at a valid pool table.
        let l3 = unsafe { &*Self::entry_to_table(l4_entry) };
        let l3_entry = l3.0[l3_index as usize];
        if l3_entry & ENTRY_PRESENT == 0 {
            return Err(MapError::NotMapped);
        }
        // SAFETY: same as above.
        let l2 = unsafe { &mut *Self::entry_to_table(l3_entry) };
        if l2.0[l2_index as usize] & ENTRY_PRESENT == 0 {
            return Err(MapError::NotMapped);
        }
        l2.0[l2_index as usize] = 0;
        arch_flush_page(va);
        Ok(())
    }

    /// Walks the active tables to translate `va`, honoring 2 MiB huge
    /// pages at L2. Returns `None` if any level is non-present.
    #[must_use]
    pub fn virtual_to_physical(&self, va: VirtAddr) -> Option<PhysAddr> {
        let l4_index = (va.as_u64() >> 39) & 0x1FF;
        let l3_index = (va.as_u64() >> 30) & 0x1FF;
        let l2_index = (va.as_u64() >> 21) & 0x1FF;

        let l4_entry = self.l4.0[l4_index as usize];
        if l4_entry & ENTRY_PRESENT == 0 {
            return None;
        }
        // SAFETY: present entry points at a valid pool table.
        let l3 = unsafe { &*Self::entry_to_table(l4_entry) };
        let l3_entry = l3.0[l3_index as usize];
        if l3_entry & ENTRY_PRESENT == 0 {
            return None;
        }
        if l3_entry & ENTRY_PAGE_SIZE != 0 {
            let base = l3_entry & 0x000F_FFFF_C000_0000;
            return Some(PhysAddr::new_truncate(base + (va.as_u64() & 0x3FFF_FFFF)));
        }
        // SAFETY: same as above.
        let l2 = unsafe { &*Self::entry_to_table(l3_entry) };
        let l2_entry = l2.0[l2_index as usize];
        if l2_entry & ENTRY_PRESENT == 0 {
            return None;
        }
        let base = l2_entry & 0x000F_FFFF_FFE0_0000;
        Some(PhysAddr::new_truncate(base + (va.as_u64() & 0x1F_FFFF)))
    }
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new()
    }
}

static TLB_FLUSH_FN: AtomicPtr<()> = AtomicPtr::new(nop_flush as fn(VirtAddr) as *mut ());

fn nop_flush(_virt: VirtAddr) {}

/// Registers the architecture-specific single-page TLB invalidation
/// function (`invlpg` on x86_64). Before this is called, flushes are
/// no-ops, which is safe during early boot before any stale entries
/// can exist.
pub fn register_tlb_flush(f: fn(VirtAddr)) {
    TLB_FLUSH_FN.store(f as *mut (), Ordering::Release);
}

fn arch_flush_page(virt: VirtAddr) {
    let ptr = TLB_FLUSH_FN.load(Ordering::Acquire);
    // SAFETY: the pointer was stored via `register_tlb_flush`, which
    // requires a valid `fn(VirtAddr)`, or is the initial `nop_flush`.
    let f: fn(VirtAddr) = unsafe { core::mem::transmute(ptr) };
    f(virt);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_translate_round_trips() {
        let mut mapper = Mapper::new();
        let va = VirtAddr::new(0x40_0000_0000);
        let pa = PhysAddr::new(0x1_0000_0000);
        mapper
            .map_2mib(va, pa, 0x20_0000, MapFlags::WRITABLE)
            .unwrap();
        assert_eq!(mapper.virtual_to_physical(va), Some(pa));
        assert_eq!(
            mapper.virtual_to_physical(va + 0x1234),
            Some(pa + 0x1234)
        );
    }

    #[test]
    fn unmap_clears_translation() {
        let mut mapper = Mapper::new();
        let va = VirtAddr::new(0x40_0000_0000);
        let pa = PhysAddr::new(0x1_0000_0000);
        mapper
            .map_2mib(va, pa, 0x20_0000, MapFlags::WRITABLE)
            .unwrap();
        mapper.unmap_2mib(va).unwrap();
        assert_eq!(mapper.virtual_to_physical(va), None);
    }

    #[test]
    fn unmap_unmapped_address_errors() {
        let mut mapper = Mapper::new();
        let va = VirtAddr::new(0x40_0000_0000);
        assert_eq!(mapper.unmap_2mib(va), Err(MapError::NotMapped));
    }

    #[test]
    fn multi_page_mapping_covers_full_range() {
        let mut mapper = Mapper::new();
        let va = VirtAddr::new(0x50_0000_0000);
        let pa = PhysAddr::new(0x2_0000_0000);
        mapper
            .map_2mib(va, pa, 0x60_0000, MapFlags::WRITABLE)
            .unwrap();
        assert_eq!(mapper.virtual_to_physical(va + 0x40_0000), Some(pa + 0x40_0000));
    }
}
