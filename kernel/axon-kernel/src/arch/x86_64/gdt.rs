//! Global Descriptor Table, Task State Segment, and the double-fault IST.

use core::mem::size_of;

use axon_core::cell::RacyCell;

mod bits {
    pub const SELECTOR_INDEX_SHIFT: u16 = 3;
    pub const RPL_MASK: u16 = 0b11;
    pub const DPL_SHIFT: u64 = 45;
    pub const DPL_MASK: u64 = 0b11;
}

/// Size of the dedicated double-fault stack.
const DOUBLE_FAULT_STACK_SIZE: usize = 16 * 1024;

/// IST index (1-based, as used by IDT entries) reserved for double faults.
pub const DOUBLE_FAULT_IST_INDEX: u8 = 1;

#[repr(align(16))]
struct AlignedStack([u8; DOUBLE_FAULT_STACK_SIZE]);

static DOUBLE_FAULT_STACK: AlignedStack = AlignedStack([0; DOUBLE_FAULT_STACK_SIZE]);

/// A GDT segment selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SegmentSelector(u16);

impl SegmentSelector {
    #[must_use]
    pub const fn new(index: u16, rpl: u16) -> Self {
        Self((index << bits::SELECTOR_INDEX_SHIFT) | (rpl & bits::RPL_MASK))
    }

    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// An entry to append to a [`GlobalDescriptorTable`].
#[derive(Debug, Clone, Copy)]
enum Descriptor {
    UserSegment(u64),
    SystemSegment(u64, u64),
}

impl Descriptor {
    const fn kernel_code_segment() -> Self {
        Self::UserSegment(0x00AF_9A00_0000_FFFF)
    }

    const fn kernel_data_segment() -> Self {
        Self::UserSegment(0x00CF_9200_0000_FFFF)
    }

    const fn user_data_segment() -> Self {
        Self::UserSegment(0x00CF_F200_0000_FFFF)
    }

    const fn user_code_segment() -> Self {
        Self::UserSegment(0x00AF_FA00_0000_FFFF)
    }

    const TSS_TYPE_AVAILABLE_64: u64 = 0x9;
    const TSS_PRESENT_BIT: u64 = 47;

    fn tss_segment(tss: &'static TaskStateSegment) -> Self {
        let tss_ptr = core::ptr::from_ref(tss) as u64;
        let limit = (size_of::<TaskStateSegment>() - 1) as u64;
        let low = (limit & 0xFFFF)
            | ((tss_ptr & 0xFFFFFF) << 16)
            | (Self::TSS_TYPE_AVAILABLE_64 << 40)
            | (1 << Self::TSS_PRESENT_BIT)
            | ((limit & 0xF_0000) << 32)
            | ((tss_ptr & 0xFF00_0000) << 32);
        let high = (tss_ptr >> 32) & 0xFFFF_FFFF;
        Self::SystemSegment(low, high)
    }

    fn privilege_level(&self) -> u16 {
        let low = match *self {
            Self::UserSegment(bits) | Self::SystemSegment(bits, _) => bits,
        };
        ((low >> bits::DPL_SHIFT) & bits::DPL_MASK) as u16
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct DescriptorTablePointer {
    pub limit: u16,
    pub base: u64,
}

const GDT_CAPACITY: usize = 8;

struct GlobalDescriptorTable {
    table: [u64; GDT_CAPACITY],
    len: usize,
}

impl GlobalDescriptorTable {
    const fn new() -> Self {
        Self {
            table: [0; GDT_CAPACITY],
            len: 1,
        }
    }

    fn append(&mut self, descriptor: Descriptor) -> SegmentSelector {
        let index = self.len;
        let rpl = descriptor.privilege_level();
        match descriptor {
            Descriptor::UserSegment(bits) => {
                assert!(index < GDT_CAPACITY, "GDT full");
                self.table[index] = bits;
                self.len += 1;
            }
            Descriptor::SystemSegment(low, high) => {
                assert!(index + 1 < GDT_CAPACITY, "GDT full");
                self.table[index] = low;
                self.table[index + 1] = high;
                self.len += 2;
            }
        }
        SegmentSelector::new(index as u16, rpl)
    }

    /// # Safety
    ///
    /// `self` must outlive the loaded GDT and never move.
    unsafe fn load(&'static self) {
        let ptr = DescriptorTablePointer {
            limit: (self.len * size_of::<u64>() - 1) as u16,
            base: core::ptr::from_ref(self) as u64,
        };
        // SAFETY: `ptr` describes a `'static` table built above.
        unsafe {
            core::arch::asm!("lgdt [{}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
        }
    }
}

/// Task State Segment: holds the ring-0 and IST stack pointers the CPU
/// switches to on privilege-level changes and IST-tagged interrupts.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct TaskStateSegment {
    _reserved_0: u32,
    pub privilege_stack_table: [u64; 3],
    _reserved_1: u64,
    pub interrupt_stack_table: [u64; 7],
    _reserved_2: u64,
    _reserved_3: u16,
    pub iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            _reserved_0: 0,
            privilege_stack_table: [0; 3],
            _reserved_1: 0,
            interrupt_stack_table: [0; 7],
            _reserved_2: 0,
            _reserved_3: 0,
            iomap_base: 0,
        }
    }
}

/// Selectors cached after [`init`] builds the GDT.
pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub user_data: SegmentSelector,
    pub tss: SegmentSelector,
}

static TSS: RacyCell<TaskStateSegment> = RacyCell::new(TaskStateSegment::new());
static GDT: RacyCell<GlobalDescriptorTable> = RacyCell::new(GlobalDescriptorTable::new());
static SELECTORS: RacyCell<Option<Selectors>> = RacyCell::new(None);

/// Builds the GDT and TSS, loads them, and reloads every segment register.
///
/// # Safety
///
/// Must run exactly once, early in boot, with interrupts disabled.
pub unsafe fn init() {
    // SAFETY: single-threaded boot, nothing else touches these statics yet.
    unsafe {
        let tss = &mut *TSS.get();
        let stack_top =
            core::ptr::addr_of!(DOUBLE_FAULT_STACK) as u64 + DOUBLE_FAULT_STACK_SIZE as u64;
        tss.interrupt_stack_table[(DOUBLE_FAULT_IST_INDEX - 1) as usize] = stack_top;

        let gdt = &mut *GDT.get();
        let kernel_code = gdt.append(Descriptor::kernel_code_segment());
        let kernel_data = gdt.append(Descriptor::kernel_data_segment());
        let user_data = gdt.append(Descriptor::user_data_segment());
        let user_code = gdt.append(Descriptor::user_code_segment());
        let tss_selector = gdt.append(Descriptor::tss_segment(&*TSS.get()));

        *SELECTORS.get() = Some(Selectors {
            kernel_code,
            kernel_data,
            user_code,
            user_data,
            tss: tss_selector,
        });

        let gdt_ref: &'static GlobalDescriptorTable = &*GDT.get();
        gdt_ref.load();
        load_segments(kernel_code, kernel_data, tss_selector);
    }
}

/// # Safety
///
/// `code`/`data`/`tss` must index valid, just-loaded GDT entries.
unsafe fn load_segments(code: SegmentSelector, data: SegmentSelector, tss: SegmentSelector) {
    // SAFETY: the GDT was just loaded by the caller with these selectors.
    unsafe {
        core::arch::asm!(
            "push {sel}",
            "lea {tmp}, [2f + rip]",
            "push {tmp}",
            "retfq",
            "2:",
            sel = in(reg) u64::from(code.as_u16()),
            tmp = lateout(reg) _,
        );
        core::arch::asm!("mov ds, {0:x}", "mov es, {0:x}", "mov ss, {0:x}", in(reg) data.as_u16());
        core::arch::asm!("mov fs, {0:x}", "mov gs, {0:x}", in(reg) 0u16);
        core::arch::asm!("ltr {0:x}", in(reg) tss.as_u16());
    }
}

/// Updates the ring-0 stack pointer the CPU loads on a ring-3 -> ring-0
/// transition.
///
/// # Safety
///
/// `rsp` must point to the top of a valid, mapped kernel stack. Must be
/// called with interrupts disabled.
pub unsafe fn set_tss_rsp0(rsp: u64) {
    // SAFETY: caller holds the precondition; the CPU only reads this field
    // during a ring transition, never concurrently with this write.
    unsafe {
        (*TSS.get()).privilege_stack_table[0] = rsp;
    }
}

/// Returns the selectors cached by [`init`].
///
/// # Panics
///
/// Panics if called before [`init`].
#[must_use]
pub fn selectors() -> &'static Selectors {
    // SAFETY: read-only access to state that `init` never mutates again.
    unsafe { (*SELECTORS.get()).as_ref().expect("gdt::init not called") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gdt_append_assigns_sequential_indices() {
        let mut gdt = GlobalDescriptorTable::new();
        let kc = gdt.append(Descriptor::kernel_code_segment());
        let kd = gdt.append(Descriptor::kernel_data_segment());
        assert_eq!(kc.as_u16() >> 3, 1);
        assert_eq!(kd.as_u16() >> 3, 2);
    }

    #[test]
    fn kernel_code_segment_is_dpl0_and_present() {
        let desc = Descriptor::kernel_code_segment();
        let Descriptor::UserSegment(bits) = desc else {
            unreachable!()
        };
        assert_ne!(bits & (1 << 47), 0, "present bit");
        assert_eq!((bits >> 45) & 0b11, 0, "dpl");
    }

    #[test]
    fn user_code_segment_is_dpl3() {
        let desc = Descriptor::user_code_segment();
        let Descriptor::UserSegment(bits) = desc else {
            unreachable!()
        };
        assert_eq!((bits >> 45) & 0b11, 3);
    }

    #[test]
    fn tss_size_is_104_bytes() {
        assert_eq!(size_of::<TaskStateSegment>(), 104);
    }
}
