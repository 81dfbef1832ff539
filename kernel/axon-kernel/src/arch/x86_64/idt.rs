//! Interrupt Descriptor Table: CPU exception handlers and IRQ dispatch.

use core::mem::size_of;
use core::ops::{Index, IndexMut};

use axon_core::cell::RacyCell;
use axon_core::kerr;

use super::gdt::{self, DescriptorTablePointer, DOUBLE_FAULT_IST_INDEX};
use super::pic;

pub type HandlerFunc = extern "x86-interrupt" fn(InterruptStackFrame);
pub type HandlerFuncWithErrCode = extern "x86-interrupt" fn(InterruptStackFrame, u64);
pub type DivergingHandlerFuncWithErrCode = extern "x86-interrupt" fn(InterruptStackFrame, u64) -> !;

/// The frame the CPU pushes before invoking a handler.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptStackFrame {
    pub instruction_pointer: u64,
    pub code_segment: u64,
    pub cpu_flags: u64,
    pub stack_pointer: u64,
    pub stack_segment: u64,
}

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
struct EntryOptions(u16);

impl EntryOptions {
    const fn minimal() -> Self {
        Self(0x0E00)
    }

    fn present(mut self) -> Self {
        self.0 |= 1 << 15;
        self
    }

    fn with_ist(mut self, index: u8) -> Self {
        self.0 = (self.0 & !0x07) | u16::from(index & 0x07);
        self
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    options: EntryOptions,
    offset_mid: u16,
    offset_high: u32,
    _reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            options: EntryOptions::minimal(),
            offset_mid: 0,
            offset_high: 0,
            _reserved: 0,
        }
    }

    fn set_addr(&mut self, addr: u64, ist: u8) {
        self.offset_low = addr as u16;
        self.offset_mid = (addr >> 16) as u16;
        self.offset_high = (addr >> 32) as u32;
        self.selector = gdt::selectors().kernel_code.as_u16();
        self.options = EntryOptions::minimal().present().with_ist(ist);
    }

    pub fn set_handler(&mut self, handler: HandlerFunc) {
        self.set_addr(handler as u64, 0);
    }

    fn set_handler_err(&mut self, handler: HandlerFuncWithErrCode) {
        self.set_addr(handler as u64, 0);
    }

    fn set_diverging_err(&mut self, handler: DivergingHandlerFuncWithErrCode, ist: u8) {
        self.set_addr(handler as u64, ist);
    }
}

const NUM_IRQ_VECTORS: usize = 224;

#[repr(C, align(16))]
pub struct InterruptDescriptorTable {
    pub divide_error: IdtEntry,
    pub debug: IdtEntry,
    pub nmi: IdtEntry,
    pub breakpoint: IdtEntry,
    pub overflow: IdtEntry,
    pub bound_range: IdtEntry,
    pub invalid_opcode: IdtEntry,
    pub device_not_available: IdtEntry,
    pub double_fault: IdtEntry,
    _reserved_9: IdtEntry,
    pub invalid_tss: IdtEntry,
    pub segment_not_present: IdtEntry,
    pub stack_segment_fault: IdtEntry,
    pub general_protection: IdtEntry,
    pub page_fault: IdtEntry,
    _reserved_15: IdtEntry,
    pub x87_floating_point: IdtEntry,
    pub alignment_check: IdtEntry,
    pub machine_check: IdtEntry,
    pub simd_floating_point: IdtEntry,
    _reserved_20_31: [IdtEntry; 12],
    pub interrupts: [IdtEntry; NUM_IRQ_VECTORS],
}

impl InterruptDescriptorTable {
    const fn new() -> Self {
        Self {
            divide_error: IdtEntry::missing(),
            debug: IdtEntry::missing(),
            nmi: IdtEntry::missing(),
            breakpoint: IdtEntry::missing(),
            overflow: IdtEntry::missing(),
            bound_range: IdtEntry::missing(),
            invalid_opcode: IdtEntry::missing(),
            device_not_available: IdtEntry::missing(),
            double_fault: IdtEntry::missing(),
            _reserved_9: IdtEntry::missing(),
            invalid_tss: IdtEntry::missing(),
            segment_not_present: IdtEntry::missing(),
            stack_segment_fault: IdtEntry::missing(),
            general_protection: IdtEntry::missing(),
            page_fault: IdtEntry::missing(),
            _reserved_15: IdtEntry::missing(),
            x87_floating_point: IdtEntry::missing(),
            alignment_check: IdtEntry::missing(),
            machine_check: IdtEntry::missing(),
            simd_floating_point: IdtEntry::missing(),
            _reserved_20_31: [IdtEntry::missing(); 12],
            interrupts: [IdtEntry::missing(); NUM_IRQ_VECTORS],
        }
    }

    /// # Safety
    ///
    /// `self` must be `'static` and outlive the loaded IDT.
    unsafe fn load(&'static self) {
        let ptr = DescriptorTablePointer {
            limit: (size_of::<Self>() - 1) as u16,
            base: core::ptr::from_ref(self) as u64,
        };
        // SAFETY: `ptr` describes this `'static` table.
        unsafe {
            core::arch::asm!("lidt [{}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
        }
    }
}

/// Index interrupt vectors 32..=255 directly, e.g. `idt[33]`.
impl Index<u8> for InterruptDescriptorTable {
    type Output = IdtEntry;
    fn index(&self, vector: u8) -> &IdtEntry {
        assert!(vector >= 32, "exceptions use named fields");
        &self.interrupts[(vector - 32) as usize]
    }
}

impl IndexMut<u8> for InterruptDescriptorTable {
    fn index_mut(&mut self, vector: u8) -> &mut IdtEntry {
        assert!(vector >= 32, "exceptions use named fields");
        &mut self.interrupts[(vector - 32) as usize]
    }
}

static IDT: RacyCell<InterruptDescriptorTable> = RacyCell::new(InterruptDescriptorTable::new());

/// IRQ vector offsets after the PIC remap in [`pic::remap`].
pub const IRQ_TIMER: u8 = 32;
pub const IRQ_KEYBOARD: u8 = 33;
pub const IRQ_ATA_PRIMARY: u8 = 32 + 14;

fn fault(name: &str, frame: &InterruptStackFrame) -> ! {
    kerr!(
        "unhandled fault {name} at rip={:#x} rsp={:#x}",
        frame.instruction_pointer,
        frame.stack_pointer
    );
    loop {
        super::halt();
    }
}

extern "x86-interrupt" fn divide_error(frame: InterruptStackFrame) {
    fault("divide error", &frame);
}

extern "x86-interrupt" fn debug_exception(_frame: InterruptStackFrame) {}

extern "x86-interrupt" fn nmi(frame: InterruptStackFrame) {
    fault("nmi", &frame);
}

extern "x86-interrupt" fn breakpoint(frame: InterruptStackFrame) {
    kerr!("breakpoint at rip={:#x}", frame.instruction_pointer);
}

extern "x86-interrupt" fn invalid_opcode(frame: InterruptStackFrame) {
    fault("invalid opcode", &frame);
}

extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, _err: u64) -> ! {
    fault("double fault", &frame);
}

extern "x86-interrupt" fn invalid_tss(frame: InterruptStackFrame, err: u64) {
    kerr!("invalid tss, selector={err:#x}");
    fault("invalid tss", &frame);
}

extern "x86-interrupt" fn segment_not_present(frame: InterruptStackFrame, err: u64) {
    kerr!("segment not present, selector={err:#x}");
    fault("segment not present", &frame);
}

extern "x86-interrupt" fn stack_segment_fault(frame: InterruptStackFrame, err: u64) {
    kerr!("stack segment fault, selector={err:#x}");
    fault("stack segment fault", &frame);
}

extern "x86-interrupt" fn general_protection(frame: InterruptStackFrame, err: u64) {
    kerr!("general protection fault, selector={err:#x}");
    fault("general protection", &frame);
}

extern "x86-interrupt" fn page_fault(frame: InterruptStackFrame, err: u64) {
    let cr2: u64;
    // SAFETY: reading cr2 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    kerr!("page fault at {cr2:#x}, error={err:#x}");
    fault("page fault", &frame);
}

extern "x86-interrupt" fn simd_floating_point(frame: InterruptStackFrame) {
    fault("simd floating point", &frame);
}

extern "x86-interrupt" fn timer_interrupt(_frame: InterruptStackFrame) {
    crate::time::on_tick();
    crate::sched::tick();
    pic::send_eoi(IRQ_TIMER - 32);
}

extern "x86-interrupt" fn keyboard_interrupt(_frame: InterruptStackFrame) {
    crate::drivers::keyboard::handle_interrupt();
    pic::send_eoi(IRQ_KEYBOARD - 32);
}

extern "x86-interrupt" fn ata_primary_interrupt(_frame: InterruptStackFrame) {
    pic::send_eoi(IRQ_ATA_PRIMARY - 32);
}

extern "x86-interrupt" fn spurious_interrupt(_frame: InterruptStackFrame) {}

/// Builds and loads the IDT.
///
/// # Safety
///
/// Must run after [`gdt::init`], with interrupts disabled.
pub unsafe fn init() {
    // SAFETY: single-threaded boot, runs once before `load`.
    unsafe {
        let idt = &mut *IDT.get();
        idt.divide_error.set_handler(divide_error);
        idt.debug.set_handler(debug_exception);
        idt.nmi.set_handler(nmi);
        idt.breakpoint.set_handler(breakpoint);
        idt.invalid_opcode.set_handler(invalid_opcode);
        idt.double_fault
            .set_diverging_err(double_fault, DOUBLE_FAULT_IST_INDEX);
        idt.invalid_tss.set_handler_err(invalid_tss);
        idt.segment_not_present.set_handler_err(segment_not_present);
        idt.stack_segment_fault.set_handler_err(stack_segment_fault);
        idt.general_protection.set_handler_err(general_protection);
        idt.page_fault.set_handler_err(page_fault);
        idt.simd_floating_point.set_handler(simd_floating_point);

        for vector in 32..=255u16 {
            idt[vector as u8].set_handler(spurious_interrupt);
        }
        idt[IRQ_TIMER].set_handler(timer_interrupt);
        idt[IRQ_KEYBOARD].set_handler(keyboard_interrupt);
        idt[IRQ_ATA_PRIMARY].set_handler(ata_primary_interrupt);

        let idt_ref: &'static InterruptDescriptorTable = &*IDT.get();
        idt_ref.load();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idt_table_size_matches_256_vectors() {
        assert_eq!(8 + NUM_IRQ_VECTORS, 232);
        assert_eq!(core::mem::size_of::<IdtEntry>(), 16);
    }

    #[test]
    fn entry_options_set_present_and_ist() {
        let opts = EntryOptions::minimal().present().with_ist(1);
        assert_ne!(opts.0 & (1 << 15), 0);
        assert_eq!(opts.0 & 0x07, 1);
    }
}
