//! x86_64-specific platform support: port I/O, descriptor tables, the
//! 8259 PIC, and context switching.

pub mod context_switch;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod port;

/// Disables maskable interrupts.
#[inline]
pub fn disable_interrupts() {
    // SAFETY: `cli` has no preconditions.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

/// Enables maskable interrupts.
///
/// # Safety
///
/// The IDT and PIC must already be initialized; enabling interrupts
/// before then lets an unhandled vector reach the CPU.
#[inline]
pub unsafe fn enable_interrupts() {
    // SAFETY: forwarded to the caller.
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// Halts the CPU until the next interrupt.
#[inline]
pub fn halt() {
    // SAFETY: `hlt` has no preconditions.
    unsafe {
        core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

/// Atomically enables interrupts and halts, closing the race where an
/// interrupt fires between a separate `sti` and `hlt`.
///
/// # Safety
///
/// Same precondition as [`enable_interrupts`].
#[inline]
pub unsafe fn enable_and_halt() {
    // SAFETY: forwarded to the caller.
    unsafe {
        core::arch::asm!("sti; hlt", options(nomem, nostack));
    }
}

/// Runs `f` with interrupts disabled, restoring the prior flag state on
/// return (including on panic-driven unwinding, since this is a plain
/// scope guard over an architectural flag, not a lock).
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let were_enabled = interrupts_enabled();
    disable_interrupts();
    let result = f();
    if were_enabled {
        // SAFETY: interrupts were enabled before we disabled them, so
        // the IDT/PIC were already initialized.
        unsafe {
            enable_interrupts();
        }
    }
    result
}

/// Reads the interrupt flag from `rflags`.
#[must_use]
pub fn interrupts_enabled() -> bool {
    let flags: u64;
    // SAFETY: `pushfq`/`popfq` have no preconditions.
    unsafe {
        core::arch::asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags & (1 << 9) != 0
}

/// Triggers a breakpoint exception, for debugging under a hosted
/// debugger/emulator.
#[inline]
pub fn breakpoint() {
    // SAFETY: `int3` has no preconditions; the IDT's breakpoint handler
    // (or the debugger) takes it from there.
    unsafe {
        core::arch::asm!("int3", options(nomem, nostack));
    }
}

/// Sends the end-of-interrupt signal for legacy PIC IRQ `irq`.
pub fn send_eoi(irq: u8) {
    pic::send_eoi(irq);
}
