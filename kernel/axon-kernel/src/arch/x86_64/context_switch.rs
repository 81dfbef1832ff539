//! The real `axon_sched::context::SwitchFn` implementation: saves the
//! outgoing thread's callee-saved registers on its stack and restores
//! the incoming thread's, then returns into whichever instruction
//! pointer is on top of the new stack.
//!
//! `axon_sched::scheduler::Scheduler::create` builds the `CpuContext`
//! for a freshly spawned thread itself (stashing its trampoline
//! address at `[rsp]` and its entry point in `r12`); this module only
//! needs to supply the switch primitive that honors that layout.

use axon_sched::context::{register_switch, CpuContext};

/// Registers [`do_switch`] as the scheduler's context-switch stub.
///
/// # Safety
///
/// Must run once, before the scheduler performs its first switch.
pub unsafe fn install() {
    register_switch(do_switch);
}

/// # Safety
///
/// `out` and `in_ctx` must each point to a valid `CpuContext` for the
/// respective thread, and `in_ctx.rsp` must point at a stack laid out
/// by `Scheduler::create` or left by a prior call to this function.
#[unsafe(naked)]
unsafe extern "C" fn do_switch(out: *mut CpuContext, in_ctx: *const CpuContext) {
    core::arch::naked_asm!(
        // rdi = out, rsi = in_ctx
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbx",
        "mov [rdi + 0x10], rbp",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "pushfq",
        "pop qword ptr [rdi + 0x38]",
        "mov rsp, [rsi + 0x00]",
        "mov rbx, [rsi + 0x08]",
        "mov rbp, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "push qword ptr [rsi + 0x38]",
        "popfq",
        "ret",
    );
}

/// The address `Scheduler::create` writes to a freshly built thread's
/// stack slot. `do_switch`'s final `ret` lands here the first time
/// that thread is ever scheduled, with `r12` already holding the
/// entry point `create` stashed there.
///
/// Entry points are typed `extern "C" fn() -> !` and never return, but
/// the naked body can't see that through an indirect call, so a
/// terminated thread still parks itself here instead of falling off
/// the end of the stack.
///
/// # Safety
///
/// Only reachable by landing on it via [`do_switch`]'s `ret`, never
/// called directly.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn thread_trampoline() {
    core::arch::naked_asm!(
        "call r12",
        "call {exit}",
        "2:",
        "jmp 2b",
        exit = sym thread_exit_trampoline,
    );
}

extern "C" fn thread_exit_trampoline() -> ! {
    crate::sched::exit_current_thread()
}
