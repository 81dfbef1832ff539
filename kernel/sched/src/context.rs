//! Saved callee-clobbered register state for a cooperative context
//! switch, plus a registrable switch implementation.
//!
//! The actual `ret`-based assembly stub lives in `axon-kernel` (it
//! needs inline asm, which this crate avoids so its scheduling logic
//! stays host-testable). [`register_switch`] installs that stub;
//! until installed, switches are no-ops, which is exactly what host
//! tests want — they exercise the state machine, not real control
//! transfer.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Registers saved across a context switch: everything the System V
/// AMD64 ABI requires the callee to preserve, plus the flags register.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct CpuContext {
    /// Stack pointer at the point of switch.
    pub rsp: u64,
    /// Saved RBX.
    pub rbx: u64,
    /// Saved RBP.
    pub rbp: u64,
    /// Saved R12. A freshly created thread stashes its entry point
    /// here for the trampoline to pick up.
    pub r12: u64,
    /// Saved R13.
    pub r13: u64,
    /// Saved R14.
    pub r14: u64,
    /// Saved R15.
    pub r15: u64,
    /// Saved RFLAGS.
    pub rflags: u64,
}

/// RFLAGS value threads start with: interrupts enabled (IF, bit 9).
pub const INITIAL_RFLAGS: u64 = 0x202;

/// Performs one context switch: save the outgoing thread's registers
/// into `out`, then load the incoming thread's from `in_ctx`. Returns
/// once this thread is switched back to.
pub type SwitchFn = unsafe extern "C" fn(out: *mut CpuContext, in_ctx: *const CpuContext);

static SWITCH_FN: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Installs the architecture's real context-switch stub.
pub fn register_switch(f: SwitchFn) {
    SWITCH_FN.store(f as *mut (), Ordering::Release);
}

/// Performs a context switch via the registered stub, or does nothing
/// if none has been installed (the host-test default).
pub fn switch(out: &mut CpuContext, in_ctx: &CpuContext) {
    let ptr = SWITCH_FN.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    // SAFETY: `ptr` was stored by `register_switch` as a valid `SwitchFn`.
    let f: SwitchFn = unsafe { core::mem::transmute::<*mut (), SwitchFn>(ptr) };
    // SAFETY: `out`/`in_ctx` are valid for the duration of this call.
    unsafe { f(out, in_ctx) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    static CALLS: AtomicU32 = AtomicU32::new(0);

    unsafe extern "C" fn counting_switch(_out: *mut CpuContext, _in_ctx: *const CpuContext) {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn switch_is_noop_until_registered() {
        let mut a = CpuContext::default();
        let b = CpuContext::default();
        switch(&mut a, &b);
    }

    #[test]
    fn registered_switch_is_invoked() {
        register_switch(counting_switch);
        let before = CALLS.load(Ordering::SeqCst);
        let mut a = CpuContext::default();
        let b = CpuContext::default();
        switch(&mut a, &b);
        assert!(CALLS.load(Ordering::SeqCst) > before);
    }
}
