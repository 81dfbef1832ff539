//! A spin lock that also disables interrupts while held.
//!
//! Anything shared between an interrupt handler and ordinary kernel
//! code must use this instead of [`super::SpinLock`]: a plain spin
//! lock held by code that then takes an interrupt on the same CPU
//! deadlocks if the handler tries to take the same lock.

use super::spinlock::{SpinLock, SpinLockGuard};
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// A [`SpinLock`] variant that saves and restores the interrupt flag
/// around the critical section.
pub struct IrqSpinLock<T: ?Sized> {
    inner: SpinLock<T>,
}

impl<T> IrqSpinLock<T> {
    /// Creates a new unlocked `IrqSpinLock` wrapping `data`.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            inner: SpinLock::new(data),
        }
    }
}

impl<T: ?Sized> IrqSpinLock<T> {
    /// Disables interrupts, spins until the lock is acquired, and
    /// returns a guard that restores the prior interrupt state on drop.
    #[inline]
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let flags = save_flags_and_cli();
        IrqSpinLockGuard {
            guard: self.inner.lock(),
            flags,
            _not_send: PhantomData,
        }
    }

    /// Non-spinning variant of [`IrqSpinLock::lock`].
    #[inline]
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let flags = save_flags_and_cli();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqSpinLockGuard {
                guard,
                flags,
                _not_send: PhantomData,
            }),
            None => {
                restore_flags(flags);
                None
            }
        }
    }
}

/// An RAII guard releasing an [`IrqSpinLock`] and restoring the saved
/// interrupt flag when dropped.
pub struct IrqSpinLockGuard<'a, T: ?Sized> {
    guard: SpinLockGuard<'a, T>,
    flags: u64,
    // Interrupt state is per-CPU; a guard created on one CPU must not
    // be dropped, and therefore restore flags, on another.
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: ?Sized> DerefMut for IrqSpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: ?Sized> Drop for IrqSpinLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // drop the inner guard (releasing the lock) before restoring flags
        let flags = self.flags;
        restore_flags(flags);
    }
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn save_flags_and_cli() -> u64 {
    let flags: u64;
    // SAFETY: pushfq/pop/cli is a well-defined sequence with no memory effects.
    unsafe {
        core::arch::asm!(
            "pushfq",
            "pop {}",
            "cli",
            out(reg) flags,
            options(nomem, preserves_flags),
        );
    }
    flags
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn restore_flags(flags: u64) {
    if flags & (1 << 9) != 0 {
        // SAFETY: re-enables interrupts only if they were previously enabled.
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(all(target_os = "none", target_arch = "aarch64"))]
fn save_flags_and_cli() -> u64 {
    let daif: u64;
    // SAFETY: reads and masks the DAIF interrupt mask bits.
    unsafe {
        core::arch::asm!(
            "mrs {0}, DAIF",
            "msr DAIFSet, #0xf",
            out(reg) daif,
            options(nomem, nostack),
        );
    }
    daif
}

#[cfg(all(target_os = "none", target_arch = "aarch64"))]
fn restore_flags(flags: u64) {
    // SAFETY: restores a previously-saved DAIF value.
    unsafe {
        core::arch::asm!("msr DAIF, {0}", in(reg) flags, options(nomem, nostack));
    }
}

#[cfg(not(target_os = "none"))]
fn save_flags_and_cli() -> u64 {
    0
}

#[cfg(not(target_os = "none"))]
fn restore_flags(_flags: u64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock() {
        let lock = IrqSpinLock::new(0u32);
        *lock.lock() += 1;
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_when_held() {
        let lock = IrqSpinLock::new(());
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }

    #[test]
    fn nested_scopes_restore_independently() {
        let lock = IrqSpinLock::new(5u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        {
            let guard = lock.lock();
            assert_eq!(*guard, 6);
        }
    }
}
