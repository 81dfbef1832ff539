//! A test-and-test-and-set spin lock.
//!
//! Does not disable interrupts; an interrupt handler spinning on a
//! lock held by the interrupted context deadlocks forever. Use
//! [`super::IrqSpinLock`] for anything an interrupt handler can touch.

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A mutual-exclusion lock that spins instead of blocking.
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: `SpinLock` only grants access to `T` through a guard that
// holds exclusive access for its lifetime.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
// SAFETY: same reasoning as `Send` — the lock itself serializes access.
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked `SpinLock` wrapping `data`.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Spins until the lock is acquired, then returns a guard.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Returns a mutable reference to the data, bypassing the lock.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other reference to the data is live.
    #[inline]
    pub unsafe fn force_get(&self) -> &mut T {
        // SAFETY: forwarded to the caller.
        unsafe { &mut *self.data.get() }
    }
}

/// An RAII guard releasing a [`SpinLock`] when dropped.
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard implies exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock() {
        let lock = SpinLock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_succeeds_when_free() {
        let lock = SpinLock::new(());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn try_lock_fails_when_held() {
        let lock = SpinLock::new(());
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }

    #[test]
    fn mutate_through_guard() {
        let lock = SpinLock::new(vec![1, 2, 3]);
        lock.lock().push(4);
        assert_eq!(*lock.lock(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn lock_reentrant_after_drop() {
        let lock = SpinLock::new(0u32);
        drop(lock.lock());
        drop(lock.lock());
        assert_eq!(*lock.lock(), 0);
    }

    #[test]
    fn deref_and_deref_mut() {
        let lock = SpinLock::new(10u32);
        let mut guard = lock.lock();
        assert_eq!(*guard, 10);
        *guard = 20;
        drop(guard);
        assert_eq!(*lock.lock(), 20);
    }
}
