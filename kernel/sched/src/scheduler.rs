//! The cooperative, round-robin scheduler.
//!
//! Thread 0 is the idle thread: always present, always `Running` or
//! `Ready`, the fallback when nothing else wants the CPU. `yield_now`
//! wakes any `Sleeping` thread whose deadline has passed, then scans
//! forward from `(current + 1) % len` for the next `Ready` thread.

use crate::context::{self, CpuContext, INITIAL_RFLAGS};
use crate::thread::{Ring3Entry, Thread, ThreadName, ThreadState};
use alloc::vec::Vec;
use axon_core::sync::SpinLock;
use axon_core::VirtAddr;

/// Upper bound on simultaneously registered threads, idle thread
/// included.
pub const MAX_THREADS: usize = 32;

/// Failure modes for thread creation/registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// The thread table is full.
    TableFull,
    /// `register_user` was given a clearly invalid entry point or stack.
    InvalidUserContext,
    /// No thread exists with the given tid.
    NoSuchThread,
}

struct Inner {
    threads: Vec<Thread>,
    current: usize,
    tick: u64,
}

/// The scheduler's thread table and run queue.
pub struct Scheduler {
    inner: SpinLock<Inner>,
}

impl Scheduler {
    /// Creates a scheduler with only the idle thread present.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                threads: alloc::vec![Thread::idle()],
                current: 0,
                tick: 0,
            }),
        }
    }

    /// Advances the scheduler's notion of elapsed time by one PIT
    /// tick; called from the timer interrupt handler.
    pub fn tick(&self) {
        self.inner.lock().tick += 1;
    }

    /// Returns the current tick count.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.inner.lock().tick
    }

    /// Returns the currently running thread's tid.
    #[must_use]
    pub fn current_tid(&self) -> usize {
        self.inner.lock().current
    }

    /// Creates a new kernel thread.
    ///
    /// `trampoline` is the address the first `ret` on this thread's
    /// stack will jump to; `entry` is stashed in R12 for the
    /// trampoline to read and call. `kernel_stack_top` must point one
    /// past the end of a `>= 16`-byte-aligned stack allocation owned
    /// by the caller — the scheduler never allocates or frees stacks.
    ///
    /// # Safety
    ///
    /// `kernel_stack_top` must be a valid, writable address with at
    /// least 16 bytes available below it.
    pub unsafe fn create(
        &self,
        entry: u64,
        trampoline: u64,
        name: &str,
        kernel_stack_top: VirtAddr,
    ) -> Result<usize, SchedError> {
        let mut inner = self.inner.lock();
        if inner.threads.len() >= MAX_THREADS {
            return Err(SchedError::TableFull);
        }
        let aligned = VirtAddr::new_truncate(kernel_stack_top.as_u64() & !0xF);
        let slot = aligned - 8;
        // SAFETY: caller guarantees `slot` is writable.
        unsafe {
            slot.as_mut_ptr::<u64>().write(trampoline);
        }

        let tid = inner.threads.len();
        inner.threads.push(Thread {
            tid,
            state: ThreadState::Ready,
            context: CpuContext {
                rsp: slot.as_u64(),
                r12: entry,
                rflags: INITIAL_RFLAGS,
                ..CpuContext::default()
            },
            kernel_stack_base: kernel_stack_top,
            name: ThreadName::new(name),
            euid: 0,
            egid: 0,
            attached_tty: None,
            fds: core::array::from_fn(|_| None),
            ring3: None,
        });
        Ok(tid)
    }

    /// Registers a ring-3 entry point as a new thread, inheriting
    /// credentials and FD table from the currently running thread.
    pub fn register_user(&self, rip: u64, rsp: u64, name: &str) -> Result<usize, SchedError> {
        if rip == 0 || rsp < 0x1000 {
            return Err(SchedError::InvalidUserContext);
        }
        let mut inner = self.inner.lock();
        if inner.threads.len() >= MAX_THREADS {
            return Err(SchedError::TableFull);
        }
        let (euid, egid, attached_tty) = {
            let current = &inner.threads[inner.current];
            (current.euid, current.egid, current.attached_tty)
        };
        let tid = inner.threads.len();
        inner.threads.push(Thread {
            tid,
            state: ThreadState::Ready,
            context: CpuContext::default(),
            kernel_stack_base: VirtAddr::new(0),
            name: ThreadName::new(name),
            euid,
            egid,
            attached_tty,
            fds: core::array::from_fn(|_| None),
            ring3: Some(Ring3Entry { rip, rsp }),
        });
        Ok(tid)
    }

    /// Runs `f` with mutable access to the thread at `tid`.
    pub fn with_thread<R>(&self, tid: usize, f: impl FnOnce(&mut Thread) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.threads.get_mut(tid).map(f)
    }

    /// Marks `tid` terminated.
    pub fn stop(&self, tid: usize) -> Result<(), SchedError> {
        let mut inner = self.inner.lock();
        let thread = inner.threads.get_mut(tid).ok_or(SchedError::NoSuchThread)?;
        thread.state = ThreadState::Terminated;
        Ok(())
    }

    /// Transitions `tid` from any state to `Blocked`.
    pub fn block(&self, tid: usize) -> Result<(), SchedError> {
        let mut inner = self.inner.lock();
        let thread = inner.threads.get_mut(tid).ok_or(SchedError::NoSuchThread)?;
        thread.state = ThreadState::Blocked;
        Ok(())
    }

    /// Transitions `tid` from `Blocked` to `Ready`.
    pub fn unblock(&self, tid: usize) -> Result<(), SchedError> {
        let mut inner = self.inner.lock();
        let thread = inner.threads.get_mut(tid).ok_or(SchedError::NoSuchThread)?;
        if thread.state == ThreadState::Blocked {
            thread.state = ThreadState::Ready;
        }
        Ok(())
    }

    /// Puts the current thread to sleep until `current_tick() + ms`
    /// milliseconds have elapsed (1 ms tick granularity), then yields.
    pub fn sleep(&self, ms: u64) {
        if ms == 0 {
            return;
        }
        let current = {
            let mut inner = self.inner.lock();
            let deadline = inner.tick + ms;
            let current = inner.current;
            inner.threads[current].state = ThreadState::Sleeping { deadline_tick: deadline };
            current
        };
        let _ = current;
        self.yield_now();
    }

    /// Runs the scheduling decision: wake due sleepers, pick the next
    /// `Ready` thread round-robin from `current + 1`, demote the
    /// outgoing thread, and perform the context switch.
    pub fn yield_now(&self) {
        let (switch_needed, mut out_ctx, in_ctx) = {
            let mut inner = self.inner.lock();
            let tick = inner.tick;
            for thread in &mut inner.threads {
                if let ThreadState::Sleeping { deadline_tick } = thread.state {
                    if tick >= deadline_tick {
                        thread.state = ThreadState::Ready;
                    }
                }
            }

            let len = inner.threads.len();
            let start = (inner.current + 1) % len;
            let mut next = None;
            for offset in 0..len {
                let idx = (start + offset) % len;
                if inner.threads[idx].state == ThreadState::Ready {
                    next = Some(idx);
                    break;
                }
            }

            match next {
                Some(idx) if idx != inner.current => {
                    let prev = inner.current;
                    inner.current = idx;
                    inner.threads[idx].state = ThreadState::Running;
                    let prev_state = inner.threads[prev].state;
                    if !matches!(
                        prev_state,
                        ThreadState::Sleeping { .. } | ThreadState::Terminated | ThreadState::Blocked
                    ) {
                        inner.threads[prev].state = ThreadState::Ready;
                    }
                    (true, inner.threads[prev].context, inner.threads[idx].context)
                }
                _ => (false, CpuContext::default(), CpuContext::default()),
            }
        };

        if switch_needed {
            context::switch(&mut out_ctx, &in_ctx);
            let mut inner = self.inner.lock();
            let prev = inner.current;
            inner.threads[prev].context = out_ctx;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_stack() -> (Vec<u64>, VirtAddr) {
        let stack = alloc::vec![0u64; 1024];
        let top = VirtAddr::new(stack.as_ptr() as u64 + stack.len() as u64 * 8);
        (stack, top)
    }

    #[test]
    fn round_robin_cycles_through_ready_threads() {
        let sched = Scheduler::new();
        let (_s1, top1) = new_stack();
        let (_s2, top2) = new_stack();
        let t1 = unsafe { sched.create(0x1000, 0x2000, "a", top1).unwrap() };
        let t2 = unsafe { sched.create(0x1000, 0x2000, "b", top2).unwrap() };

        sched.yield_now();
        assert_eq!(sched.current_tid(), t1);
        sched.yield_now();
        assert_eq!(sched.current_tid(), t2);
    }

    #[test]
    fn sleeping_thread_is_skipped_until_deadline() {
        let sched = Scheduler::new();
        let (_s1, top1) = new_stack();
        let t1 = unsafe { sched.create(0x1000, 0x2000, "a", top1).unwrap() };
        sched.yield_now();
        assert_eq!(sched.current_tid(), t1);

        sched.sleep(10);
        // Only the idle thread is Ready; sleeping thread gets skipped.
        assert_eq!(sched.current_tid(), 0);

        for _ in 0..10 {
            sched.tick();
        }
        sched.yield_now();
        assert_eq!(sched.current_tid(), t1);
    }

    #[test]
    fn blocked_thread_is_not_scheduled_until_unblocked() {
        let sched = Scheduler::new();
        let (_s1, top1) = new_stack();
        let t1 = unsafe { sched.create(0x1000, 0x2000, "a", top1).unwrap() };
        sched.block(t1).unwrap();
        sched.yield_now();
        assert_eq!(sched.current_tid(), 0);

        sched.unblock(t1).unwrap();
        sched.yield_now();
        assert_eq!(sched.current_tid(), t1);
    }

    #[test]
    fn stop_prevents_further_scheduling() {
        let sched = Scheduler::new();
        let (_s1, top1) = new_stack();
        let t1 = unsafe { sched.create(0x1000, 0x2000, "a", top1).unwrap() };
        sched.stop(t1).unwrap();
        sched.yield_now();
        assert_eq!(sched.current_tid(), 0);
    }

    #[test]
    fn register_user_rejects_null_entry() {
        let sched = Scheduler::new();
        assert_eq!(
            sched.register_user(0, 0x2000, "u"),
            Err(SchedError::InvalidUserContext)
        );
        assert_eq!(
            sched.register_user(0x1000, 0x100, "u"),
            Err(SchedError::InvalidUserContext)
        );
    }

    #[test]
    fn register_user_inherits_credentials() {
        let sched = Scheduler::new();
        sched.with_thread(0, |t| {
            t.euid = 7;
            t.egid = 7;
        });
        let tid = sched.register_user(0x4000, 0x5000, "u").unwrap();
        sched.with_thread(tid, |t| {
            assert_eq!(t.euid, 7);
            assert_eq!(t.egid, 7);
        });
    }
}
