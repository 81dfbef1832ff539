//! Thread descriptors and the fixed-size name/FD storage they embed.

use crate::context::CpuContext;
use axon_core::VirtAddr;
use axon_fs::vfs::FileHandle;

/// Upper bound on a thread's inline name, matching the teacher's
/// convention of a small stack-allocated string for display-only data.
pub const MAX_NAME_LEN: usize = 32;
/// Upper bound on simultaneously open file descriptors per thread.
pub const MAX_FD: usize = 16;

/// A fixed-capacity, UTF-8-lossy thread name with no heap allocation.
#[derive(Clone, Copy)]
pub struct ThreadName {
    bytes: [u8; MAX_NAME_LEN],
    len: u8,
}

impl ThreadName {
    /// Builds a name, truncating at `MAX_NAME_LEN` bytes.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; MAX_NAME_LEN];
        let src = name.as_bytes();
        let n = src.len().min(MAX_NAME_LEN);
        bytes[..n].copy_from_slice(&src[..n]);
        Self { bytes, len: n as u8 }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("?")
    }
}

/// A cooperative-scheduling thread's run state.
///
/// A tagged union replacing the original integer state values so
/// `Sleeping`'s deadline can't be read while a thread is in any other
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Eligible to run, not currently running.
    Ready,
    /// Currently executing on the (single) CPU.
    Running,
    /// Parked until `deadline_tick` is reached.
    Sleeping {
        /// PIT tick count at which this thread becomes `Ready` again.
        deadline_tick: u64,
    },
    /// Parked indefinitely until explicitly unblocked.
    Blocked,
    /// Finished; its descriptor slot is retained but never scheduled.
    Terminated,
}

/// A ring-3 entry point registered for eventual `iret`.
#[derive(Debug, Clone, Copy)]
pub struct Ring3Entry {
    /// User-mode instruction pointer.
    pub rip: u64,
    /// User-mode stack pointer.
    pub rsp: u64,
}

/// One scheduler-managed thread.
pub struct Thread {
    /// Thread id, stable for the thread's lifetime and equal to its
    /// slot index in the scheduler's table.
    pub tid: usize,
    /// Current run state.
    pub state: ThreadState,
    /// Saved registers, valid while this thread is not `Running`.
    pub context: CpuContext,
    /// Base of this thread's kernel stack allocation (for diagnostics
    /// only; the scheduler never frees it).
    pub kernel_stack_base: VirtAddr,
    /// Display name.
    pub name: ThreadName,
    /// Effective user id.
    pub euid: u32,
    /// Effective group id.
    pub egid: u32,
    /// TTY this thread is attached to, if any.
    pub attached_tty: Option<usize>,
    /// Per-thread file descriptor table.
    pub fds: [Option<FileHandle>; MAX_FD],
    /// Ring-3 entry point, set only for user-mode threads.
    pub ring3: Option<Ring3Entry>,
}

impl Thread {
    pub(crate) fn idle() -> Self {
        Self {
            tid: 0,
            state: ThreadState::Running,
            context: CpuContext::default(),
            kernel_stack_base: VirtAddr::new(0),
            name: ThreadName::new("idle"),
            euid: 0,
            egid: 0,
            attached_tty: None,
            fds: core::array::from_fn(|_| None),
            ring3: None,
        }
    }

    /// Allocates a file descriptor for `handle`, returning its index.
    pub fn fd_alloc(&mut self, handle: FileHandle) -> Option<usize> {
        for (i, slot) in self.fds.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(handle);
                return Some(i);
            }
        }
        None
    }

    /// Closes the file descriptor at `fd`, dropping its handle.
    pub fn fd_close(&mut self, fd: usize) -> bool {
        match self.fds.get_mut(fd) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Duplicates `oldfd` into the lowest free slot.
    pub fn fd_dup(&mut self, oldfd: usize) -> Option<usize> {
        let handle = self.fds.get(oldfd)?.clone()?;
        self.fd_alloc(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_name_truncates_long_names() {
        let long = "x".repeat(64);
        let name = ThreadName::new(&long);
        assert_eq!(name.as_str().len(), MAX_NAME_LEN);
    }

    #[test]
    fn idle_thread_has_tid_zero_and_no_fds() {
        let idle = Thread::idle();
        assert_eq!(idle.tid, 0);
        assert!(idle.fds.iter().all(Option::is_none));
    }
}
