//! Scheduler/I/O-worker glue.
//!
//! `axon_sched` is pure state-machine logic with no notion of a single
//! running kernel; this module owns the one global [`Scheduler`] and
//! [`IoQueue`] axon-kernel creates at boot, the kernel-thread spawn
//! path (stack allocation plus the trampoline
//! `arch::x86_64::context_switch::thread_trampoline` jumps through),
//! and the FD-bridge entry points: the only way anything outside the
//! scheduler reaches a thread's open-file table.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;

use axon_core::sync::SpinLock;
use axon_core::VirtAddr;
use axon_driver_api::block::DiskOps;
use axon_fs::vfs::FileHandle;
use axon_fs::{Credentials, FsError, FsResult};
use axon_sched::io::{IoKind, IoQueue};
use axon_sched::thread::MAX_FD;
use axon_sched::{SchedError, Scheduler};

use crate::arch::x86_64::context_switch::thread_trampoline;
use crate::config::KERNEL_STACK_SIZE;

static SCHEDULER: SpinLock<Option<Scheduler>> = SpinLock::new(None);
static IO_QUEUE: SpinLock<Option<IoQueue>> = SpinLock::new(None);
static DISK0: SpinLock<Option<Arc<dyn DiskOps>>> = SpinLock::new(None);

/// Installs the global scheduler and I/O queue.
///
/// # Panics
///
/// Panics if called more than once.
pub fn init() {
    let mut sched = SCHEDULER.lock();
    assert!(sched.is_none(), "scheduler already initialized");
    *sched = Some(Scheduler::new());
    let mut io = IO_QUEUE.lock();
    assert!(io.is_none(), "io queue already initialized");
    *io = Some(IoQueue::new());
}

/// Runs `f` against the global scheduler.
///
/// # Panics
///
/// Panics if [`init`] has not run yet.
pub fn with_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    let slot = SCHEDULER.lock();
    f(slot.as_ref().expect("scheduler not initialized"))
}

/// Runs `f` against the global I/O request queue.
///
/// # Panics
///
/// Panics if [`init`] has not run yet.
pub fn with_io_queue<R>(f: impl FnOnce(&IoQueue) -> R) -> R {
    let slot = IO_QUEUE.lock();
    f(slot.as_ref().expect("io queue not initialized"))
}

/// Advances the scheduler's tick count by one. Called from the PIT ISR.
pub fn tick() {
    with_scheduler(Scheduler::tick);
}

/// Registers the disk the I/O worker services requests against
/// (device id `0`).
pub fn register_disk0(disk: Arc<dyn DiskOps>) {
    *DISK0.lock() = Some(disk);
}

/// Fixed-size, leaked kernel stack. Never freed: AxonOS has no
/// thread-teardown/stack-reclamation path yet, matching
/// `Scheduler::create`'s own "never allocates or frees stacks"
/// contract for the caller's side.
#[repr(align(16))]
struct KernelStack([u8; KERNEL_STACK_SIZE]);

/// Spawns `entry` as a new kernel thread on a freshly leaked stack.
pub fn spawn_kernel_thread(entry: extern "C" fn() -> !, name: &str) -> Result<usize, SchedError> {
    let stack = Box::leak(Box::new(KernelStack([0; KERNEL_STACK_SIZE])));
    let stack_top = VirtAddr::new(stack.0.as_ptr() as u64 + KERNEL_STACK_SIZE as u64);
    // SAFETY: `stack` was just leaked, is 16-byte aligned, and outlives
    // the thread `Scheduler::create` builds a context for.
    unsafe { with_scheduler(|s| s.create(entry as u64, thread_trampoline as u64, name, stack_top)) }
}

/// Terminates the calling thread and never returns.
///
/// Called by [`thread_trampoline`] once a kernel thread's entry
/// function returns.
pub fn exit_current_thread() -> ! {
    with_scheduler(|s| {
        let tid = s.current_tid();
        let _ = s.stop(tid);
    });
    loop {
        with_scheduler(Scheduler::yield_now);
    }
}

/// Services one pending I/O request against [`DISK0`] with a
/// single-sector scratch buffer and posts its completion.
///
/// Requests carry no caller buffer of their own yet (no syscall layer
/// submits them); this drives the hardware and records success/failure
/// so a future syscall layer only has to add the data-copy step.
fn service_one_request() -> bool {
    let Some(request) = with_io_queue(IoQueue::next_pending) else {
        return false;
    };
    let disk = DISK0.lock().clone();
    let success = match (disk, request.kind) {
        (Some(disk), IoKind::Read { offset, .. }) => {
            let mut scratch = [0u8; 512];
            disk.read_sectors(offset / disk.sector_size() as u64, &mut scratch)
                .is_ok()
        }
        (Some(disk), IoKind::Write { offset, .. }) => {
            let scratch = [0u8; 512];
            disk.write_sectors(offset / disk.sector_size() as u64, &scratch)
                .is_ok()
        }
        (None, _) => false,
    };
    with_io_queue(|q| q.complete(request, success));
    true
}

/// The I/O worker thread body: drains [`IoQueue`], yielding when it's
/// empty so other threads get the CPU.
pub extern "C" fn io_worker_entry() -> ! {
    loop {
        if !service_one_request() {
            with_scheduler(Scheduler::yield_now);
        }
    }
}

fn current_fd_handle(fd: usize) -> FsResult<FileHandle> {
    if fd >= MAX_FD {
        return Err(FsError::InvalidArgument);
    }
    with_scheduler(|s| {
        let tid = s.current_tid();
        s.with_thread(tid, |t| t.fds[fd].clone())
    })
    .flatten()
    .ok_or(FsError::InvalidArgument)
}

/// Opens `path` and installs it in the calling thread's lowest free FD
/// slot, returning that slot.
pub fn fd_open(path: &str, creds: Credentials) -> FsResult<usize> {
    let handle = axon_fs::vfs::with_vfs(|vfs| vfs.open(path, creds))?;
    with_scheduler(|s| {
        let tid = s.current_tid();
        s.with_thread(tid, |t| t.fd_alloc(handle))
    })
    .flatten()
    .ok_or(FsError::ResourceExhausted)
}

/// Reads from the calling thread's `fd`.
pub fn fd_read(fd: usize, buf: &mut [u8]) -> FsResult<usize> {
    current_fd_handle(fd)?.read(buf)
}

/// Writes to the calling thread's `fd`.
pub fn fd_write(fd: usize, buf: &[u8], creds: Credentials) -> FsResult<usize> {
    current_fd_handle(fd)?.write(buf, creds)
}

/// Closes the calling thread's `fd`.
pub fn fd_close(fd: usize) -> FsResult<()> {
    if fd >= MAX_FD {
        return Err(FsError::InvalidArgument);
    }
    let closed = with_scheduler(|s| {
        let tid = s.current_tid();
        s.with_thread(tid, |t| t.fd_close(fd))
    })
    .unwrap_or(false);
    if closed {
        Ok(())
    } else {
        Err(FsError::InvalidArgument)
    }
}

// Both tests below touch the module-level `SCHEDULER`/`IO_QUEUE`/`DISK0`
// singletons (and one touches `axon_fs::vfs`'s own global), which
// every other driver in this crate keeps local per-test instead. A
// single combined test keeps the two `init()` calls from racing
// against each other under `cargo test`'s default parallel runner.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_glue_bridges_fds_and_drains_io_requests() {
        init();
        axon_fs::vfs::init();
        axon_fs::vfs::with_vfs(|vfs| {
            vfs.register_ramfs("rootfs", Arc::new(axon_fs::ramfs::Ramfs::new()))
                .unwrap();
            vfs.mount("/", "rootfs").unwrap();
            vfs.create("/f", Credentials::ROOT).unwrap();
        });
        let fd = fd_open("/f", Credentials::ROOT).unwrap();
        assert_eq!(fd_write(fd, b"hi", Credentials::ROOT).unwrap(), 2);
        let mut buf = [0u8; 8];
        // Writing through the handle advanced its shared position, so
        // reopen for the read side of this round trip.
        let fd2 = fd_open("/f", Credentials::ROOT).unwrap();
        let n = fd_read(fd2, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert!(fd_close(fd).is_ok());
        assert!(fd_close(fd2).is_ok());

        let id = with_io_queue(|q| q.schedule_request(0, IoKind::Read { offset: 0, len: 512 }));
        assert!(service_one_request());
        let completed = with_io_queue(|q| q.take_completed(id)).unwrap();
        // No disk registered via `register_disk0` in this test, so the
        // request can only fail — proves the worker actually drains
        // the queue and posts a real outcome rather than no-op'ing.
        assert_eq!(completed.status, axon_sched::io::IoStatus::Error);
    }
}
