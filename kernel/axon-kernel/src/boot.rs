//! Kernel bring-up, called by a Multiboot2 bootloader stub.
//!
//! The stub (a small assembly/linker-script crate outside this
//! workspace, analogous to the teacher's own `kernel/boot`) loads this
//! kernel image, switches to long mode, and calls [`kernel_main`] with
//! `eax` forwarded as `multiboot_magic` and `ebx` as `multiboot_info`
//! — exactly what the Multiboot2 spec hands a kernel at entry. This
//! module owns everything from there: descriptor tables, interrupts,
//! the heap, VFS, drivers, and the first scheduled thread.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;

use axon_core::{kinfo, kwarn};
use axon_fs::devfs::{DevFs, TtyNode};
use axon_fs::fat32::Fat32Volume;
use axon_fs::ramfs::Ramfs;
use axon_fs::vfs;
use axon_mm::Heap;

use crate::arch::x86_64::{context_switch, gdt, idt, pic};
use crate::config::HEAP_SIZE;
use crate::drivers::{ata::AtaDisk, keyboard, vga_console::print_str};
use crate::log::{self, VgaSink};

/// Backing storage for the kernel heap. A fixed BSS region stands in
/// for a real virtual-memory mapping: AxonOS has no page tables of its
/// own yet, so the heap lives wherever the linker puts this array.
#[repr(align(4096))]
struct HeapRegion([u8; HEAP_SIZE]);

static HEAP_REGION: HeapRegion = HeapRegion([0; HEAP_SIZE]);
static HEAP: Heap = Heap::new();

/// A [`axon_driver_api::CharDeviceOps`] that echoes to the VGA console,
/// used as `/dev/tty0`'s local echo device.
struct VgaEcho;

impl axon_driver_api::CharDeviceOps for VgaEcho {
    fn read(&self, _buf: &mut [u8]) -> Result<usize, axon_driver_api::IoError> {
        Ok(0)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, axon_driver_api::IoError> {
        if let Ok(s) = core::str::from_utf8(buf) {
            print_str(s);
        }
        Ok(buf.len())
    }
}

/// Primary IDE channel's legacy port range.
const ATA_PRIMARY_IO: u16 = 0x1F0;
const ATA_PRIMARY_CTRL: u16 = 0x3F6;

const IRQ_TIMER: u8 = 0;
const IRQ_KEYBOARD: u8 = 1;
const IRQ_ATA_PRIMARY: u8 = 14;

/// Registers the real CF8/CFC backend. `axon_pci::cam::PortConfigAccess`
/// only exists on a bare-metal target, so a host build (`cargo test`)
/// enumerates against whatever the crate's own test fixtures install
/// instead.
#[cfg(target_os = "none")]
fn register_pci_backend() {
    axon_pci::register_backend(&axon_pci::cam::PortConfigAccess);
}

#[cfg(not(target_os = "none"))]
fn register_pci_backend() {}

/// The foreground TTY that keyboard input is forwarded to.
///
/// [`keyboard::set_input_sink`] only accepts a plain `fn(u8)`, so there
/// is no room to capture an `Arc<TtyNode>` in a closure; this static
/// holds the pointer [`tty0_push_input`] dereferences instead. Set
/// exactly once in [`kernel_main`], before interrupts are enabled.
static TTY0: core::sync::atomic::AtomicPtr<TtyNode> =
    core::sync::atomic::AtomicPtr::new(core::ptr::null_mut());

fn tty0_push_input(byte: u8) {
    let ptr = TTY0.load(core::sync::atomic::Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    // SAFETY: `ptr` was produced by `Arc::into_raw` on a `TtyNode` kept
    // alive for the kernel's lifetime by devfs's own clone of the `Arc`.
    let tty = unsafe { &*ptr };
    tty.push_input(byte);
}

/// Kernel entry point.
///
/// # Safety
///
/// Must be called exactly once, at boot, with `multiboot_magic` and
/// `multiboot_info` as the bootloader left them in `eax`/`ebx`, on the
/// bootstrap processor, with interrupts still disabled.
pub unsafe extern "C" fn kernel_main(multiboot_magic: u32, multiboot_info: u32) -> ! {
    // SAFETY: called once at boot, before anything depends on segment
    // or interrupt state; `gdt::init` must run before `idt::init`,
    // which looks up `gdt`'s selectors while building the IDT.
    unsafe {
        gdt::init();
        idt::init();
        pic::remap();
        context_switch::install();
    }

    log::init_early_serial();
    kinfo!("axon-kernel: gdt/idt/pic online");

    // SAFETY: `HEAP_REGION` is a static array exclusively owned by
    // `HEAP` for the rest of the kernel's life.
    unsafe {
        HEAP.init(core::ptr::addr_of!(HEAP_REGION.0) as usize, HEAP_SIZE);
    }
    log::init_logger();
    log::add_sink(Box::new(VgaSink::new(axon_core::log::LogLevel::Info)));
    kinfo!("heap initialized: {} KiB", HEAP_SIZE / 1024);

    // SAFETY: PIC has been remapped; programming the PIT now is safe
    // and interrupts are still globally disabled.
    unsafe {
        crate::time::init();
    }
    // SAFETY: the PIC was remapped above.
    unsafe {
        pic::unmask(IRQ_TIMER);
        pic::unmask(IRQ_KEYBOARD);
        pic::unmask(IRQ_ATA_PRIMARY);
    }

    register_pci_backend();
    let pci_devices = axon_pci::enumerate();
    kinfo!("pci: {} device(s) found", pci_devices.len());
    for dev in &pci_devices {
        kinfo!(
            "pci: {:?} vendor={:#06x} device={:#06x} class={:?}",
            dev.address,
            dev.vendor_id,
            dev.device_id,
            dev.class,
        );
    }

    vfs::init();
    let ramfs = Arc::new(Ramfs::new());
    // SAFETY: `multiboot_magic`/`multiboot_info` are forwarded from the
    // caller, which received them from the bootloader.
    unsafe {
        crate::initfs::load(&ramfs, multiboot_magic, multiboot_info);
    }
    vfs::with_vfs(|vfs| {
        vfs.register_ramfs("rootfs", ramfs.clone())
            .expect("register rootfs");
        vfs.mount("/", "rootfs").expect("mount rootfs");
    });

    let devfs = Arc::new(DevFs::new());
    let tty0 = Arc::new(TtyNode::new(Arc::new(VgaEcho)));
    devfs.register_tty("tty0", tty0.clone());
    TTY0.store(
        Arc::into_raw(tty0) as *mut TtyNode,
        core::sync::atomic::Ordering::Release,
    );
    keyboard::set_input_sink(tty0_push_input);
    let devfs_handle = devfs.clone();
    vfs::with_vfs(|vfs| {
        vfs.register_devfs("devfs", devfs).expect("register devfs");
        vfs.mount("/dev", "devfs").expect("mount devfs");
    });
    kinfo!("vfs mounted: / (ramfs), /dev (devfs)");

    if let Some(disk) = AtaDisk::probe(ATA_PRIMARY_IO, ATA_PRIMARY_CTRL, false) {
        let disk: Arc<dyn axon_driver_api::DiskOps> = Arc::new(disk);
        kinfo!("ata: primary master disk present, {} sectors", disk.sector_count());
        devfs_handle.register_blk("hda", disk.clone());
        crate::sched::register_disk0(disk.clone());
        match Fat32Volume::mount(disk) {
            Ok(volume) => {
                let volume = Arc::new(volume);
                vfs::with_vfs(|vfs| {
                    vfs.register_fat32("hda1", volume).expect("register fat32 hda1");
                    vfs.mkdir("/mnt", axon_fs::Credentials::ROOT).ok();
                    vfs.mount("/mnt/hda1", "hda1").expect("mount fat32 hda1");
                });
                kinfo!("fat32: mounted /dev/hda at /mnt/hda1");
            }
            Err(e) => kwarn!("fat32: no volume found on /dev/hda ({e:?})"),
        }
    } else {
        kwarn!("ata: no disk found on primary channel");
    }

    crate::sched::init();
    crate::sched::spawn_kernel_thread(crate::sched::io_worker_entry, "io-worker")
        .expect("spawn io worker thread");
    kinfo!("scheduler initialized, io worker thread spawned");

    // SAFETY: IDT and PIC are initialized, and every IRQ source wired
    // above (PIT, keyboard, ATA) has a handler installed.
    unsafe {
        crate::arch::x86_64::enable_interrupts();
    }
    kinfo!("interrupts enabled, entering scheduler loop");

    loop {
        crate::sched::with_scheduler(axon_sched::Scheduler::yield_now);
        // SAFETY: interrupts are enabled; this just parks the CPU
        // between them.
        unsafe {
            crate::arch::x86_64::enable_and_halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tty0_push_input_is_a_noop_before_tty0_is_set() {
        // Guards against a panic if an IRQ fires before `kernel_main`
        // has stored a live `TtyNode` pointer.
        tty0_push_input(b'a');
    }

    #[test]
    fn port_constants_are_distinct() {
        assert_ne!(ATA_PRIMARY_IO, ATA_PRIMARY_CTRL);
    }
}
