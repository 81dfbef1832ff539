//! Device filesystem (`/dev`).
//!
//! Leaf nodes hold ops (backed by [`axon_driver_api::CharDeviceOps`] or
//! [`axon_driver_api::DiskOps`]) plus a device class. `/dev/tty0`
//! additionally gets canonical line-mode input processing: printable
//! bytes echo back through the node's own ops, Backspace/DEL erases
//! the previous echoed glyph, newline or a full line buffer ends a
//! read, Ctrl-C interrupts a read with zero bytes, and Ctrl-D signals
//! EOF. Block leaves (`/dev/hdN`, `/dev/sdX`) have no line discipline:
//! reads and writes are whole, sector-aligned transfers straight
//! through to [`DiskOps`].

use crate::{FsError, FsResult, S_IFBLK, S_IFCHR, Stat};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use axon_core::sync::SpinLock;
use axon_driver_api::{CharDeviceOps, DiskOps, IoError};
use planck_noalloc::ringbuf::RingBuf;

const LINE_BUF_SIZE: usize = 256;
const TTY_RING_SIZE: usize = 256;

const BACKSPACE: u8 = 0x08;
const DEL: u8 = 0x7F;
const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;

/// A `/dev/ttyN` node: a raw input ring filled by the keyboard ISR,
/// drained with canonical line editing on read.
pub struct TtyNode {
    ring: SpinLock<RingBuf<u8, TTY_RING_SIZE>>,
    echo: Arc<dyn CharDeviceOps>,
}

impl TtyNode {
    /// Creates a TTY node that echoes input through `echo`.
    #[must_use]
    pub fn new(echo: Arc<dyn CharDeviceOps>) -> Self {
        Self {
            ring: SpinLock::new(RingBuf::new()),
            echo,
        }
    }

    /// Pushes one decoded input byte into the TTY's ring, called from
    /// the keyboard interrupt handler. Non-blocking: drops the byte on
    /// lock contention rather than spinning in an ISR.
    pub fn push_input(&self, byte: u8) {
        if let Some(mut ring) = self.ring.try_lock() {
            let _ = ring.push(byte);
        }
    }

    /// Performs one canonical-mode read, echoing printable bytes and
    /// processing Backspace/Ctrl-C/Ctrl-D as they arrive.
    pub fn read_line(&self, buf: &mut [u8]) -> usize {
        let mut line = [0u8; LINE_BUF_SIZE];
        let mut len = 0usize;
        loop {
            let byte = {
                let mut ring = self.ring.lock();
                match ring.pop() {
                    Some(b) => b,
                    None => return 0,
                }
            };
            match byte {
                CTRL_C => return 0,
                CTRL_D => return len.min(buf.len()),
                b'\n' | b'\r' => {
                    let _ = self.echo.write(b"\n");
                    if len < line.len() {
                        line[len] = b'\n';
                        len += 1;
                    }
                    break;
                }
                BACKSPACE | DEL => {
                    if len > 0 {
                        len -= 1;
                        let _ = self.echo.write(b"\x08 \x08");
                    }
                    continue;
                }
                printable if len < line.len() => {
                    line[len] = printable;
                    len += 1;
                    let _ = self.echo.write(&[printable]);
                    if len == line.len() {
                        break;
                    }
                }
                _ => break,
            }
        }
        let n = len.min(buf.len());
        buf[..n].copy_from_slice(&line[..n]);
        n
    }
}

enum Leaf {
    Char(Arc<dyn CharDeviceOps>),
    Tty(Arc<TtyNode>),
    Block(Arc<dyn DiskOps>),
    Alias(String),
}

/// The device filesystem.
pub struct DevFs {
    entries: SpinLock<BTreeMap<String, Leaf>>,
}

impl DevFs {
    /// Creates a devfs with `/dev/null` and `/dev/zero` already registered.
    #[must_use]
    pub fn new() -> Self {
        let fs = Self {
            entries: SpinLock::new(BTreeMap::new()),
        };
        fs.register_chr("null", Arc::new(NullDevice));
        fs.register_chr("zero", Arc::new(ZeroDevice));
        fs
    }

    /// Registers a character device at `/dev/<name>`.
    pub fn register_chr(&self, name: &str, ops: Arc<dyn CharDeviceOps>) {
        self.entries
            .lock()
            .insert(name.to_string(), Leaf::Char(ops));
    }

    /// Registers a TTY node at `/dev/<name>`.
    pub fn register_tty(&self, name: &str, tty: Arc<TtyNode>) {
        self.entries.lock().insert(name.to_string(), Leaf::Tty(tty));
    }

    /// Registers a block device at `/dev/<name>` (e.g. `hda`, `sda`).
    pub fn register_blk(&self, name: &str, disk: Arc<dyn DiskOps>) {
        self.entries
            .lock()
            .insert(name.to_string(), Leaf::Block(disk));
    }

    /// Registers `/dev/<alias>` as pointing at the same leaf as
    /// `/dev/<target>` (e.g. `tty` -> `tty0`).
    pub fn register_alias(&self, alias: &str, target: &str) {
        self.entries
            .lock()
            .insert(alias.to_string(), Leaf::Alias(target.to_string()));
    }

    fn resolve_leaf(&self, name: &str) -> FsResult<String> {
        let entries = self.entries.lock();
        let mut current = name.to_string();
        for _ in 0..8 {
            match entries.get(&current) {
                Some(Leaf::Alias(target)) => current = target.clone(),
                Some(_) => return Ok(current),
                None => return Err(FsError::NotFound),
            }
        }
        Err(FsError::NotFound)
    }

    /// Opens `/dev/<name>`, resolving aliases.
    pub fn open(&self, name: &str) -> FsResult<String> {
        self.resolve_leaf(name)
    }

    /// Reads from the resolved leaf. `offset` is ignored for character
    /// and TTY leaves; block leaves require it sector-aligned and fill
    /// at most one sector per call.
    pub fn read(&self, resolved_name: &str, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        enum Picked {
            Char(Arc<dyn CharDeviceOps>),
            Tty(Arc<TtyNode>),
            Block(Arc<dyn DiskOps>),
        }
        let leaf_ref = {
            let entries = self.entries.lock();
            match entries.get(resolved_name) {
                Some(Leaf::Char(ops)) => Some(Picked::Char(ops.clone())),
                Some(Leaf::Tty(tty)) => Some(Picked::Tty(tty.clone())),
                Some(Leaf::Block(disk)) => Some(Picked::Block(disk.clone())),
                _ => None,
            }
        };
        match leaf_ref {
            Some(Picked::Char(ops)) => ops.read(buf).map_err(map_io_error),
            Some(Picked::Tty(tty)) => Ok(tty.read_line(buf)),
            Some(Picked::Block(disk)) => block_read(&*disk, offset, buf),
            None => Err(FsError::NotFound),
        }
    }

    /// Writes to the resolved leaf. Same offset rules as [`Self::read`].
    pub fn write(&self, resolved_name: &str, offset: u64, buf: &[u8]) -> FsResult<usize> {
        enum Picked {
            Char(Arc<dyn CharDeviceOps>),
            Block(Arc<dyn DiskOps>),
        }
        let leaf_ref = {
            let entries = self.entries.lock();
            match entries.get(resolved_name) {
                Some(Leaf::Char(ops)) => Some(Picked::Char(ops.clone())),
                Some(Leaf::Tty(tty)) => Some(Picked::Char(tty.echo.clone())),
                Some(Leaf::Block(disk)) => Some(Picked::Block(disk.clone())),
                _ => None,
            }
        };
        match leaf_ref {
            Some(Picked::Char(ops)) => ops.write(buf).map_err(map_io_error),
            Some(Picked::Block(disk)) => block_write(&*disk, offset, buf),
            None => Err(FsError::NotFound),
        }
    }

    /// Stats the node named by `name`. Block leaves report `S_IFBLK`
    /// and their total size; everything else is a fixed-mode,
    /// zero-size character device.
    pub fn stat(&self, name: &str) -> FsResult<Stat> {
        let resolved = self.resolve_leaf(name)?;
        let entries = self.entries.lock();
        let (mode, size) = match entries.get(&resolved) {
            Some(Leaf::Block(disk)) => (
                S_IFBLK | 0o660,
                disk.sector_count() * disk.sector_size() as u64,
            ),
            _ => (S_IFCHR | 0o666, 0),
        };
        Ok(Stat {
            ino: 1,
            mode,
            uid: 0,
            gid: 0,
            size,
        })
    }
}

/// Reads one sector-aligned transfer from a block leaf. `buf` must be
/// at least one sector long; only a single sector is read per call.
fn block_read(disk: &dyn DiskOps, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
    let sector_size = disk.sector_size();
    if sector_size == 0 || buf.len() < sector_size || offset % sector_size as u64 != 0 {
        return Err(FsError::InvalidArgument);
    }
    let lba = offset / sector_size as u64;
    if lba >= disk.sector_count() {
        return Ok(0);
    }
    disk.read_sectors(lba, &mut buf[..sector_size])
        .map_err(map_io_error)?;
    Ok(sector_size)
}

/// Writes one sector-aligned transfer to a block leaf.
fn block_write(disk: &dyn DiskOps, offset: u64, buf: &[u8]) -> FsResult<usize> {
    let sector_size = disk.sector_size();
    if sector_size == 0 || buf.len() < sector_size || offset % sector_size as u64 != 0 {
        return Err(FsError::InvalidArgument);
    }
    let lba = offset / sector_size as u64;
    if lba >= disk.sector_count() {
        return Err(FsError::InvalidArgument);
    }
    disk.write_sectors(lba, &buf[..sector_size])
        .map_err(map_io_error)?;
    Ok(sector_size)
}

impl Default for DevFs {
    fn default() -> Self {
        Self::new()
    }
}

fn map_io_error(e: IoError) -> FsError {
    match e {
        IoError::OutOfRange | IoError::InvalidBuffer => FsError::InvalidArgument,
        IoError::Timeout | IoError::DeviceError => FsError::DeviceError,
        IoError::NoSuchDevice => FsError::NotFound,
    }
}

struct NullDevice;
impl CharDeviceOps for NullDevice {
    fn read(&self, _buf: &mut [u8]) -> Result<usize, IoError> {
        Ok(0)
    }
    fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        Ok(buf.len())
    }
}

struct ZeroDevice;
impl CharDeviceOps for ZeroDevice {
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError> {
        buf.fill(0);
        Ok(buf.len())
    }
    fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingEcho {
        written: SpinLock<alloc::vec::Vec<u8>>,
    }

    impl CharDeviceOps for RecordingEcho {
        fn read(&self, _buf: &mut [u8]) -> Result<usize, IoError> {
            Ok(0)
        }
        fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
            self.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn tty_read_line_returns_on_newline() {
        let echo = Arc::new(RecordingEcho {
            written: SpinLock::new(alloc::vec::Vec::new()),
        });
        let tty = TtyNode::new(echo);
        for b in b"hello\n" {
            tty.push_input(*b);
        }
        let mut buf = [0u8; 16];
        let n = tty.read_line(&mut buf);
        assert_eq!(&buf[..n], b"hello\n");
    }

    #[test]
    fn tty_ctrl_c_on_empty_ring_reads_nothing() {
        let echo = Arc::new(RecordingEcho {
            written: SpinLock::new(alloc::vec::Vec::new()),
        });
        let tty = TtyNode::new(echo);
        tty.push_input(CTRL_C);
        let mut buf = [0u8; 16];
        assert_eq!(tty.read_line(&mut buf), 0);
    }

    #[test]
    fn devfs_resolves_tty_alias() {
        let fs = DevFs::new();
        let echo = Arc::new(RecordingEcho {
            written: SpinLock::new(alloc::vec::Vec::new()),
        });
        let tty = Arc::new(TtyNode::new(echo));
        fs.register_tty("tty0", tty);
        fs.register_alias("tty", "tty0");
        assert_eq!(fs.open("tty").unwrap(), "tty0");
    }

    #[test]
    fn null_and_zero_registered_by_default() {
        let fs = DevFs::new();
        assert!(fs.open("null").is_ok());
        assert!(fs.open("zero").is_ok());
        let mut buf = [0xFFu8; 4];
        let name = fs.open("zero").unwrap();
        let n = fs.read(&name, 0, &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [0u8; 4]);
    }

    struct MemDisk {
        sectors: SpinLock<alloc::vec::Vec<[u8; 512]>>,
    }

    impl MemDisk {
        fn new(count: usize) -> Self {
            Self {
                sectors: SpinLock::new(alloc::vec![[0u8; 512]; count]),
            }
        }
    }

    impl DiskOps for MemDisk {
        fn sector_size(&self) -> usize {
            512
        }
        fn sector_count(&self) -> u64 {
            self.sectors.lock().len() as u64
        }
        fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), IoError> {
            buf.copy_from_slice(&self.sectors.lock()[lba as usize]);
            Ok(())
        }
        fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), IoError> {
            self.sectors.lock()[lba as usize].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn block_leaf_roundtrips_a_sector() {
        let fs = DevFs::new();
        fs.register_blk("sda", Arc::new(MemDisk::new(4)));
        let name = fs.open("sda").unwrap();
        let mut sector = [0xABu8; 512];
        assert_eq!(fs.write(&name, 512, &sector).unwrap(), 512);
        sector.fill(0);
        let n = fs.read(&name, 512, &mut sector).unwrap();
        assert_eq!(n, 512);
        assert!(sector.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn block_leaf_rejects_unaligned_offset() {
        let fs = DevFs::new();
        fs.register_blk("sda", Arc::new(MemDisk::new(4)));
        let name = fs.open("sda").unwrap();
        let mut buf = [0u8; 512];
        assert_eq!(fs.read(&name, 3, &mut buf), Err(FsError::InvalidArgument));
    }

    #[test]
    fn block_leaf_stat_reports_ifblk_and_size() {
        let fs = DevFs::new();
        fs.register_blk("sda", Arc::new(MemDisk::new(4)));
        let st = fs.stat("sda").unwrap();
        assert_eq!(st.mode & S_IFBLK, S_IFBLK);
        assert_eq!(st.size, 4 * 512);
    }
}
