//! VFS core: a driver registry, a mount table, and file handles that
//! carry their owning driver's tag so reads and writes can dispatch
//! without a shared trait object.
//!
//! `open`/`create` resolve the longest matching mount prefix first.
//! If that driver reports [`FsError::NotHandled`] — meaning the path
//! is syntactically under its mount but it declines to serve it, e.g.
//! `sysfs` asked to create an arbitrary file — resolution falls back
//! to the next-longest mount, mirroring the original VFS's "ask every
//! registered driver in turn" behavior without paying for a dynamic
//! dispatch table on the common single-driver-per-mount path.

use crate::devfs::DevFs;
use crate::fat32::{Fat32Volume, FileRef as Fat32FileRef};
use crate::ramfs::{NodeId as RamfsNodeId, Ramfs};
use crate::sysfs::{NodeId as SysfsNodeId, Sysfs};
use crate::{path, Credentials, DriverKind, FsError, FsResult, Stat};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use axon_core::sync::SpinLock;

/// Upper bound on simultaneously registered drivers.
pub const MAX_DRIVERS: usize = 8;
/// Upper bound on simultaneously active mounts.
pub const MAX_MOUNTS: usize = 8;

#[derive(Clone)]
enum Driver {
    Ramfs(Arc<Ramfs>),
    Sysfs(Arc<Sysfs>),
    Devfs(Arc<DevFs>),
    Fat32(Arc<Fat32Volume>),
}

impl Driver {
    fn kind(&self, volume: u8) -> DriverKind {
        match self {
            Driver::Ramfs(_) => DriverKind::Ramfs,
            Driver::Sysfs(_) => DriverKind::Sysfs,
            Driver::Devfs(_) => DriverKind::Devfs,
            Driver::Fat32(_) => DriverKind::Fat32 { volume },
        }
    }
}

struct Registered {
    name: String,
    driver: Driver,
    /// Distinguishes multiple mounted FAT32 volumes in [`DriverKind`].
    volume_slot: u8,
}

struct Mount {
    path: String,
    driver_index: usize,
}

/// Which open resource a [`FileHandle`] refers to within its driver.
enum OpenResource {
    Ramfs(RamfsNodeId),
    Sysfs(SysfsNodeId),
    Devfs(String),
    Fat32(SpinLock<Fat32FileRef>),
}

struct FileHandleInner {
    driver: Driver,
    kind: DriverKind,
    resource: OpenResource,
    pos: SpinLock<u64>,
}

/// A reference-counted open file. Cloning increments the share count;
/// the last clone's drop releases the handle. No driver here keeps
/// separate per-handle allocations to free, so closing is implicit in
/// `Drop` rather than an explicit `file_free` call.
#[derive(Clone)]
pub struct FileHandle(Arc<FileHandleInner>);

impl core::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileHandle").finish_non_exhaustive()
    }
}

impl FileHandle {
    /// Which driver owns this handle.
    #[must_use]
    pub fn kind(&self) -> DriverKind {
        self.0.kind
    }

    /// Number of outstanding references to this handle.
    #[must_use]
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Reads at the handle's current position, advancing it by the
    /// number of bytes read.
    pub fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        let mut pos = self.0.pos.lock();
        let n = self.read_at(*pos, buf)?;
        *pos += n as u64;
        Ok(n)
    }

    /// Reads at an explicit offset without touching the handle's
    /// position (used by directory iteration).
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        match (&self.0.driver, &self.0.resource) {
            (Driver::Ramfs(fs), OpenResource::Ramfs(id)) => fs.read(*id, offset, buf),
            (Driver::Sysfs(fs), OpenResource::Sysfs(id)) => fs.read(*id, offset, buf),
            (Driver::Devfs(fs), OpenResource::Devfs(name)) => fs.read(name, offset, buf),
            (Driver::Fat32(vol), OpenResource::Fat32(file_ref)) => {
                vol.read(&file_ref.lock(), offset, buf)
            }
            _ => Err(FsError::InvalidArgument),
        }
    }

    /// Writes at the handle's current position, advancing it.
    pub fn write(&self, buf: &[u8], creds: Credentials) -> FsResult<usize> {
        let mut pos = self.0.pos.lock();
        let n = match (&self.0.driver, &self.0.resource) {
            (Driver::Ramfs(fs), OpenResource::Ramfs(id)) => fs.write(*id, *pos, buf, creds),
            (Driver::Sysfs(fs), OpenResource::Sysfs(id)) => fs.write(*id, buf),
            (Driver::Devfs(fs), OpenResource::Devfs(name)) => fs.write(name, *pos, buf),
            (Driver::Fat32(vol), OpenResource::Fat32(file_ref)) => {
                vol.write(&mut file_ref.lock(), *pos, buf)
            }
            _ => Err(FsError::InvalidArgument),
        }?;
        *pos += n as u64;
        Ok(n)
    }

    /// Reads the next directory entry starting at the handle's
    /// position, advancing past it. Returns `Ok(0)` at end of
    /// directory.
    pub fn readdir_next(&self, buf: &mut [u8]) -> FsResult<usize> {
        let mut pos = self.0.pos.lock();
        let start = *pos as usize;
        let n = match (&self.0.driver, &self.0.resource) {
            (Driver::Ramfs(fs), OpenResource::Ramfs(id)) => fs.readdir(*id, start, buf),
            (Driver::Sysfs(fs), OpenResource::Sysfs(id)) => fs.readdir(*id, start, buf),
            (Driver::Fat32(vol), OpenResource::Fat32(file_ref)) => {
                vol.readdir(&file_ref.lock(), start, buf)
            }
            _ => Err(FsError::NotADirectory),
        }?;
        if n > 0 {
            *pos = start as u64 + 1;
        }
        Ok(n)
    }

    /// Stats the file this handle refers to.
    pub fn stat(&self) -> FsResult<Stat> {
        match (&self.0.driver, &self.0.resource) {
            (Driver::Ramfs(fs), OpenResource::Ramfs(id)) => Ok(fs.stat_id(*id)),
            (Driver::Sysfs(fs), OpenResource::Sysfs(id)) => Ok(fs.stat_id(*id)),
            (Driver::Devfs(fs), OpenResource::Devfs(name)) => fs.stat(name),
            (Driver::Fat32(vol), OpenResource::Fat32(file_ref)) => Ok(vol.stat(&file_ref.lock())),
            _ => Err(FsError::InvalidArgument),
        }
    }
}

struct Inner {
    drivers: Vec<Registered>,
    mounts: Vec<Mount>,
    next_fat32_slot: u8,
}

/// The virtual filesystem: driver registry plus mount table.
pub struct Vfs {
    inner: SpinLock<Inner>,
}

impl Vfs {
    /// Creates an empty VFS with no drivers registered and nothing
    /// mounted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                drivers: Vec::new(),
                mounts: Vec::new(),
                next_fat32_slot: 0,
            }),
        }
    }

    fn register(&self, name: &str, driver: Driver) -> FsResult<()> {
        let mut inner = self.inner.lock();
        if inner.drivers.len() >= MAX_DRIVERS {
            return Err(FsError::ResourceExhausted);
        }
        let volume_slot = if matches!(driver, Driver::Fat32(_)) {
            let slot = inner.next_fat32_slot;
            inner.next_fat32_slot += 1;
            slot
        } else {
            0
        };
        inner.drivers.push(Registered {
            name: name.to_string(),
            driver,
            volume_slot,
        });
        Ok(())
    }

    /// Registers an in-memory filesystem driver.
    pub fn register_ramfs(&self, name: &str, fs: Arc<Ramfs>) -> FsResult<()> {
        self.register(name, Driver::Ramfs(fs))
    }

    /// Registers an attribute filesystem driver.
    pub fn register_sysfs(&self, name: &str, fs: Arc<Sysfs>) -> FsResult<()> {
        self.register(name, Driver::Sysfs(fs))
    }

    /// Registers a device-node filesystem driver.
    pub fn register_devfs(&self, name: &str, fs: Arc<DevFs>) -> FsResult<()> {
        self.register(name, Driver::Devfs(fs))
    }

    /// Registers a mounted FAT32 volume driver.
    pub fn register_fat32(&self, name: &str, volume: Arc<Fat32Volume>) -> FsResult<()> {
        self.register(name, Driver::Fat32(volume))
    }

    /// Mounts the driver registered as `driver_name` at `mount_path`.
    pub fn mount(&self, mount_path: &str, driver_name: &str) -> FsResult<()> {
        let mut inner = self.inner.lock();
        if inner.mounts.len() >= MAX_MOUNTS {
            return Err(FsError::ResourceExhausted);
        }
        let driver_index = inner
            .drivers
            .iter()
            .position(|d| d.name == driver_name)
            .ok_or(FsError::NotFound)?;
        inner.mounts.push(Mount {
            path: mount_path.to_string(),
            driver_index,
        });
        Ok(())
    }

    /// Returns the registered mount paths, longest-match ordering is
    /// computed at resolution time so insertion order does not matter.
    fn candidate_mounts(&self) -> Vec<(String, usize)> {
        let inner = self.inner.lock();
        let mut out: Vec<(String, usize)> = inner
            .mounts
            .iter()
            .map(|m| (m.path.clone(), m.driver_index))
            .collect();
        out.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        out
    }

    /// Opens an existing path for reading/writing.
    pub fn open(&self, abs_path: &str, creds: Credentials) -> FsResult<FileHandle> {
        self.dispatch(abs_path, |driver, remainder| self.open_via(driver, remainder, creds))
    }

    /// Creates a new regular file at `abs_path`.
    pub fn create(&self, abs_path: &str, creds: Credentials) -> FsResult<FileHandle> {
        self.dispatch(abs_path, |driver, remainder| {
            self.create_via(driver, remainder, creds)
        })
    }

    fn dispatch(
        &self,
        abs_path: &str,
        op: impl Fn(&Driver, &str) -> FsResult<FileHandle>,
    ) -> FsResult<FileHandle> {
        if !path::is_absolute(abs_path) {
            return Err(FsError::InvalidArgument);
        }
        let candidates = self.candidate_mounts();
        let matching: Vec<_> = candidates
            .iter()
            .filter(|(mount_path, _)| {
                path::longest_prefix_match(abs_path, core::iter::once(mount_path.as_str()))
                    .is_some()
            })
            .collect();
        if matching.is_empty() {
            return Err(FsError::NotFound);
        }
        let mut last_err = FsError::NotFound;
        for (mount_path, driver_index) in matching {
            let remainder = path::strip_mount_prefix(abs_path, mount_path);
            let driver = {
                let inner = self.inner.lock();
                inner.drivers[*driver_index].driver.clone()
            };
            match op(&driver, remainder) {
                Ok(handle) => return Ok(handle),
                Err(FsError::NotHandled) => continue,
                Err(e) => {
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn driver_kind_for(&self, driver: &Driver) -> DriverKind {
        let inner = self.inner.lock();
        for registered in &inner.drivers {
            if matches_driver(&registered.driver, driver) {
                return registered.driver.kind(registered.volume_slot);
            }
        }
        driver.kind(0)
    }

    fn open_via(&self, driver: &Driver, remainder: &str, creds: Credentials) -> FsResult<FileHandle> {
        let _ = creds;
        let kind = self.driver_kind_for(driver);
        let resource = match driver {
            Driver::Ramfs(fs) => OpenResource::Ramfs(fs.open(&with_root_slash(remainder))?),
            Driver::Sysfs(fs) => OpenResource::Sysfs(fs.open(&with_root_slash(remainder))?),
            Driver::Devfs(fs) => OpenResource::Devfs(fs.open(remainder)?),
            Driver::Fat32(vol) => OpenResource::Fat32(SpinLock::new(vol.open(remainder)?)),
        };
        Ok(FileHandle(Arc::new(FileHandleInner {
            driver: driver.clone(),
            kind,
            resource,
            pos: SpinLock::new(0),
        })))
    }

    fn create_via(&self, driver: &Driver, remainder: &str, creds: Credentials) -> FsResult<FileHandle> {
        let kind = self.driver_kind_for(driver);
        let resource = match driver {
            Driver::Ramfs(fs) => {
                OpenResource::Ramfs(fs.create(&with_root_slash(remainder), creds)?)
            }
            Driver::Sysfs(_) | Driver::Devfs(_) => return Err(FsError::NotHandled),
            Driver::Fat32(vol) => {
                let (parent_path, name) = match remainder.rsplit_once('/') {
                    Some((p, n)) => (p, n),
                    None => ("", remainder),
                };
                let parent = vol.open(parent_path)?;
                OpenResource::Fat32(SpinLock::new(vol.create(&parent, name, creds)?))
            }
        };
        Ok(FileHandle(Arc::new(FileHandleInner {
            driver: driver.clone(),
            kind,
            resource,
            pos: SpinLock::new(0),
        })))
    }

    /// Creates a directory at `abs_path`.
    pub fn mkdir(&self, abs_path: &str, creds: Credentials) -> FsResult<()> {
        if !path::is_absolute(abs_path) {
            return Err(FsError::InvalidArgument);
        }
        let candidates = self.candidate_mounts();
        let mount_path = path::longest_prefix_match(
            abs_path,
            candidates.iter().map(|(p, _)| p.as_str()),
        )
        .ok_or(FsError::NotFound)?
        .to_string();
        let driver_index = candidates
            .iter()
            .find(|(p, _)| *p == mount_path)
            .map(|(_, i)| *i)
            .ok_or(FsError::NotFound)?;
        let remainder = path::strip_mount_prefix(abs_path, &mount_path);
        let driver = {
            let inner = self.inner.lock();
            inner.drivers[driver_index].driver.clone()
        };
        match driver {
            Driver::Ramfs(fs) => fs.mkdir(&with_root_slash(remainder), creds).map(|_| ()),
            Driver::Fat32(vol) => {
                let (parent_path, name) = match remainder.rsplit_once('/') {
                    Some((p, n)) => (p, n),
                    None => ("", remainder),
                };
                let parent = vol.open(parent_path)?;
                vol.mkdir(&parent, name).map(|_| ())
            }
            Driver::Sysfs(_) | Driver::Devfs(_) => Err(FsError::NotHandled),
        }
    }

    /// Removes the file or empty directory at `abs_path`.
    pub fn remove(&self, abs_path: &str, creds: Credentials) -> FsResult<()> {
        if !path::is_absolute(abs_path) {
            return Err(FsError::InvalidArgument);
        }
        let candidates = self.candidate_mounts();
        let mount_path = path::longest_prefix_match(
            abs_path,
            candidates.iter().map(|(p, _)| p.as_str()),
        )
        .ok_or(FsError::NotFound)?
        .to_string();
        let driver_index = candidates
            .iter()
            .find(|(p, _)| *p == mount_path)
            .map(|(_, i)| *i)
            .ok_or(FsError::NotFound)?;
        let remainder = path::strip_mount_prefix(abs_path, &mount_path);
        let driver = {
            let inner = self.inner.lock();
            inner.drivers[driver_index].driver.clone()
        };
        match driver {
            Driver::Ramfs(fs) => fs.remove(&with_root_slash(remainder), creds),
            Driver::Sysfs(_) | Driver::Devfs(_) | Driver::Fat32(_) => Err(FsError::NotHandled),
        }
    }
}

fn with_root_slash(remainder: &str) -> String {
    if remainder.is_empty() {
        "/".to_string()
    } else {
        alloc::format!("/{remainder}")
    }
}

fn matches_driver(a: &Driver, b: &Driver) -> bool {
    match (a, b) {
        (Driver::Ramfs(x), Driver::Ramfs(y)) => Arc::ptr_eq(x, y),
        (Driver::Sysfs(x), Driver::Sysfs(y)) => Arc::ptr_eq(x, y),
        (Driver::Devfs(x), Driver::Devfs(y)) => Arc::ptr_eq(x, y),
        (Driver::Fat32(x), Driver::Fat32(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Global VFS instance, initialized once during kernel boot.
static VFS: SpinLock<Option<Vfs>> = SpinLock::new(None);

/// Installs the global VFS. Panics if already initialized.
pub fn init() {
    let mut slot = VFS.lock();
    assert!(slot.is_none(), "vfs already initialized");
    *slot = Some(Vfs::new());
}

/// Runs `f` against the global VFS.
///
/// # Panics
/// Panics if [`init`] has not been called yet.
pub fn with_vfs<R>(f: impl FnOnce(&Vfs) -> R) -> R {
    let slot = VFS.lock();
    f(slot.as_ref().expect("vfs not initialized"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::ROOT
    }

    #[test]
    fn mount_and_create_ramfs_file() {
        let vfs = Vfs::new();
        vfs.register_ramfs("rootfs", Arc::new(Ramfs::new())).unwrap();
        vfs.mount("/", "rootfs").unwrap();
        let handle = vfs.create("/hello.txt", creds()).unwrap();
        assert_eq!(handle.write(b"hi", creds()).unwrap(), 2);
    }

    #[test]
    fn longest_prefix_mount_wins() {
        let vfs = Vfs::new();
        vfs.register_ramfs("rootfs", Arc::new(Ramfs::new())).unwrap();
        vfs.register_devfs("devfs", Arc::new(DevFs::new())).unwrap();
        vfs.mount("/", "rootfs").unwrap();
        vfs.mount("/dev", "devfs").unwrap();
        let handle = vfs.open("/dev/null", creds()).unwrap();
        assert_eq!(handle.kind(), DriverKind::Devfs);
    }

    #[test]
    fn unmounted_path_is_not_found() {
        let vfs = Vfs::new();
        vfs.register_ramfs("rootfs", Arc::new(Ramfs::new())).unwrap();
        vfs.mount("/", "rootfs").unwrap();
        assert_eq!(vfs.open("/missing", creds()).unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn sysfs_create_falls_back_to_notfound_when_no_other_mount() {
        let vfs = Vfs::new();
        vfs.register_sysfs("sysfs", Arc::new(Sysfs::new())).unwrap();
        vfs.mount("/sys", "sysfs").unwrap();
        assert_eq!(vfs.create("/sys/x", creds()).unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn remove_non_empty_directory_fails_through_vfs() {
        let vfs = Vfs::new();
        vfs.register_ramfs("rootfs", Arc::new(Ramfs::new())).unwrap();
        vfs.mount("/", "rootfs").unwrap();
        vfs.mkdir("/a", creds()).unwrap();
        vfs.create("/a/b", creds()).unwrap();
        assert_eq!(vfs.remove("/a", creds()), Err(FsError::NotEmpty));
    }

    #[test]
    fn remove_file_through_vfs() {
        let vfs = Vfs::new();
        vfs.register_ramfs("rootfs", Arc::new(Ramfs::new())).unwrap();
        vfs.mount("/", "rootfs").unwrap();
        vfs.create("/f", creds()).unwrap();
        vfs.remove("/f", creds()).unwrap();
        assert_eq!(vfs.open("/f", creds()).unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn clone_increments_refcount() {
        let vfs = Vfs::new();
        vfs.register_ramfs("rootfs", Arc::new(Ramfs::new())).unwrap();
        vfs.mount("/", "rootfs").unwrap();
        let handle = vfs.create("/f", creds()).unwrap();
        let handle2 = handle.clone();
        assert_eq!(handle.refcount(), 2);
        drop(handle2);
        assert_eq!(handle.refcount(), 1);
    }
}
