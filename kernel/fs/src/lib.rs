//! AxonOS virtual filesystem: driver registry, mount table, handle
//! refcounting, and the bundled ramfs/sysfs/devfs/FAT32 drivers.
//!
//! Every operation here is synchronous and takes an explicit
//! [`Credentials`] rather than consulting a global "current thread" —
//! this keeps `axon-fs` free of any dependency on the scheduler, so
//! `axon-sched` can depend on `axon-fs` (for the per-thread FD table)
//! without creating a cycle back the other way.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod dirent;
pub mod devfs;
pub mod fat32;
pub mod path;
pub mod ramfs;
pub mod sysfs;
pub mod vfs;

use core::fmt;

/// Credentials a caller presents for a filesystem operation, replacing
/// the original C code's implicit "current thread" global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// Effective user id. 0 is root.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
}

impl Credentials {
    /// The root identity (`uid == 0`).
    pub const ROOT: Self = Self { uid: 0, gid: 0 };

    /// Returns whether these credentials have root privileges.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.uid == 0
    }
}

/// Node/file permission bits plus owner, matching a trimmed POSIX
/// `st_mode`/`st_uid`/`st_gid` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// POSIX-style mode bits (type bits plus rwx triplets).
    pub mode: u32,
}

/// POSIX file type bits, OR'd into [`Permissions::mode`].
pub const S_IFDIR: u32 = 0o040000;
/// Regular file type bit.
pub const S_IFREG: u32 = 0o100000;
/// Character device type bit.
pub const S_IFCHR: u32 = 0o020000;
/// Block device type bit.
pub const S_IFBLK: u32 = 0o060000;

/// Result of a `stat`-like query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Inode number, unique within its filesystem.
    pub ino: u64,
    /// Type + permission bits.
    pub mode: u32,
    /// Owning uid.
    pub uid: u32,
    /// Owning gid.
    pub gid: u32,
    /// Size in bytes (0 for devices).
    pub size: u64,
}

/// Errors a filesystem driver or the VFS core can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// This driver does not own the path; the caller should try the
    /// next registered driver. Never escapes the VFS core to callers.
    NotHandled,
    /// No such file or directory.
    NotFound,
    /// A fixed-size table (registry, mount table, FD table, directory
    /// slots) is full.
    ResourceExhausted,
    /// A path, mode, or buffer argument was invalid.
    InvalidArgument,
    /// The backing device reported an I/O failure.
    DeviceError,
    /// The path already exists (`create` on an existing name).
    Exists,
    /// Expected a directory, found something else.
    NotADirectory,
    /// Expected a non-directory, found a directory.
    IsADirectory,
    /// Caller's credentials do not permit the operation.
    PermissionDenied,
    /// `remove` targeted a directory that still has children.
    NotEmpty,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NotHandled => "not handled by this driver",
            FsError::NotFound => "no such file or directory",
            FsError::ResourceExhausted => "resource exhausted",
            FsError::InvalidArgument => "invalid argument",
            FsError::DeviceError => "device error",
            FsError::Exists => "file exists",
            FsError::NotADirectory => "not a directory",
            FsError::IsADirectory => "is a directory",
            FsError::PermissionDenied => "permission denied",
            FsError::NotEmpty => "directory not empty",
        };
        f.write_str(msg)
    }
}

/// Result alias used throughout `axon-fs`.
pub type FsResult<T> = Result<T, FsError>;

/// Which driver backs a [`vfs::FileHandle`].
///
/// Dispatch on this tag replaces the original C VFS's pattern of
/// comparing `file->fs_private` against each driver's `driver_data`
/// pointer: instead of matching on identity, the handle simply says
/// which driver opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// The in-memory `ramfs` driver.
    Ramfs,
    /// The attribute-backed `sysfs` driver.
    Sysfs,
    /// The device-node `devfs` driver.
    Devfs,
    /// A mounted FAT32 volume, identified by its slot in the volume table.
    Fat32 { volume: u8 },
}
