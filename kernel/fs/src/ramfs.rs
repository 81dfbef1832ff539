//! In-memory filesystem: directories and grow-on-write regular files.
//!
//! Nodes live in an arena (`Vec<Node>`) indexed by [`NodeId`] rather
//! than the original parent/sibling-linked-list pointers — the tree
//! shape and permission rules are unchanged, but a safe arena avoids
//! hand-rolled pointer chasing for something this small.

use crate::{Credentials, FsError, FsResult, Permissions, S_IFDIR, S_IFREG, Stat};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use axon_core::sync::SpinLock;

/// Index of a node within a [`Ramfs`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(u32);

struct Node {
    name: String,
    is_dir: bool,
    data: Vec<u8>,
    perm: Permissions,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Inner {
    nodes: Vec<Node>,
    next_ino: u64,
}

/// An in-memory filesystem rooted at a single directory node.
pub struct Ramfs {
    inner: SpinLock<Inner>,
}

impl Ramfs {
    /// Creates a ramfs with only the root directory present.
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            is_dir: true,
            data: Vec::new(),
            perm: Permissions {
                uid: 0,
                gid: 0,
                mode: S_IFDIR | 0o755,
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            inner: SpinLock::new(Inner {
                nodes: alloc::vec![root],
                next_ino: 10,
            }),
        }
    }

    const ROOT: NodeId = NodeId(0);

    fn find_child(inner: &Inner, dir: NodeId, name: &str) -> Option<NodeId> {
        inner.nodes[dir.0 as usize]
            .children
            .iter()
            .copied()
            .find(|&c| inner.nodes[c.0 as usize].name == name)
    }

    fn resolve(inner: &Inner, path: &str) -> Option<NodeId> {
        let mut current = Self::ROOT;
        for component in crate::path::components(path) {
            current = Self::find_child(inner, current, component)?;
        }
        Some(current)
    }

    fn resolve_parent<'a>(path: &'a str) -> (Option<&'a str>, &'a str) {
        match path.rsplit_once('/') {
            Some((parent, name)) if !parent.is_empty() => (Some(parent), name),
            Some((_, name)) => (None, name),
            None => (None, path),
        }
    }

    /// Looks up `path`, returning its stat data.
    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        let inner = self.inner.lock();
        let id = Self::resolve(&inner, path).ok_or(FsError::NotFound)?;
        Ok(Self::stat_node(&inner, id))
    }

    /// Returns stat data for an already-open node id.
    #[must_use]
    pub fn stat_id(&self, id: NodeId) -> Stat {
        let inner = self.inner.lock();
        Self::stat_node(&inner, id)
    }

    fn stat_node(inner: &Inner, id: NodeId) -> Stat {
        let node = &inner.nodes[id.0 as usize];
        Stat {
            ino: ino_of(id),
            mode: node.perm.mode,
            uid: node.perm.uid,
            gid: node.perm.gid,
            size: node.data.len() as u64,
        }
    }

    /// Creates a regular file at `path` owned by `creds`. mkdir for
    /// directories is allowed for any caller; file creation likewise
    /// only requires a free slot and a non-existing name.
    pub fn create(&self, path: &str, creds: Credentials) -> FsResult<NodeId> {
        self.make_node(path, creds, false)
    }

    /// Creates a directory at `path`, owned by `creds`.
    pub fn mkdir(&self, path: &str, creds: Credentials) -> FsResult<NodeId> {
        self.make_node(path, creds, true)
    }

    fn make_node(&self, path: &str, creds: Credentials, is_dir: bool) -> FsResult<NodeId> {
        let mut inner = self.inner.lock();
        let (parent_path, name) = Self::resolve_parent(path);
        let parent_id = match parent_path {
            Some(p) => Self::resolve(&inner, p).ok_or(FsError::NotFound)?,
            None => Self::ROOT,
        };
        if !inner.nodes[parent_id.0 as usize].is_dir {
            return Err(FsError::NotADirectory);
        }
        if Self::find_child(&inner, parent_id, name).is_some() {
            return Err(FsError::Exists);
        }
        let mode = if is_dir { S_IFDIR | 0o755 } else { S_IFREG | 0o644 };
        let node = Node {
            name: name.to_string(),
            is_dir,
            data: Vec::new(),
            perm: Permissions {
                uid: creds.uid,
                gid: creds.gid,
                mode,
            },
            parent: Some(parent_id),
            children: Vec::new(),
        };
        let id = NodeId(inner.nodes.len() as u32);
        inner.nodes.push(node);
        inner.nodes[parent_id.0 as usize].children.push(id);
        Ok(id)
    }

    /// Opens an existing node for read/write.
    pub fn open(&self, path: &str) -> FsResult<NodeId> {
        let inner = self.inner.lock();
        Self::resolve(&inner, path).ok_or(FsError::NotFound)
    }

    /// Reads up to `buf.len()` bytes at `offset` from a regular file.
    pub fn read(&self, id: NodeId, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let inner = self.inner.lock();
        let node = &inner.nodes[id.0 as usize];
        if node.is_dir {
            return Err(FsError::IsADirectory);
        }
        let offset = offset as usize;
        if offset >= node.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(node.data.len() - offset);
        buf[..n].copy_from_slice(&node.data[offset..offset + n]);
        Ok(n)
    }

    /// Writes `buf` at `offset`, growing the file's backing buffer if
    /// the write extends past its current length. Only root may write.
    pub fn write(&self, id: NodeId, offset: u64, buf: &[u8], creds: Credentials) -> FsResult<usize> {
        if !creds.is_root() {
            return Err(FsError::PermissionDenied);
        }
        let mut inner = self.inner.lock();
        let node = &mut inner.nodes[id.0 as usize];
        if node.is_dir {
            return Err(FsError::IsADirectory);
        }
        let offset = offset as usize;
        let end = offset + buf.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    /// Removes the entry named at `path`. Only root may remove.
    pub fn remove(&self, path: &str, creds: Credentials) -> FsResult<()> {
        if !creds.is_root() {
            return Err(FsError::PermissionDenied);
        }
        let mut inner = self.inner.lock();
        let (parent_path, name) = Self::resolve_parent(path);
        let parent_id = match parent_path {
            Some(p) => Self::resolve(&inner, p).ok_or(FsError::NotFound)?,
            None => Self::ROOT,
        };
        let child_id = Self::find_child(&inner, parent_id, name).ok_or(FsError::NotFound)?;
        let child = &inner.nodes[child_id.0 as usize];
        if child.is_dir && !child.children.is_empty() {
            return Err(FsError::NotEmpty);
        }
        inner.nodes[parent_id.0 as usize]
            .children
            .retain(|&c| c != child_id);
        Ok(())
    }

    /// Writes directory entries for `dir` starting at index `start`
    /// into `buf`, returning the number of bytes written and advancing
    /// is left to the caller via the returned entry count.
    pub fn readdir(&self, dir: NodeId, start: usize, buf: &mut [u8]) -> FsResult<usize> {
        let inner = self.inner.lock();
        let node = &inner.nodes[dir.0 as usize];
        if !node.is_dir {
            return Err(FsError::NotADirectory);
        }
        let mut written = 0;
        for &child in node.children.iter().skip(start) {
            let child_node = &inner.nodes[child.0 as usize];
            let file_type = if child_node.is_dir {
                crate::dirent::FileType::Directory
            } else {
                crate::dirent::FileType::Regular
            };
            match crate::dirent::encode(
                &mut buf[written..],
                ino_of(child) as u32,
                file_type,
                &child_node.name,
            ) {
                Some(n) => written += n,
                None => break,
            }
        }
        Ok(written)
    }
}

impl Default for Ramfs {
    fn default() -> Self {
        Self::new()
    }
}

fn ino_of(id: NodeId) -> u64 {
    u64::from(id.0) + 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_read_back_file() {
        let fs = Ramfs::new();
        let root = Credentials::ROOT;
        let id = fs.create("/hello.txt", root).unwrap();
        fs.write(id, 0, b"hi", root).unwrap();
        let mut buf = [0u8; 8];
        let n = fs.read(id, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
    }

    #[test]
    fn write_grows_file_past_current_length() {
        let fs = Ramfs::new();
        let root = Credentials::ROOT;
        let id = fs.create("/f", root).unwrap();
        fs.write(id, 10, b"x", root).unwrap();
        assert_eq!(fs.stat("/f").unwrap().size, 11);
    }

    #[test]
    fn non_root_cannot_write() {
        let fs = Ramfs::new();
        let root = Credentials::ROOT;
        let user = Credentials { uid: 1, gid: 1 };
        let id = fs.create("/f", root).unwrap();
        assert_eq!(fs.write(id, 0, b"x", user), Err(FsError::PermissionDenied));
    }

    #[test]
    fn mkdir_allowed_for_any_caller() {
        let fs = Ramfs::new();
        let user = Credentials { uid: 7, gid: 7 };
        assert!(fs.mkdir("/sub", user).is_ok());
    }

    #[test]
    fn create_duplicate_name_errors() {
        let fs = Ramfs::new();
        let root = Credentials::ROOT;
        fs.create("/dup", root).unwrap();
        assert_eq!(fs.create("/dup", root), Err(FsError::Exists));
    }

    #[test]
    fn remove_non_empty_directory_errors() {
        let fs = Ramfs::new();
        let root = Credentials::ROOT;
        fs.mkdir("/a", root).unwrap();
        fs.create("/a/b", root).unwrap();
        assert_eq!(fs.remove("/a", root), Err(FsError::NotEmpty));
    }

    #[test]
    fn remove_empty_directory_succeeds() {
        let fs = Ramfs::new();
        let root = Credentials::ROOT;
        fs.mkdir("/a", root).unwrap();
        assert!(fs.remove("/a", root).is_ok());
        assert_eq!(fs.stat("/a"), Err(FsError::NotFound));
    }

    #[test]
    fn readdir_lists_children() {
        let fs = Ramfs::new();
        let root = Credentials::ROOT;
        fs.create("/a", root).unwrap();
        fs.create("/b", root).unwrap();
        let mut buf = [0u8; 256];
        let n = fs.readdir(Ramfs::ROOT, 0, &mut buf).unwrap();
        assert!(n > 0);
        let entry = crate::dirent::decode(&buf).unwrap();
        assert_eq!(entry.name, "a");
    }
}
