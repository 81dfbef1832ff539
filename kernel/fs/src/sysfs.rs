//! Attribute-backed filesystem: directories of files whose reads and
//! writes invoke driver-supplied callbacks instead of touching stored
//! bytes.
//!
//! Tree mutation (registering new nodes) is guarded by a single lock;
//! show/store callbacks are invoked with the lock released so a
//! callback that itself touches sysfs cannot deadlock against the
//! registration path.

use crate::{FsError, FsResult, Stat, S_IFDIR, S_IFREG};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use axon_core::sync::SpinLock;

/// Reads the current value of an attribute into `buf`, returning the
/// number of bytes written.
///
/// Wrapped in `Arc` rather than `Box` so [`Sysfs::read`]/[`Sysfs::write`]
/// can clone the callback out of the tree and drop the lock before
/// invoking it.
pub type ShowFn = Arc<dyn Fn(&mut [u8]) -> usize + Send + Sync>;
/// Applies a write to an attribute.
pub type StoreFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Attr {
    show: Option<ShowFn>,
    store: Option<StoreFn>,
}

struct Node {
    name: String,
    is_dir: bool,
    attr: Option<Attr>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Index of a node within a [`Sysfs`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(u32);

struct Inner {
    nodes: Vec<Node>,
}

/// The attribute-backed filesystem tree.
pub struct Sysfs {
    inner: SpinLock<Inner>,
}

const ROOT: NodeId = NodeId(0);
const SHOW_SCRATCH: usize = 4096;

impl Sysfs {
    /// Creates a sysfs with only the root directory present.
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            is_dir: true,
            attr: None,
            parent: None,
            children: Vec::new(),
        };
        Self {
            inner: SpinLock::new(Inner {
                nodes: alloc::vec![root],
            }),
        }
    }

    fn find_child(inner: &Inner, dir: NodeId, name: &str) -> Option<NodeId> {
        inner.nodes[dir.0 as usize]
            .children
            .iter()
            .copied()
            .find(|&c| inner.nodes[c.0 as usize].name == name)
    }

    fn resolve(inner: &Inner, path: &str) -> Option<NodeId> {
        let mut current = ROOT;
        for component in crate::path::components(path) {
            current = Self::find_child(inner, current, component)?;
        }
        Some(current)
    }

    fn mkdir_path(&self, path: &str) -> NodeId {
        let mut inner = self.inner.lock();
        let mut current = ROOT;
        for component in crate::path::components(path) {
            current = match Self::find_child(&inner, current, component) {
                Some(id) => id,
                None => {
                    let node = Node {
                        name: component.to_string(),
                        is_dir: true,
                        attr: None,
                        parent: Some(current),
                        children: Vec::new(),
                    };
                    let id = NodeId(inner.nodes.len() as u32);
                    inner.nodes.push(node);
                    inner.nodes[current.0 as usize].children.push(id);
                    id
                }
            };
        }
        current
    }

    /// Registers a read/write attribute file at `path`, creating any
    /// missing parent directories.
    pub fn register_attr(&self, path: &str, show: Option<ShowFn>, store: Option<StoreFn>) {
        let (parent_path, name) = match path.rsplit_once('/') {
            Some((p, n)) if !p.is_empty() => (p, n),
            Some((_, n)) => ("", n),
            None => ("", path),
        };
        let parent = self.mkdir_path(parent_path);
        let mut inner = self.inner.lock();
        let node = Node {
            name: name.to_string(),
            is_dir: false,
            attr: Some(Attr { show, store }),
            parent: Some(parent),
            children: Vec::new(),
        };
        let id = NodeId(inner.nodes.len() as u32);
        inner.nodes.push(node);
        inner.nodes[parent.0 as usize].children.push(id);
    }

    /// Opens `path`, returning its node id.
    pub fn open(&self, path: &str) -> FsResult<NodeId> {
        let inner = self.inner.lock();
        Self::resolve(&inner, path).ok_or(FsError::NotFound)
    }

    /// Reads the attribute at `id` by invoking its show callback,
    /// re-evaluated on every call.
    pub fn read(&self, id: NodeId, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let show = {
            let inner = self.inner.lock();
            let node = &inner.nodes[id.0 as usize];
            if node.is_dir {
                return Err(FsError::IsADirectory);
            }
            match &node.attr {
                Some(Attr { show: Some(show), .. }) => show.clone(),
                _ => return Ok(0),
            }
        };
        let mut scratch = [0u8; SHOW_SCRATCH];
        let len = show(&mut scratch);
        let offset = offset as usize;
        if offset >= len {
            return Ok(0);
        }
        let n = buf.len().min(len - offset);
        buf[..n].copy_from_slice(&scratch[offset..offset + n]);
        Ok(n)
    }

    /// Invokes the attribute's store callback with `buf`.
    pub fn write(&self, id: NodeId, buf: &[u8]) -> FsResult<usize> {
        let store = {
            let inner = self.inner.lock();
            let node = &inner.nodes[id.0 as usize];
            if node.is_dir {
                return Err(FsError::IsADirectory);
            }
            match &node.attr {
                Some(Attr { store: Some(store), .. }) => store.clone(),
                _ => return Err(FsError::PermissionDenied),
            }
        };
        store(buf);
        Ok(buf.len())
    }

    /// Returns current size by invoking `show` into scratch space, or
    /// 0 for directories and write-only attributes.
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
        let mode = if node.is_dir { S_IFDIR | 0o755 } else { S_IFREG | 0o644 };
        Stat {
            ino: u64::from(id.0) + 1,
            mode,
            uid: 0,
            gid: 0,
            size: 0,
        }
    }

    /// Encodes directory entries for `dir` starting at child index
    /// `start` into `buf`.
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
                u64::from(child.0) as u32 + 1,
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

impl Default for Sysfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use alloc::sync::Arc;

    #[test]
    fn show_is_reevaluated_every_read() {
        let fs = Sysfs::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        fs.register_attr(
            "/kernel/counter",
            Some(Arc::new(move |buf| {
                let v = c.fetch_add(1, Ordering::SeqCst);
                let s = if v == 0 { "0\n" } else { "1\n" };
                buf[..s.len()].copy_from_slice(s.as_bytes());
                s.len()
            })),
            None,
        );
        let id = fs.open("/kernel/counter").unwrap();
        let mut buf = [0u8; 8];
        let n1 = fs.read(id, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n1], b"0\n");
        let n2 = fs.read(id, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n2], b"1\n");
    }

    #[test]
    fn write_only_attr_read_returns_permission_denied() {
        let fs = Sysfs::new();
        fs.register_attr("/a/b", None, Some(Arc::new(|_| {})));
        let id = fs.open("/a/b").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.write(id, b"x").unwrap(), 1);
        assert_eq!(fs.read(id, 0, &mut buf), Ok(0));
    }

    #[test]
    fn register_attr_creates_parent_directories() {
        let fs = Sysfs::new();
        fs.register_attr("/a/b/c", Some(Arc::new(|_| 0)), None);
        assert!(fs.open("/a/b/c").is_ok());
        assert!(fs.open("/a/b").is_ok());
    }
}
