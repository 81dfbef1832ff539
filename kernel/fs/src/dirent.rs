//! ext2-like directory entry binary encoding.
//!
//! Every driver (ramfs, sysfs, devfs, FAT32) synthesizes directory
//! listings into this one layout so a single consumer can walk any
//! mounted directory the same way:
//!
//! ```text
//! inode:     u32 (LE)
//! rec_len:   u16 (LE)   total length of this entry, name included
//! name_len:  u8
//! file_type: u8
//! name:      name_len bytes, not NUL-terminated
//! ```

/// File type tag stored in a directory entry, independent of any
/// backing filesystem's own type representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    /// Regular file.
    Regular = 1,
    /// Directory.
    Directory = 2,
    /// Character device.
    CharDevice = 3,
    /// Block device.
    BlockDevice = 4,
    /// Symbolic link.
    Symlink = 5,
}

/// Writes one directory entry into `out`, returning the number of
/// bytes written, or `None` if `out` is too small.
#[must_use]
pub fn encode(out: &mut [u8], inode: u32, file_type: FileType, name: &str) -> Option<usize> {
    let name_bytes = name.as_bytes();
    if name_bytes.len() > u8::MAX as usize {
        return None;
    }
    let rec_len = 4 + 2 + 1 + 1 + name_bytes.len();
    if out.len() < rec_len {
        return None;
    }
    out[0..4].copy_from_slice(&inode.to_le_bytes());
    out[4..6].copy_from_slice(&(rec_len as u16).to_le_bytes());
    out[6] = name_bytes.len() as u8;
    out[7] = file_type as u8;
    out[8..8 + name_bytes.len()].copy_from_slice(name_bytes);
    Some(rec_len)
}

/// A decoded view into one entry of an encoded directory entry
/// stream, borrowing its name from the underlying buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntryRef<'a> {
    /// Inode number.
    pub inode: u32,
    /// Total record length, including the header.
    pub rec_len: u16,
    /// File type tag.
    pub file_type: u8,
    /// Entry name.
    pub name: &'a str,
}

/// Decodes a single directory entry at the start of `buf`.
#[must_use]
pub fn decode(buf: &[u8]) -> Option<DirEntryRef<'_>> {
    if buf.len() < 8 {
        return None;
    }
    let inode = u32::from_le_bytes(buf[0..4].try_into().ok()?);
    let rec_len = u16::from_le_bytes(buf[4..6].try_into().ok()?);
    let name_len = buf[6] as usize;
    let file_type = buf[7];
    let name_bytes = buf.get(8..8 + name_len)?;
    let name = core::str::from_utf8(name_bytes).ok()?;
    Some(DirEntryRef {
        inode,
        rec_len,
        file_type,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_recovers_fields() {
        let mut buf = [0u8; 64];
        let written = encode(&mut buf, 42, FileType::Regular, "hello.txt").unwrap();
        let entry = decode(&buf[..written]).unwrap();
        assert_eq!(entry.inode, 42);
        assert_eq!(entry.name, "hello.txt");
        assert_eq!(entry.file_type, FileType::Regular as u8);
    }

    #[test]
    fn encode_fails_when_buffer_too_small() {
        let mut buf = [0u8; 4];
        assert!(encode(&mut buf, 1, FileType::Directory, "x").is_none());
    }

    #[test]
    fn rec_len_accounts_for_header_and_name() {
        let mut buf = [0u8; 64];
        let written = encode(&mut buf, 1, FileType::Directory, "abc").unwrap();
        assert_eq!(written, 8 + 3);
    }
}
