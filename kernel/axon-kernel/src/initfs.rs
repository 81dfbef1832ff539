//! Multiboot2 module discovery and cpio (newc) unpacking into ramfs.
//!
//! The bootloader hands the kernel a single `initfs` module: a cpio
//! archive built at image time holding the early userspace tree. This
//! module finds that module in the Multiboot2 tag stream and unpacks it
//! directly into [`axon_fs::ramfs::Ramfs`] before the root is mounted.

extern crate alloc;

use axon_fs::ramfs::Ramfs;
use axon_fs::Credentials;

const CPIO_HEADER_SIZE: usize = 110;
const CPIO_MAGIC_NEWC: &[u8; 6] = b"070701";
const CPIO_MAGIC_CRC: &[u8; 6] = b"070702";
const TRAILER_NAME: &str = "TRAILER!!!";

const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_DIR: u32 = 0o040000;
const MODE_REGULAR: u32 = 0o100000;
const MODE_SYMLINK: u32 = 0o120000;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn hex_field(field: &[u8]) -> u32 {
    let mut value = 0u32;
    for &byte in field {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'A'..=b'F' => byte - b'A' + 10,
            b'a'..=b'f' => byte - b'a' + 10,
            _ => 0,
        };
        value = (value << 4) | u32::from(digit);
    }
    value
}

struct CpioHeader<'a> {
    mode: u32,
    namesize: usize,
    filesize: usize,
    name: &'a [u8],
}

fn parse_header(bytes: &[u8]) -> Option<CpioHeader<'_>> {
    if bytes.len() < CPIO_HEADER_SIZE {
        return None;
    }
    let magic = &bytes[0..6];
    if magic != CPIO_MAGIC_NEWC && magic != CPIO_MAGIC_CRC {
        return None;
    }
    let mode = hex_field(&bytes[14..22]);
    let namesize = hex_field(&bytes[94..102]) as usize;
    let filesize = hex_field(&bytes[54..62]) as usize;
    let name_start = CPIO_HEADER_SIZE;
    let name_end = name_start.checked_add(namesize)?;
    if name_end > bytes.len() {
        return None;
    }
    let name = &bytes[name_start..name_end];
    let name = match name.iter().position(|&b| b == 0) {
        Some(nul) => &name[..nul],
        None => name,
    };
    Some(CpioHeader {
        mode,
        namesize,
        filesize,
        name,
    })
}

fn find_first_magic(archive: &[u8]) -> Option<usize> {
    archive
        .windows(6)
        .position(|w| w == CPIO_MAGIC_NEWC || w == CPIO_MAGIC_CRC)
}

fn ensure_parent_dirs(ramfs: &Ramfs, path: &str) {
    let creds = Credentials::ROOT;
    let mut built = alloc::string::String::new();
    let segments: alloc::vec::Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let segments = if segments.is_empty() {
        &segments[..]
    } else {
        &segments[..segments.len() - 1]
    };
    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        built.push('/');
        built.push_str(segment);
        let _ = ramfs.mkdir(&built, creds);
    }
}

/// Unpacks a cpio newc archive into `ramfs`, rooted at `/`.
///
/// Malformed trailing bytes after the last valid header are ignored;
/// unsupported entry types (device nodes, fifos) are skipped.
pub fn unpack_cpio_newc(ramfs: &Ramfs, archive: &[u8]) {
    let Some(start) = find_first_magic(archive) else {
        return;
    };

    let mut offset = start;
    let creds = Credentials::ROOT;

    while offset + 6 <= archive.len() {
        let Some(header) = parse_header(&archive[offset..]) else {
            // Resync: scan forward for the next magic.
            match find_first_magic(&archive[offset + 1..]) {
                Some(found) => {
                    offset = offset + 1 + found;
                    continue;
                }
                None => break,
            }
        };

        let name = match core::str::from_utf8(header.name) {
            Ok(name) => name,
            Err(_) => break,
        };
        if name == TRAILER_NAME {
            break;
        }

        let after_name = offset + CPIO_HEADER_SIZE + header.namesize;
        let data_offset = align4(after_name);
        let data_end = data_offset + header.filesize;
        if data_end > archive.len() {
            break;
        }

        if !(name.is_empty() || name == ".") {
            let name = name.strip_prefix("./").unwrap_or(name);
            let mut target = alloc::string::String::with_capacity(name.len() + 1);
            target.push('/');
            target.push_str(name);

            ensure_parent_dirs(ramfs, &target);

            let entry_type = header.mode & MODE_TYPE_MASK;
            let data = &archive[data_offset..data_end];
            if entry_type == MODE_DIR || target.ends_with('/') {
                let target = target.trim_end_matches('/');
                let _ = ramfs.mkdir(target, creds);
            } else if entry_type == MODE_REGULAR {
                if let Ok(id) = ramfs.create(&target, creds) {
                    let _ = ramfs.write(id, 0, data, creds);
                }
            } else if entry_type == MODE_SYMLINK {
                // No VFS symlink support yet; materialize the link target
                // as a plain file so the path at least resolves.
                let link = if data.last() == Some(&0) {
                    &data[..data.len() - 1]
                } else {
                    data
                };
                if let Ok(id) = ramfs.create(&target, creds) {
                    let _ = ramfs.write(id, 0, link, creds);
                }
            }
        }

        offset = align4(data_end);
    }
}

/// A Multiboot2 module tag's bounds within physical memory.
struct ModuleTag {
    start: u32,
    end: u32,
}

const MULTIBOOT2_MAGIC: u32 = 0x36D7_6289;
const TAG_TYPE_END: u32 = 0;
const TAG_TYPE_MODULE: u32 = 3;

/// Walks the Multiboot2 tag stream at `info_addr` looking for a module
/// tag named `module_name`, returning its physical bounds.
///
/// # Safety
///
/// `info_addr` must be the physical address of a valid Multiboot2
/// information structure, as passed by the bootloader in `ebx`.
unsafe fn find_module(magic: u32, info_addr: u32, module_name: &str) -> Option<ModuleTag> {
    if magic != MULTIBOOT2_MAGIC || info_addr == 0 {
        return None;
    }
    // SAFETY: forwarded from the caller; `info_addr` points at a
    // bootloader-supplied Multiboot2 info block for the life of this scan.
    let info = unsafe { core::slice::from_raw_parts(info_addr as *const u8, 8) };
    let total_size = u32::from_le_bytes(info[0..4].try_into().unwrap());

    let mut offset = 8u32;
    while offset + 8 <= total_size {
        // SAFETY: `offset` stays within `total_size`, which bounds the
        // structure the bootloader placed at `info_addr`.
        let tag = unsafe {
            core::slice::from_raw_parts((info_addr + offset) as *const u8, 16.min(
                (total_size - offset) as usize,
            ))
        };
        let tag_type = u32::from_le_bytes(tag[0..4].try_into().unwrap());
        let tag_size = u32::from_le_bytes(tag[4..8].try_into().unwrap());
        if tag_type == TAG_TYPE_END {
            break;
        }
        if tag_type == TAG_TYPE_MODULE && tag.len() >= 16 {
            let mod_start = u32::from_le_bytes(tag[8..12].try_into().unwrap());
            let mod_end = u32::from_le_bytes(tag[12..16].try_into().unwrap());
            // SAFETY: the name string lies within this module tag, which
            // is bounded by `tag_size` inside the Multiboot2 structure.
            let name_ptr = (info_addr + offset + 16) as *const u8;
            let name = unsafe { read_c_str(name_ptr, tag_size.saturating_sub(16) as usize) };
            if name == module_name {
                return Some(ModuleTag {
                    start: mod_start,
                    end: mod_end,
                });
            }
        }
        offset += (tag_size + 7) & !7;
    }
    None
}

/// # Safety
///
/// `ptr` must be valid for reads of up to `max_len` bytes.
unsafe fn read_c_str<'a>(ptr: *const u8, max_len: usize) -> &'a str {
    // SAFETY: forwarded from the caller.
    let bytes = unsafe { core::slice::from_raw_parts(ptr, max_len) };
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(max_len);
    core::str::from_utf8(&bytes[..len]).unwrap_or("")
}

/// Finds the `initfs` Multiboot2 module and unpacks it into `ramfs`.
///
/// Does nothing (not an error) if no such module was loaded, so a
/// developer can boot without an initfs image during bring-up.
///
/// # Safety
///
/// `multiboot_info` must be the address the bootloader passed in `ebx`
/// at kernel entry, and `multiboot_magic` the value it passed in `eax`.
pub unsafe fn load(ramfs: &Ramfs, multiboot_magic: u32, multiboot_info: u32) {
    // SAFETY: forwarded from the caller.
    let Some(module) = (unsafe { find_module(multiboot_magic, multiboot_info, "initfs") }) else {
        return;
    };
    if module.end <= module.start {
        return;
    }
    let size = (module.end - module.start) as usize;
    // SAFETY: `module.start`/`module.end` describe a Multiboot2 module
    // the bootloader placed in memory for the kernel to read.
    let archive = unsafe { core::slice::from_raw_parts(module.start as *const u8, size) };
    unpack_cpio_newc(ramfs, archive);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpio_entry(name: &str, mode: u32, data: &[u8]) -> alloc::vec::Vec<u8> {
        let mut out = alloc::vec::Vec::new();
        out.extend_from_slice(b"070701");
        for field in [0u32, mode, 0, 0, 1, 0] {
            out.extend_from_slice(alloc::format!("{field:08x}").as_bytes());
        }
        out.extend_from_slice(alloc::format!("{:08x}", data.len()).as_bytes());
        for _ in 0..4 {
            out.extend_from_slice(b"00000000");
        }
        let namesize = name.len() + 1;
        out.extend_from_slice(alloc::format!("{namesize:08x}").as_bytes());
        out.extend_from_slice(b"00000000");
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    #[test]
    fn hex_field_decodes_uppercase_and_lowercase() {
        assert_eq!(hex_field(b"0000002a"), 42);
        assert_eq!(hex_field(b"0000002A"), 42);
    }

    #[test]
    fn unpack_creates_regular_file_with_contents() {
        let ramfs = Ramfs::new();
        let mut archive = cpio_entry("hello.txt", MODE_REGULAR | 0o644, b"hi");
        archive.extend_from_slice(&cpio_entry("TRAILER!!!", 0, &[]));
        unpack_cpio_newc(&ramfs, &archive);

        let id = ramfs.open("/hello.txt").expect("file created");
        let mut buf = [0u8; 2];
        let n = ramfs.read(id, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
    }

    #[test]
    fn unpack_creates_parent_directories() {
        let ramfs = Ramfs::new();
        let mut archive = cpio_entry("bin/sh", MODE_REGULAR | 0o755, b"#!/bin/sh");
        archive.extend_from_slice(&cpio_entry("TRAILER!!!", 0, &[]));
        unpack_cpio_newc(&ramfs, &archive);

        assert!(ramfs.stat("/bin").is_ok());
        assert!(ramfs.open("/bin/sh").is_ok());
    }

    #[test]
    fn unpack_stops_at_trailer() {
        let ramfs = Ramfs::new();
        let archive = cpio_entry("TRAILER!!!", 0, &[]);
        unpack_cpio_newc(&ramfs, &archive);
        assert!(ramfs.stat("/").is_ok());
    }
}
