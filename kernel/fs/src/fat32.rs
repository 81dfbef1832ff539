//! Read-write FAT32 driver for a single block device.
//!
//! Only long-file-name entries are surfaced; short-only 8.3 entries
//! are skipped by the directory reader. This is a deliberate
//! simplification matching the hobby scope of this filesystem: a
//! volume formatted by any modern tool always writes an LFN entry
//! alongside the short one for non-8.3-compatible names, and files
//! this driver itself creates always get one.

use crate::{Credentials, FsError, FsResult, Stat, S_IFDIR, S_IFREG};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use axon_driver_api::DiskOps;
use axon_core::sync::SpinLock;

const END_OF_CHAIN_MIN: u32 = 0x0FFF_FFF8;
const FREE_CLUSTER: u32 = 0;
const DIR_ENTRY_SIZE: usize = 32;
const ATTR_LFN: u8 = 0x0F;
const ATTR_DIRECTORY: u8 = 0x10;
const LAST_LFN_FLAG: u8 = 0x40;

struct Geometry {
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    num_fats: u32,
    sectors_per_fat: u32,
    root_cluster: u32,
    first_fat_sector: u32,
    first_data_sector: u32,
}

/// A mounted FAT32 volume.
pub struct Fat32Volume {
    device: Arc<dyn DiskOps>,
    geometry: Geometry,
    fat_cache_lock: SpinLock<()>,
}

/// A reference to an open file or directory within a volume: its
/// first cluster and, for files, cached size.
#[derive(Debug, Clone, Copy)]
pub struct FileRef {
    /// First cluster of the file or directory's data.
    pub start_cluster: u32,
    /// File size in bytes (0 and unused for directories).
    pub size: u32,
    /// Directory entry location, used to rewrite size/start cluster
    /// after a write: (cluster containing the short entry, byte offset
    /// of the short entry within that cluster).
    dirent_location: Option<(u32, usize)>,
    is_dir: bool,
}

impl Fat32Volume {
    /// Probes `device` for a FAT32 BPB at sector 0, returning a
    /// mounted volume on success.
    pub fn mount(device: Arc<dyn DiskOps>) -> FsResult<Self> {
        let sector_size = device.sector_size();
        let mut sector0 = vec![0u8; sector_size];
        device
            .read_sectors(0, &mut sector0)
            .map_err(|_| FsError::DeviceError)?;

        let bpb = Self::parse_bpb(&sector0).ok_or(FsError::InvalidArgument)?;
        Ok(Self {
            device,
            geometry: bpb,
            fat_cache_lock: SpinLock::new(()),
        })
    }

    fn parse_bpb(sector: &[u8]) -> Option<Geometry> {
        if sector.len() < 512 || sector[510] != 0x55 || sector[511] != 0xAA {
            return None;
        }
        let bytes_per_sector = u16::from_le_bytes(sector[11..13].try_into().ok()?) as u32;
        let sectors_per_cluster = sector[13] as u32;
        let reserved_sectors = u16::from_le_bytes(sector[14..16].try_into().ok()?) as u32;
        let num_fats = sector[16] as u32;
        let sectors_per_fat = u32::from_le_bytes(sector[36..40].try_into().ok()?);
        let root_cluster = u32::from_le_bytes(sector[44..48].try_into().ok()?);

        if bytes_per_sector == 0 || sectors_per_cluster == 0 || sectors_per_fat == 0 {
            return None;
        }

        let first_fat_sector = reserved_sectors;
        let first_data_sector = first_fat_sector + num_fats * sectors_per_fat;

        Some(Geometry {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            sectors_per_fat,
            root_cluster,
            first_fat_sector,
            first_data_sector,
        })
    }

    fn cluster_to_lba(&self, cluster: u32) -> u64 {
        u64::from(self.geometry.first_data_sector)
            + u64::from(cluster - 2) * u64::from(self.geometry.sectors_per_cluster)
    }

    fn bytes_per_cluster(&self) -> usize {
        (self.geometry.bytes_per_sector * self.geometry.sectors_per_cluster) as usize
    }

    fn read_cluster(&self, cluster: u32) -> FsResult<Vec<u8>> {
        let mut buf = vec![0u8; self.bytes_per_cluster()];
        self.device
            .read_sectors(self.cluster_to_lba(cluster), &mut buf)
            .map_err(|_| FsError::DeviceError)?;
        Ok(buf)
    }

    fn write_cluster(&self, cluster: u32, data: &[u8]) -> FsResult<()> {
        self.device
            .write_sectors(self.cluster_to_lba(cluster), data)
            .map_err(|_| FsError::DeviceError)
    }

    fn fat_entry_location(&self, cluster: u32) -> (u64, usize) {
        let fat_offset = cluster as u64 * 4;
        let sector = u64::from(self.geometry.first_fat_sector) + fat_offset / u64::from(self.geometry.bytes_per_sector);
        let within = (fat_offset % u64::from(self.geometry.bytes_per_sector)) as usize;
        (sector, within)
    }

    fn read_fat_entry(&self, cluster: u32) -> FsResult<u32> {
        let _guard = self.fat_cache_lock.lock();
        let (sector, within) = self.fat_entry_location(cluster);
        let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
        self.device
            .read_sectors(sector, &mut buf)
            .map_err(|_| FsError::DeviceError)?;
        Ok(u32::from_le_bytes(buf[within..within + 4].try_into().unwrap()) & 0x0FFF_FFFF)
    }

    fn write_fat_entry(&self, cluster: u32, value: u32) -> FsResult<()> {
        let _guard = self.fat_cache_lock.lock();
        let (sector, within) = self.fat_entry_location(cluster);
        for fat_index in 0..self.geometry.num_fats {
            let fat_sector = sector + u64::from(fat_index) * u64::from(self.geometry.sectors_per_fat);
            let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
            self.device
                .read_sectors(fat_sector, &mut buf)
                .map_err(|_| FsError::DeviceError)?;
            let existing = u32::from_le_bytes(buf[within..within + 4].try_into().unwrap());
            let merged = (existing & 0xF000_0000) | (value & 0x0FFF_FFFF);
            buf[within..within + 4].copy_from_slice(&merged.to_le_bytes());
            self.device
                .write_sectors(fat_sector, &buf)
                .map_err(|_| FsError::DeviceError)?;
        }
        Ok(())
    }

    fn alloc_cluster(&self) -> FsResult<u32> {
        let total_entries = self.geometry.sectors_per_fat * self.geometry.bytes_per_sector / 4;
        for candidate in 2..total_entries {
            if self.read_fat_entry(candidate)? == FREE_CLUSTER {
                self.write_fat_entry(candidate, END_OF_CHAIN_MIN)?;
                return Ok(candidate);
            }
        }
        Err(FsError::ResourceExhausted)
    }

    fn cluster_chain(&self, start: u32) -> FsResult<Vec<u32>> {
        let mut chain = Vec::new();
        let mut current = start;
        while current < END_OF_CHAIN_MIN && current >= 2 {
            chain.push(current);
            current = self.read_fat_entry(current)?;
        }
        Ok(chain)
    }

    /// Opens the file or directory at `path` relative to the root.
    pub fn open(&self, path: &str) -> FsResult<FileRef> {
        let mut current = FileRef {
            start_cluster: self.geometry.root_cluster,
            size: 0,
            dirent_location: None,
            is_dir: true,
        };
        for component in crate::path::components(path) {
            current = self.lookup_in_dir(current.start_cluster, component)?;
        }
        Ok(current)
    }

    fn lookup_in_dir(&self, dir_cluster: u32, name: &str) -> FsResult<FileRef> {
        for entry in self.read_dir_entries(dir_cluster)? {
            if entry.name.eq_ignore_ascii_case(name) {
                return Ok(FileRef {
                    start_cluster: entry.start_cluster,
                    size: entry.size,
                    dirent_location: Some(entry.dirent_location),
                    is_dir: entry.is_dir,
                });
            }
        }
        Err(FsError::NotFound)
    }

    fn read_dir_entries(&self, dir_cluster: u32) -> FsResult<Vec<DirListEntry>> {
        let mut results = Vec::new();
        let mut lfn_parts: Vec<(u8, [u16; 13])> = Vec::new();

        for cluster in self.cluster_chain(dir_cluster)? {
            let data = self.read_cluster(cluster)?;
            for (idx, raw) in data.chunks(DIR_ENTRY_SIZE).enumerate() {
                if raw.len() < DIR_ENTRY_SIZE || raw[0] == 0x00 {
                    break;
                }
                if raw[0] == 0xE5 {
                    lfn_parts.clear();
                    continue;
                }
                let attr = raw[11];
                if attr == ATTR_LFN {
                    let seq = raw[0] & !LAST_LFN_FLAG;
                    let mut units = [0u16; 13];
                    for (i, chunk) in raw[1..11].chunks(2).enumerate() {
                        units[i] = u16::from_le_bytes([chunk[0], chunk[1]]);
                    }
                    for (i, chunk) in raw[14..26].chunks(2).enumerate() {
                        units[5 + i] = u16::from_le_bytes([chunk[0], chunk[1]]);
                    }
                    for (i, chunk) in raw[28..32].chunks(2).enumerate() {
                        units[11 + i] = u16::from_le_bytes([chunk[0], chunk[1]]);
                    }
                    lfn_parts.push((seq, units));
                    continue;
                }

                if lfn_parts.is_empty() {
                    // Short-only entry with no preceding LFN parts: skip.
                    continue;
                }

                lfn_parts.sort_by_key(|(seq, _)| *seq);
                let mut name = String::new();
                for (_, units) in &lfn_parts {
                    for &u in units {
                        if u == 0 || u == 0xFFFF {
                            break;
                        }
                        if let Some(c) = char::from_u32(u32::from(u)) {
                            name.push(c);
                        }
                    }
                }
                lfn_parts.clear();

                let start_hi = u16::from_le_bytes(raw[20..22].try_into().unwrap()) as u32;
                let start_lo = u16::from_le_bytes(raw[26..28].try_into().unwrap()) as u32;
                let start_cluster = (start_hi << 16) | start_lo;
                let size = u32::from_le_bytes(raw[28..32].try_into().unwrap());

                results.push(DirListEntry {
                    name,
                    start_cluster,
                    size,
                    is_dir: attr & ATTR_DIRECTORY != 0,
                    dirent_location: (cluster, idx * DIR_ENTRY_SIZE),
                });
            }
        }
        Ok(results)
    }

    /// Writes directory entries for `dir` into the shared dirent
    /// encoding, starting at listing index `start`.
    pub fn readdir(&self, dir: &FileRef, start: usize, buf: &mut [u8]) -> FsResult<usize> {
        if !dir.is_dir {
            return Err(FsError::NotADirectory);
        }
        let entries = self.read_dir_entries(dir.start_cluster)?;
        let mut written = 0;
        for (i, entry) in entries.iter().enumerate().skip(start) {
            let file_type = if entry.is_dir {
                crate::dirent::FileType::Directory
            } else {
                crate::dirent::FileType::Regular
            };
            match crate::dirent::encode(&mut buf[written..], entry.start_cluster, file_type, &entry.name) {
                Some(n) => written += n,
                None => break,
            }
            let _ = i;
        }
        Ok(written)
    }

    /// Reads up to `buf.len()` bytes at `offset` from `file`.
    pub fn read(&self, file: &FileRef, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        if file.is_dir {
            return Err(FsError::IsADirectory);
        }
        if offset >= u64::from(file.size) {
            return Ok(0);
        }
        let cluster_size = self.bytes_per_cluster() as u64;
        let chain = self.cluster_chain(file.start_cluster)?;
        let mut produced = 0usize;
        let want = buf.len().min((u64::from(file.size) - offset) as usize);

        let mut remaining_skip = offset;
        for cluster in chain {
            if remaining_skip >= cluster_size {
                remaining_skip -= cluster_size;
                continue;
            }
            let data = self.read_cluster(cluster)?;
            let start = remaining_skip as usize;
            remaining_skip = 0;
            let take = (data.len() - start).min(want - produced);
            buf[produced..produced + take].copy_from_slice(&data[start..start + take]);
            produced += take;
            if produced >= want {
                break;
            }
        }
        Ok(produced)
    }

    /// Writes `buf` at `offset`, allocating new clusters as needed and
    /// updating the directory entry's size/start cluster.
    pub fn write(&self, file: &mut FileRef, offset: u64, buf: &[u8]) -> FsResult<usize> {
        if file.is_dir {
            return Err(FsError::IsADirectory);
        }
        let cluster_size = self.bytes_per_cluster() as u64;
        let mut chain = self.cluster_chain(file.start_cluster)?;

        let clusters_needed = ((offset + buf.len() as u64).div_ceil(cluster_size)) as usize;
        while chain.len() < clusters_needed {
            let new_cluster = self.alloc_cluster()?;
            if let Some(&last) = chain.last() {
                self.write_fat_entry(last, new_cluster)?;
            }
            chain.push(new_cluster);
        }

        let mut remaining_skip = offset;
        let mut consumed = 0usize;
        for &cluster in &chain {
            if remaining_skip >= cluster_size {
                remaining_skip -= cluster_size;
                continue;
            }
            let mut data = self.read_cluster(cluster)?;
            let start = remaining_skip as usize;
            remaining_skip = 0;
            let take = (data.len() - start).min(buf.len() - consumed);
            data[start..start + take].copy_from_slice(&buf[consumed..consumed + take]);
            self.write_cluster(cluster, &data)?;
            consumed += take;
            if consumed >= buf.len() {
                break;
            }
        }

        let new_size = file.size.max((offset + buf.len() as u64) as u32);
        file.size = new_size;
        if let Some((dirent_cluster, byte_offset)) = file.dirent_location {
            let mut data = self.read_cluster(dirent_cluster)?;
            data[byte_offset + 28..byte_offset + 32].copy_from_slice(&new_size.to_le_bytes());
            self.write_cluster(dirent_cluster, &data)?;
        }
        Ok(consumed)
    }

    /// Creates a new empty file named `name` inside directory `parent`.
    pub fn create(&self, parent: &FileRef, name: &str, _creds: Credentials) -> FsResult<FileRef> {
        if !parent.is_dir {
            return Err(FsError::NotADirectory);
        }
        if self.lookup_in_dir(parent.start_cluster, name).is_ok() {
            return Err(FsError::Exists);
        }
        let cluster = self.alloc_cluster()?;
        self.append_directory_entry(parent.start_cluster, name, cluster, false)?;
        Ok(FileRef {
            start_cluster: cluster,
            size: 0,
            dirent_location: self.lookup_in_dir(parent.start_cluster, name)?.dirent_location,
            is_dir: false,
        })
    }

    /// Creates a new directory named `name` inside directory `parent`.
    pub fn mkdir(&self, parent: &FileRef, name: &str) -> FsResult<FileRef> {
        if !parent.is_dir {
            return Err(FsError::NotADirectory);
        }
        let cluster = self.alloc_cluster()?;
        self.write_cluster(cluster, &vec![0u8; self.bytes_per_cluster()])?;
        self.append_directory_entry(parent.start_cluster, name, cluster, true)?;
        Ok(FileRef {
            start_cluster: cluster,
            size: 0,
            dirent_location: None,
            is_dir: true,
        })
    }

    fn append_directory_entry(
        &self,
        dir_cluster: u32,
        name: &str,
        start_cluster: u32,
        is_dir: bool,
    ) -> FsResult<()> {
        let short_name = short_name_placeholder(name);
        let checksum = lfn_checksum(&short_name);
        let units: Vec<u16> = name.encode_utf16().collect();
        let lfn_entry_count = units.len().div_ceil(13).max(1);

        let mut entries: Vec<[u8; DIR_ENTRY_SIZE]> = Vec::new();
        for seq in (1..=lfn_entry_count).rev() {
            let mut raw = [0u8; DIR_ENTRY_SIZE];
            let mut ordinal = seq as u8;
            if seq == lfn_entry_count {
                ordinal |= LAST_LFN_FLAG;
            }
            raw[0] = ordinal;
            raw[11] = ATTR_LFN;
            raw[13] = checksum;
            let base = (seq - 1) * 13;
            let mut chars = [0xFFFFu16; 13];
            for i in 0..13 {
                if base + i < units.len() {
                    chars[i] = units[base + i];
                } else if base + i == units.len() {
                    chars[i] = 0;
                }
            }
            for (i, &c) in chars[0..5].iter().enumerate() {
                raw[1 + i * 2..3 + i * 2].copy_from_slice(&c.to_le_bytes());
            }
            for (i, &c) in chars[5..11].iter().enumerate() {
                raw[14 + i * 2..16 + i * 2].copy_from_slice(&c.to_le_bytes());
            }
            for (i, &c) in chars[11..13].iter().enumerate() {
                raw[28 + i * 2..30 + i * 2].copy_from_slice(&c.to_le_bytes());
            }
            entries.push(raw);
        }

        let mut short_entry = [0u8; DIR_ENTRY_SIZE];
        short_entry[0..11].copy_from_slice(&short_name);
        short_entry[11] = if is_dir { ATTR_DIRECTORY } else { 0 };
        short_entry[20..22].copy_from_slice(&((start_cluster >> 16) as u16).to_le_bytes());
        short_entry[26..28].copy_from_slice(&((start_cluster & 0xFFFF) as u16).to_le_bytes());
        short_entry[28..32].copy_from_slice(&0u32.to_le_bytes());
        entries.push(short_entry);

        let chain = self.cluster_chain(dir_cluster)?;
        let needed_bytes = entries.len() * DIR_ENTRY_SIZE;
        let mut target_cluster = *chain.last().unwrap_or(&dir_cluster);
        let mut data = self.read_cluster(target_cluster)?;
        let free_offset = data
            .chunks(DIR_ENTRY_SIZE)
            .position(|c| c[0] == 0x00 || c[0] == 0xE5);

        let mut offset = match free_offset.map(|idx| idx * DIR_ENTRY_SIZE) {
            Some(offset) => offset,
            None => {
                let new_cluster = self.alloc_cluster()?;
                self.write_fat_entry(target_cluster, new_cluster)?;
                target_cluster = new_cluster;
                data = vec![0u8; self.bytes_per_cluster()];
                0
            }
        };

        if offset + needed_bytes > data.len() {
            return Err(FsError::ResourceExhausted);
        }
        for entry in &entries {
            data[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(entry);
            offset += DIR_ENTRY_SIZE;
        }
        self.write_cluster(target_cluster, &data)?;
        Ok(())
    }

    /// Stats the given file reference.
    pub fn stat(&self, file: &FileRef) -> Stat {
        Stat {
            ino: u64::from(file.start_cluster),
            mode: if file.is_dir { S_IFDIR | 0o755 } else { S_IFREG | 0o644 },
            uid: 0,
            gid: 0,
            size: u64::from(file.size),
        }
    }
}

struct DirListEntry {
    name: String,
    start_cluster: u32,
    size: u32,
    is_dir: bool,
    dirent_location: (u32, usize),
}

fn short_name_placeholder(name: &str) -> [u8; 11] {
    let mut out = [b' '; 11];
    let upper: String = name.chars().take(8).collect::<String>().to_uppercase();
    let bytes = upper.as_bytes();
    let n = bytes.len().min(8);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &b in short_name {
        sum = (sum >> 1).wrapping_add(sum << 7).wrapping_add(b);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU8, Ordering};

    struct MemDisk {
        sectors: SpinLock<Vec<u8>>,
    }

    impl MemDisk {
        fn formatted(total_sectors: usize) -> Self {
            let mut data = vec![0u8; total_sectors * 512];
            // Minimal BPB: 512 bytes/sector, 1 sector/cluster, 1
            // reserved sector, 1 FAT, 32 sectors/FAT, root cluster 2.
            data[11..13].copy_from_slice(&512u16.to_le_bytes());
            data[13] = 1;
            data[14..16].copy_from_slice(&1u16.to_le_bytes());
            data[16] = 1;
            data[36..40].copy_from_slice(&32u32.to_le_bytes());
            data[44..48].copy_from_slice(&2u32.to_le_bytes());
            data[510] = 0x55;
            data[511] = 0xAA;
            // mark root cluster (2) as end-of-chain in the FAT (sector 1)
            let fat_sector_off = 512;
            data[fat_sector_off + 8..fat_sector_off + 12]
                .copy_from_slice(&END_OF_CHAIN_MIN.to_le_bytes());
            Self {
                sectors: SpinLock::new(data),
            }
        }
    }

    impl DiskOps for MemDisk {
        fn sector_size(&self) -> usize {
            512
        }
        fn sector_count(&self) -> u64 {
            (self.sectors.lock().len() / 512) as u64
        }
        fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), axon_driver_api::IoError> {
            let data = self.sectors.lock();
            let start = lba as usize * 512;
            buf.copy_from_slice(&data[start..start + buf.len()]);
            Ok(())
        }
        fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), axon_driver_api::IoError> {
            let mut data = self.sectors.lock();
            let start = lba as usize * 512;
            data[start..start + buf.len()].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn mount_recognizes_valid_bpb() {
        let disk = Arc::new(MemDisk::formatted(64));
        assert!(Fat32Volume::mount(disk).is_ok());
    }

    #[test]
    fn mount_rejects_missing_signature() {
        let disk = Arc::new(MemDisk {
            sectors: SpinLock::new(vec![0u8; 512 * 4]),
        });
        assert!(Fat32Volume::mount(disk).is_err());
    }

    #[test]
    fn create_write_read_round_trip() {
        let disk = Arc::new(MemDisk::formatted(64));
        let vol = Fat32Volume::mount(disk).unwrap();
        let root = vol.open("").unwrap();
        let mut file = vol.create(&root, "hello.txt", Credentials::ROOT).unwrap();
        vol.write(&mut file, 0, b"hi there").unwrap();
        let mut buf = [0u8; 32];
        let n = vol.read(&file, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi there");
    }

    #[test]
    fn lfn_checksum_is_deterministic() {
        let counter = AtomicU8::new(0);
        let name = short_name_placeholder("readme");
        let sum1 = lfn_checksum(&name);
        counter.fetch_add(1, Ordering::Relaxed);
        let sum2 = lfn_checksum(&name);
        assert_eq!(sum1, sum2);
    }
}
