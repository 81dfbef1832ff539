//! PIO ATA (IDE) disk driver implementing [`DiskOps`].
//!
//! LBA28 PIO transfers only, polling the status register. No DMA, no
//! LBA48 for drives over 128 GiB: a hobby kernel's boot/root disks are
//! well under that, and PIO polling keeps the driver small enough to
//! audit.

use axon_core::kerr;
use axon_driver_api::block::{DiskOps, IoError};

use crate::arch::x86_64::port::Port;

const SECTOR_SIZE: usize = 512;

const STATUS_ERR: u8 = 0x01;
const STATUS_DRQ: u8 = 0x08;
const STATUS_DF: u8 = 0x20;
const STATUS_BSY: u8 = 0x80;

const CMD_IDENTIFY: u8 = 0xEC;
const CMD_READ_PIO: u8 = 0x20;
const CMD_WRITE_PIO: u8 = 0x30;

const POLL_MAX: u32 = 500_000;

struct Registers {
    data: Port<u16>,
    seccount: Port<u8>,
    lba_low: Port<u8>,
    lba_mid: Port<u8>,
    lba_high: Port<u8>,
    devsel: Port<u8>,
    status: Port<u8>,
    command: Port<u8>,
    alt_status: Port<u8>,
}

impl Registers {
    fn new(io_base: u16, ctrl_base: u16) -> Self {
        Self {
            data: Port::new(io_base),
            seccount: Port::new(io_base + 2),
            lba_low: Port::new(io_base + 3),
            lba_mid: Port::new(io_base + 4),
            lba_high: Port::new(io_base + 5),
            devsel: Port::new(io_base + 6),
            status: Port::new(io_base + 7),
            command: Port::new(io_base + 7),
            alt_status: Port::new(ctrl_base),
        }
    }

    /// A ~400ns delay via four reads of the alternate status register,
    /// the standard ATA post-command settle time.
    fn io_delay(&self) {
        // SAFETY: the alt status register is always readable once the
        // drive is selected.
        unsafe {
            for _ in 0..4 {
                self.alt_status.read();
            }
        }
    }

    fn wait_not_busy(&self) -> Result<u8, IoError> {
        for _ in 0..POLL_MAX {
            // SAFETY: the status register is always readable.
            let status = unsafe { self.status.read() };
            if status & STATUS_BSY == 0 {
                return Ok(status);
            }
        }
        Err(IoError::Timeout)
    }

    fn wait_drq(&self) -> Result<(), IoError> {
        for _ in 0..POLL_MAX {
            // SAFETY: the status register is always readable.
            let status = unsafe { self.status.read() };
            if status & (STATUS_ERR | STATUS_DF) != 0 {
                return Err(IoError::DeviceError);
            }
            if status & STATUS_DRQ != 0 {
                return Ok(());
            }
        }
        Err(IoError::Timeout)
    }

    fn select(&self, slave: bool, lba_top: u8) {
        // SAFETY: selecting a drive before issuing a command is always valid.
        unsafe {
            self.devsel
                .write(0xE0 | u8::from(slave) << 4 | (lba_top & 0x0F));
        }
        self.io_delay();
    }

    fn set_lba(&self, lba: u32, count: u8) {
        // SAFETY: these registers only take effect once a command is issued.
        unsafe {
            self.seccount.write(count);
            self.lba_low.write(lba as u8);
            self.lba_mid.write((lba >> 8) as u8);
            self.lba_high.write((lba >> 16) as u8);
        }
    }
}

/// A single IDE channel/drive pair discovered via IDENTIFY.
pub struct AtaDisk {
    regs: Registers,
    slave: bool,
    sector_count: u64,
}

impl AtaDisk {
    /// Probes `io_base`/`ctrl_base` for a drive and IDENTIFYs it.
    ///
    /// Returns `None` if no drive responds or IDENTIFY reports an error.
    #[must_use]
    pub fn probe(io_base: u16, ctrl_base: u16, slave: bool) -> Option<Self> {
        let regs = Registers::new(io_base, ctrl_base);
        // SAFETY: probing a fixed legacy IDE port range is always valid;
        // worst case a nonexistent controller returns 0xFF reads.
        unsafe {
            regs.devsel.write(0xA0 | u8::from(slave) << 4);
            regs.seccount.write(0);
            regs.lba_low.write(0);
            regs.lba_mid.write(0);
            regs.lba_high.write(0);
            regs.command.write(CMD_IDENTIFY);
        }
        // SAFETY: reading status after issuing a command is always valid.
        let status = unsafe { regs.status.read() };
        if status == 0 {
            return None;
        }
        if regs.wait_drq().is_err() {
            return None;
        }

        let mut ident = [0u16; 256];
        for word in &mut ident {
            // SAFETY: DRQ was confirmed set above.
            *word = unsafe { regs.data.read() };
        }
        let sectors = u64::from(ident[60]) | (u64::from(ident[61]) << 16);
        if sectors == 0 {
            return None;
        }

        Some(Self {
            regs,
            slave,
            sector_count: sectors,
        })
    }
}

impl DiskOps for AtaDisk {
    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), IoError> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(IoError::InvalidBuffer);
        }
        let count = (buf.len() / SECTOR_SIZE) as u64;
        if lba + count > self.sector_count {
            return Err(IoError::OutOfRange);
        }

        for (i, chunk) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            let sector_lba = (lba + i as u64) as u32;
            self.regs.wait_not_busy()?;
            self.regs.select(self.slave, (sector_lba >> 24) as u8);
            self.regs.set_lba(sector_lba, 1);
            // SAFETY: drive is selected and LBA programmed above.
            unsafe {
                self.regs.command.write(CMD_READ_PIO);
            }
            self.regs.wait_drq().inspect_err(|_| {
                kerr!("ata: read error lba={sector_lba}");
            })?;
            for word in chunk.chunks_exact_mut(2) {
                // SAFETY: DRQ confirmed above.
                let value = unsafe { self.regs.data.read() };
                word[0] = value as u8;
                word[1] = (value >> 8) as u8;
            }
        }
        Ok(())
    }

    fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), IoError> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(IoError::InvalidBuffer);
        }
        let count = (buf.len() / SECTOR_SIZE) as u64;
        if lba + count > self.sector_count {
            return Err(IoError::OutOfRange);
        }

        for (i, chunk) in buf.chunks(SECTOR_SIZE).enumerate() {
            let sector_lba = (lba + i as u64) as u32;
            self.regs.wait_not_busy()?;
            self.regs.select(self.slave, (sector_lba >> 24) as u8);
            self.regs.set_lba(sector_lba, 1);
            // SAFETY: drive is selected and LBA programmed above.
            unsafe {
                self.regs.command.write(CMD_WRITE_PIO);
            }
            self.regs.wait_drq().inspect_err(|_| {
                kerr!("ata: write error lba={sector_lba}");
            })?;
            for word in chunk.chunks_exact(2) {
                let value = u16::from(word[0]) | (u16::from(word[1]) << 8);
                // SAFETY: DRQ confirmed above.
                unsafe {
                    self.regs.data.write(value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn sector_size_is_512() {
        assert_eq!(super::SECTOR_SIZE, 512);
    }
}
