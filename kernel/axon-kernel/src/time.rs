//! Boot-relative time, driven by the PIT channel 0 tick count.
//!
//! The PIT is programmed once at [`init`] to fire at
//! [`crate::config::PIT_HZ`]; each interrupt increments [`TICKS`]. This
//! gives millisecond-resolution wall-clock-since-boot with no HPET/APIC
//! timer calibration dance, appropriate for a single-CPU kernel.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86_64::port::Port;
use crate::config::PIT_HZ;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_BASE_HZ: u32 = 1_193_182;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Programs PIT channel 0 for a square wave at [`PIT_HZ`] and unmasks
/// IRQ0 on the PIC.
///
/// # Safety
///
/// Must run once, after the PIC has been remapped, with interrupts
/// still disabled.
pub unsafe fn init() {
    let divisor = (PIT_BASE_HZ / PIT_HZ).clamp(1, u16::MAX as u32) as u16;
    let command: Port<u8> = Port::new(PIT_COMMAND);
    let channel0: Port<u8> = Port::new(PIT_CHANNEL0);
    // SAFETY: 0x36 selects channel 0, lobyte/hibyte access, mode 3
    // (square wave). The PIT always responds to this command.
    unsafe {
        command.write(0x36);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
}

/// Called from the timer interrupt handler on every PIT tick.
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Milliseconds elapsed since [`init`] was called (0 beforehand).
#[must_use]
pub fn boot_millis() -> u64 {
    TICKS.load(Ordering::Relaxed) * 1000 / u64::from(PIT_HZ)
}

/// Nanoseconds elapsed since boot, derived from [`boot_millis`].
#[must_use]
pub fn boot_nanos() -> u64 {
    boot_millis() * 1_000_000
}

/// Current scheduler tick count (1 tick per PIT interrupt).
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Date and time read from the CMOS real-time clock, BCD-decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcTime {
    /// Seconds, 0-59.
    pub second: u8,
    /// Minutes, 0-59.
    pub minute: u8,
    /// Hours, 0-23.
    pub hour: u8,
    /// Day of month, 1-31.
    pub day: u8,
    /// Month, 1-12.
    pub month: u8,
    /// Two-digit year as stored by the CMOS (no century byte support).
    pub year: u8,
}

const CMOS_ADDRESS: u16 = 0x70;
const CMOS_DATA: u16 = 0x71;

fn cmos_read(reg: u8) -> u8 {
    let address: Port<u8> = Port::new(CMOS_ADDRESS);
    let data: Port<u8> = Port::new(CMOS_DATA);
    // SAFETY: CMOS index/data ports are always present on x86_64 platforms.
    unsafe {
        address.write(reg);
        data.read()
    }
}

fn bcd_to_bin(v: u8) -> u8 {
    (v & 0x0F) + (v >> 4) * 10
}

/// Reads the current RTC time, polling until two consecutive reads
/// agree (avoids sampling mid-update).
#[must_use]
pub fn read_rtc() -> RtcTime {
    loop {
        let first = sample_rtc();
        let second = sample_rtc();
        if first == second {
            return first;
        }
    }
}

fn sample_rtc() -> RtcTime {
    RtcTime {
        second: bcd_to_bin(cmos_read(0x00)),
        minute: bcd_to_bin(cmos_read(0x02)),
        hour: bcd_to_bin(cmos_read(0x04)),
        day: bcd_to_bin(cmos_read(0x07)),
        month: bcd_to_bin(cmos_read(0x08)),
        year: bcd_to_bin(cmos_read(0x09)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_to_bin_decodes_packed_digits() {
        assert_eq!(bcd_to_bin(0x42), 42);
        assert_eq!(bcd_to_bin(0x00), 0);
        assert_eq!(bcd_to_bin(0x59), 59);
    }

    #[test]
    fn on_tick_advances_millis_proportionally_to_pit_hz() {
        TICKS.store(0, Ordering::Relaxed);
        for _ in 0..PIT_HZ {
            on_tick();
        }
        assert_eq!(boot_millis(), 1000);
    }
}
