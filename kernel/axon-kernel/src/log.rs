//! Two-phase kernel logger.
//!
//! Phase 1 (pre-heap): [`init_early_serial`] wires `axon_core::log`'s
//! print/log functions directly to COM1, with no locks and no
//! allocation, so boot up through heap init can use `kinfo!`/`kwarn!`.
//!
//! Phase 2 (post-heap): [`init_logger`] installs [`Logger`], a
//! `Vec<Box<dyn LogSink>>` behind a `SpinLock`, and replaces the early
//! functions. [`add_sink`] registers further sinks (the VGA console).

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};

use axon_core::log::LogLevel;
use axon_core::sync::SpinLock;

const COM1: u16 = 0x3F8;

/// A 16550-compatible serial port, programmed for 38400 8N1.
struct SerialPort(u16);

impl SerialPort {
    /// # Safety
    ///
    /// `base` must be a real, unclaimed 16550 UART I/O base.
    unsafe fn init(base: u16) -> Self {
        use crate::arch::x86_64::port::Port;
        // SAFETY: standard 16550 init sequence; `base` is a valid UART base.
        unsafe {
            Port::<u8>::new(base + 1).write(0x00); // disable interrupts
            Port::<u8>::new(base + 3).write(0x80); // enable DLAB
            Port::<u8>::new(base).write(0x03); // divisor low: 38400 baud
            Port::<u8>::new(base + 1).write(0x00); // divisor high
            Port::<u8>::new(base + 3).write(0x03); // 8 bits, no parity, one stop bit
            Port::<u8>::new(base + 2).write(0xC7); // enable FIFO, clear, 14-byte threshold
            Port::<u8>::new(base + 4).write(0x0B); // IRQs enabled, RTS/DSR set
        }
        Self(base)
    }

    fn write_byte(&self, byte: u8) {
        use crate::arch::x86_64::port::Port;
        let line_status: Port<u8> = Port::new(self.0 + 5);
        let data: Port<u8> = Port::new(self.0);
        // SAFETY: polling the line status register before writing is the
        // standard 16550 transmit handshake.
        unsafe {
            while line_status.read() & 0x20 == 0 {}
            data.write(byte);
        }
    }
}

struct SerialWriter(SerialPort);

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.0.write_byte(b'\r');
            }
            self.0.write_byte(byte);
        }
        Ok(())
    }
}

fn new_serial_writer() -> SerialWriter {
    // SAFETY: COM1 is a fixed legacy port, reprogrammed defensively on
    // every write; concurrent writers interleave bytes but never corrupt
    // the hardware state machine since each write re-sets the same mode.
    SerialWriter(unsafe { SerialPort::init(COM1) })
}

fn early_serial_print(args: fmt::Arguments<'_>) {
    let mut w = new_serial_writer();
    let _ = w.write_fmt(args);
}

fn early_serial_log(level: LogLevel, args: fmt::Arguments<'_>) {
    let nanos = crate::time::boot_nanos();
    let micros = nanos / 1_000;
    let secs = micros / 1_000_000;
    let frac = micros % 1_000_000;
    let mut w = new_serial_writer();
    let _ = write!(w, "[{secs:>5}.{frac:06}] {} {args}\n", level.name());
}

/// Registers the lock-free early serial print/log functions.
///
/// Call once, before the heap allocator is available.
pub fn init_early_serial() {
    // SAFETY: both functions construct their port state on the stack and
    // are safe to call from any context.
    unsafe {
        axon_core::log::set_print_fn(early_serial_print);
        axon_core::log::set_log_fn(early_serial_log);
    }
}

/// A dyn-compatible output sink for the logger.
pub trait LogSink: Send + Sync {
    /// Writes a string fragment to this sink.
    fn write_str(&self, s: &str);
    /// Highest level this sink accepts (messages at or below are written).
    fn max_level(&self) -> LogLevel;
    /// Sink name, used by [`replace_sink_by_name`].
    fn name(&self) -> &str;
}

/// A [`LogSink`] writing to the COM1 serial port.
pub struct SerialSink {
    max_level: LogLevel,
}

impl SerialSink {
    /// Creates a serial sink accepting messages at or below `max_level`.
    #[must_use]
    pub fn new(max_level: LogLevel) -> Self {
        Self { max_level }
    }
}

impl LogSink for SerialSink {
    fn write_str(&self, s: &str) {
        let mut w = new_serial_writer();
        let _ = fmt::Write::write_str(&mut w, s);
    }

    fn max_level(&self) -> LogLevel {
        self.max_level
    }

    fn name(&self) -> &str {
        "serial"
    }
}

/// A [`LogSink`] writing to the VGA text console.
pub struct VgaSink {
    max_level: LogLevel,
}

impl VgaSink {
    /// Creates a VGA sink accepting messages at or below `max_level`.
    #[must_use]
    pub fn new(max_level: LogLevel) -> Self {
        Self { max_level }
    }
}

impl LogSink for VgaSink {
    fn write_str(&self, s: &str) {
        crate::drivers::vga_console::print_str(s);
    }

    fn max_level(&self) -> LogLevel {
        self.max_level
    }

    fn name(&self) -> &str {
        "vga"
    }
}

struct LoggerInner {
    sinks: Vec<Box<dyn LogSink>>,
}

/// The kernel logger: fans out formatted output to every registered sink.
pub struct Logger {
    inner: SpinLock<Option<LoggerInner>>,
}

impl Logger {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new(None),
        }
    }

    fn init_with_serial(&self) {
        {
            let mut guard = self.inner.lock();
            let mut sinks: Vec<Box<dyn LogSink>> = Vec::with_capacity(2);
            sinks.push(Box::new(SerialSink::new(LogLevel::Trace)));
            *guard = Some(LoggerInner { sinks });
        }
        // SAFETY: logger_print/logger_log are safe to call from any context.
        unsafe {
            axon_core::log::set_print_fn(logger_print);
            axon_core::log::set_log_fn(logger_log);
        }
    }

    fn add_sink(&self, sink: Box<dyn LogSink>) {
        let mut guard = self.inner.lock();
        if let Some(inner) = guard.as_mut() {
            inner.sinks.push(sink);
        }
    }

    fn replace_sink_by_name(&self, name: &str, new_sink: Box<dyn LogSink>) -> bool {
        let mut guard = self.inner.lock();
        if let Some(inner) = guard.as_mut() {
            for sink in &mut inner.sinks {
                if sink.name() == name {
                    *sink = new_sink;
                    return true;
                }
            }
        }
        false
    }

    fn write_fmt(&self, args: fmt::Arguments<'_>) {
        let guard = self.inner.lock();
        if let Some(inner) = guard.as_ref() {
            for sink in &inner.sinks {
                let mut w = SinkWriter(sink.as_ref());
                let _ = fmt::Write::write_fmt(&mut w, args);
            }
        }
    }

    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let nanos = crate::time::boot_nanos();
        let micros = nanos / 1_000;
        let secs = micros / 1_000_000;
        let frac = micros % 1_000_000;

        let guard = self.inner.lock();
        if let Some(inner) = guard.as_ref() {
            for sink in &inner.sinks {
                if level <= sink.max_level() {
                    let mut w = SinkWriter(sink.as_ref());
                    let _ = write!(w, "[{secs:>5}.{frac:06}] {} {args}\n", level.name());
                }
            }
        }
    }
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl fmt::Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Global logger instance.
pub static LOGGER: Logger = Logger::new();

fn logger_print(args: fmt::Arguments<'_>) {
    LOGGER.write_fmt(args);
}

fn logger_log(level: LogLevel, args: fmt::Arguments<'_>) {
    LOGGER.log(level, args);
}

/// Initializes the full logger, replacing the early serial functions.
///
/// Call once the heap allocator is available.
pub fn init_logger() {
    LOGGER.init_with_serial();
}

/// Registers an additional sink with the global logger.
pub fn add_sink(sink: Box<dyn LogSink>) {
    LOGGER.add_sink(sink);
}

/// Replaces a sink by name, returning `true` if one was found.
pub fn replace_sink_by_name(name: &str, new_sink: Box<dyn LogSink>) -> bool {
    LOGGER.replace_sink_by_name(name, new_sink)
}

/// Writes a panic message directly to COM1, bypassing the logger lock.
///
/// Safe to call from inside a panic, even if the logger lock is held.
pub fn panic_serial(info: &core::panic::PanicInfo) {
    let mut w = new_serial_writer();
    let _ = write!(w, "\n!!! KERNEL PANIC !!!\n{info}\n");
    crate::backtrace::panic_backtrace(&mut w);
}
