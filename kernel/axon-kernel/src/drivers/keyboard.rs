//! PS/2 keyboard driver: scancode set 1 decoding, modifier tracking,
//! and hand-off to whichever TTY is currently active.
//!
//! Decoded bytes are pushed through a registrable sink function rather
//! than a direct `axon_fs` dependency, so this module stays agnostic of
//! which TTY is foreground; [`set_input_sink`] is wired up once devfs
//! exists.

use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::arch::x86_64::port::Port;

const DATA_PORT: u16 = 0x60;

const SCANCODE_RELEASE_BIT: u8 = 0x80;
const LEFT_SHIFT: u8 = 0x2A;
const RIGHT_SHIFT: u8 = 0x36;
const LEFT_CTRL: u8 = 0x1D;
const RIGHT_ALT: u8 = 0x38;

static SHIFT: AtomicBool = AtomicBool::new(false);
static CTRL: AtomicBool = AtomicBool::new(false);

#[rustfmt::skip]
const SCANCODE_TO_ASCII: [u8; 128] = [
    0,   0,   b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 8,    0,
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0,   b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0,   b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0,   b'*', 0,   b' ', 0,   0,   0,   0,   0,   0,
    0,   0,   0,   0,   0,   0,   0,   b'7', b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1',
    b'2', b'3', b'0', b'.', 0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
    0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
    0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
];

#[rustfmt::skip]
const SCANCODE_TO_ASCII_SHIFT: [u8; 128] = [
    0,   0,   b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 8,    0,
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0,   b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0,   b'|', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b'<', b'>', b'?', 0,   b'*', 0,   b' ', 0,   0,   0,   0,   0,   0,
    0,   0,   0,   0,   0,   0,   0,   b'7', b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1',
    b'2', b'3', b'0', b'.', 0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
    0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
    0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
];

type InputSink = fn(u8);
fn null_sink(_byte: u8) {}
static INPUT_SINK: AtomicPtr<()> = AtomicPtr::new(null_sink as *mut ());

/// Registers the function that receives decoded keyboard bytes.
pub fn set_input_sink(sink: InputSink) {
    INPUT_SINK.store(sink as *mut (), Ordering::Release);
}

fn load_input_sink() -> InputSink {
    let ptr = INPUT_SINK.load(Ordering::Acquire);
    // SAFETY: only ever stored from a value of type `InputSink`.
    unsafe { core::mem::transmute(ptr) }
}

/// Maps one scancode to a decoded byte and the modifier-state update it
/// implies, if any. `None` means the scancode carries no printable byte
/// (pure modifier presses, unmapped extended codes, key-up events other
/// than shift/ctrl release).
fn decode(scancode: u8) -> Option<u8> {
    let released = scancode & SCANCODE_RELEASE_BIT != 0;
    let code = scancode & !SCANCODE_RELEASE_BIT;

    match code {
        LEFT_SHIFT | RIGHT_SHIFT => {
            SHIFT.store(!released, Ordering::Relaxed);
            return None;
        }
        LEFT_CTRL | RIGHT_ALT => {
            CTRL.store(!released, Ordering::Relaxed);
            return None;
        }
        _ => {}
    }

    if released || code as usize >= 128 {
        return None;
    }

    let ascii = if SHIFT.load(Ordering::Relaxed) {
        SCANCODE_TO_ASCII_SHIFT[code as usize]
    } else {
        SCANCODE_TO_ASCII[code as usize]
    };
    if ascii == 0 {
        return None;
    }

    if CTRL.load(Ordering::Relaxed) {
        // Ctrl+letter -> its control code (Ctrl-A=0x01 .. Ctrl-Z=0x1A).
        let upper = ascii.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            return Some(upper - b'A' + 1);
        }
    }

    Some(ascii)
}

/// Reads and decodes one scancode, forwarding any resulting byte to the
/// registered input sink. Called from the IRQ1 handler.
pub fn handle_interrupt() {
    let port: Port<u8> = Port::new(DATA_PORT);
    // SAFETY: reading the PS/2 data port in response to IRQ1 is always valid.
    let scancode = unsafe { port.read() };
    if let Some(byte) = decode(scancode) {
        load_input_sink()(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_letter_decodes_lowercase() {
        SHIFT.store(false, Ordering::Relaxed);
        CTRL.store(false, Ordering::Relaxed);
        assert_eq!(decode(0x1E), Some(b'a')); // 'a' key
    }

    #[test]
    fn shift_held_decodes_uppercase() {
        SHIFT.store(true, Ordering::Relaxed);
        CTRL.store(false, Ordering::Relaxed);
        assert_eq!(decode(0x1E), Some(b'A'));
        SHIFT.store(false, Ordering::Relaxed);
    }

    #[test]
    fn key_release_produces_no_byte() {
        assert_eq!(decode(0x1E | SCANCODE_RELEASE_BIT), None);
    }

    #[test]
    fn ctrl_c_maps_to_control_code_3() {
        CTRL.store(true, Ordering::Relaxed);
        SHIFT.store(false, Ordering::Relaxed);
        assert_eq!(decode(0x2E), Some(3)); // 'c' key with Ctrl held
        CTRL.store(false, Ordering::Relaxed);
    }

    #[test]
    fn shift_press_then_release_toggles_state() {
        decode(LEFT_SHIFT);
        assert!(SHIFT.load(Ordering::Relaxed));
        decode(LEFT_SHIFT | SCANCODE_RELEASE_BIT);
        assert!(!SHIFT.load(Ordering::Relaxed));
    }
}
