//! 8259 Programmable Interrupt Controller.
//!
//! AxonOS targets a single CPU with no I/O APIC, so the legacy PIC stays
//! the interrupt controller for the life of the kernel instead of being
//! masked off in favor of the local APIC.

use super::port::Port;

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x11;
const ICW4_8086: u8 = 0x01;

/// Vector offset the master PIC is remapped to; IRQ0..7 become
/// vectors `OFFSET`..`OFFSET + 7`.
const OFFSET: u8 = 32;

/// Remaps IRQ0..15 to vectors 32..47 and masks every line.
///
/// The legacy 0..15 mapping overlaps CPU exception vectors, so this must
/// run before interrupts are enabled even though nothing is unmasked yet.
///
/// # Safety
///
/// Must run once, with interrupts disabled.
pub unsafe fn remap() {
    let pic1_cmd: Port<u8> = Port::new(PIC1_CMD);
    let pic1_data: Port<u8> = Port::new(PIC1_DATA);
    let pic2_cmd: Port<u8> = Port::new(PIC2_CMD);
    let pic2_data: Port<u8> = Port::new(PIC2_DATA);

    // SAFETY: standard 8259 initialization sequence (ICW1-ICW4).
    unsafe {
        pic1_cmd.write(ICW1_INIT);
        io_wait();
        pic2_cmd.write(ICW1_INIT);
        io_wait();

        pic1_data.write(OFFSET);
        io_wait();
        pic2_data.write(OFFSET + 8);
        io_wait();

        pic1_data.write(4); // tell master: slave is on IRQ2
        io_wait();
        pic2_data.write(2); // tell slave: its cascade identity is 2
        io_wait();

        pic1_data.write(ICW4_8086);
        io_wait();
        pic2_data.write(ICW4_8086);
        io_wait();

        pic1_data.write(0xFF);
        pic2_data.write(0xFF);
    }
}

/// Unmasks IRQ line `irq` (0..15).
///
/// # Safety
///
/// Must run after [`remap`].
pub unsafe fn unmask(irq: u8) {
    let (port, bit) = if irq < 8 {
        (Port::<u8>::new(PIC1_DATA), irq)
    } else {
        (Port::<u8>::new(PIC2_DATA), irq - 8)
    };
    // SAFETY: clearing a single mask bit leaves the rest of the register intact.
    unsafe {
        let mask = port.read();
        port.write(mask & !(1 << bit));
    }
}

/// Sends end-of-interrupt for IRQ line `irq` (0..15).
pub fn send_eoi(irq: u8) {
    const EOI: u8 = 0x20;
    let pic1_cmd: Port<u8> = Port::new(PIC1_CMD);
    let pic2_cmd: Port<u8> = Port::new(PIC2_CMD);
    // SAFETY: writing EOI to the command port is always valid once an
    // interrupt from that controller is in service.
    unsafe {
        if irq >= 8 {
            pic2_cmd.write(EOI);
        }
        pic1_cmd.write(EOI);
    }
}

#[inline]
fn io_wait() {
    let port: Port<u8> = Port::new(0x80);
    // SAFETY: port 0x80 is the unused POST diagnostic port; writing to it
    // is a standard I/O delay with no side effects.
    unsafe {
        port.write(0);
    }
}
