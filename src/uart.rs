use core::{fmt, ptr};

const UART0_BASE: usize = 0x1000_0000;
const REG_RBR: usize = 0; // Receiver Buffer Register (read)
const REG_THR: usize = 0; // Transmitter Holding Register (write)
const REG_IER: usize = 1; // Interrupt Enable Register
const REG_FCR: usize = 2; // FIFO Control Register
const REG_LCR: usize = 3; // Line Control Register
const REG_MCR: usize = 4; // Modem Control Register
const REG_LSR: usize = 5; // Line Status Register

const LSR_DATA_READY: u8 = 1 << 0;
const LSR_THR_EMPTY: u8 = 1 << 5;

fn read_reg(offset: usize) -> u8 {
    unsafe { ptr::read_volatile((UART0_BASE + offset) as *const u8) }
}

fn write_reg(offset: usize, value: u8) {
    unsafe { ptr::write_volatile((UART0_BASE + offset) as *mut u8, value) }
}

pub fn init() {
    // 16550-compatible UART, 8N1, FIFO on, polled (no RX interrupts).
    write_reg(REG_LCR, 0x80); // Set DLAB to access divisor registers.
    write_reg(REG_THR, 0x00); // Divisor LSB (ignored by QEMU default clock).
    write_reg(REG_IER, 0x00); // Divisor MSB.
    write_reg(REG_LCR, 0x03); // 8 bits, no parity, one stop bit.
    write_reg(REG_FCR, 0x07); // Enable FIFO, clear RX/TX queues.
    write_reg(REG_MCR, 0x03); // Assert DTR, RTS.
    write_reg(REG_IER, 0x00);
}

pub fn write_byte(byte: u8) {
    while read_reg(REG_LSR) & LSR_THR_EMPTY == 0 {}
    write_reg(REG_THR, byte);
}

pub fn write_str(s: &str) {
    for &byte in s.as_bytes() {
        if byte == b'\n' {
            write_byte(b'\r');
        }
        write_byte(byte);
    }
}

pub fn read_byte_nonblocking() -> Option<u8> {
    if read_reg(REG_LSR) & LSR_DATA_READY != 0 {
        Some(read_reg(REG_RBR))
    } else {
        None
    }
}

/// `fmt::Write` sink over the UART
pub struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_str(s);
        Ok(())
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        use core::fmt::Write as _;
        let _ = write!($crate::uart::Writer, $($arg)*);
    }};
}

#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($($arg:tt)*) => {{
        $crate::print!($($arg)*);
        $crate::print!("\n");
    }};
}
