use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};

use crate::uart;

struct UartLogger;

static LOGGER: UartLogger = UartLogger;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(uart::Writer, "[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Route `log` records to the UART
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
