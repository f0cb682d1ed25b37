//! Forwards records from the `log` facade used by the control core to `defmt`.

use defmt::Display2Format;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct DefmtLogger;

static LOGGER: DefmtLogger = DefmtLogger;

impl Log for DefmtLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let target = record.target();
        let args = Display2Format(record.args());

        match record.level() {
            Level::Error => defmt::error!("[{}] {}", target, args),
            Level::Warn => defmt::warn!("[{}] {}", target, args),
            Level::Info => defmt::info!("[{}] {}", target, args),
            Level::Debug => defmt::debug!("[{}] {}", target, args),
            Level::Trace => defmt::trace!("[{}] {}", target, args),
        }
    }

    fn flush(&self) {}
}

/// Installs the logger, before anything else runs.
pub(crate) fn init() {
    // thumbv6m has no compare and swap, so the racy setters are the only ones available.
    // Nothing else is running yet.
    unsafe {
        if log::set_logger_racy(&LOGGER).is_ok() {
            log::set_max_level_racy(LevelFilter::Info);
        }
    }
}
