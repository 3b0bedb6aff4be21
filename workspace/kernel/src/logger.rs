//! Kernel logger: routes the `log` facade to a process-wide diagnostic
//! sink. On hardware the sink is the serial port; on the host the lines
//! are retained for inspection.

use core::fmt::Write;

use log::{Level, LevelFilter, Metadata, Record};
use spin::Mutex;

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

#[cfg(not(target_arch = "x86"))]
static CAPTURED: Mutex<alloc::string::String> = Mutex::new(alloc::string::String::new());

#[cfg(target_arch = "x86")]
static SERIAL: Mutex<SerialSink> = Mutex::new(SerialSink);

#[cfg(target_arch = "x86")]
struct SerialSink;

#[cfg(target_arch = "x86")]
impl Write for SerialSink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        const COM1: u16 = 0x3F8;
        for b in s.bytes() {
            // SAFETY: COM1 data port write.
            unsafe {
                core::arch::asm!("out dx, al", in("dx") COM1, in("al") b, options(nomem, nostack));
            }
        }
        Ok(())
    }
}

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        #[cfg(target_arch = "x86")]
        {
            let _ = writeln!(SERIAL.lock(), "[{}] {}", level_str, record.args());
        }
        #[cfg(not(target_arch = "x86"))]
        {
            let _ = writeln!(CAPTURED.lock(), "[{}] {}", level_str, record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Trace));
}

/// Drain the captured diagnostics (host only).
#[cfg(not(target_arch = "x86"))]
pub fn take_captured() -> alloc::string::String {
    core::mem::take(&mut *CAPTURED.lock())
}
