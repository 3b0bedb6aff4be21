//! Kernel panic handling.
//!
//! A panic is an unrecoverable kernel bug: the diagnostic goes out the
//! serial port and the CPU halts. Only compiled for the real target; on
//! the host, tests observe panics through the standard unwinder.

#[cfg(target_arch = "x86")]
mod handler {
    use core::panic::PanicInfo;

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        log::error!("=== KERNEL PANIC ===");
        if let Some(location) = info.location() {
            log::error!(
                "panic at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        log::error!("{}", info.message());

        loop {
            crate::arch::x86::instr::hlt();
        }
    }
}
