//! Kernel entry and exit: the per-vector stubs, the common trap tail,
//! and the frame pop back to user mode.
//!
//! The stub push order defines the `Trapframe` layout. Each stub pushes
//! a zero error-code placeholder when the hardware does not push one,
//! then its vector number, then falls into the common tail which pushes
//! the segment selectors and general registers, reloads the kernel data
//! selectors, and calls into Rust with the frame pointer as the single
//! argument.

use core::arch::{asm, global_asm};

use exo9_abi::layout::NCPU;
use exo9_abi::Trapframe;

use super::instr;
use crate::kernel::{self, Disposition};
use crate::trap;

macro_rules! trap_stub {
    ($name:ident, $vector:expr, noec) => {
        global_asm!(
            concat!(
                ".globl ", stringify!($name), "\n",
                stringify!($name), ":\n",
                "    push 0\n",
                "    push ", $vector, "\n",
                "    jmp __alltraps\n",
            )
        );
    };
    ($name:ident, $vector:expr, ec) => {
        global_asm!(
            concat!(
                ".globl ", stringify!($name), "\n",
                stringify!($name), ":\n",
                "    push ", $vector, "\n",
                "    jmp __alltraps\n",
            )
        );
    };
}

trap_stub!(vector0, 0, noec);
trap_stub!(vector1, 1, noec);
trap_stub!(vector3, 3, noec);
trap_stub!(vector4, 4, noec);
trap_stub!(vector5, 5, noec);
trap_stub!(vector6, 6, noec);
trap_stub!(vector7, 7, noec);
trap_stub!(vector8, 8, ec);
trap_stub!(vector10, 10, ec);
trap_stub!(vector11, 11, ec);
trap_stub!(vector12, 12, ec);
trap_stub!(vector13, 13, ec);
trap_stub!(vector14, 14, ec);
trap_stub!(vector16, 16, noec);
trap_stub!(vector32, 32, noec);
trap_stub!(vector33, 33, noec);
trap_stub!(vector34, 34, noec);
trap_stub!(vector35, 35, noec);
trap_stub!(vector36, 36, noec);
trap_stub!(vector37, 37, noec);
trap_stub!(vector38, 38, noec);
trap_stub!(vector39, 39, noec);
trap_stub!(vector40, 40, noec);
trap_stub!(vector41, 41, noec);
trap_stub!(vector42, 42, noec);
trap_stub!(vector43, 43, noec);
trap_stub!(vector44, 44, noec);
trap_stub!(vector45, 45, noec);
trap_stub!(vector46, 46, noec);
trap_stub!(vector47, 47, noec);
trap_stub!(vector48, 48, noec);

// The common tail. Push order (downward) completes the Trapframe:
// ds/es were not yet saved, then all general registers; then the kernel
// data selectors are live and the frame pointer is the C argument.
global_asm!(
    "
    .globl __alltraps
__alltraps:
    push ds
    push es
    pushad
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    push esp
    call trap_entry
    "
);

extern "C" {
    fn vector0();
    fn vector1();
    fn vector3();
    fn vector4();
    fn vector5();
    fn vector6();
    fn vector7();
    fn vector8();
    fn vector10();
    fn vector11();
    fn vector12();
    fn vector13();
    fn vector14();
    fn vector16();
    fn vector32();
    fn vector33();
    fn vector34();
    fn vector35();
    fn vector36();
    fn vector37();
    fn vector38();
    fn vector39();
    fn vector40();
    fn vector41();
    fn vector42();
    fn vector43();
    fn vector44();
    fn vector45();
    fn vector46();
    fn vector47();
    fn vector48();
}

/// Resolve a vector to its stub's address; feeds `trap::init`.
pub fn stub_addr(vector: u32) -> u32 {
    let f: unsafe extern "C" fn() = match vector {
        0 => vector0,
        1 => vector1,
        3 => vector3,
        4 => vector4,
        5 => vector5,
        6 => vector6,
        7 => vector7,
        8 => vector8,
        10 => vector10,
        11 => vector11,
        12 => vector12,
        13 => vector13,
        14 => vector14,
        16 => vector16,
        32 => vector32,
        33 => vector33,
        34 => vector34,
        35 => vector35,
        36 => vector36,
        37 => vector37,
        38 => vector38,
        39 => vector39,
        40 => vector40,
        41 => vector41,
        42 => vector42,
        43 => vector43,
        44 => vector44,
        45 => vector45,
        46 => vector46,
        47 => vector47,
        48 => vector48,
        _ => panic!("no stub for vector {}", vector),
    };
    f as usize as u32
}

/// CPU number of the executing processor. With a single kernel-stack
/// area per CPU the stack pointer identifies the CPU.
fn this_cpu() -> usize {
    use exo9_abi::layout::{KSTACKTOP, KSTKGAP, KSTKSIZE};
    let esp: u32;
    // SAFETY: reading the stack pointer.
    unsafe { asm!("mov {}, esp", out(reg) esp, options(nomem, nostack, preserves_flags)) };
    let i = (KSTACKTOP - esp) / (KSTKSIZE + KSTKGAP);
    let i = i as usize;
    assert!(i < NCPU, "kernel stack pointer outside any CPU's range");
    i
}

/// Rust side of the common tail.
///
/// Interrupts are disabled (all gates are interrupt gates). Acquire the
/// kernel lock, record the fault register, dispatch, then leave for user
/// mode or the idle loop with the lock released.
#[no_mangle]
extern "C" fn trap_entry(tf: *mut Trapframe) -> ! {
    debug_assert!(instr::read_eflags() & exo9_abi::Eflags::IF.bits() == 0);

    let cpu = this_cpu();
    let klock = kernel::global();
    let mut k = klock.lock(cpu);

    // The fault register is meaningful until the next page fault; record
    // it before anything else can fault.
    k.cpus.record_fault_va(cpu, instr::rcr2());

    // SAFETY: the stub built a complete Trapframe at tf.
    let disposition = trap::trap(&mut k, cpu, unsafe { &*tf });

    match disposition {
        Disposition::Run(id) => {
            let e = k.envs.get(id).expect("dispatched a dead environment");
            let tf = e.tf;
            let cr3 = e.aspace.expect("environment without address space").pgdir();
            // SAFETY: the environment's page directory maps the kernel.
            unsafe { instr::lcr3(cr3.0) };
            drop(k);
            // SAFETY: tf is a well-formed user frame (RPL 3, IF set).
            unsafe { pop_frame(&tf) }
        }
        Disposition::Halt => {
            drop(k);
            idle(cpu)
        }
    }
}

/// Restore a saved frame and return to user mode. Mirrors the push order
/// of `__alltraps` exactly.
///
/// # Safety
/// `tf` must be a complete user-mode frame.
unsafe fn pop_frame(tf: &Trapframe) -> ! {
    asm!(
        "mov esp, {0}",
        "popad",
        "pop es",
        "pop ds",
        "add esp, 8",
        "iretd",
        in(reg) tf as *const Trapframe,
        options(noreturn)
    );
}

/// Idle loop for a CPU with nothing to run: wait, unlocked, for the next
/// interrupt to restart dispatch.
fn idle(_cpu: usize) -> ! {
    loop {
        instr::sti();
        instr::hlt();
    }
}

/// Boot-time trap setup for the bootstrap processor.
pub fn init_bsp() {
    let klock = kernel::global();
    let mut k = klock.lock(0);
    trap::init(&mut k, stub_addr);
    trap::init_percpu(&mut k, 0);
}
