//! Trap vector numbers and the trap-frame records.
//!
//! `Trapframe` layout is contractual: the entry stubs push exactly these
//! fields in exactly this order, the dispatcher reads them, and the
//! frame-pop restores them. Any change here without a matching change in
//! the stubs is silent register corruption on the first system call.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::flag::Eflags;

// Processor-defined exception vectors.
pub const T_DIVIDE: u32 = 0;
pub const T_DEBUG: u32 = 1;
pub const T_NMI: u32 = 2;
pub const T_BRKPT: u32 = 3;
pub const T_OFLOW: u32 = 4;
pub const T_BOUND: u32 = 5;
pub const T_ILLOP: u32 = 6;
pub const T_DEVICE: u32 = 7;
pub const T_DBLFLT: u32 = 8;
pub const T_TSS: u32 = 10;
pub const T_SEGNP: u32 = 11;
pub const T_STACK: u32 = 12;
pub const T_GPFLT: u32 = 13;
pub const T_PGFLT: u32 = 14;
pub const T_FPERR: u32 = 16;

/// Software interrupt vector for system calls (DPL 3 gate).
pub const T_SYSCALL: u32 = 48;

/// Hardware IRQs are remapped to vectors `IRQ_OFFSET..IRQ_OFFSET + 16`.
pub const IRQ_OFFSET: u32 = 32;

pub const IRQ_TIMER: u32 = 0;
pub const IRQ_KBD: u32 = 1;
pub const IRQ_SERIAL: u32 = 4;
pub const IRQ_SPURIOUS: u32 = 7;
pub const IRQ_IDE: u32 = 14;

/// General-purpose registers in `pushal` order.
///
/// `oesp` is the stack pointer `pushal` saved; it is dead weight but keeps
/// the layout identical to what the hardware instruction pushes.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

/// CPU state captured at kernel entry.
///
/// Fields below `esp` are pushed by the entry stub; `esp`/`ss` are pushed
/// by the hardware only when the trap crossed a privilege boundary.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub es: u16,
    padding1: u16,
    pub ds: u16,
    padding2: u16,
    pub trapno: u32,
    // below here defined by the hardware
    pub err: u32,
    pub eip: u32,
    pub cs: u16,
    padding3: u16,
    pub eflags: u32,
    // below here only when crossing rings
    pub esp: u32,
    pub ss: u16,
    padding4: u16,
}

impl Trapframe {
    /// `true` if the frame was captured in user mode (selector RPL 3).
    #[inline]
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// `true` if the saved flags have the interrupt-enable bit set.
    #[inline]
    pub fn interrupts_enabled(&self) -> bool {
        Eflags::from_bits_retain(self.eflags).contains(Eflags::IF)
    }
}

/// Fault record the kernel copies onto the user exception stack before
/// transferring to the registered page-fault upcall.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct UTrapframe {
    pub fault_va: u32,
    pub err: u32,
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

/// Human-readable name for a trap vector.
pub fn trapname(trapno: u32) -> &'static str {
    const EXCNAMES: [&str; 20] = [
        "Divide error",
        "Debug",
        "Non-Maskable Interrupt",
        "Breakpoint",
        "Overflow",
        "BOUND Range Exceeded",
        "Invalid Opcode",
        "Device Not Available",
        "Double Fault",
        "Coprocessor Segment Overrun",
        "Invalid TSS",
        "Segment Not Present",
        "Stack Fault",
        "General Protection",
        "Page Fault",
        "(unknown trap)",
        "x87 FPU Floating-Point Error",
        "Alignment Check",
        "Machine-Check",
        "SIMD Floating-Point Exception",
    ];
    if (trapno as usize) < EXCNAMES.len() {
        EXCNAMES[trapno as usize]
    } else if trapno == T_SYSCALL {
        "System call"
    } else if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&trapno) {
        "Hardware Interrupt"
    } else {
        "(unknown trap)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    // The stub push order fixes these sizes and offsets; see the entry
    // stub comments in the kernel crate.
    #[test]
    fn frame_layout_matches_stub_push_order() {
        assert_eq!(size_of::<PushRegs>(), 32);
        assert_eq!(size_of::<Trapframe>(), 68);
        assert_eq!(offset_of!(Trapframe, es), 32);
        assert_eq!(offset_of!(Trapframe, ds), 36);
        assert_eq!(offset_of!(Trapframe, trapno), 40);
        assert_eq!(offset_of!(Trapframe, err), 44);
        assert_eq!(offset_of!(Trapframe, eip), 48);
        assert_eq!(offset_of!(Trapframe, cs), 52);
        assert_eq!(offset_of!(Trapframe, eflags), 56);
        assert_eq!(offset_of!(Trapframe, esp), 60);
        assert_eq!(offset_of!(Trapframe, ss), 64);
    }

    #[test]
    fn utrapframe_layout() {
        assert_eq!(size_of::<UTrapframe>(), 52);
        assert_eq!(offset_of!(UTrapframe, regs), 8);
        assert_eq!(offset_of!(UTrapframe, esp), 48);
    }

    #[test]
    fn names() {
        assert_eq!(trapname(T_PGFLT), "Page Fault");
        assert_eq!(trapname(T_SYSCALL), "System call");
        assert_eq!(trapname(IRQ_OFFSET + IRQ_KBD), "Hardware Interrupt");
        assert_eq!(trapname(200), "(unknown trap)");
    }
}
