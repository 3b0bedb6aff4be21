//! IA-32 segmentation structures: segment and gate descriptors, the
//! task state segment, and the interrupt descriptor table.

use exo9_abi::flag::GD_KT;
use exo9_abi::layout::NCPU;
use exo9_abi::trap::{
    IRQ_OFFSET, T_BOUND, T_BRKPT, T_DBLFLT, T_DEBUG, T_DEVICE, T_DIVIDE, T_FPERR, T_GPFLT,
    T_ILLOP, T_OFLOW, T_PGFLT, T_SEGNP, T_STACK, T_SYSCALL, T_TSS,
};

/// Segment descriptor types (system segments).
const STS_T32A: u8 = 0x9; // available 32-bit TSS
const STS_IG32: u8 = 0xE; // 32-bit interrupt gate

/// The i386 task state segment. Only `esp0`/`ss0` matter to this kernel:
/// they tell the CPU where the kernel stack is when a trap crosses from
/// ring 3 to ring 0. The layout is fixed by the processor.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskState {
    pub link: u16,
    _pad0: u16,

    pub esp0: u32,
    pub ss0: u16,
    _pad1: u16,

    pub esp1: u32,
    pub ss1: u16,
    _pad2: u16,

    pub esp2: u32,
    pub ss2: u16,
    _pad3: u16,

    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,

    pub es: u16,
    _pad4: u16,
    pub cs: u16,
    _pad5: u16,
    pub ss: u16,
    _pad6: u16,
    pub ds: u16,
    _pad7: u16,
    pub fs: u16,
    _pad8: u16,
    pub gs: u16,
    _pad9: u16,
    pub ldt: u16,
    _pad10: u16,

    pub trap: u16,
    /// Offset of the I/O permission bitmap; set past the segment limit to
    /// disable all user I/O.
    pub iomb: u16,
}

/// An 8-byte segment descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SegDesc {
    pub low: u32,
    pub high: u32,
}

impl SegDesc {
    pub const NULL: SegDesc = SegDesc { low: 0, high: 0 };

    /// Flat 4 GiB executable segment with the given privilege level.
    pub fn code(dpl: u8) -> SegDesc {
        Self::flat(0xA, dpl) // type: code, readable
    }

    /// Flat 4 GiB data segment with the given privilege level.
    pub fn data(dpl: u8) -> SegDesc {
        Self::flat(0x2, dpl) // type: data, writable
    }

    fn flat(typ: u8, dpl: u8) -> SegDesc {
        // base 0, limit 0xFFFFF in 4 KiB granularity
        let limit: u32 = 0xF_FFFF;
        SegDesc {
            low: limit & 0xFFFF,
            high: ((limit >> 16) & 0xF) << 16
                | (typ as u32) << 8
                | 1 << 12                  // S: code/data
                | (dpl as u32 & 3) << 13
                | 1 << 15                  // present
                | 1 << 22                  // D: 32-bit operations
                | 1 << 23, // G: 4 KiB granularity
        }
    }

    /// System descriptor for a task state segment at `base`.
    pub fn tss(base: u32, limit: u32) -> SegDesc {
        SegDesc {
            low: (limit & 0xFFFF) | (base & 0xFFFF) << 16,
            high: (base >> 16) & 0xFF
                | (STS_T32A as u32) << 8
                // S = 0: system segment
                | 1 << 15 // present
                | ((limit >> 16) & 0xF) << 16
                | (base >> 24) << 24,
        }
    }

    pub fn base(&self) -> u32 {
        (self.low >> 16) | ((self.high & 0xFF) << 16) | (self.high & 0xFF00_0000)
    }

    pub fn limit(&self) -> u32 {
        (self.low & 0xFFFF) | ((self.high >> 16) & 0xF) << 16
    }

    pub fn dpl(&self) -> u8 {
        ((self.high >> 13) & 3) as u8
    }

    pub fn present(&self) -> bool {
        self.high & (1 << 15) != 0
    }

    /// `true` for system (non-code/data) descriptors such as a TSS.
    pub fn is_system(&self) -> bool {
        self.high & (1 << 12) == 0
    }
}

/// An 8-byte interrupt/trap gate.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GateDesc {
    off_low: u16,
    sel: u16,
    args: u8,
    flags: u8,
    off_high: u16,
}

impl GateDesc {
    pub const ABSENT: GateDesc = GateDesc {
        off_low: 0,
        sel: 0,
        args: 0,
        flags: 0,
        off_high: 0,
    };

    /// An interrupt gate: transfers through `sel:offset` with interrupts
    /// disabled. `dpl` is the highest privilege allowed to invoke the
    /// vector with an `int` instruction.
    pub fn interrupt(sel: u16, offset: u32, dpl: u8) -> GateDesc {
        GateDesc {
            off_low: offset as u16,
            sel,
            args: 0,
            flags: STS_IG32 | (dpl & 3) << 5 | 1 << 7,
            off_high: (offset >> 16) as u16,
        }
    }

    pub fn offset(&self) -> u32 {
        self.off_low as u32 | (self.off_high as u32) << 16
    }

    pub fn selector(&self) -> u16 {
        self.sel
    }

    pub fn dpl(&self) -> u8 {
        (self.flags >> 5) & 3
    }

    pub fn present(&self) -> bool {
        self.flags & (1 << 7) != 0
    }
}

/// Exception vectors that get entry stubs.
pub const EXCEPTION_VECTORS: [u32; 15] = [
    T_DIVIDE, T_DEBUG, T_BRKPT, T_OFLOW, T_BOUND, T_ILLOP, T_DEVICE, T_DBLFLT, T_TSS, T_SEGNP,
    T_STACK, T_GPFLT, T_PGFLT, T_FPERR, T_SYSCALL,
];

/// Vectors for which the hardware pushes an error code; all other stubs
/// push a zero placeholder to keep the frame shape uniform.
pub fn has_error_code(vector: u32) -> bool {
    matches!(vector, T_DBLFLT | T_TSS | T_SEGNP | T_STACK | T_GPFLT | T_PGFLT)
}

/// Descriptor privilege level for a vector's gate: only the breakpoint
/// and system-call vectors may be invoked from user mode.
pub fn gate_dpl(vector: u32) -> u8 {
    match vector {
        T_BRKPT | T_SYSCALL => 3,
        _ => 0,
    }
}

/// The interrupt descriptor table: 256 gates, built once at boot.
pub struct Idt {
    entries: [GateDesc; 256],
}

impl Idt {
    pub fn new() -> Self {
        Idt {
            entries: [GateDesc::ABSENT; 256],
        }
    }

    /// Install the gate for `vector`, pointing at its entry stub.
    pub fn install(&mut self, vector: u32, stub: u32) {
        self.entries[vector as usize] = GateDesc::interrupt(GD_KT, stub, gate_dpl(vector));
    }

    /// Install gates for every stubbed vector. `stub_for` resolves a
    /// vector to its entry stub's address.
    pub fn install_all(&mut self, mut stub_for: impl FnMut(u32) -> u32) {
        for v in EXCEPTION_VECTORS {
            self.install(v, stub_for(v));
        }
        for irq in 0..16 {
            let v = IRQ_OFFSET + irq;
            self.install(v, stub_for(v));
        }
    }

    pub fn gate(&self, vector: u32) -> &GateDesc {
        &self.entries[vector as usize]
    }

    pub fn base(&self) -> *const GateDesc {
        self.entries.as_ptr()
    }

    pub fn limit(&self) -> u16 {
        (core::mem::size_of::<[GateDesc; 256]>() - 1) as u16
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

/// GDT size: null + 4 flat segments + one TSS slot per CPU.
pub const NGDTSLOTS: usize = 5 + NCPU;

/// The global descriptor table. Slots 1–4 are the flat kernel/user
/// segments; per-CPU task-state descriptors start at `GD_TSS0 >> 3` and
/// are written once, by their own CPU, at bring-up.
pub struct Gdt {
    slots: [SegDesc; NGDTSLOTS],
}

impl Gdt {
    pub fn new() -> Self {
        let mut slots = [SegDesc::NULL; NGDTSLOTS];
        slots[1] = SegDesc::code(0); // GD_KT
        slots[2] = SegDesc::data(0); // GD_KD
        slots[3] = SegDesc::code(3); // GD_UT
        slots[4] = SegDesc::data(3); // GD_UD
        Gdt { slots }
    }

    pub fn slot(&self, idx: usize) -> &SegDesc {
        &self.slots[idx]
    }

    pub fn set_slot(&mut self, idx: usize, desc: SegDesc) {
        self.slots[idx] = desc;
    }
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}
