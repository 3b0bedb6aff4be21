//! Hardware bit fields shared across the syscall boundary: page-table
//! entry bits, EFLAGS, and the segment selectors user frames must carry.

use bitflags::bitflags;

bitflags! {
    /// i386 page-table / page-directory entry bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PteFlags: u32 {
        /// Present
        const P = 0x001;
        /// Writable
        const W = 0x002;
        /// User-accessible
        const U = 0x004;
        /// Write-through
        const PWT = 0x008;
        /// Cache-disable
        const PCD = 0x010;
        /// Accessed (hardware-set)
        const A = 0x020;
        /// Dirty (hardware-set)
        const D = 0x040;
        /// Page size (directory entries only)
        const PS = 0x080;
        /// Global
        const G = 0x100;
        /// Available for OS use
        const AVAIL = 0x200;
    }
}

impl PteFlags {
    /// The bits a user environment may set on a mapping through a system
    /// call. Anything outside this mask is rejected with `E_INVAL`.
    pub const SYSCALL_MASK: PteFlags = PteFlags::P
        .union(PteFlags::W)
        .union(PteFlags::U)
        .union(PteFlags::PWT)
        .union(PteFlags::PCD)
        .union(PteFlags::AVAIL);

    /// `true` if the flags are acceptable for a user-requested mapping:
    /// user and present set, nothing outside the syscall mask.
    #[inline]
    pub fn valid_for_user_mapping(self) -> bool {
        self.contains(PteFlags::U | PteFlags::P) && Self::SYSCALL_MASK.contains(self)
    }
}

bitflags! {
    /// EFLAGS register bits the kernel cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Eflags: u32 {
        /// Carry
        const CF = 0x0000_0001;
        /// Reserved, always one
        const MBS = 0x0000_0002;
        /// Interrupt enable
        const IF = 0x0000_0200;
        /// I/O privilege level (two bits)
        const IOPL_MASK = 0x0000_3000;
    }
}

/// Mask a raw entry down to its physical frame address.
#[inline]
pub const fn pte_addr(pte: u32) -> u32 {
    pte & !0xFFF
}

// Global descriptor table selectors. The low two bits of a selector are
// the requested privilege level.

/// Kernel code segment
pub const GD_KT: u16 = 0x08;
/// Kernel data segment
pub const GD_KD: u16 = 0x10;
/// User code segment
pub const GD_UT: u16 = 0x18;
/// User data segment
pub const GD_UD: u16 = 0x20;
/// First task-state segment slot; CPU *i* uses `GD_TSS0 + 8 * i`.
pub const GD_TSS0: u16 = 0x28;

/// Requested privilege level for user-mode selectors.
pub const RPL_USER: u16 = 3;
