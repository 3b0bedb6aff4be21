//! Virtual memory layout contract between the kernel and user space.
//!
//! ```text
//!  4 GiB ------------------------------------------------------------
//!                      kernel (remapped physical memory)
//!  KSTACKTOP --------> +------------------------------+
//!                      |   CPU0's kernel stack        | KSTKSIZE
//!                      +------------------------------+
//!                      |   unmapped guard             | KSTKGAP
//!                      +------------------------------+
//!                      |   CPU1's kernel stack        |
//!                      :        ...                   :
//!  ULIM --------------> +-----------------------------+
//!                      |   kernel-managed read-only   |
//!  UTOP, UXSTACKTOP --> +-----------------------------+
//!                      |   user exception stack       | PGSIZE
//!                      +------------------------------+
//!                      |   invalid guard page         | PGSIZE
//!  USTACKTOP ---------> +-----------------------------+
//!                      |   normal user stack, heap,   |
//!                      |   program text ...           |
//!  0 -----------------> +-----------------------------+
//! ```

/// Bytes per page.
pub const PGSIZE: u32 = 4096;
/// log2(PGSIZE)
pub const PGSHIFT: u32 = 12;

/// Entries per page directory / page table.
pub const NPDENTRIES: usize = 1024;
pub const NPTENTRIES: usize = 1024;

/// Bytes mapped by one page-directory entry.
pub const PTSIZE: u32 = PGSIZE * NPTENTRIES as u32;

/// Page-directory index of a virtual address.
#[inline]
pub const fn pdx(va: u32) -> usize {
    ((va >> 22) & 0x3FF) as usize
}

/// Page-table index of a virtual address.
#[inline]
pub const fn ptx(va: u32) -> usize {
    ((va >> 12) & 0x3FF) as usize
}

/// Offset within a page.
#[inline]
pub const fn pgoff(va: u32) -> u32 {
    va & 0xFFF
}

/// Round down to page granularity.
#[inline]
pub const fn pgdown(va: u32) -> u32 {
    va & !(PGSIZE - 1)
}

/// Round up to page granularity (saturating at the top of the space).
#[inline]
pub const fn pgup(va: u32) -> u32 {
    match va.checked_add(PGSIZE - 1) {
        Some(v) => v & !(PGSIZE - 1),
        None => !(PGSIZE - 1),
    }
}

/// All physical memory is remapped starting here.
pub const KERNBASE: u32 = 0xF000_0000;

/// Top of the per-CPU kernel stack area.
pub const KSTACKTOP: u32 = KERNBASE;
/// Size of one kernel stack.
pub const KSTKSIZE: u32 = 8 * PGSIZE;
/// Unmapped guard below each kernel stack.
pub const KSTKGAP: u32 = 8 * PGSIZE;

/// Highest address user environments may inspect kernel data structures at.
pub const ULIM: u32 = 0xEF80_0000;

/// Highest virtual address a user environment may map or pass to a
/// system call taking a user address.
pub const UTOP: u32 = 0xEEC0_0000;

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u32 = UTOP;

/// Top of the normal user stack; the page below UXSTACKTOP is an
/// unmapped guard so stack overflow faults instead of corrupting the
/// exception stack.
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;

/// Maximum number of environments.
pub const NENV: usize = 1024;
/// Shift used when generating environment identifiers.
pub const ENVGENSHIFT: u32 = 12;

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_math() {
        assert_eq!(pdx(0x0040_0000), 1);
        assert_eq!(ptx(0x0040_3000), 3);
        assert_eq!(pgdown(0x1FFF), 0x1000);
        assert_eq!(pgup(0x1001), 0x2000);
        assert_eq!(pgup(0x1000), 0x1000);
    }

    #[test]
    fn layout_is_ordered() {
        assert!(USTACKTOP < UXSTACKTOP);
        assert!(UTOP <= ULIM);
        assert!(ULIM < KSTACKTOP);
        assert_eq!(UTOP % PGSIZE, 0);
        // the whole user space is addressable by NENV environments' tables
        assert_eq!(UTOP % PTSIZE, 0);
    }
}
