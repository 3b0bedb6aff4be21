//! Per-environment address spaces backed by two-level i386 page tables.
//!
//! An `AddressSpace` is a page-directory frame; directory and table
//! entries are 32-bit words holding a frame address plus [`PteFlags`].
//! All entry accesses go through the [`PhysMem`] direct map.

use exo9_abi::flag::pte_addr;
use exo9_abi::layout::{pdx, ptx, NPTENTRIES, UTOP};
use exo9_abi::{Error, PteFlags};

use super::phys::{PhysAddr, PhysMem};
use super::VirtAddr;

/// Location of a page-table entry: which table frame, which slot.
#[derive(Debug, Clone, Copy)]
struct PteSlot {
    table: PhysAddr,
    idx: usize,
}

impl PteSlot {
    fn read(self, mem: &PhysMem) -> u32 {
        mem.read_entry(self.table, self.idx)
    }

    fn write(self, mem: &mut PhysMem, entry: u32) {
        mem.write_entry(self.table, self.idx, entry);
    }
}

/// A page directory owning the user half of one environment's address
/// space. Exclusive to a single environment; frames it maps may be shared
/// with other address spaces through the reference counts.
#[derive(Debug, Clone, Copy)]
pub struct AddressSpace {
    pgdir: PhysAddr,
}

impl AddressSpace {
    /// Allocate a fresh, empty address space.
    pub fn new(mem: &mut PhysMem) -> Result<Self, Error> {
        let pgdir = mem.alloc(true)?;
        mem.incref(pgdir);
        Ok(AddressSpace { pgdir })
    }

    /// Physical address of the page directory (what `%cr3` would hold).
    pub fn pgdir(&self) -> PhysAddr {
        self.pgdir
    }

    /// Find the entry slot for `va`, optionally creating the page table.
    ///
    /// Returns `Ok(None)` when the table is absent and `create` is false;
    /// `Err(NoMem)` when a needed table cannot be allocated.
    fn walk(&self, mem: &mut PhysMem, va: VirtAddr, create: bool) -> Result<Option<PteSlot>, Error> {
        let pde = mem.read_entry(self.pgdir, pdx(va));
        let table = if pde & PteFlags::P.bits() != 0 {
            PhysAddr(pte_addr(pde))
        } else {
            if !create {
                return Ok(None);
            }
            let table = mem.alloc(true)?;
            mem.incref(table);
            let flags = PteFlags::P | PteFlags::W | PteFlags::U;
            mem.write_entry(self.pgdir, pdx(va), table.0 | flags.bits());
            table
        };
        Ok(Some(PteSlot {
            table,
            idx: ptx(va),
        }))
    }

    /// Read-only walk; no allocation.
    fn walk_ro(&self, mem: &PhysMem, va: VirtAddr) -> Option<PteSlot> {
        let pde = mem.read_entry(self.pgdir, pdx(va));
        if pde & PteFlags::P.bits() == 0 {
            return None;
        }
        Some(PteSlot {
            table: PhysAddr(pte_addr(pde)),
            idx: ptx(va),
        })
    }

    /// Map the frame at `pa` at virtual address `va` with permissions
    /// `perm | P`, replacing any existing mapping there.
    ///
    /// The reference is taken before any existing mapping is removed, so
    /// re-inserting the same frame at the same address is safe.
    pub fn insert(
        &self,
        mem: &mut PhysMem,
        pa: PhysAddr,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), Error> {
        let slot = self.walk(mem, va, true)?.expect("walk with create");
        mem.incref(pa);
        if slot.read(mem) & PteFlags::P.bits() != 0 {
            self.remove(mem, va);
        }
        slot.write(mem, pa.0 | (perm | PteFlags::P).bits());
        Ok(())
    }

    /// Look up the mapping at `va`: the backing frame and the entry flags.
    pub fn lookup(&self, mem: &PhysMem, va: VirtAddr) -> Option<(PhysAddr, PteFlags)> {
        let pte = self.walk_ro(mem, va)?.read(mem);
        if pte & PteFlags::P.bits() == 0 {
            return None;
        }
        Some((
            PhysAddr(pte_addr(pte)),
            PteFlags::from_bits_truncate(pte),
        ))
    }

    /// Remove the mapping at `va`, dropping the frame reference.
    /// Removing an unmapped address is a no-op.
    pub fn remove(&self, mem: &mut PhysMem, va: VirtAddr) {
        let Some(slot) = self.walk_ro(mem, va) else {
            return;
        };
        let pte = slot.read(mem);
        if pte & PteFlags::P.bits() == 0 {
            return;
        }
        slot.write(mem, 0);
        mem.decref(PhysAddr(pte_addr(pte)));
        // On hardware the TLB entry for va is invalidated here.
    }

    /// Tear the address space down: unmap everything below `UTOP`, free
    /// the page tables, then the directory itself.
    pub fn teardown(self, mem: &mut PhysMem) {
        for pdeno in 0..pdx(UTOP - 1) + 1 {
            let pde = mem.read_entry(self.pgdir, pdeno);
            if pde & PteFlags::P.bits() == 0 {
                continue;
            }
            let table = PhysAddr(pte_addr(pde));
            for pteno in 0..NPTENTRIES {
                let pte = mem.read_entry(table, pteno);
                if pte & PteFlags::P.bits() != 0 {
                    mem.decref(PhysAddr(pte_addr(pte)));
                }
            }
            mem.write_entry(self.pgdir, pdeno, 0);
            mem.decref(table);
        }
        mem.decref(self.pgdir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exo9_abi::layout::PGSIZE;

    fn setup() -> (PhysMem, AddressSpace) {
        let mut mem = PhysMem::new(32);
        let aspace = AddressSpace::new(&mut mem).unwrap();
        (mem, aspace)
    }

    const PERM_RW: PteFlags = PteFlags::U.union(PteFlags::W).union(PteFlags::P);

    #[test]
    fn insert_lookup_remove_round_trip() {
        let (mut mem, aspace) = setup();
        let before = mem.free_count();

        let frame = mem.alloc(true).unwrap();
        aspace.insert(&mut mem, frame, 0x1000, PERM_RW).unwrap();

        let (pa, flags) = aspace.lookup(&mem, 0x1000).unwrap();
        assert_eq!(pa, frame);
        assert!(flags.contains(PteFlags::U | PteFlags::W | PteFlags::P));

        aspace.remove(&mut mem, 0x1000);
        assert!(aspace.lookup(&mem, 0x1000).is_none());
        // the data frame came back; the page table stays allocated
        assert_eq!(mem.free_count(), before - 1);
    }

    #[test]
    fn remove_unmapped_is_idempotent() {
        let (mut mem, aspace) = setup();
        let before = mem.free_count();
        aspace.remove(&mut mem, 0x4000);
        aspace.remove(&mut mem, 0x4000);
        assert_eq!(mem.free_count(), before);
    }

    #[test]
    fn reinsert_same_frame_same_va_is_safe() {
        let (mut mem, aspace) = setup();
        let frame = mem.alloc(true).unwrap();
        aspace.insert(&mut mem, frame, 0x2000, PERM_RW).unwrap();
        assert_eq!(mem.refs(frame), 1);

        // permission change through re-insertion must not free the frame
        let ro = PteFlags::U | PteFlags::P;
        aspace.insert(&mut mem, frame, 0x2000, ro).unwrap();
        assert_eq!(mem.refs(frame), 1);
        let (_, flags) = aspace.lookup(&mem, 0x2000).unwrap();
        assert!(!flags.contains(PteFlags::W));
    }

    #[test]
    fn insert_replaces_existing_mapping() {
        let (mut mem, aspace) = setup();
        let a = mem.alloc(true).unwrap();
        let b = mem.alloc(true).unwrap();
        aspace.insert(&mut mem, a, 0x3000, PERM_RW).unwrap();
        aspace.insert(&mut mem, b, 0x3000, PERM_RW).unwrap();
        // `a` was dropped back to the free list when displaced
        assert_eq!(aspace.lookup(&mem, 0x3000).unwrap().0, b);
        assert_eq!(mem.refs(b), 1);
    }

    #[test]
    fn sharing_across_spaces_counts_references() {
        let mut mem = PhysMem::new(32);
        let a = AddressSpace::new(&mut mem).unwrap();
        let b = AddressSpace::new(&mut mem).unwrap();
        let frame = mem.alloc(true).unwrap();

        a.insert(&mut mem, frame, 0x1000, PERM_RW).unwrap();
        b.insert(&mut mem, frame, 0x8000, PERM_RW).unwrap();
        assert_eq!(mem.refs(frame), 2);

        a.remove(&mut mem, 0x1000);
        assert_eq!(mem.refs(frame), 1);
        assert!(b.lookup(&mem, 0x8000).is_some());
    }

    #[test]
    fn teardown_returns_every_frame() {
        let mut mem = PhysMem::new(64);
        let total_free = mem.free_count();
        let aspace = AddressSpace::new(&mut mem).unwrap();

        // mappings in two different page tables
        for va in [0x1000u32, 0x2000, 0x0040_0000, UTOP - PGSIZE] {
            let frame = mem.alloc(true).unwrap();
            aspace.insert(&mut mem, frame, va, PERM_RW).unwrap();
        }

        aspace.teardown(&mut mem);
        assert_eq!(mem.free_count(), total_free);
    }
}
