//! User pointer validation and user-memory copies.
//!
//! The kernel never trusts a user-supplied address: a region is first
//! checked page-by-page against the environment's own tables, and copies
//! re-translate every page as they go. Checks clip to page granularity
//! and refuse anything reaching `ULIM`.

use exo9_abi::layout::{pgdown, pgup, PGSIZE, ULIM};
use exo9_abi::{Error, PteFlags};

use super::addrspace::AddressSpace;
use super::phys::PhysMem;
use super::VirtAddr;

/// Check that `[va, va + len)` is mapped in `aspace` with at least
/// `perm | P` on every page. On failure returns the first failing
/// address: `va` itself if the first page is bad, page bases after that.
pub fn check(
    mem: &PhysMem,
    aspace: &AddressSpace,
    va: VirtAddr,
    len: u32,
    perm: PteFlags,
) -> Result<(), VirtAddr> {
    let required = perm | PteFlags::P;
    let end = match va.checked_add(len) {
        Some(e) => pgup(e),
        None => return Err(va),
    };
    let mut page = pgdown(va);
    while page < end {
        let bad = if page < va { va } else { page };
        if page >= ULIM {
            return Err(bad);
        }
        match aspace.lookup(mem, page) {
            Some((_, flags)) if flags.contains(required) => {}
            _ => return Err(bad),
        }
        page += PGSIZE;
    }
    Ok(())
}

/// Copy `buf.len()` bytes out of user memory at `va`, re-checking `perm`
/// per page. Fails `Fault` on any unmapped or under-privileged page.
pub fn copy_from(
    mem: &PhysMem,
    aspace: &AddressSpace,
    va: VirtAddr,
    buf: &mut [u8],
    perm: PteFlags,
) -> Result<(), Error> {
    let required = perm | PteFlags::P;
    let mut off = 0usize;
    while off < buf.len() {
        let cur = va.checked_add(off as u32).ok_or(Error::Fault)?;
        if cur >= ULIM {
            return Err(Error::Fault);
        }
        let (pa, flags) = aspace.lookup(mem, pgdown(cur)).ok_or(Error::Fault)?;
        if !flags.contains(required) {
            return Err(Error::Fault);
        }
        let page_off = (cur % PGSIZE) as usize;
        let chunk = core::cmp::min(buf.len() - off, PGSIZE as usize - page_off);
        let frame = mem.frame_bytes(pa);
        buf[off..off + chunk].copy_from_slice(&frame[page_off..page_off + chunk]);
        off += chunk;
    }
    Ok(())
}

/// Copy `bytes` into user memory at `va`, re-checking `perm` per page.
pub fn copy_to(
    mem: &mut PhysMem,
    aspace: &AddressSpace,
    va: VirtAddr,
    bytes: &[u8],
    perm: PteFlags,
) -> Result<(), Error> {
    let required = perm | PteFlags::P;
    let mut off = 0usize;
    while off < bytes.len() {
        let cur = va.checked_add(off as u32).ok_or(Error::Fault)?;
        if cur >= ULIM {
            return Err(Error::Fault);
        }
        let (pa, flags) = aspace.lookup(mem, pgdown(cur)).ok_or(Error::Fault)?;
        if !flags.contains(required) {
            return Err(Error::Fault);
        }
        let page_off = (cur % PGSIZE) as usize;
        let chunk = core::cmp::min(bytes.len() - off, PGSIZE as usize - page_off);
        let frame = mem.frame_bytes_mut(pa);
        frame[page_off..page_off + chunk].copy_from_slice(&bytes[off..off + chunk]);
        off += chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERM_RW: PteFlags = PteFlags::U.union(PteFlags::W).union(PteFlags::P);
    const PERM_RO: PteFlags = PteFlags::U.union(PteFlags::P);

    fn setup_mapped(vas: &[(u32, PteFlags)]) -> (PhysMem, AddressSpace) {
        let mut mem = PhysMem::new(64);
        let aspace = AddressSpace::new(&mut mem).unwrap();
        for &(va, perm) in vas {
            let frame = mem.alloc(true).unwrap();
            aspace.insert(&mut mem, frame, va, perm).unwrap();
        }
        (mem, aspace)
    }

    #[test]
    fn check_passes_on_mapped_range() {
        let (mem, aspace) = setup_mapped(&[(0x1000, PERM_RW), (0x2000, PERM_RW)]);
        assert_eq!(check(&mem, &aspace, 0x1800, 0x1000, PteFlags::U), Ok(()));
    }

    #[test]
    fn check_reports_first_bad_address() {
        let (mem, aspace) = setup_mapped(&[(0x1000, PERM_RW)]);
        // second page unmapped: failure reported at its base
        assert_eq!(
            check(&mem, &aspace, 0x1800, 0x1000, PteFlags::U),
            Err(0x2000)
        );
        // first page unmapped: failure reported at va itself
        assert_eq!(check(&mem, &aspace, 0x5432, 8, PteFlags::U), Err(0x5432));
    }

    #[test]
    fn check_enforces_write_permission() {
        let (mem, aspace) = setup_mapped(&[(0x1000, PERM_RO)]);
        assert_eq!(check(&mem, &aspace, 0x1000, 16, PteFlags::U), Ok(()));
        assert_eq!(
            check(&mem, &aspace, 0x1000, 16, PteFlags::U | PteFlags::W),
            Err(0x1000)
        );
    }

    #[test]
    fn check_rejects_kernel_addresses() {
        let (mem, aspace) = setup_mapped(&[]);
        assert!(check(&mem, &aspace, ULIM, 4, PteFlags::U).is_err());
        assert!(check(&mem, &aspace, u32::MAX - 3, 8, PteFlags::U).is_err());
    }

    #[test]
    fn copies_cross_page_boundaries() {
        let (mut mem, aspace) = setup_mapped(&[(0x1000, PERM_RW), (0x2000, PERM_RW)]);
        let data: alloc::vec::Vec<u8> = (0u8..64).collect();
        copy_to(&mut mem, &aspace, 0x1FE0, &data, PteFlags::U | PteFlags::W).unwrap();

        let mut back = [0u8; 64];
        copy_from(&mem, &aspace, 0x1FE0, &mut back, PteFlags::U).unwrap();
        assert_eq!(&back[..], &data[..]);
    }

    #[test]
    fn copy_to_readonly_page_faults() {
        let (mut mem, aspace) = setup_mapped(&[(0x1000, PERM_RO)]);
        let r = copy_to(&mut mem, &aspace, 0x1000, &[1, 2, 3], PteFlags::U | PteFlags::W);
        assert_eq!(r, Err(Error::Fault));
    }
}
