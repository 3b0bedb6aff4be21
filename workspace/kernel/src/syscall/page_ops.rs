//! Address-space manipulation primitives.

use exo9_abi::layout::{pgoff, UTOP};
use exo9_abi::{Error, PteFlags};

use super::{aspace_of, SyscallReturn};
use crate::env::EnvId;
use crate::kernel::Kernel;
use crate::mem::VirtAddr;

/// A user-supplied address must lie below `UTOP` and be page-aligned.
pub(super) fn check_va(va: VirtAddr) -> Result<(), Error> {
    if va >= UTOP || pgoff(va) != 0 {
        return Err(Error::Inval);
    }
    Ok(())
}

/// A user-supplied permission word must carry user+present and nothing
/// outside the permitted mask.
pub(super) fn check_perm(perm: u32) -> Result<PteFlags, Error> {
    let perm = PteFlags::from_bits(perm).ok_or(Error::Inval)?;
    if !perm.valid_for_user_mapping() {
        return Err(Error::Inval);
    }
    Ok(perm)
}

/// Allocate a zeroed frame and map it at `va` in `id`'s address space.
/// An existing mapping at `va` is replaced.
pub fn sys_page_alloc(
    k: &mut Kernel,
    cur: EnvId,
    id: EnvId,
    va: VirtAddr,
    perm: u32,
) -> Result<SyscallReturn, Error> {
    let target = k.envs.lookup(cur, id, true)?;
    check_va(va)?;
    let perm = check_perm(perm)?;

    let frame = k.mem.alloc(true)?;
    let aspace = aspace_of(k, target);
    if let Err(e) = aspace.insert(&mut k.mem, frame, va, perm) {
        // the frame was never mapped; hand it straight back
        k.mem.free(frame);
        return Err(e);
    }
    Ok(SyscallReturn::Value(0))
}

/// Map the frame backing `src_va` in `src_id` at `dst_va` in `dst_id`.
/// Write access cannot be granted over a read-only source mapping.
pub fn sys_page_map(
    k: &mut Kernel,
    cur: EnvId,
    src_id: EnvId,
    src_va: VirtAddr,
    dst_id: EnvId,
    dst_va: VirtAddr,
    perm: u32,
) -> Result<SyscallReturn, Error> {
    let src_env = k.envs.lookup(cur, src_id, true)?;
    let dst_env = k.envs.lookup(cur, dst_id, true)?;
    check_va(src_va)?;
    check_va(dst_va)?;
    let perm = check_perm(perm)?;

    let src_as = aspace_of(k, src_env);
    let (frame, pte) = src_as.lookup(&k.mem, src_va).ok_or(Error::Inval)?;
    if perm.contains(PteFlags::W) && !pte.contains(PteFlags::W) {
        return Err(Error::Inval);
    }

    let dst_as = aspace_of(k, dst_env);
    dst_as.insert(&mut k.mem, frame, dst_va, perm)?;
    Ok(SyscallReturn::Value(0))
}

/// Drop the mapping at `va` in `id`'s address space. Unmapping an
/// unmapped address silently succeeds.
pub fn sys_page_unmap(
    k: &mut Kernel,
    cur: EnvId,
    id: EnvId,
    va: VirtAddr,
) -> Result<SyscallReturn, Error> {
    let target = k.envs.lookup(cur, id, true)?;
    check_va(va)?;
    aspace_of(k, target).remove(&mut k.mem, va);
    Ok(SyscallReturn::Value(0))
}
