//! Environment-management primitives.

use exo9_abi::flag::{GD_UD, GD_UT, RPL_USER};
use exo9_abi::{Eflags, EnvStatus, Error, PteFlags, Trapframe};
use zerocopy::FromBytes;

use super::{aspace_of, SyscallReturn};
use crate::env::EnvId;
use crate::kernel::Kernel;
use crate::mem::{user, VirtAddr};

/// Destroy `id` (the caller itself or one of its children).
pub fn sys_env_destroy(
    k: &mut Kernel,
    cpu: usize,
    cur: EnvId,
    id: EnvId,
) -> Result<SyscallReturn, Error> {
    let target = k.envs.lookup(cur, id, true)?;
    let freed_current = k.env_destroy(cpu, target);
    Ok(if freed_current {
        SyscallReturn::Yield
    } else {
        SyscallReturn::Value(0)
    })
}

/// Allocate a blank child environment.
///
/// The child's saved frame is a copy of the caller's with the result
/// register forced to zero, so the parent sees the child's id while the
/// child, once runnable and scheduled, sees 0.
pub fn sys_exofork(k: &mut Kernel, cur: EnvId) -> Result<SyscallReturn, Error> {
    let parent_tf = k.envs.get(cur).ok_or(Error::BadEnv)?.tf;
    let child = k.envs.alloc(&mut k.mem, cur)?;

    let c = k.envs.get_mut(child).expect("freshly allocated environment");
    c.status = EnvStatus::NotRunnable;
    c.tf = parent_tf;
    c.tf.regs.eax = 0;

    Ok(SyscallReturn::Value(child.0 as i32))
}

/// Set `id`'s status to `Runnable` or `NotRunnable`; nothing else is a
/// valid argument here.
pub fn sys_env_set_status(
    k: &mut Kernel,
    cur: EnvId,
    id: EnvId,
    status: u32,
) -> Result<SyscallReturn, Error> {
    let target = k.envs.lookup(cur, id, true)?;
    let status = EnvStatus::try_from(status).map_err(|_| Error::Inval)?;
    if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
        return Err(Error::Inval);
    }
    k.envs.get_mut(target).expect("resolved environment").status = status;
    Ok(SyscallReturn::Value(0))
}

/// Replace `id`'s saved frame with a user-supplied one.
///
/// The frame is read from the target's address space, then clamped so
/// the environment can only ever run at CPL 3, with interrupts enabled
/// and no I/O privilege. The clamps are non-negotiable.
pub fn sys_env_set_trapframe(
    k: &mut Kernel,
    cur: EnvId,
    id: EnvId,
    tf_va: VirtAddr,
) -> Result<SyscallReturn, Error> {
    let target = k.envs.lookup(cur, id, true)?;
    let aspace = aspace_of(k, target);

    let mut buf = [0u8; core::mem::size_of::<Trapframe>()];
    user::copy_from(&k.mem, &aspace, tf_va, &mut buf, PteFlags::U)?;
    let mut tf = Trapframe::read_from_bytes(&buf[..]).expect("buffer sized to the frame");

    tf.ds = GD_UD | RPL_USER;
    tf.es = GD_UD | RPL_USER;
    tf.ss = GD_UD | RPL_USER;
    tf.cs = GD_UT | RPL_USER;
    tf.eflags |= Eflags::IF.bits();
    tf.eflags &= !Eflags::IOPL_MASK.bits();

    k.envs.get_mut(target).expect("resolved environment").tf = tf;
    Ok(SyscallReturn::Value(0))
}

/// Register `fn_va` as `id`'s page-fault upcall. The address is stored
/// without being dereferenced; it is validated against the environment's
/// tables only when a fault is actually reflected.
pub fn sys_env_set_pgfault_upcall(
    k: &mut Kernel,
    cur: EnvId,
    id: EnvId,
    fn_va: VirtAddr,
) -> Result<SyscallReturn, Error> {
    let target = k.envs.lookup(cur, id, true)?;
    k.envs
        .get_mut(target)
        .expect("resolved environment")
        .pgfault_upcall = fn_va;
    Ok(SyscallReturn::Value(0))
}
