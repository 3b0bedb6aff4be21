//! Syscall dispatcher plus the console and identity primitives.
//!
//! Routes the call number to its handler and demuxes the result into
//! the accumulator convention.

use core::fmt::Write;

use exo9_abi::number::*;
use exo9_abi::{Error, PteFlags};

use super::{aspace_of, env_ops, ipc, page_ops, SyscallReturn};
use crate::env::EnvId;
use crate::kernel::Kernel;
use crate::mem::{user, VirtAddr};

/// Dispatch a system call for the current environment of `cpu`.
pub fn dispatch(k: &mut Kernel, cpu: usize, no: u32, args: [u32; 5]) -> SyscallReturn {
    let cur = k
        .cpus
        .current(cpu)
        .expect("system call with no current environment");
    let [a1, a2, a3, a4, a5] = args;

    let result = match no {
        SYS_CPUTS => sys_cputs(k, cpu, cur, a1, a2),
        SYS_CGETC => sys_cgetc(k),
        SYS_GETENVID => sys_getenvid(k, cur),
        SYS_ENV_DESTROY => env_ops::sys_env_destroy(k, cpu, cur, EnvId(a1)),
        SYS_YIELD => Ok(SyscallReturn::Yield),
        SYS_EXOFORK => env_ops::sys_exofork(k, cur),
        SYS_ENV_SET_STATUS => env_ops::sys_env_set_status(k, cur, EnvId(a1), a2),
        SYS_ENV_SET_TRAPFRAME => env_ops::sys_env_set_trapframe(k, cur, EnvId(a1), a2),
        SYS_ENV_SET_PGFAULT_UPCALL => env_ops::sys_env_set_pgfault_upcall(k, cur, EnvId(a1), a2),
        SYS_PAGE_ALLOC => page_ops::sys_page_alloc(k, cur, EnvId(a1), a2, a3),
        SYS_PAGE_MAP => page_ops::sys_page_map(k, cur, EnvId(a1), a2, EnvId(a3), a4, a5),
        SYS_PAGE_UNMAP => page_ops::sys_page_unmap(k, cur, EnvId(a1), a2),
        SYS_IPC_TRY_SEND => ipc::sys_ipc_try_send(k, cur, EnvId(a1), a2, a3, a4),
        SYS_IPC_RECV => ipc::sys_ipc_recv(k, cur, a1),
        _ => Err(Error::NoSys),
    };

    match result {
        Ok(ret) => ret,
        Err(e) => {
            log::trace!("syscall {} from {:08x}: {}", super::name(no), cur.0, e.name());
            SyscallReturn::Value(e.to_ret())
        }
    }
}

/// Print `len` bytes at `va` to the console. The caller must hold
/// user/present permission on the whole range; a violation destroys it.
fn sys_cputs(
    k: &mut Kernel,
    cpu: usize,
    cur: EnvId,
    va: VirtAddr,
    len: u32,
) -> Result<SyscallReturn, Error> {
    let aspace = aspace_of(k, cur);
    if let Err(bad) = user::check(&k.mem, &aspace, va, len, PteFlags::U) {
        let _ = writeln!(
            k.console,
            "[{}] user_mem_check assertion failure for va {:08x}",
            cur, bad
        );
        k.env_destroy(cpu, cur);
        return Ok(SyscallReturn::Yield);
    }

    let mut off = 0u32;
    let mut buf = [0u8; 256];
    while off < len {
        let chunk = core::cmp::min(len - off, buf.len() as u32) as usize;
        user::copy_from(&k.mem, &aspace, va + off, &mut buf[..chunk], PteFlags::U)?;
        k.console.write_bytes(&buf[..chunk]);
        off += chunk as u32;
    }
    Ok(SyscallReturn::Value(0))
}

/// Non-blocking console read; 0 when no input is pending.
fn sys_cgetc(k: &mut Kernel) -> Result<SyscallReturn, Error> {
    let c = k.console.getc().map(|b| b as i32).unwrap_or(0);
    Ok(SyscallReturn::Value(c))
}

fn sys_getenvid(k: &Kernel, cur: EnvId) -> Result<SyscallReturn, Error> {
    let e = k.envs.get(cur).ok_or(Error::BadEnv)?;
    Ok(SyscallReturn::Value(e.id.0 as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use exo9_abi::layout::{PGSIZE, UTOP};
    use exo9_abi::EnvStatus;

    const PERM_RW: u32 = 0x7; // P | W | U

    /// A kernel with one environment current on CPU 0.
    fn setup() -> (Kernel, EnvId) {
        let mut k = Kernel::new(256);
        let id = k.envs.alloc(&mut k.mem, EnvId(0)).unwrap();
        k.env_run(0, id);
        (k, id)
    }

    fn call(k: &mut Kernel, no: u32, args: [u32; 5]) -> SyscallReturn {
        dispatch(k, 0, no, args)
    }

    #[test]
    fn unknown_number_is_no_sys() {
        let (mut k, _) = setup();
        assert_eq!(
            call(&mut k, 999, [0; 5]),
            SyscallReturn::Value(Error::NoSys.to_ret())
        );
    }

    #[test]
    fn getenvid_returns_caller() {
        let (mut k, id) = setup();
        assert_eq!(
            call(&mut k, SYS_GETENVID, [0; 5]),
            SyscallReturn::Value(id.0 as i32)
        );
    }

    #[test]
    fn yield_does_not_resume_caller() {
        let (mut k, _) = setup();
        assert_eq!(call(&mut k, SYS_YIELD, [0; 5]), SyscallReturn::Yield);
    }

    #[test]
    fn cgetc_drains_console_input() {
        let (mut k, _) = setup();
        assert_eq!(call(&mut k, SYS_CGETC, [0; 5]), SyscallReturn::Value(0));
        k.console.feed(b'q');
        assert_eq!(
            call(&mut k, SYS_CGETC, [0; 5]),
            SyscallReturn::Value(b'q' as i32)
        );
    }

    #[test]
    fn cputs_writes_mapped_bytes() {
        let (mut k, id) = setup();
        assert_eq!(
            call(&mut k, SYS_PAGE_ALLOC, [0, 0x1000, PERM_RW, 0, 0]),
            SyscallReturn::Value(0)
        );
        let aspace = aspace_of(&k, id);
        user::copy_to(&mut k.mem, &aspace, 0x1000, b"hello, exo9", PteFlags::U).unwrap();

        assert_eq!(
            call(&mut k, SYS_CPUTS, [0x1000, 11, 0, 0, 0]),
            SyscallReturn::Value(0)
        );
        assert!(k.console.output_contains("hello, exo9"));
    }

    #[test]
    fn cputs_on_unmapped_buffer_destroys_caller() {
        let (mut k, id) = setup();
        let ret = call(&mut k, SYS_CPUTS, [0x8000, 16, 0, 0, 0]);
        assert_eq!(ret, SyscallReturn::Yield);
        assert!(k.envs.get(id).is_none());
        assert!(k.console.output_contains("user_mem_check assertion failure"));
    }

    #[test]
    fn page_alloc_boundary_at_utop() {
        let (mut k, _) = setup();
        assert_eq!(
            call(&mut k, SYS_PAGE_ALLOC, [0, UTOP, PERM_RW, 0, 0]),
            SyscallReturn::Value(Error::Inval.to_ret())
        );
        assert_eq!(
            call(&mut k, SYS_PAGE_ALLOC, [0, UTOP - PGSIZE, PERM_RW, 0, 0]),
            SyscallReturn::Value(0)
        );
    }

    #[test]
    fn page_alloc_rejects_bad_perms() {
        let (mut k, _) = setup();
        // missing user bit
        assert_eq!(
            call(&mut k, SYS_PAGE_ALLOC, [0, 0x1000, 0x3, 0, 0]),
            SyscallReturn::Value(Error::Inval.to_ret())
        );
        // hardware-reserved bit
        assert_eq!(
            call(&mut k, SYS_PAGE_ALLOC, [0, 0x1000, PERM_RW | 0x40, 0, 0]),
            SyscallReturn::Value(Error::Inval.to_ret())
        );
        // unaligned
        assert_eq!(
            call(&mut k, SYS_PAGE_ALLOC, [0, 0x1234, PERM_RW, 0, 0]),
            SyscallReturn::Value(Error::Inval.to_ret())
        );
    }

    #[test]
    fn page_alloc_then_unmap_restores_frame_count() {
        let (mut k, _) = setup();
        let free_before = k.mem.free_count();
        assert_eq!(
            call(&mut k, SYS_PAGE_ALLOC, [0, 0x1000, PERM_RW, 0, 0]),
            SyscallReturn::Value(0)
        );
        assert_eq!(
            call(&mut k, SYS_PAGE_UNMAP, [0, 0x1000, 0, 0, 0]),
            SyscallReturn::Value(0)
        );
        // the data frame returned; only the page table stays
        assert_eq!(k.mem.free_count(), free_before - 1);

        // unmapping again is observationally identical
        assert_eq!(
            call(&mut k, SYS_PAGE_UNMAP, [0, 0x1000, 0, 0, 0]),
            SyscallReturn::Value(0)
        );
        assert_eq!(k.mem.free_count(), free_before - 1);
    }

    #[test]
    fn set_status_validates_argument() {
        let (mut k, id) = setup();
        let child = {
            let r = call(&mut k, SYS_EXOFORK, [0; 5]);
            match r {
                SyscallReturn::Value(v) if v > 0 => EnvId(v as u32),
                other => panic!("exofork failed: {:?}", other),
            }
        };
        assert_eq!(
            call(
                &mut k,
                SYS_ENV_SET_STATUS,
                [child.0, EnvStatus::Running as u32, 0, 0, 0]
            ),
            SyscallReturn::Value(Error::Inval.to_ret())
        );
        assert_eq!(
            call(&mut k, SYS_ENV_SET_STATUS, [child.0, 99, 0, 0, 0]),
            SyscallReturn::Value(Error::Inval.to_ret())
        );
        assert_eq!(
            call(
                &mut k,
                SYS_ENV_SET_STATUS,
                [child.0, EnvStatus::Runnable as u32, 0, 0, 0]
            ),
            SyscallReturn::Value(0)
        );
        assert_eq!(k.envs.get(child).unwrap().status, EnvStatus::Runnable);
        let _ = id;
    }

    #[test]
    fn exofork_child_is_a_frozen_copy() {
        let (mut k, parent) = setup();
        k.envs.get_mut(parent).unwrap().tf.regs.ebx = 0x1234;

        let ret = call(&mut k, SYS_EXOFORK, [0; 5]);
        let child = match ret {
            SyscallReturn::Value(v) if v > 0 => EnvId(v as u32),
            other => panic!("exofork failed: {:?}", other),
        };

        let c = k.envs.get(child).unwrap();
        assert_eq!(c.status, EnvStatus::NotRunnable);
        assert_eq!(c.parent, parent);
        assert_eq!(c.tf.regs.ebx, 0x1234);
        // the child sees 0 in the result register when it finally runs
        assert_eq!(c.tf.regs.eax, 0);
    }

    #[test]
    fn destroy_denied_for_unrelated_env() {
        let (mut k, _) = setup();
        let stranger = k.envs.alloc(&mut k.mem, EnvId(0)).unwrap();
        assert_eq!(
            call(&mut k, SYS_ENV_DESTROY, [stranger.0, 0, 0, 0, 0]),
            SyscallReturn::Value(Error::BadEnv.to_ret())
        );
        assert!(k.envs.get(stranger).is_some());
    }
}
