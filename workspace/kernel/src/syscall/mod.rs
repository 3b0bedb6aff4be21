//! The system-call surface.
//!
//! A single software-interrupt vector funnels here; the accumulator
//! selects the primitive and five registers carry arguments. Handlers
//! return `Result<SyscallReturn, Error>`: errors become the negative
//! code in the caller's saved accumulator, `Yield` means the caller does
//! not resume on this path (the scheduler, or an IPC sender acting on
//! the caller's behalf, decides what it sees next).

pub mod dispatcher;
pub mod env_ops;
pub mod ipc;
pub mod page_ops;

pub use dispatcher::dispatch;

use exo9_abi::number::*;

use crate::env::EnvId;
use crate::kernel::Kernel;
use crate::mem::AddressSpace;

/// Outcome of a system call, as seen by the trap dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallReturn {
    /// Place this value in the caller's saved accumulator and resume it.
    Value(i32),
    /// Do not write a result; reschedule instead.
    Yield,
}

/// The target environment's address space. Every live environment owns
/// one; a missing one is a kernel invariant violation.
pub(crate) fn aspace_of(k: &Kernel, id: EnvId) -> AddressSpace {
    k.envs
        .get(id)
        .and_then(|e| e.aspace)
        .expect("live environment without an address space")
}

/// Primitive name for diagnostics.
pub fn name(no: u32) -> &'static str {
    match no {
        SYS_CPUTS => "cputs",
        SYS_CGETC => "cgetc",
        SYS_GETENVID => "getenvid",
        SYS_ENV_DESTROY => "env_destroy",
        SYS_PAGE_ALLOC => "page_alloc",
        SYS_PAGE_MAP => "page_map",
        SYS_PAGE_UNMAP => "page_unmap",
        SYS_EXOFORK => "exofork",
        SYS_ENV_SET_STATUS => "env_set_status",
        SYS_ENV_SET_TRAPFRAME => "env_set_trapframe",
        SYS_ENV_SET_PGFAULT_UPCALL => "env_set_pgfault_upcall",
        SYS_YIELD => "yield",
        SYS_IPC_TRY_SEND => "ipc_try_send",
        SYS_IPC_RECV => "ipc_recv",
        _ => "(unknown)",
    }
}
