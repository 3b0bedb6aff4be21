//! exo9 syscall numbers.
//!
//! Register convention: the accumulator carries the call number on entry
//! and the signed result on exit; arguments ride in `edx`, `ecx`, `ebx`,
//! `edi`, `esi`, in that order.

pub const SYS_CPUTS: u32 = 0;
pub const SYS_CGETC: u32 = 1;
pub const SYS_GETENVID: u32 = 2;
pub const SYS_ENV_DESTROY: u32 = 3;
pub const SYS_PAGE_ALLOC: u32 = 4;
pub const SYS_PAGE_MAP: u32 = 5;
pub const SYS_PAGE_UNMAP: u32 = 6;
pub const SYS_EXOFORK: u32 = 7;
pub const SYS_ENV_SET_STATUS: u32 = 8;
pub const SYS_ENV_SET_TRAPFRAME: u32 = 9;
pub const SYS_ENV_SET_PGFAULT_UPCALL: u32 = 10;
pub const SYS_YIELD: u32 = 11;
pub const SYS_IPC_TRY_SEND: u32 = 12;
pub const SYS_IPC_RECV: u32 = 13;

/// Number of system calls; anything at or above this is `E_NO_SYS`.
pub const NSYSCALLS: u32 = 14;
