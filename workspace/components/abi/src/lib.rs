//! exo9 kernel/user shared ABI (no_std).
//!
//! Everything a user environment needs to talk to the kernel: the syscall
//! numbers and register convention, the error taxonomy, the page-table
//! permission bits users may pass, the segment selectors, the trap vector
//! numbers, the user-visible memory layout, and the trap-frame records
//! whose layout is contractual between the entry stubs, the kernel, and
//! the user-mode fault trampoline.

#![cfg_attr(not(test), no_std)]

pub mod env;
pub mod error;
pub mod flag;
pub mod layout;
pub mod number;
pub mod trap;

pub use env::EnvStatus;
pub use error::{Error, Result};
pub use flag::{Eflags, PteFlags};
pub use trap::{PushRegs, Trapframe, UTrapframe};
