//! Memory management: refcounted physical frames, two-level i386 address
//! spaces, and user-pointer validation.
//!
//! Physical memory is owned by [`PhysMem`]: the kernel manages a
//! direct-mapped arena of 4 KiB frames, and page directories / page
//! tables are real i386-format tables stored inside those frames. Every
//! page-table walk reads and writes entries through the arena, so the
//! whole layer runs identically under the MMU and under `cargo test`.

pub mod addrspace;
pub mod phys;
pub mod user;

pub use addrspace::AddressSpace;
pub use phys::{PhysAddr, PhysMem};

/// A user virtual address. Never dereferenced directly; always translated
/// through an environment's page tables first.
pub type VirtAddr = u32;
