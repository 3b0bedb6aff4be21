//! User environments: the execution contexts the kernel multiplexes.
//!
//! Identifiers pack a generation above the table index so a recycled
//! slot invalidates stale ids. Identifier 0 is the "current environment"
//! sentinel in syscall arguments.

use alloc::vec::Vec;

use exo9_abi::flag::{GD_UD, GD_UT, RPL_USER};
use exo9_abi::layout::{ENVGENSHIFT, NENV, USTACKTOP};
use exo9_abi::{Eflags, EnvStatus, Error, PteFlags, Trapframe};

use crate::mem::{AddressSpace, PhysMem, VirtAddr};

/// Opaque environment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(pub u32);

impl EnvId {
    /// The "current environment" sentinel.
    pub const CURRENT: EnvId = EnvId(0);

    /// Table index of this identifier.
    #[inline]
    pub fn index(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }
}

impl core::fmt::Display for EnvId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// A user execution context.
pub struct Env {
    pub id: EnvId,
    pub parent: EnvId,
    pub status: EnvStatus,
    /// Times this environment has been dispatched.
    pub runs: u32,
    /// Saved CPU state, restored when the environment is resumed.
    pub tf: Trapframe,
    /// Owned address space; absent while the slot is free.
    pub aspace: Option<AddressSpace>,
    /// Registered page-fault upcall entry point; 0 when absent.
    pub pgfault_upcall: VirtAddr,

    // IPC mailbox
    pub ipc_recving: bool,
    pub ipc_dstva: VirtAddr,
    pub ipc_value: u32,
    pub ipc_from: EnvId,
    pub ipc_perm: PteFlags,
}

impl Env {
    fn empty() -> Self {
        Env {
            id: EnvId(0),
            parent: EnvId(0),
            status: EnvStatus::Free,
            runs: 0,
            tf: Trapframe::default(),
            aspace: None,
            pgfault_upcall: 0,
            ipc_recving: false,
            ipc_dstva: 0,
            ipc_value: 0,
            ipc_from: EnvId(0),
            ipc_perm: PteFlags::empty(),
        }
    }
}

/// The environment table: `NENV` slots plus a LIFO free list.
pub struct EnvTable {
    envs: Vec<Env>,
    free: Vec<usize>,
}

impl EnvTable {
    pub fn new() -> Self {
        let mut envs = Vec::with_capacity(NENV);
        for _ in 0..NENV {
            envs.push(Env::empty());
        }
        // LIFO; lowest indices allocate first.
        let free = (0..NENV).rev().collect();
        EnvTable { envs, free }
    }

    /// Allocate an environment with `parent` as its creator.
    ///
    /// The new environment is `Runnable` with a fresh user-mode frame:
    /// user segments at RPL 3, stack at `USTACKTOP`, interrupts enabled.
    pub fn alloc(&mut self, mem: &mut PhysMem, parent: EnvId) -> Result<EnvId, Error> {
        let idx = *self.free.last().ok_or(Error::NoFreeEnv)?;
        let aspace = AddressSpace::new(mem)?;
        self.free.pop();

        let e = &mut self.envs[idx];
        let mut generation = e.id.0.wrapping_add(1 << ENVGENSHIFT) & !(NENV as u32 - 1);
        if generation as i32 <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        e.id = EnvId(generation | idx as u32);
        e.parent = parent;
        e.status = EnvStatus::Runnable;
        e.runs = 0;
        e.aspace = Some(aspace);
        e.pgfault_upcall = 0;
        e.ipc_recving = false;
        e.ipc_dstva = 0;
        e.ipc_value = 0;
        e.ipc_from = EnvId(0);
        e.ipc_perm = PteFlags::empty();

        e.tf = Trapframe::default();
        e.tf.ds = GD_UD | RPL_USER;
        e.tf.es = GD_UD | RPL_USER;
        e.tf.ss = GD_UD | RPL_USER;
        e.tf.cs = GD_UT | RPL_USER;
        e.tf.esp = USTACKTOP;
        e.tf.eflags = (Eflags::IF | Eflags::MBS).bits();

        log::debug!("env {} allocated (parent {})", e.id, parent);
        Ok(e.id)
    }

    /// Direct access by id; `None` if the id is stale or the slot free.
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        let e = &self.envs[id.index()];
        (e.status != EnvStatus::Free && e.id == id).then_some(e)
    }

    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        let e = &mut self.envs[id.index()];
        (e.status != EnvStatus::Free && e.id == id).then_some(e)
    }

    /// Resolve a syscall-supplied environment id on behalf of `cur`.
    ///
    /// Id 0 resolves to `cur`. With `checkperm`, the caller must be the
    /// target itself or its immediate parent.
    pub fn lookup(&self, cur: EnvId, id: EnvId, checkperm: bool) -> Result<EnvId, Error> {
        let target = if id == EnvId::CURRENT { cur } else { id };
        let e = self.get(target).ok_or(Error::BadEnv)?;
        if checkperm && target != cur && e.parent != cur {
            return Err(Error::BadEnv);
        }
        Ok(e.id)
    }

    /// Release an environment's resources and return its slot to the
    /// free list. The id keeps its generation so stale lookups fail.
    pub fn free(&mut self, mem: &mut PhysMem, id: EnvId) {
        let e = &mut self.envs[id.index()];
        assert_eq!(e.id, id, "freeing a stale environment id");
        assert_ne!(e.status, EnvStatus::Free, "double free of environment {}", id);
        if let Some(aspace) = e.aspace.take() {
            aspace.teardown(mem);
        }
        e.status = EnvStatus::Free;
        e.ipc_recving = false;
        e.pgfault_upcall = 0;
        self.free.push(id.index());
    }

    /// Status of the environment occupying slot `idx`, if any.
    pub fn status_at(&self, idx: usize) -> EnvStatus {
        self.envs[idx].status
    }

    /// Id of the environment occupying slot `idx`.
    pub fn id_at(&self, idx: usize) -> EnvId {
        self.envs[idx].id
    }

    /// Number of live (non-free) environments.
    pub fn live_count(&self) -> usize {
        NENV - self.free.len()
    }
}

impl Default for EnvTable {
    fn default() -> Self {
        Self::new()
    }
}
