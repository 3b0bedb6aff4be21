//! Per-CPU state.
//!
//! Each CPU owns its slot exclusively: the task state is written once at
//! bring-up by that CPU, and the status word is the only field touched
//! before the kernel lock is taken, so it is atomic.

use core::sync::atomic::{AtomicU32, Ordering};

use exo9_abi::layout::NCPU;

use crate::arch::x86::desc::TaskState;
use crate::env::EnvId;
use crate::mem::VirtAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CpuStatus {
    Unused = 0,
    Started = 1,
    Halted = 2,
}

impl CpuStatus {
    fn from_raw(raw: u32) -> CpuStatus {
        match raw {
            1 => CpuStatus::Started,
            2 => CpuStatus::Halted,
            _ => CpuStatus::Unused,
        }
    }
}

/// No current environment. Real ids always carry a generation above the
/// index bits, so zero is never a valid id.
const NO_ENV: u32 = 0;

pub struct CpuInfo {
    status: AtomicU32,
    current: AtomicU32,
    /// Faulting address recorded from the MMU fault register (`%cr2`) by
    /// the entry path, before dispatch.
    fault_va: AtomicU32,
    /// This CPU's task state; `esp0`/`ss0` route ring crossings onto the
    /// CPU's own kernel stack.
    pub ts: TaskState,
}

impl CpuInfo {
    fn new() -> Self {
        CpuInfo {
            status: AtomicU32::new(CpuStatus::Unused as u32),
            current: AtomicU32::new(NO_ENV),
            fault_va: AtomicU32::new(0),
            ts: TaskState::default(),
        }
    }
}

/// The per-CPU table, indexed by CPU number.
pub struct CpuTable {
    cpus: [CpuInfo; NCPU],
}

impl CpuTable {
    pub fn new() -> Self {
        CpuTable {
            cpus: core::array::from_fn(|_| CpuInfo::new()),
        }
    }

    pub fn status(&self, cpu: usize) -> CpuStatus {
        CpuStatus::from_raw(self.cpus[cpu].status.load(Ordering::Acquire))
    }

    /// Atomically transition to `Started`, returning the prior status.
    /// A `Halted` prior value tells the entry path this CPU is coming out
    /// of the idle loop.
    pub fn mark_started(&self, cpu: usize) -> CpuStatus {
        CpuStatus::from_raw(
            self.cpus[cpu]
                .status
                .swap(CpuStatus::Started as u32, Ordering::AcqRel),
        )
    }

    pub fn mark_halted(&self, cpu: usize) {
        self.cpus[cpu]
            .status
            .store(CpuStatus::Halted as u32, Ordering::Release);
    }

    pub fn current(&self, cpu: usize) -> Option<EnvId> {
        match self.cpus[cpu].current.load(Ordering::Acquire) {
            NO_ENV => None,
            raw => Some(EnvId(raw)),
        }
    }

    pub fn set_current(&self, cpu: usize, id: EnvId) {
        self.cpus[cpu].current.store(id.0, Ordering::Release);
    }

    pub fn clear_current(&self, cpu: usize) {
        self.cpus[cpu].current.store(NO_ENV, Ordering::Release);
    }

    pub fn record_fault_va(&self, cpu: usize, va: VirtAddr) {
        self.cpus[cpu].fault_va.store(va, Ordering::Release);
    }

    pub fn fault_va(&self, cpu: usize) -> VirtAddr {
        self.cpus[cpu].fault_va.load(Ordering::Acquire)
    }

    pub fn ts(&self, cpu: usize) -> &TaskState {
        &self.cpus[cpu].ts
    }

    pub fn ts_mut(&mut self, cpu: usize) -> &mut TaskState {
        &mut self.cpus[cpu].ts
    }
}

impl Default for CpuTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_transition_reports_prior_status() {
        let cpus = CpuTable::new();
        assert_eq!(cpus.mark_started(0), CpuStatus::Unused);
        cpus.mark_halted(0);
        assert_eq!(cpus.mark_started(0), CpuStatus::Halted);
        assert_eq!(cpus.mark_started(0), CpuStatus::Started);
    }

    #[test]
    fn current_env_tracking() {
        let cpus = CpuTable::new();
        assert_eq!(cpus.current(1), None);
        cpus.set_current(1, EnvId(0x1001));
        assert_eq!(cpus.current(1), Some(EnvId(0x1001)));
        assert_eq!(cpus.current(0), None);
        cpus.clear_current(1);
        assert_eq!(cpus.current(1), None);
    }
}
