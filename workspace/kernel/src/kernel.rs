//! The kernel state and its lifecycle operations.
//!
//! Everything the big kernel lock guards lives in one [`Kernel`] value:
//! the environment table, physical memory, the per-CPU records, the
//! descriptor tables, the console, and the LAPIC handle. The arch entry
//! glue works on the single global instance; tests construct their own.

use exo9_abi::EnvStatus;

use crate::apic::Lapic;
use crate::arch::x86::desc::{Gdt, Idt};
use crate::console::Console;
use crate::cpu::CpuTable;
use crate::env::{EnvId, EnvTable};
use crate::klock::KernelLock;
use crate::mem::PhysMem;

/// What a CPU does after a kernel entry completes: resume an environment
/// or sit idle until the next interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Pop the environment's saved frame and return to user mode.
    Run(EnvId),
    /// No runnable environment; halt until an interrupt arrives.
    Halt,
}

pub struct Kernel {
    pub mem: PhysMem,
    pub envs: EnvTable,
    pub cpus: CpuTable,
    pub idt: Idt,
    pub gdt: Gdt,
    pub lapic: Lapic,
    pub console: Console,
}

impl Kernel {
    /// Build a kernel managing `npages` physical frames.
    pub fn new(npages: usize) -> Self {
        Kernel {
            mem: PhysMem::new(npages),
            envs: EnvTable::new(),
            cpus: CpuTable::new(),
            idt: Idt::new(),
            gdt: Gdt::new(),
            lapic: Lapic::new(),
            console: Console::new(),
        }
    }

    /// Context switch to `id`: demote the previously current environment
    /// if it was still `Running`, promote `id`, and hand the CPU over.
    /// On hardware the caller then loads the page directory, releases the
    /// kernel lock and pops the saved frame.
    pub fn env_run(&mut self, cpu: usize, id: EnvId) -> Disposition {
        if let Some(prev) = self.cpus.current(cpu) {
            if prev != id {
                if let Some(pe) = self.envs.get_mut(prev) {
                    if pe.status == EnvStatus::Running {
                        pe.status = EnvStatus::Runnable;
                    }
                }
            }
        }
        let e = self.envs.get_mut(id).expect("running a dead environment");
        e.status = EnvStatus::Running;
        e.runs += 1;
        debug_assert!(e.tf.from_user(), "running environment with a kernel frame");
        debug_assert!(e.tf.interrupts_enabled());
        self.cpus.set_current(cpu, id);
        Disposition::Run(id)
    }

    /// Release `id`'s resources.
    pub fn env_free(&mut self, cpu: usize, id: EnvId) {
        let by = self.cpus.current(cpu).map(|c| c.0).unwrap_or(0);
        log::info!("[{:08x}] free env {}", by, id);
        self.envs.free(&mut self.mem, id);
    }

    /// Destroy `id`. An environment running on another CPU is marked
    /// `Dying` and reaped on that CPU's next kernel entry; anything else
    /// is freed immediately. Returns `true` when this call freed the
    /// CPU's own current environment (the caller must reschedule).
    pub fn env_destroy(&mut self, cpu: usize, id: EnvId) -> bool {
        let is_current = self.cpus.current(cpu) == Some(id);
        let status = self.envs.get(id).expect("destroying a dead environment").status;
        if status == EnvStatus::Running && !is_current {
            self.envs
                .get_mut(id)
                .expect("destroying a dead environment")
                .status = EnvStatus::Dying;
            return false;
        }
        self.env_free(cpu, id);
        if is_current {
            self.cpus.clear_current(cpu);
        }
        is_current
    }
}

static KERNEL: spin::Once<KernelLock<Kernel>> = spin::Once::new();

/// Initialize the global kernel instance. Called once from the boot path.
pub fn init(npages: usize) -> &'static KernelLock<Kernel> {
    KERNEL.call_once(|| KernelLock::new(Kernel::new(npages)))
}

/// The global kernel instance; panics before `init`.
pub fn global() -> &'static KernelLock<Kernel> {
    KERNEL.get().expect("kernel::init has not run")
}
