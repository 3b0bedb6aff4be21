//! Round-robin scheduling.
//!
//! Selection starts just past the environment that was current on this
//! CPU and wraps once around the table. If nothing else is runnable but
//! the current environment still is, it keeps the CPU; otherwise the CPU
//! halts until the next interrupt.

use exo9_abi::layout::NENV;
use exo9_abi::EnvStatus;

use crate::kernel::{Disposition, Kernel};

/// Pick the next environment and hand the CPU to it. Release of the
/// kernel lock on the way back to user mode is the caller's duty.
pub fn sched_yield(k: &mut Kernel, cpu: usize) -> Disposition {
    let cur = k.cpus.current(cpu);
    let start = cur.map(|id| id.index() + 1).unwrap_or(0);

    for i in 0..NENV {
        let idx = (start + i) % NENV;
        if k.envs.status_at(idx) == EnvStatus::Runnable {
            let id = k.envs.id_at(idx);
            return k.env_run(cpu, id);
        }
    }

    if let Some(id) = cur {
        if k.envs.get(id).map(|e| e.status) == Some(EnvStatus::Running) {
            return k.env_run(cpu, id);
        }
    }

    sched_halt(k, cpu)
}

/// Nothing to run: park this CPU. It leaves the kernel with the lock
/// released and sits in `hlt` until an interrupt restarts dispatch.
fn sched_halt(k: &mut Kernel, cpu: usize) -> Disposition {
    let mut any_alive = false;
    for idx in 0..NENV {
        if !matches!(
            k.envs.status_at(idx),
            EnvStatus::Free | EnvStatus::NotRunnable
        ) {
            any_alive = true;
            break;
        }
    }
    if !any_alive {
        log::info!("no runnable environments in the system");
    }

    k.cpus.clear_current(cpu);
    k.cpus.mark_halted(cpu);
    Disposition::Halt
}
