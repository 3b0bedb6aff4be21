//! Trap and interrupt dispatch.
//!
//! Every kernel entry funnels through [`trap`]: the per-vector stubs
//! normalize the frame shape, the entry glue acquires the big kernel
//! lock and records the fault register, and this module routes by
//! vector, then either resumes the current environment or reschedules.

pub mod upcall;

use core::fmt;

use exo9_abi::flag::{GD_KD, GD_TSS0};
use exo9_abi::layout::{KSTACKTOP, KSTKGAP, KSTKSIZE};
use exo9_abi::trap::{
    trapname, IRQ_KBD, IRQ_OFFSET, IRQ_SPURIOUS, IRQ_TIMER, T_BRKPT, T_DEBUG, T_PGFLT, T_SYSCALL,
};
use exo9_abi::{EnvStatus, Trapframe};

use crate::arch::x86::desc::{SegDesc, TaskState};
use crate::kernel::{Disposition, Kernel};
use crate::{monitor, sched, syscall};

/// What the routing step decided: fall through to resuming the current
/// environment, or go straight to the scheduler.
enum Continue {
    Resume,
    Reschedule,
}

/// Build the interrupt descriptor table. Called once at boot;
/// `stub_for` resolves a vector to its entry stub's address.
pub fn init(k: &mut Kernel, stub_for: impl FnMut(u32) -> u32) {
    k.idt.install_all(stub_for);
    log::debug!("IDT initialized with 256 entries");
}

/// Bind `cpu` to its own kernel stack and task state, and install its
/// task-state descriptor. Each CPU calls this once during bring-up;
/// loading the same task state on two CPUs trips the busy bit and
/// triple-faults.
pub fn init_percpu(k: &mut Kernel, cpu: usize) {
    let ts = k.cpus.ts_mut(cpu);
    ts.esp0 = KSTACKTOP - cpu as u32 * (KSTKSIZE + KSTKGAP);
    ts.ss0 = GD_KD;
    ts.iomb = core::mem::size_of::<TaskState>() as u16;

    let base = k.cpus.ts(cpu) as *const TaskState as usize as u32;
    let limit = core::mem::size_of::<TaskState>() as u32 - 1;
    k.gdt
        .set_slot((GD_TSS0 >> 3) as usize + cpu, SegDesc::tss(base, limit));

    #[cfg(target_arch = "x86")]
    {
        use crate::arch::x86::instr;
        // SAFETY: the slot written above is this CPU's own, and the IDT
        // lives in the global kernel for 'static.
        unsafe {
            instr::ltr(GD_TSS0 + 8 * cpu as u16);
            instr::lidt(&instr::DescTablePtr {
                limit: k.idt.limit(),
                base: k.idt.base() as u32,
            });
        }
    }
}

/// Handle one kernel entry.
///
/// On entry the hardware has disabled interrupts and the glue holds the
/// big kernel lock. `tf` is the stack-resident frame the stubs built;
/// for user-mode traps it is snapshotted into the environment and all
/// further mutation happens on the saved copy, which the returned
/// [`Disposition`] tells the glue to restore from.
pub fn trap(k: &mut Kernel, cpu: usize, tf: &Trapframe) -> Disposition {
    k.cpus.mark_started(cpu);

    if tf.from_user() {
        let cur = k
            .cpus
            .current(cpu)
            .expect("trap from user mode with no current environment");

        // reap an environment destroyed from another CPU
        if k.envs.get(cur).map(|e| e.status) == Some(EnvStatus::Dying) {
            k.env_free(cpu, cur);
            k.cpus.clear_current(cpu);
            return sched::sched_yield(k, cpu);
        }

        k.envs
            .get_mut(cur)
            .expect("current environment vanished")
            .tf = *tf;
    }

    let cont = trap_dispatch(k, cpu, tf);

    match cont {
        Continue::Resume => match k.cpus.current(cpu) {
            Some(cur) if k.envs.get(cur).map(|e| e.status) == Some(EnvStatus::Running) => {
                k.env_run(cpu, cur)
            }
            _ => sched::sched_yield(k, cpu),
        },
        Continue::Reschedule => sched::sched_yield(k, cpu),
    }
}

fn trap_dispatch(k: &mut Kernel, cpu: usize, tf: &Trapframe) -> Continue {
    let from_user = tf.from_user();

    match tf.trapno {
        T_PGFLT => {
            let fault_va = k.cpus.fault_va(cpu);
            if !from_user {
                log::error!("{}", FrameDump::new(tf, cpu, Some(fault_va)));
                panic!("page fault in kernel mode at va {:#010x}", fault_va);
            }
            upcall::page_fault_handler(k, cpu);
            Continue::Resume
        }
        T_BRKPT | T_DEBUG => {
            monitor::monitor(k, Some(tf));
            Continue::Resume
        }
        T_SYSCALL => {
            let no = tf.regs.eax;
            let args = [
                tf.regs.edx,
                tf.regs.ecx,
                tf.regs.ebx,
                tf.regs.edi,
                tf.regs.esi,
            ];
            match syscall::dispatch(k, cpu, no, args) {
                syscall::SyscallReturn::Value(v) => {
                    if let Some(cur) = k.cpus.current(cpu) {
                        if let Some(e) = k.envs.get_mut(cur) {
                            e.tf.regs.eax = v as u32;
                        }
                    }
                    Continue::Resume
                }
                syscall::SyscallReturn::Yield => Continue::Reschedule,
            }
        }
        n if n == IRQ_OFFSET + IRQ_SPURIOUS => {
            // a withdrawn IRQ; no EOI for these
            log::warn!("spurious interrupt on irq 7");
            log::warn!("{}", FrameDump::new(tf, cpu, None));
            Continue::Resume
        }
        n if n == IRQ_OFFSET + IRQ_TIMER => {
            k.lapic.eoi();
            Continue::Reschedule
        }
        n if n == IRQ_OFFSET + IRQ_KBD => {
            k.console.kbd_intr();
            Continue::Resume
        }
        _ => {
            // Either the user environment or the kernel has a bug.
            log::error!("{}", FrameDump::new(tf, cpu, None));
            if !from_user {
                panic!("unhandled trap {} in kernel", tf.trapno);
            }
            let cur = k
                .cpus
                .current(cpu)
                .expect("user trap without current environment");
            k.env_destroy(cpu, cur);
            Continue::Resume
        }
    }
}

/// Decoded trap-frame dump for diagnostics.
pub struct FrameDump<'a> {
    tf: &'a Trapframe,
    cpu: usize,
    fault_va: Option<u32>,
}

impl<'a> FrameDump<'a> {
    pub fn new(tf: &'a Trapframe, cpu: usize, fault_va: Option<u32>) -> Self {
        FrameDump { tf, cpu, fault_va }
    }
}

impl fmt::Display for FrameDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tf = self.tf;
        writeln!(f, "TRAP frame on CPU {}", self.cpu)?;
        writeln!(f, "  edi  0x{:08x}", tf.regs.edi)?;
        writeln!(f, "  esi  0x{:08x}", tf.regs.esi)?;
        writeln!(f, "  ebp  0x{:08x}", tf.regs.ebp)?;
        writeln!(f, "  ebx  0x{:08x}", tf.regs.ebx)?;
        writeln!(f, "  edx  0x{:08x}", tf.regs.edx)?;
        writeln!(f, "  ecx  0x{:08x}", tf.regs.ecx)?;
        writeln!(f, "  eax  0x{:08x}", tf.regs.eax)?;
        writeln!(f, "  es   0x----{:04x}", tf.es)?;
        writeln!(f, "  ds   0x----{:04x}", tf.ds)?;
        writeln!(f, "  trap 0x{:08x} {}", tf.trapno, trapname(tf.trapno))?;
        if let Some(va) = self.fault_va {
            writeln!(f, "  cr2  0x{:08x}", va)?;
        }
        write!(f, "  err  0x{:08x}", tf.err)?;
        if tf.trapno == T_PGFLT {
            writeln!(
                f,
                " [{}, {}, {}]",
                if tf.err & 4 != 0 { "user" } else { "kernel" },
                if tf.err & 2 != 0 { "write" } else { "read" },
                if tf.err & 1 != 0 {
                    "protection"
                } else {
                    "not-present"
                }
            )?;
        } else {
            writeln!(f)?;
        }
        writeln!(f, "  eip  0x{:08x}", tf.eip)?;
        writeln!(f, "  cs   0x----{:04x}", tf.cs)?;
        writeln!(f, "  flag 0x{:08x}", tf.eflags)?;
        if tf.from_user() {
            writeln!(f, "  esp  0x{:08x}", tf.esp)?;
            write!(f, "  ss   0x----{:04x}", tf.ss)?;
        }
        Ok(())
    }
}
