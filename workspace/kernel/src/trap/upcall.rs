//! User-mode page-fault reflection.
//!
//! A fault taken in user mode is bounced back to the faulting
//! environment on its exception stack: the kernel writes a fault record
//! there, points the saved frame at the registered upcall, and resumes.
//! A fault taken while already on the exception stack nests: the new
//! record lands below the live one, with one scratch word left for the
//! user trampoline to restore the instruction pointer through.

use core::fmt::Write;

use exo9_abi::layout::{PGSIZE, UXSTACKTOP};
use exo9_abi::{PteFlags, UTrapframe};
use zerocopy::IntoBytes;

use crate::kernel::Kernel;
use crate::mem::user;
use crate::syscall::aspace_of;
use crate::trap::FrameDump;

/// Handle a page fault from user mode on `cpu`'s current environment.
/// Either the environment resumes at its upcall, or it is destroyed.
pub fn page_fault_handler(k: &mut Kernel, cpu: usize) {
    let fault_va = k.cpus.fault_va(cpu);
    let cur = k
        .cpus
        .current(cpu)
        .expect("user page fault without current environment");
    let e = k.envs.get(cur).expect("current environment vanished");
    let upcall = e.pgfault_upcall;
    let tf = e.tf;

    if upcall == 0 {
        let _ = writeln!(
            k.console,
            "[{}] user fault va {:08x} ip {:08x}",
            cur, fault_va, tf.eip
        );
        log::error!("{}", FrameDump::new(&tf, cpu, Some(fault_va)));
        k.env_destroy(cpu, cur);
        return;
    }

    let utf = UTrapframe {
        fault_va,
        err: tf.err,
        regs: tf.regs,
        eip: tf.eip,
        eflags: tf.eflags,
        esp: tf.esp,
    };

    // Nested fault: the trap-time stack is the exception stack itself,
    // so the new record goes below the live one, minus the scratch word.
    let top = if (UXSTACKTOP - PGSIZE..UXSTACKTOP).contains(&tf.esp) {
        tf.esp - 4
    } else {
        UXSTACKTOP
    };
    let landing = top.wrapping_sub(core::mem::size_of::<UTrapframe>() as u32);

    let aspace = aspace_of(k, cur);
    let len = core::mem::size_of::<UTrapframe>() as u32;
    let writable = PteFlags::U | PteFlags::W;
    if landing > top || user::check(&k.mem, &aspace, landing, len, writable).is_err() {
        // no exception stack, not writable, or overflowed it
        let _ = writeln!(
            k.console,
            "[{}] user fault va {:08x} ip {:08x} (bad exception stack {:08x})",
            cur, fault_va, tf.eip, landing
        );
        k.env_destroy(cpu, cur);
        return;
    }

    user::copy_to(&mut k.mem, &aspace, landing, utf.as_bytes(), writable)
        .expect("checked landing range");

    let e = k.envs.get_mut(cur).expect("current environment vanished");
    e.tf.esp = landing;
    e.tf.eip = upcall;
}
