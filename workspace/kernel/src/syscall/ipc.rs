//! Message passing between environments.
//!
//! `ipc_recv` parks the caller in a receive-blocked state; `ipc_try_send`
//! is strictly non-blocking and completes the rendezvous on the
//! receiver's behalf. First send wins: delivering clears the receive
//! flag before the receiver is ever re-dispatched, so a second sender
//! sees `IpcNotRecv`.

use exo9_abi::layout::{pgoff, UTOP};
use exo9_abi::{EnvStatus, Error, PteFlags};

use super::{aspace_of, page_ops, SyscallReturn};
use crate::env::EnvId;
use crate::kernel::Kernel;
use crate::mem::VirtAddr;

/// Try to deliver `value` (and optionally the page at `src_va`) to
/// `dst_id`. Any environment may send to any other; there is no
/// parent/child requirement here.
pub fn sys_ipc_try_send(
    k: &mut Kernel,
    cur: EnvId,
    dst_id: EnvId,
    value: u32,
    src_va: VirtAddr,
    perm: u32,
) -> Result<SyscallReturn, Error> {
    let dst = k.envs.lookup(cur, dst_id, false)?;
    let (recving, dst_va) = {
        let de = k.envs.get(dst).expect("resolved environment");
        (de.ipc_recving, de.ipc_dstva)
    };
    if !recving {
        return Err(Error::IpcNotRecv);
    }

    // A page transfers only when both sides asked for one.
    let mut granted = PteFlags::empty();
    if dst_va < UTOP && src_va < UTOP {
        if pgoff(src_va) != 0 {
            return Err(Error::Inval);
        }
        let perm = page_ops::check_perm(perm)?;
        let src_as = aspace_of(k, cur);
        let (frame, pte) = src_as.lookup(&k.mem, src_va).ok_or(Error::Inval)?;
        if perm.contains(PteFlags::W) && !pte.contains(PteFlags::W) {
            return Err(Error::Inval);
        }
        aspace_of(k, dst).insert(&mut k.mem, frame, dst_va, perm)?;
        granted = perm;
    }

    let de = k.envs.get_mut(dst).expect("resolved environment");
    de.ipc_recving = false;
    de.ipc_from = cur;
    de.ipc_value = value;
    de.ipc_perm = granted;
    de.status = EnvStatus::Runnable;
    // the receiver's paused ipc_recv completes with 0
    de.tf.regs.eax = 0;

    Ok(SyscallReturn::Value(0))
}

/// Block until a message arrives. `dst_va` below `UTOP` advertises
/// willingness to receive a page there. The call parks the environment
/// and yields; the eventual result is written by the sender.
pub fn sys_ipc_recv(k: &mut Kernel, cur: EnvId, dst_va: VirtAddr) -> Result<SyscallReturn, Error> {
    if dst_va < UTOP && pgoff(dst_va) != 0 {
        return Err(Error::Inval);
    }
    let e = k.envs.get_mut(cur).expect("current environment");
    e.ipc_recving = true;
    e.ipc_dstva = dst_va;
    e.status = EnvStatus::NotRunnable;
    Ok(SyscallReturn::Yield)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: u32 = 0x7; // P | W | U

    fn setup() -> (Kernel, EnvId, EnvId) {
        let mut k = Kernel::new(256);
        let recv = k.envs.alloc(&mut k.mem, EnvId(0)).unwrap();
        let send = k.envs.alloc(&mut k.mem, EnvId(0)).unwrap();
        (k, recv, send)
    }

    fn park_receiver(k: &mut Kernel, recv: EnvId, dst_va: u32) {
        assert_eq!(
            sys_ipc_recv(k, recv, dst_va),
            Ok(SyscallReturn::Yield)
        );
        assert_eq!(k.envs.get(recv).unwrap().status, EnvStatus::NotRunnable);
    }

    #[test]
    fn send_without_receiver_is_not_recv() {
        let (mut k, recv, send) = setup();
        let r = sys_ipc_try_send(&mut k, send, recv, 42, UTOP, 0);
        assert_eq!(r, Err(Error::IpcNotRecv));
    }

    #[test]
    fn value_only_rendezvous() {
        let (mut k, recv, send) = setup();
        park_receiver(&mut k, recv, UTOP);

        sys_ipc_try_send(&mut k, send, recv, 42, UTOP, 0).unwrap();

        let re = k.envs.get(recv).unwrap();
        assert_eq!(re.status, EnvStatus::Runnable);
        assert!(!re.ipc_recving);
        assert_eq!(re.ipc_value, 42);
        assert_eq!(re.ipc_from, send);
        assert_eq!(re.ipc_perm, PteFlags::empty());
        assert_eq!(re.tf.regs.eax, 0);
    }

    #[test]
    fn second_sender_loses_the_race() {
        let (mut k, recv, b1) = setup();
        let b2 = k.envs.alloc(&mut k.mem, EnvId(0)).unwrap();
        park_receiver(&mut k, recv, UTOP);

        assert!(sys_ipc_try_send(&mut k, b1, recv, 1, UTOP, 0).is_ok());
        // receiver not yet re-dispatched; the flag is already down
        assert_eq!(
            sys_ipc_try_send(&mut k, b2, recv, 2, UTOP, 0),
            Err(Error::IpcNotRecv)
        );
        assert_eq!(k.envs.get(recv).unwrap().ipc_value, 1);
        assert_eq!(k.envs.get(recv).unwrap().ipc_from, b1);
    }

    #[test]
    fn page_transfer_maps_the_same_frame() {
        let (mut k, recv, send) = setup();
        page_ops::sys_page_alloc(&mut k, send, EnvId::CURRENT, 0x2000, RW).unwrap();
        park_receiver(&mut k, recv, 0x1000);

        sys_ipc_try_send(&mut k, send, recv, 7, 0x2000, RW).unwrap();

        let sf = aspace_of(&k, send).lookup(&k.mem, 0x2000).unwrap().0;
        let rf = aspace_of(&k, recv).lookup(&k.mem, 0x1000).unwrap().0;
        assert_eq!(sf, rf);
        assert_eq!(k.mem.refs(sf), 2);
        assert_eq!(
            k.envs.get(recv).unwrap().ipc_perm,
            PteFlags::U | PteFlags::W | PteFlags::P
        );
    }

    #[test]
    fn sender_with_high_srcva_transfers_nothing() {
        let (mut k, recv, send) = setup();
        park_receiver(&mut k, recv, 0x1000);

        sys_ipc_try_send(&mut k, send, recv, 9, UTOP, RW).unwrap();

        assert_eq!(k.envs.get(recv).unwrap().ipc_perm, PteFlags::empty());
        assert!(aspace_of(&k, recv).lookup(&k.mem, 0x1000).is_none());
        assert_eq!(k.envs.get(recv).unwrap().ipc_value, 9);
    }

    #[test]
    fn receiver_not_asking_skips_page_validation() {
        let (mut k, recv, send) = setup();
        // receiver advertises no page window
        park_receiver(&mut k, recv, UTOP);
        // sender's srcva is mapped nowhere, but no transfer is attempted
        sys_ipc_try_send(&mut k, send, recv, 3, 0x2000, RW).unwrap();
        assert_eq!(k.envs.get(recv).unwrap().ipc_perm, PteFlags::empty());
    }

    #[test]
    fn readonly_source_cannot_grant_write() {
        let (mut k, recv, send) = setup();
        page_ops::sys_page_alloc(&mut k, send, EnvId::CURRENT, 0x2000, 0x5).unwrap();
        park_receiver(&mut k, recv, 0x1000);

        let r = sys_ipc_try_send(&mut k, send, recv, 1, 0x2000, RW);
        assert_eq!(r, Err(Error::Inval));
        // the receiver stays parked; the failed send had no effect
        let re = k.envs.get(recv).unwrap();
        assert!(re.ipc_recving);
        assert_eq!(re.status, EnvStatus::NotRunnable);
    }

    #[test]
    fn recv_rejects_unaligned_window() {
        let (mut k, recv, _) = setup();
        assert_eq!(sys_ipc_recv(&mut k, recv, 0x1234), Err(Error::Inval));
        // an aligned or out-of-range window is fine
        assert!(sys_ipc_recv(&mut k, recv, UTOP + 5).is_ok());
    }
}
