//! The big kernel lock.
//!
//! One kernel-wide mutex guards all kernel state: exactly one CPU runs
//! kernel code at a time, user code on the other CPUs runs unlocked. The
//! owner word is the sole cross-CPU mutable field and is accessed only
//! through atomic exchange.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

const NO_OWNER: usize = usize::MAX;

/// A spinlock that records its owning CPU, wrapping the data it guards.
pub struct KernelLock<T> {
    owner: AtomicUsize,
    data: UnsafeCell<T>,
}

// SAFETY: access to the inner data is serialized by the owner word.
unsafe impl<T: Send> Sync for KernelLock<T> {}
unsafe impl<T: Send> Send for KernelLock<T> {}

impl<T> KernelLock<T> {
    pub const fn new(data: T) -> Self {
        KernelLock {
            owner: AtomicUsize::new(NO_OWNER),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock for `cpu`, spinning until it is free.
    /// Re-acquiring on the same CPU is a deadlock in the making and
    /// panics instead.
    pub fn lock(&self, cpu: usize) -> KernelGuard<'_, T> {
        assert!(
            !self.holding(cpu),
            "CPU {} re-acquiring the kernel lock",
            cpu
        );
        while self
            .owner
            .compare_exchange_weak(NO_OWNER, cpu, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        KernelGuard { lock: self, cpu }
    }

    /// `true` if `cpu` currently holds the lock.
    pub fn holding(&self, cpu: usize) -> bool {
        self.owner.load(Ordering::Acquire) == cpu
    }
}

/// RAII guard; releases on drop, i.e. right before the CPU leaves the
/// kernel.
pub struct KernelGuard<'a, T> {
    lock: &'a KernelLock<T>,
    cpu: usize,
}

impl<T> Deref for KernelGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves this CPU holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for KernelGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves this CPU holds the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for KernelGuard<'_, T> {
    fn drop(&mut self) {
        let prev = self.lock.owner.swap(NO_OWNER, Ordering::Release);
        debug_assert_eq!(prev, self.cpu, "kernel lock released by non-owner");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[test]
    fn guard_gives_exclusive_access() {
        let lock = KernelLock::new(0u32);
        {
            let mut g = lock.lock(0);
            *g += 1;
            assert!(lock.holding(0));
            assert!(!lock.holding(1));
        }
        assert!(!lock.holding(0));
        assert_eq!(*lock.lock(1), 1);
    }

    #[test]
    fn contended_counter_stays_consistent() {
        let lock = Arc::new(KernelLock::new(0u64));
        let observed_overlap = Arc::new(AtomicU64::new(0));
        let mut handles = std::vec::Vec::new();
        for cpu in 0..4usize {
            let lock = Arc::clone(&lock);
            let overlap = Arc::clone(&observed_overlap);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let mut g = lock.lock(cpu);
                    let v = *g;
                    // no other CPU may hold the lock now
                    for other in 0..4 {
                        if other != cpu && lock.holding(other) {
                            overlap.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    *g = v + 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(0), 4000);
        assert_eq!(observed_overlap.load(Ordering::Relaxed), 0);
    }

    #[test]
    #[should_panic(expected = "re-acquiring")]
    fn reentry_panics() {
        let lock = KernelLock::new(());
        let _g = lock.lock(2);
        let _g2 = lock.lock(2);
    }
}
