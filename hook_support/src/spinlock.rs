/// A reentrant CAS spinlock for the ring-buffer logger.
///
/// Logging can be triggered from the dispatcher while it is already
/// holding the lock (nested `log!` calls inside the same syscall
/// handling path), so the same thread must be able to take the lock
/// multiple times without deadlocking. Ownership is tracked by `tid`
/// rather than by a `std::thread::ThreadId`, since `ThreadId` allocation
/// is not signal-safe and this lock is taken from code running at
/// roughly signal-handler level.

use core::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use nr::nr::SYS_GETTID;
use nr::raw::untraced_syscall;

pub struct SpinLock {
    owner: AtomicI64,
    depth: AtomicUsize,
}

pub const SPINLOCK_INIT: SpinLock = SpinLock {
    owner: AtomicI64::new(-1),
    depth: AtomicUsize::new(0),
};

fn current_tid() -> i64 {
    unsafe { untraced_syscall(SYS_GETTID, 0, 0, 0, 0, 0, 0) }
}

impl SpinLock {
    pub fn lock(&self) {
        let tid = current_tid();
        if self.owner.load(Ordering::Acquire) == tid {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return;
        }
        while self
            .owner
            .compare_exchange_weak(-1, tid, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        self.depth.store(1, Ordering::Relaxed);
    }

    pub fn unlock(&self) {
        let left = self.depth.fetch_sub(1, Ordering::Relaxed);
        if left == 1 {
            self.owner.store(-1, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_thread_can_reenter() {
        let lock = SPINLOCK_INIT;
        lock.lock();
        lock.lock();
        lock.unlock();
        lock.unlock();
        assert_eq!(lock.owner.load(Ordering::SeqCst), -1);
    }
}
