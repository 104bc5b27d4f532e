//! Spin-based locks for the control core.
//!
//! The hypervisor has no scheduler, so contended paths busy-wait with a CPU
//! relaxation hint. Structural state sits behind [`RwLock`]; the shutdown
//! rendezvous is serialized by a plain [`Mutex`].

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use lock_api::{GuardSend, RawMutex, RawRwLock};

pub struct RawSpinlock(AtomicBool);

#[inline(always)]
fn lock_loop<T>(this: &T, try_lock: impl Fn(&T) -> bool) {
    while !try_lock(this) {
        core::hint::spin_loop();
    }
}

unsafe impl RawMutex for RawSpinlock {
    const INIT: Self = Self(AtomicBool::new(false));
    type GuardMarker = GuardSend;

    fn lock(&self) {
        lock_loop(self, Self::try_lock)
    }

    #[inline(always)]
    fn try_lock(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline(always)]
    fn is_locked(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    unsafe fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RawRwSpinlock(AtomicU32);

impl RawRwSpinlock {
    const WRITER_BIT: u32 = 1 << 31;
}

unsafe impl RawRwLock for RawRwSpinlock {
    const INIT: Self = Self(AtomicU32::new(0));
    type GuardMarker = GuardSend;

    fn lock_shared(&self) {
        lock_loop(self, Self::try_lock_shared)
    }

    fn lock_exclusive(&self) {
        lock_loop(self, Self::try_lock_exclusive)
    }

    fn try_lock_shared(&self) -> bool {
        let mut state = self.0.load(Ordering::Relaxed);
        loop {
            if state & Self::WRITER_BIT != 0 {
                return false;
            }

            match self.0.compare_exchange_weak(
                state,
                state + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(s) => state = s,
            }
        }
    }

    fn try_lock_exclusive(&self) -> bool {
        self.0
            .compare_exchange(0, Self::WRITER_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn is_locked(&self) -> bool {
        self.0.load(Ordering::Relaxed) != 0
    }

    fn is_locked_exclusive(&self) -> bool {
        self.0.load(Ordering::Relaxed) & Self::WRITER_BIT != 0
    }

    unsafe fn unlock_shared(&self) {
        self.0.fetch_sub(1, Ordering::Release);
    }

    unsafe fn unlock_exclusive(&self) {
        self.0.store(0, Ordering::Release);
    }
}

pub type Mutex<T> = lock_api::Mutex<RawSpinlock, T>;
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinlock, T>;

pub type RwLock<T> = lock_api::RwLock<RawRwSpinlock, T>;
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, RawRwSpinlock, T>;
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, RawRwSpinlock, T>;
