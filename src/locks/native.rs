//! Built-in lock backend on top of `parking_lot`'s raw primitives.
//!
//! Installed by [`use_native_threads`](crate::use_native_threads). Recursive
//! locks are a raw mutex plus an owner word and depth counter, the owner word
//! coming from the registered thread-identity provider (falling back to
//! `pthread_self`). Read-write locks map onto `parking_lot::RawRwLock` with
//! genuine shared readers.
//!
//! The guard-less lock/unlock surface means balance is the caller's
//! responsibility; this backend keeps enough state to reject the easy
//! mistakes (releasing an unheld lock) with [`Error::Fatal`], and the debug
//! decorator enforces the full discipline.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::lock_api::RawMutex as RawMutexApi;
use parking_lot::lock_api::RawRwLock as RawRwLockApi;
use parking_lot::RawMutex;
use parking_lot::RawRwLock;

use crate::constants::LOCK_API_VERSION;
use crate::thread_id::current_raw_id;
use crate::Error;
use crate::LockCallbacks;
use crate::LockMode;
use crate::LockOps;
use crate::LockStatus;
use crate::LockType;
use crate::RawLock;
use crate::Result;

/// The lock operations `use_native_threads` registers.
#[derive(Debug, Default)]
pub struct NativeLockOps;

pub(crate) fn native_callbacks() -> LockCallbacks {
    LockCallbacks {
        api_version: LOCK_API_VERSION,
        supported_types: LockType::RECURSIVE | LockType::READ_WRITE,
        ops: Arc::new(NativeLockOps),
    }
}

enum NativeLock {
    Recursive(RecursiveLock),
    Rw(RwLockShim),
}

impl LockOps for NativeLockOps {
    fn alloc(&self, ty: LockType) -> Result<RawLock> {
        let lock = if ty.contains(LockType::READ_WRITE) {
            NativeLock::Rw(RwLockShim::new())
        } else {
            // Plain requests get a recursive mutex too; recursion is a
            // harmless superset of exclusive semantics.
            NativeLock::Recursive(RecursiveLock::new())
        };
        Ok(Box::new(lock))
    }

    fn free(&self, lock: RawLock, _ty: LockType) {
        drop(lock);
    }

    fn lock(&self, mode: LockMode, lock: &RawLock) -> Result<LockStatus> {
        match native(lock)? {
            NativeLock::Recursive(inner) => Ok(inner.lock(mode)),
            NativeLock::Rw(inner) => Ok(inner.lock(mode)),
        }
    }

    fn unlock(&self, mode: LockMode, lock: &RawLock) -> Result<()> {
        match native(lock)? {
            NativeLock::Recursive(inner) => inner.unlock(),
            NativeLock::Rw(inner) => inner.unlock(mode),
        }
    }
}

fn native(lock: &RawLock) -> Result<&NativeLock> {
    lock.downcast_ref::<NativeLock>().ok_or_else(|| {
        Error::Fatal("lock handle does not belong to the native backend".to_string())
    })
}

/// A mutex re-enterable by its holder, counted by depth.
///
/// `owner` holds the identity of the holding thread, 0 when unheld. Only the
/// holder writes it while the mutex is held, and it is cleared before the
/// mutex is released, so an equality probe against the caller's own identity
/// never observes a stale match.
struct RecursiveLock {
    mutex: RawMutex,
    owner: AtomicU64,
    depth: AtomicU32,
}

impl RecursiveLock {
    fn new() -> Self {
        Self {
            mutex: RawMutex::INIT,
            owner: AtomicU64::new(0),
            depth: AtomicU32::new(0),
        }
    }

    fn lock(&self, mode: LockMode) -> LockStatus {
        let me = current_raw_id();
        if self.owner.load(Ordering::Relaxed) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return LockStatus::Acquired;
        }
        if mode.contains(LockMode::TRY) {
            if !self.mutex.try_lock() {
                return LockStatus::Busy;
            }
        } else {
            self.mutex.lock();
        }
        self.owner.store(me, Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
        LockStatus::Acquired
    }

    fn unlock(&self) -> Result<()> {
        let me = current_raw_id();
        if self.owner.load(Ordering::Relaxed) != me {
            return Err(Error::Fatal(
                "recursive lock released by a thread that does not hold it".to_string(),
            ));
        }
        if self.depth.load(Ordering::Relaxed) > 1 {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return Ok(());
        }
        self.depth.store(0, Ordering::Relaxed);
        self.owner.store(0, Ordering::Relaxed);
        // Held by this thread: verified by the owner probe above.
        unsafe { self.mutex.unlock() };
        Ok(())
    }
}

/// Read-write lock with real shared readers.
///
/// The counters only exist to reject unbalanced releases; exclusion and
/// ordering come from the raw rwlock.
struct RwLockShim {
    rw: RawRwLock,
    readers: AtomicU32,
    writer: AtomicU64,
}

impl RwLockShim {
    fn new() -> Self {
        Self {
            rw: RawRwLock::INIT,
            readers: AtomicU32::new(0),
            writer: AtomicU64::new(0),
        }
    }

    fn lock(&self, mode: LockMode) -> LockStatus {
        if mode.contains(LockMode::READ) {
            if mode.contains(LockMode::TRY) {
                if !self.rw.try_lock_shared() {
                    return LockStatus::Busy;
                }
            } else {
                self.rw.lock_shared();
            }
            self.readers.fetch_add(1, Ordering::Relaxed);
        } else {
            if mode.contains(LockMode::TRY) {
                if !self.rw.try_lock_exclusive() {
                    return LockStatus::Busy;
                }
            } else {
                self.rw.lock_exclusive();
            }
            self.writer.store(current_raw_id(), Ordering::Relaxed);
        }
        LockStatus::Acquired
    }

    fn unlock(&self, mode: LockMode) -> Result<()> {
        if mode.contains(LockMode::READ) {
            let balanced = self
                .readers
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if !balanced {
                return Err(Error::Fatal(
                    "read-write lock released for reading with no readers".to_string(),
                ));
            }
            // Balance verified by the counter update above.
            unsafe { self.rw.unlock_shared() };
        } else {
            if self.writer.swap(0, Ordering::Relaxed) == 0 {
                return Err(Error::Fatal(
                    "read-write lock released for writing while not write-held".to_string(),
                ));
            }
            unsafe { self.rw.unlock_exclusive() };
        }
        Ok(())
    }
}
