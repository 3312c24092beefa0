//! Misuse-detecting decorator around a real lock backend.
//!
//! [`DebugLockOps`] implements [`LockOps`] by forwarding to the wrapped
//! backend after bookkeeping, so enabling debugging is a construction-time
//! choice with no interface change for callers. Each allocated handle carries
//! its own state record behind an internal mutex; concurrent misuse detection
//! is therefore itself race-free.
//!
//! Violations are irrecoverable: once the locking protocol has been broken,
//! no continuation can be proven safe. The process aborts after the
//! diagnostic is logged and the optional [`set_violation_hook`] hook has run.

use std::process;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing::error;

use crate::thread_id::current_raw_id;
use crate::LockMode;
use crate::LockOps;
use crate::LockStatus;
use crate::LockType;
use crate::ProtocolViolation;
use crate::RawLock;
use crate::Result;
use crate::ViolationKind;

type ViolationHook = Box<dyn Fn(&ProtocolViolation) + Send + Sync>;

lazy_static! {
    static ref VIOLATION_HOOK: ArcSwapOption<ViolationHook> = ArcSwapOption::new(None);
}

/// Serial numbers let a diagnostic name the offending handle.
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Install a hook that runs with the diagnostic before the process aborts.
///
/// Intended for embedders that want the violation in their own crash
/// reporting. A hook that panics (or exits) preempts the abort; the test
/// suite relies on that to observe violations deterministically.
pub fn set_violation_hook(hook: impl Fn(&ProtocolViolation) + Send + Sync + 'static) {
    VIOLATION_HOOK.store(Some(Arc::new(Box::new(hook))));
}

fn fatal(violation: ProtocolViolation) -> ! {
    error!("{}", violation);
    if let Some(hook) = VIOLATION_HOOK.load_full() {
        (*hook)(&violation);
    }
    process::abort();
}

pub(crate) struct DebugLockOps {
    inner: Arc<dyn LockOps>,
}

impl DebugLockOps {
    pub(crate) fn new(inner: Arc<dyn LockOps>) -> Self {
        Self { inner }
    }
}

struct DebugLock {
    serial: u64,
    ty: LockType,
    inner_raw: RawLock,
    state: Mutex<LockState>,
}

/// Per-handle acquisition record. Read-mode holders are counted in `depth`
/// but not individually identified.
struct LockState {
    held_by: Option<u64>,
    depth: u32,
}

impl DebugLock {
    fn violation(&self, kind: ViolationKind) -> ! {
        fatal(ProtocolViolation {
            handle: self.serial,
            ty: self.ty,
            kind,
        })
    }

    /// The mode's type bits must agree with the handle's allocated type:
    /// `READ` only on read-write handles, and never together with `WRITE`.
    fn check_mode(&self, mode: LockMode) {
        let read = mode.contains(LockMode::READ);
        let write = mode.contains(LockMode::WRITE);
        if read && write {
            self.violation(ViolationKind::ModeTypeMismatch);
        }
        if read && !self.ty.contains(LockType::READ_WRITE) {
            self.violation(ViolationKind::ModeTypeMismatch);
        }
        if !read && !write {
            self.violation(ViolationKind::ModeTypeMismatch);
        }
    }
}

fn tracked(lock: &RawLock) -> &DebugLock {
    match lock.downcast_ref::<DebugLock>() {
        Some(found) => found,
        None => fatal(ProtocolViolation {
            handle: 0,
            ty: LockType::empty(),
            kind: ViolationKind::UntrackedHandle,
        }),
    }
}

impl LockOps for DebugLockOps {
    fn alloc(&self, ty: LockType) -> Result<RawLock> {
        let inner_raw = self.inner.alloc(ty)?;
        Ok(Box::new(DebugLock {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            ty,
            inner_raw,
            state: Mutex::new(LockState {
                held_by: None,
                depth: 0,
            }),
        }))
    }

    fn free(&self, lock: RawLock, ty: LockType) {
        let debug_lock = match lock.downcast::<DebugLock>() {
            Ok(found) => found,
            Err(_) => fatal(ProtocolViolation {
                handle: 0,
                ty: LockType::empty(),
                kind: ViolationKind::UntrackedHandle,
            }),
        };
        if debug_lock.state.lock().depth != 0 {
            debug_lock.violation(ViolationKind::FreeWhileHeld);
        }
        self.inner.free(debug_lock.inner_raw, ty);
    }

    fn lock(&self, mode: LockMode, lock: &RawLock) -> Result<LockStatus> {
        let debug_lock = tracked(lock);
        debug_lock.check_mode(mode);
        let me = current_raw_id();
        {
            let state = debug_lock.state.lock();
            if state.held_by == Some(me) {
                let reentry_ok = debug_lock.ty.contains(LockType::RECURSIVE);
                if !reentry_ok && !mode.contains(LockMode::TRY) {
                    debug_lock.violation(ViolationKind::SelfDeadlock);
                }
            }
        }
        // Bookkeeping is released while the real backend blocks; the new
        // owner is recorded only after the acquisition succeeds.
        let status = self.inner.lock(mode, &debug_lock.inner_raw)?;
        if status == LockStatus::Acquired {
            let mut state = debug_lock.state.lock();
            state.depth += 1;
            if !mode.contains(LockMode::READ) {
                state.held_by = Some(me);
            }
        }
        Ok(status)
    }

    fn unlock(&self, mode: LockMode, lock: &RawLock) -> Result<()> {
        let debug_lock = tracked(lock);
        debug_lock.check_mode(mode);
        let me = current_raw_id();
        {
            let mut state = debug_lock.state.lock();
            if state.depth == 0 {
                debug_lock.violation(ViolationKind::UnlockWithoutLock);
            }
            if !mode.contains(LockMode::READ) {
                if state.held_by != Some(me) {
                    debug_lock.violation(ViolationKind::NonOwnerUnlock);
                }
                if state.depth == 1 {
                    state.held_by = None;
                }
            }
            state.depth -= 1;
        }
        self.inner.unlock(mode, &debug_lock.inner_raw)
    }
}

#[cfg(test)]
pub(crate) fn clear_violation_hook_for_tests() {
    VIOLATION_HOOK.store(None);
}
