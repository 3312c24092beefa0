//! Process-wide, write-once lock backend configuration.
//!
//! Applications install a backend (and optionally the debug decorator)
//! before any dispatcher instance exists. Re-registration before the first
//! dispatcher is permitted, last writer wins; the first dispatcher to bind
//! freezes the configuration for the life of the process.

#[cfg(test)]
mod registry_test;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use lazy_static::lazy_static;
use tracing::info;
use tracing::warn;

use crate::constants::LOCK_API_VERSION;
use crate::locks::native_callbacks;
use crate::thread_id;
use crate::ConfigurationError;
use crate::LockCallbacks;
use crate::LockType;
use crate::Result;

lazy_static! {
    static ref ACTIVE_CALLBACKS: ArcSwapOption<LockCallbacks> = ArcSwapOption::new(None);
}

static DEBUG_LOCKS: AtomicBool = AtomicBool::new(false);
static FROZEN: AtomicBool = AtomicBool::new(false);

/// Install `callbacks` as the process-wide lock backend.
///
/// Fails with [`ConfigurationError::RegistryFrozen`] once any dispatcher
/// exists, or [`ConfigurationError::ApiVersionMismatch`] when the descriptor
/// was built against a different contract version.
pub fn register_lock_callbacks(callbacks: LockCallbacks) -> Result<()> {
    if callbacks.api_version != LOCK_API_VERSION {
        return Err(ConfigurationError::ApiVersionMismatch {
            expected: LOCK_API_VERSION,
            found: callbacks.api_version,
        }
        .into());
    }
    if FROZEN.load(Ordering::Acquire) {
        return Err(ConfigurationError::RegistryFrozen.into());
    }
    info!(
        "installed lock callbacks: supported types {:?}",
        callbacks.supported_types
    );
    ACTIVE_CALLBACKS.store(Some(Arc::new(callbacks)));
    Ok(())
}

/// The supported lock type bitmask of the active backend, or
/// [`LockType::empty`] when none is configured (degraded single-thread
/// mode).
pub fn query_capabilities() -> LockType {
    match ACTIVE_CALLBACKS.load_full() {
        Some(callbacks) => callbacks.supported_types,
        None => LockType::empty(),
    }
}

/// Wrap every subsequently-created lock handle with the misuse-detecting
/// decorator. Idempotent. Must be called before any dispatcher exists;
/// afterwards the call is ignored so already-allocated handles stay
/// consistent with new ones.
pub fn enable_lock_debugging() {
    if FROZEN.load(Ordering::Acquire) {
        warn!("lock debugging requested after a dispatcher was created; ignored");
        return;
    }
    if !DEBUG_LOCKS.swap(true, Ordering::AcqRel) {
        info!("lock misuse debugging enabled");
    }
}

/// One-call setup: registers the built-in `parking_lot`-based backend and
/// the `pthread_self`-based thread-identity provider. Subject to the same
/// freeze and version rules as the individual registrations.
pub fn use_native_threads() -> Result<()> {
    register_lock_callbacks(native_callbacks())?;
    thread_id::register_thread_id_provider(thread_id::native_thread_id)?;
    Ok(())
}

/// Called by a dispatcher at construction: freezes the registry (monotonic;
/// destroying dispatchers does not unfreeze) and reports the capability set
/// the dispatcher may allocate against.
pub fn bind_dispatcher() -> LockType {
    if !FROZEN.swap(true, Ordering::AcqRel) {
        info!("dispatcher bound; lock configuration is now frozen");
    }
    query_capabilities()
}

/// The callbacks lock allocations should go through right now: the active
/// set, debug-wrapped when debugging is enabled.
pub(crate) fn effective_callbacks() -> Option<Arc<LockCallbacks>> {
    let callbacks = ACTIVE_CALLBACKS.load_full()?;
    if DEBUG_LOCKS.load(Ordering::Acquire) {
        Some(Arc::new(callbacks.debug_wrapped()))
    } else {
        Some(callbacks)
    }
}

pub(crate) fn is_frozen() -> bool {
    FROZEN.load(Ordering::Acquire)
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    ACTIVE_CALLBACKS.store(None);
    DEBUG_LOCKS.store(false, Ordering::Release);
    FROZEN.store(false, Ordering::Release);
    thread_id::reset_provider_for_tests();
}
