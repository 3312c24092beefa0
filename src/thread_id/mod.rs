//! Thread identity as an injected capability.
//!
//! The dispatcher records the identity of the thread entering its blocking
//! poll step; any component can then cheaply test "is the calling thread the
//! owner?" to choose the fast uncontended path over lock acquisition and a
//! wakeup. With no provider registered the layer assumes a single thread and
//! every caller counts as the owner.


use std::sync::Arc;

use arc_swap::ArcSwapOption;
use lazy_static::lazy_static;

use crate::registry;
use crate::ConfigurationError;
use crate::Result;

type ThreadIdFn = Box<dyn Fn() -> u64 + Send + Sync>;

lazy_static! {
    static ref PROVIDER: ArcSwapOption<ThreadIdFn> = ArcSwapOption::new(None);
}

/// A stable per-thread identifier, used only for equality comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadIdent(u64);

/// Register the function used to identify the calling thread.
///
/// Supplied once at startup, before any dispatcher exists. The provider must
/// return a nonzero value that is stable for the life of the thread and
/// distinct across live threads; zero is reserved for "no owner".
pub fn register_thread_id_provider(id_fn: impl Fn() -> u64 + Send + Sync + 'static) -> Result<()> {
    if registry::is_frozen() {
        return Err(ConfigurationError::RegistryFrozen.into());
    }
    PROVIDER.store(Some(Arc::new(Box::new(id_fn))));
    Ok(())
}

/// Identity of the calling thread, or `None` when no provider is registered
/// (single-thread assumption).
pub fn thread_self() -> Option<ThreadIdent> {
    PROVIDER.load_full().map(|id_fn| ThreadIdent((*id_fn)()))
}

/// The cheap fast-path test: is the calling thread the recorded owner?
///
/// True when no provider is registered, when no owner is recorded, or on an
/// identity match. In all of these cases no cross-thread wakeup is required.
pub fn is_owner(recorded: Option<ThreadIdent>) -> bool {
    match (thread_self(), recorded) {
        (None, _) => true,
        (_, None) => true,
        (Some(me), Some(owner)) => me == owner,
    }
}

/// Identity used by backend internals: the registered provider, falling back
/// to `pthread_self` so the native backend works before registration.
pub(crate) fn current_raw_id() -> u64 {
    match PROVIDER.load_full() {
        Some(id_fn) => (*id_fn)(),
        None => native_thread_id(),
    }
}

/// The provider `use_native_threads` installs.
pub(crate) fn native_thread_id() -> u64 {
    // pthread_t is an opaque nonzero value on every supported platform.
    unsafe { libc::pthread_self() as u64 }
}

#[cfg(test)]
pub(crate) fn reset_provider_for_tests() {
    PROVIDER.store(None);
}
