//! Error hierarchy for the thread-safety layer.
//!
//! Configuration misuse and resource exhaustion are ordinary recoverable
//! errors surfaced to the caller. Lock-protocol violations are not: they are
//! only detected with debugging enabled, and are fatal (see
//! [`ProtocolViolation`]).

use std::io;

use crate::locks::LockType;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registration/allocation misuse detected synchronously at call time
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Backend or operating-system resource exhaustion
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Settings file or environment loading failures
    #[error(transparent)]
    Settings(#[from] config::ConfigError),

    /// Unrecoverable misuse detected outside of debug mode
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// Lock callbacks were built against a different contract version
    #[error("lock callbacks declare api version {found}, expected {expected}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    /// The registry no longer accepts registrations once a dispatcher exists
    #[error("lock callbacks cannot change after a dispatcher has been created")]
    RegistryFrozen,

    /// The active backend does not support the requested lock type
    #[error("lock type {requested:?} is not supported by the active backend (supports {supported:?})")]
    UnsupportedLockType {
        requested: LockType,
        supported: LockType,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// The backend could not allocate a lock of the requested type
    #[error("backend failed to allocate a {ty:?} lock")]
    LockAlloc { ty: LockType },

    /// The operating system refused to hand out a wakeup channel
    #[error("failed to create wakeup channel: {source}")]
    ChannelCreate {
        #[source]
        source: io::Error,
    },
}

/// A call sequence that broke the lock/unlock discipline.
///
/// Only produced by the debug decorator. Violations are deliberately
/// irrecoverable: a corrupted lock-state invariant cannot be safely continued
/// past, so the process aborts after the diagnostic is reported (see
/// [`set_violation_hook`](crate::set_violation_hook)).
#[derive(Debug, Clone, thiserror::Error)]
#[error("lock protocol violation on handle #{handle} ({ty:?}): {kind:?}")]
pub struct ProtocolViolation {
    /// Serial number of the offending handle, assigned at allocation
    pub handle: u64,
    /// The type the handle was allocated with
    pub ty: LockType,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// `release` without a matching successful `acquire`
    UnlockWithoutLock,
    /// Exclusive release by a thread that is not the recorded holder
    NonOwnerUnlock,
    /// Handle dropped while still held
    FreeWhileHeld,
    /// Lock mode incompatible with the handle's allocated type
    ModeTypeMismatch,
    /// Blocking re-acquisition of a non-recursive lock by its holder
    SelfDeadlock,
    /// Handle was not allocated through the debugging backend
    UntrackedHandle,
}
