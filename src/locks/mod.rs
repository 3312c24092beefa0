//! The pluggable lock abstraction.
//!
//! A lock backend is a set of primitive operations ([`LockOps`]) bundled into
//! a versioned descriptor ([`LockCallbacks`]) and installed process-wide
//! through the registry. Dispatcher-side code never touches a backend
//! directly; it holds [`DispatchLock`] handles, which pair an opaque
//! backend-allocated lock with the operations that created it.
//!
//! With no backend installed the layer degrades to a single-thread-assumed
//! mode: handles still exist, but acquisition succeeds trivially without any
//! real exclusion.

mod debug;
mod native;


pub use debug::set_violation_hook;
pub(crate) use debug::DebugLockOps;
pub(crate) use native::native_callbacks;
pub use native::NativeLockOps;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::constants::LOCK_API_VERSION;
use crate::registry;
use crate::ConfigurationError;
use crate::Result;

bitflags! {
    /// Capabilities a lock is allocated with, bitwise-combinable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockType: u32 {
        /// Re-enterable by its current owning thread, counted by depth.
        const RECURSIVE = 0x01;
        /// Admits multiple simultaneous readers; one writer excludes all.
        const READ_WRITE = 0x02;
    }
}

bitflags! {
    /// How a lock is being acquired or released.
    ///
    /// `WRITE` and `READ` are mutually exclusive; `TRY` is an orthogonal
    /// modifier (`WRITE | TRY`, `READ | TRY`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockMode: u32 {
        const WRITE = 0x04;
        const READ = 0x08;
        /// Never block; report [`LockStatus::Busy`] instead of waiting.
        const TRY = 0x10;
    }
}

/// Outcome of an acquisition attempt.
///
/// `Busy` is not a failure: it is the recoverable signal a `TRY`-mode caller
/// branches on to pick an alternate strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    Busy,
}

/// The opaque per-lock object a backend allocates. Only the backend that
/// created it (or the debug decorator wrapping that backend) looks inside.
pub type RawLock = Box<dyn Any + Send + Sync>;

/// Primitive lock operations supplied by the embedding application.
///
/// Contract: for a `RECURSIVE` lock, N sequential successful `lock` calls by
/// the same thread require exactly N matching `unlock` calls before another
/// thread may acquire it. `TRY`-mode `lock` never blocks. Releasing a lock
/// establishes a happens-before edge with the next successful acquisition of
/// the same lock by another thread.
#[cfg_attr(test, automock)]
pub trait LockOps: Send + Sync + 'static {
    /// Allocate and initialize a new lock of type `ty`.
    fn alloc(&self, ty: LockType) -> Result<RawLock>;

    /// Release all storage held by `lock`. The lock must not be held by any
    /// thread at call time.
    fn free(&self, lock: RawLock, ty: LockType);

    /// Acquire `lock` with `mode`. Blocks unless `mode` carries `TRY`.
    fn lock(&self, mode: LockMode, lock: &RawLock) -> Result<LockStatus>;

    /// Release one level of `lock` with `mode`.
    fn unlock(&self, mode: LockMode, lock: &RawLock) -> Result<()>;
}

/// Versioned descriptor bundling a backend's operations with its declared
/// capabilities. Exactly one instance is active per process at a time.
#[derive(Clone)]
pub struct LockCallbacks {
    /// Must equal [`LOCK_API_VERSION`](crate::LOCK_API_VERSION) or
    /// registration fails.
    pub api_version: u32,
    /// Which lock types `ops.alloc` accepts.
    pub supported_types: LockType,
    pub ops: Arc<dyn LockOps>,
}

impl LockCallbacks {
    pub fn new(
        supported_types: LockType,
        ops: Arc<dyn LockOps>,
    ) -> Self {
        Self {
            api_version: LOCK_API_VERSION,
            supported_types,
            ops,
        }
    }

    /// The same callbacks with every subsequently-allocated handle wrapped by
    /// the misuse-detecting decorator.
    pub(crate) fn debug_wrapped(&self) -> Self {
        Self {
            api_version: self.api_version,
            supported_types: self.supported_types,
            ops: Arc::new(DebugLockOps::new(self.ops.clone())),
        }
    }
}

impl fmt::Debug for LockCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCallbacks")
            .field("api_version", &self.api_version)
            .field("supported_types", &self.supported_types)
            .finish()
    }
}

/// A synchronization handle guarding one piece of dispatcher-shared state.
///
/// Allocated through the active backend; freed exactly once on drop. When no
/// backend is configured the handle is degraded: `acquire`/`release` succeed
/// trivially and provide no exclusion.
pub struct DispatchLock {
    ty: LockType,
    backend: Option<BackendHandle>,
}

struct BackendHandle {
    ops: Arc<dyn LockOps>,
    // Emptied exactly once, by drop.
    raw: Option<RawLock>,
}

impl DispatchLock {
    /// Allocate a lock of type `ty` from the active backend.
    ///
    /// Fails with [`ConfigurationError::UnsupportedLockType`] when `ty`
    /// requests a capability the backend did not declare, or with
    /// [`ResourceError::LockAlloc`](crate::ResourceError::LockAlloc) when the
    /// backend cannot allocate.
    pub fn alloc(ty: LockType) -> Result<Self> {
        match registry::effective_callbacks() {
            Some(callbacks) => {
                if !callbacks.supported_types.contains(ty) {
                    return Err(ConfigurationError::UnsupportedLockType {
                        requested: ty,
                        supported: callbacks.supported_types,
                    }
                    .into());
                }
                let raw = callbacks.ops.alloc(ty)?;
                debug!("allocated {:?} lock", ty);
                Ok(Self {
                    ty,
                    backend: Some(BackendHandle {
                        ops: callbacks.ops.clone(),
                        raw: Some(raw),
                    }),
                })
            }
            None => Ok(Self { ty, backend: None }),
        }
    }

    /// Acquire with `mode`. Blocks until acquisition unless `mode` carries
    /// [`LockMode::TRY`], in which case [`LockStatus::Busy`] is reported
    /// instead of waiting.
    pub fn acquire(
        &self,
        mode: LockMode,
    ) -> Result<LockStatus> {
        match &self.backend {
            Some(backend) => backend.ops.lock(mode, backend.raw()),
            None => Ok(LockStatus::Acquired),
        }
    }

    /// Release one level previously taken by a successful [`acquire`](Self::acquire).
    pub fn release(
        &self,
        mode: LockMode,
    ) -> Result<()> {
        match &self.backend {
            Some(backend) => backend.ops.unlock(mode, backend.raw()),
            None => Ok(()),
        }
    }

    pub fn lock_type(&self) -> LockType {
        self.ty
    }

    /// False when the layer degraded to single-thread-assumed mode.
    pub fn is_synchronized(&self) -> bool {
        self.backend.is_some()
    }
}

impl BackendHandle {
    fn raw(&self) -> &RawLock {
        // The slot is only emptied by drop.
        self.raw
            .as_ref()
            .expect("lock handle used after drop began")
    }
}

impl Drop for DispatchLock {
    fn drop(&mut self) {
        if let Some(backend) = &mut self.backend {
            if let Some(raw) = backend.raw.take() {
                backend.ops.free(raw, self.ty);
                debug!("freed {:?} lock", self.ty);
            }
        }
    }
}

impl fmt::Debug for DispatchLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchLock")
            .field("ty", &self.ty)
            .field("synchronized", &self.backend.is_some())
            .finish()
    }
}
