// -
// Lock backend contract

/// Version of the lock-callback contract. Registration of a
/// [`LockCallbacks`](crate::LockCallbacks) whose `api_version` differs is
/// rejected outright, never coerced.
pub const LOCK_API_VERSION: u32 = 1;

// -
// Wakeup channel

/// Byte written into a pipe-flavored wakeup channel. The value itself is
/// meaningless; readiness of the read end is the signal.
pub(crate) const WAKEUP_TOKEN: u8 = 0;

/// How many bytes `drain` pulls per `read` call before checking for more.
pub(crate) const DRAIN_CHUNK: usize = 64;
