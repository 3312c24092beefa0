use std::sync::Arc;

use serial_test::serial;

use super::*;
use crate::test_utils::enable_logger;
use crate::Error;
use crate::LockMode;
use crate::NativeLockOps;

fn recursive_only_callbacks() -> LockCallbacks {
    LockCallbacks::new(LockType::RECURSIVE, Arc::new(NativeLockOps))
}

#[test]
#[serial]
fn register_before_dispatcher_should_be_observable_via_capabilities() {
    enable_logger();
    reset_for_tests();

    assert_eq!(query_capabilities(), LockType::empty());

    register_lock_callbacks(recursive_only_callbacks()).expect("registration should succeed");

    assert_eq!(query_capabilities(), LockType::RECURSIVE);
}

#[test]
#[serial]
fn register_should_reject_api_version_mismatch() {
    reset_for_tests();

    let mut callbacks = recursive_only_callbacks();
    callbacks.api_version = LOCK_API_VERSION + 1;

    let result = register_lock_callbacks(callbacks);
    assert!(matches!(
        result,
        Err(Error::Configuration(
            ConfigurationError::ApiVersionMismatch { .. }
        ))
    ));
    assert_eq!(query_capabilities(), LockType::empty());
}

#[test]
#[serial]
fn reregistration_before_dispatcher_should_let_last_writer_win() {
    reset_for_tests();

    register_lock_callbacks(recursive_only_callbacks()).expect("first registration");
    register_lock_callbacks(LockCallbacks::new(
        LockType::RECURSIVE | LockType::READ_WRITE,
        Arc::new(NativeLockOps),
    ))
    .expect("second registration");

    assert_eq!(
        query_capabilities(),
        LockType::RECURSIVE | LockType::READ_WRITE
    );
}

#[test]
#[serial]
fn register_after_dispatcher_should_fail_frozen() {
    reset_for_tests();

    register_lock_callbacks(recursive_only_callbacks()).expect("registration before dispatcher");
    let capabilities = bind_dispatcher();
    assert_eq!(capabilities, LockType::RECURSIVE);

    let result = register_lock_callbacks(recursive_only_callbacks());
    assert!(matches!(
        result,
        Err(Error::Configuration(ConfigurationError::RegistryFrozen))
    ));

    // Frozen is monotonic: binding again changes nothing.
    assert_eq!(bind_dispatcher(), LockType::RECURSIVE);
}

#[test]
#[serial]
fn use_native_threads_should_install_backend_and_identity_provider() {
    reset_for_tests();

    assert!(crate::thread_self().is_none());

    use_native_threads().expect("native setup should succeed");

    assert_eq!(
        query_capabilities(),
        LockType::RECURSIVE | LockType::READ_WRITE
    );
    assert!(crate::thread_self().is_some());
}

#[test]
#[serial]
fn use_native_threads_should_fail_after_freeze() {
    reset_for_tests();

    bind_dispatcher();

    assert!(matches!(
        use_native_threads(),
        Err(Error::Configuration(ConfigurationError::RegistryFrozen))
    ));
}

#[test]
#[serial]
fn debugging_enabled_after_freeze_should_be_ignored() {
    reset_for_tests();

    register_lock_callbacks(recursive_only_callbacks()).expect("registration");
    bind_dispatcher();
    enable_lock_debugging();

    // Handles allocated now must not be debug-wrapped: releasing an unheld
    // lock reports an error from the native backend instead of the
    // decorator's fatal path.
    let lock = crate::DispatchLock::alloc(LockType::RECURSIVE).expect("alloc");
    assert!(matches!(
        lock.release(LockMode::WRITE),
        Err(Error::Fatal(_))
    ));
}
