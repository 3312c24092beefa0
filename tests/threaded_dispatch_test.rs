//! Full multithreaded scenario: native backend and identity provider
//! registered before the dispatcher exists, debug decorator on, a mutating
//! thread following the lock-mutate-release-wake pattern.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use common::PollDispatcher;
use evguard::enable_lock_debugging;
use evguard::make_notifiable;
use evguard::register_lock_callbacks;
use evguard::use_native_threads;
use evguard::Error;
use evguard::LockCallbacks;
use evguard::LockType;
use evguard::NativeLockOps;

#[test]
fn foreign_thread_mutation_should_wake_the_blocked_owner() {
    use_native_threads().expect("native setup before any dispatcher");
    enable_lock_debugging();

    let dispatcher = Arc::new(PollDispatcher::new().expect("dispatcher construction"));
    assert!(dispatcher.lock_is_synchronized());

    // The registry is frozen now.
    let late = register_lock_callbacks(LockCallbacks::new(
        LockType::RECURSIVE,
        Arc::new(NativeLockOps),
    ));
    assert!(matches!(late, Err(Error::Configuration(_))));

    make_notifiable(dispatcher.as_ref()).expect("make_notifiable");

    let poller = {
        let dispatcher = dispatcher.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let woken = dispatcher.poll_once(Duration::from_secs(5));
            (woken, started.elapsed())
        })
    };

    // Wait until the owner has entered its blocking poll step.
    let patience = Instant::now();
    while !dispatcher.is_polling() {
        assert!(
            patience.elapsed() < Duration::from_secs(2),
            "poller never entered the poll step"
        );
        thread::yield_now();
    }

    // Lock, mutate, release, wake: wake_if_foreign posts because this
    // thread is not the recorded polling owner.
    dispatcher.add_event("watch-added-by-mutator").unwrap();

    let (woken, elapsed) = poller.join().unwrap();
    assert!(woken, "poll must report the wakeup, not a timeout");
    assert!(
        elapsed < Duration::from_secs(2),
        "wakeup took {:?}, expected well under the 5s timeout",
        elapsed
    );

    let events = dispatcher.observed_events().unwrap();
    assert_eq!(events, vec!["watch-added-by-mutator".to_string()]);
}
