//! Wakeup scenario with nothing registered: locking degrades to the
//! single-thread-assumed mode, but the notification channel still lets any
//! thread interrupt the blocking poll step.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use common::PollDispatcher;
use evguard::make_notifiable;
use evguard::post_wakeup;
use evguard::query_capabilities;
use evguard::LockType;

#[test]
fn degraded_dispatcher_should_wake_from_post_well_before_timeout() {
    assert_eq!(query_capabilities(), LockType::empty());

    let dispatcher = Arc::new(PollDispatcher::new().expect("dispatcher construction"));
    assert!(
        !dispatcher.lock_is_synchronized(),
        "no backend registered, locking must degrade"
    );

    make_notifiable(dispatcher.as_ref()).expect("first make_notifiable");
    make_notifiable(dispatcher.as_ref()).expect("second make_notifiable is idempotent");

    let poller = {
        let dispatcher = dispatcher.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let woken = dispatcher.poll_once(Duration::from_secs(5));
            (woken, started.elapsed())
        })
    };

    // Give the poller time to block, then mutate and wake it. With no
    // identity provider registered, wake_if_foreign treats every caller as
    // the owner, so the wakeup is posted explicitly.
    thread::sleep(Duration::from_millis(200));
    dispatcher.add_event("registered-from-thread-b").unwrap();
    post_wakeup(dispatcher.as_ref());

    let (woken, elapsed) = poller.join().unwrap();
    assert!(woken, "poll must report a ready event, not a timeout");
    assert!(
        elapsed < Duration::from_secs(2),
        "wakeup took {:?}, expected well under the 5s timeout",
        elapsed
    );

    let events = dispatcher.observed_events().unwrap();
    assert_eq!(events, vec!["registered-from-thread-b".to_string()]);
}
