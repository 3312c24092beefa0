//! Shared helpers for unit tests.

use std::os::unix::io::RawFd;
use std::time::Duration;

use parking_lot::Mutex;

use crate::Dispatcher;
use crate::NotifySlot;
use crate::Result;
use crate::ThreadIdent;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Minimal dispatcher stand-in: stores the wakeup channel and records which
/// descriptors were registered, without running a poll loop of its own.
#[derive(Default)]
pub struct TestDispatcher {
    slot: NotifySlot,
    watched: Mutex<Vec<RawFd>>,
    owner: Mutex<Option<ThreadIdent>>,
}

impl TestDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watched_fds(&self) -> Vec<RawFd> {
        self.watched.lock().clone()
    }

    pub fn set_polling_owner(
        &self,
        owner: Option<ThreadIdent>,
    ) {
        *self.owner.lock() = owner;
    }
}

impl Dispatcher for TestDispatcher {
    fn notify_slot(&self) -> &NotifySlot {
        &self.slot
    }

    fn add_wakeup_watch(
        &self,
        fd: RawFd,
    ) -> Result<()> {
        self.watched.lock().push(fd);
        Ok(())
    }

    fn polling_owner(&self) -> Option<ThreadIdent> {
        *self.owner.lock()
    }
}

/// Block until `fd` is readable or `timeout` elapses; true when readable.
pub fn wait_readable(
    fd: RawFd,
    timeout: Duration,
) -> bool {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout.as_millis() as libc::c_int) };
    rc > 0 && (pollfd.revents & libc::POLLIN) != 0
}
