//! A minimal poll-based dispatcher used by the integration scenarios.
//!
//! Only the crate's public surface is used: the dispatcher binds against the
//! registry at construction, guards its shared watch set with a
//! `DispatchLock`, stores its wakeup channel in a `NotifySlot`, and records
//! its polling owner so `wake_if_foreign` can gate on it.

// Not every integration binary exercises every helper.
#![allow(dead_code)]

use std::os::unix::io::RawFd;
use std::time::Duration;

use parking_lot::Mutex;

use evguard::bind_dispatcher;
use evguard::thread_self;
use evguard::wake_if_foreign;
use evguard::DispatchLock;
use evguard::Dispatcher;
use evguard::LockMode;
use evguard::LockType;
use evguard::NotifySlot;
use evguard::Result;
use evguard::ThreadIdent;

pub struct PollDispatcher {
    slot: NotifySlot,
    watched: Mutex<Vec<RawFd>>,
    owner: Mutex<Option<ThreadIdent>>,
    state_lock: DispatchLock,
    events: Mutex<Vec<String>>,
}

impl PollDispatcher {
    /// Binds against the registry (freezing it) and allocates the lock that
    /// guards the watch set.
    pub fn new() -> Result<Self> {
        bind_dispatcher();
        Ok(Self {
            slot: NotifySlot::new(),
            watched: Mutex::new(Vec::new()),
            owner: Mutex::new(None),
            state_lock: DispatchLock::alloc(LockType::RECURSIVE)?,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn lock_is_synchronized(&self) -> bool {
        self.state_lock.is_synchronized()
    }

    /// One blocking poll step. Returns true when an event (or a wakeup)
    /// arrived, false on timeout.
    pub fn poll_once(
        &self,
        timeout: Duration,
    ) -> bool {
        *self.owner.lock() = thread_self();
        let mut pollfds: Vec<libc::pollfd> = self
            .watched
            .lock()
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout.as_millis() as libc::c_int,
            )
        };
        *self.owner.lock() = None;

        if rc > 0 {
            if let Some(channel) = self.slot.get() {
                channel.drain();
            }
            true
        } else {
            false
        }
    }

    /// Mutation in the pattern the layer prescribes: take the shared-state
    /// lock, mutate, release, then wake the owner if it might be blocked.
    pub fn add_event(
        &self,
        name: &str,
    ) -> Result<()> {
        self.state_lock.acquire(LockMode::WRITE)?;
        self.events.lock().push(name.to_string());
        self.state_lock.release(LockMode::WRITE)?;
        wake_if_foreign(self);
        Ok(())
    }

    pub fn observed_events(&self) -> Result<Vec<String>> {
        self.state_lock.acquire(LockMode::WRITE)?;
        let snapshot = self.events.lock().clone();
        self.state_lock.release(LockMode::WRITE)?;
        Ok(snapshot)
    }

    pub fn is_polling(&self) -> bool {
        self.owner.lock().is_some()
    }
}

impl Dispatcher for PollDispatcher {
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
