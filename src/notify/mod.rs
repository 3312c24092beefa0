//! Cross-thread wakeup for a dispatcher blocked in its poll step.
//!
//! A [`NotifyChannel`] is a self-connected signaling primitive: the read end
//! is registered into the dispatcher's own watch set so a wakeup looks like
//! an ordinary ready event, and the write end is postable from any thread or
//! signal-handling context. Creation is lazy and idempotent per dispatcher.
//!
//! [`post_wakeup`] is the only operation with signal-handler constraints: it
//! must not allocate, block, take locks, or log.


use std::io;
use std::os::unix::io::RawFd;

use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::info;

use crate::constants::DRAIN_CHUNK;
use crate::constants::WAKEUP_TOKEN;
use crate::thread_id;
use crate::ResourceError;
use crate::Result;

/// Which signaling primitive backs the channel.
///
/// `Auto` prefers the single-descriptor `eventfd` where the platform has it
/// and falls back to a non-blocking pipe elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeupFlavor {
    #[default]
    Auto,
    Eventfd,
    Pipe,
}

/// The dispatcher-facing collaborator surface.
///
/// The event-dispatch core implements this so the layer can store a wakeup
/// channel on it, register the channel's read end into the core's own watch
/// set, and ask which thread (if any) is currently blocked in poll.
pub trait Dispatcher {
    /// Storage for the dispatcher's wakeup channel.
    fn notify_slot(&self) -> &NotifySlot;

    /// Register `fd` for readability into the dispatcher's watch set.
    fn add_wakeup_watch(
        &self,
        fd: RawFd,
    ) -> Result<()>;

    /// Identity of the thread currently blocked in the poll step, recorded
    /// at poll entry; `None` while nobody is blocked.
    fn polling_owner(&self) -> Option<thread_id::ThreadIdent>;
}

/// Owner cell for a dispatcher's channel. At-most-once creation, destroyed
/// with the dispatcher.
#[derive(Debug, Default)]
pub struct NotifySlot {
    cell: OnceCell<NotifyChannel>,
}

impl NotifySlot {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub fn get(&self) -> Option<&NotifyChannel> {
        self.cell.get()
    }
}

/// Make `dispatcher` safe to wake from another thread or a signal handler.
///
/// Idempotent: a dispatcher that already owns a channel reports success
/// without creating a duplicate resource. Descriptor exhaustion surfaces as
/// [`ResourceError::ChannelCreate`]; callers depend on wakeup capability for
/// correctness under multithreaded mutation, so it is never swallowed.
pub fn make_notifiable(dispatcher: &impl Dispatcher) -> Result<()> {
    make_notifiable_with(dispatcher, WakeupFlavor::Auto)
}

/// [`make_notifiable`] with an explicit channel flavor (see
/// [`Settings`](crate::Settings)).
pub fn make_notifiable_with(
    dispatcher: &impl Dispatcher,
    flavor: WakeupFlavor,
) -> Result<()> {
    let slot = dispatcher.notify_slot();
    let mut created = false;
    let channel = slot.cell.get_or_try_init(|| {
        created = true;
        NotifyChannel::create(flavor).map_err(|source| ResourceError::ChannelCreate { source })
    })?;
    if created {
        dispatcher.add_wakeup_watch(channel.read_fd())?;
        info!(
            "wakeup channel ready: flavor {:?}, read fd {}",
            channel.flavor,
            channel.read_fd()
        );
    }
    Ok(())
}

/// Force the dispatcher's blocking poll call to return promptly.
///
/// Safe from any thread and from signal-handling contexts; does nothing when
/// the dispatcher was never made notifiable.
pub fn post_wakeup(dispatcher: &impl Dispatcher) {
    if let Some(channel) = dispatcher.notify_slot().get() {
        channel.post();
    }
}

/// Post a wakeup only when the calling thread is not the recorded polling
/// owner: the pattern mutating threads use right after releasing their lock,
/// guaranteeing the owner observes the mutation before its next blocking
/// wait.
pub fn wake_if_foreign(dispatcher: &impl Dispatcher) {
    if !thread_id::is_owner(dispatcher.polling_owner()) {
        post_wakeup(dispatcher);
    }
}

/// A self-connected signaling primitive: eventfd (one descriptor, both
/// ends) or a non-blocking pipe.
#[derive(Debug)]
pub struct NotifyChannel {
    read_fd: RawFd,
    write_fd: RawFd,
    flavor: WakeupFlavor,
}

impl NotifyChannel {
    pub(crate) fn create(flavor: WakeupFlavor) -> io::Result<Self> {
        match flavor {
            WakeupFlavor::Eventfd => Self::create_eventfd(),
            WakeupFlavor::Pipe => Self::create_pipe(),
            WakeupFlavor::Auto => {
                if cfg!(target_os = "linux") {
                    Self::create_eventfd().or_else(|_| Self::create_pipe())
                } else {
                    Self::create_pipe()
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn create_eventfd() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            read_fd: fd,
            write_fd: fd,
            flavor: WakeupFlavor::Eventfd,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn create_eventfd() -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "eventfd is not available on this platform",
        ))
    }

    fn create_pipe() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            if let Err(error) = set_nonblocking_cloexec(fd) {
                unsafe {
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                }
                return Err(error);
            }
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
            flavor: WakeupFlavor::Pipe,
        })
    }

    /// The end to register into the dispatcher's watch set.
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Write the minimal wakeup token.
    ///
    /// Async-signal-safe: a single `write` on a pre-opened non-blocking
    /// descriptor. A full pipe means a wakeup is already pending, so
    /// `EAGAIN` (like every other error here) is ignored.
    pub fn post(&self) {
        match self.flavor {
            WakeupFlavor::Eventfd => {
                let token: u64 = 1;
                unsafe {
                    libc::write(
                        self.write_fd,
                        &token as *const u64 as *const libc::c_void,
                        std::mem::size_of::<u64>(),
                    );
                }
            }
            _ => {
                let token = [WAKEUP_TOKEN];
                unsafe {
                    libc::write(self.write_fd, token.as_ptr() as *const libc::c_void, 1);
                }
            }
        }
    }

    /// Empty the read end so a level-triggered watch set does not spin.
    /// Called by the dispatcher when the channel's event fires.
    pub fn drain(&self) {
        let mut buf = [0u8; DRAIN_CHUNK];
        loop {
            let n = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for NotifyChannel {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            if self.write_fd != self.read_fd {
                libc::close(self.write_fd);
            }
        }
    }
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
