// Eventfd-backed wakeup between one signaler and one waiter
//
// The kernel zeroes the eventfd counter on every read, so any number of
// signals between two waits collapse into a single wakeup. The
// write/read pair is also the happens-before edge that lets the ring
// cursors stay on relaxed ordering.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

/// Binary-semaphore-like wakeup object.
pub(crate) struct Event {
    fd: OwnedFd,
}

impl Event {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Wake the waiter. Writes made before the signal are visible to
    /// whoever returns from a subsequent wait.
    pub fn signal(&self) {
        let value: u64 = 1;
        let bytes = value.to_ne_bytes();
        loop {
            let n = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    bytes.as_ptr() as *const libc::c_void,
                    bytes.len(),
                )
            };
            if n >= 0 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                // The only other failure is counter overflow, which the
                // waiter resolves by zeroing it on wakeup.
                return;
            }
        }
    }

    /// Block until signaled at least once since the last wait returned.
    pub fn wait(&self) {
        let mut buf = [0u8; 8];
        loop {
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n > 0 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return;
            }
        }
    }

    /// Wait for a signal, giving up after `timeout`. Returns true when
    /// signaled. A zero timeout is an immediate probe.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut pollfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        loop {
            let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
            if rc > 0 {
                // Consume the pending count so the next wait blocks.
                self.wait();
                return true;
            }
            if rc == 0 {
                return false;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return false;
            }
        }
    }
}
