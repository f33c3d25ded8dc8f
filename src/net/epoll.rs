use crate::error::{Error, Result};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Readiness interests for a registered fd.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    pub read: bool,
    pub write: bool,
    pub edge_trigger: bool,
}

impl AddOptions {
    pub fn edge_read() -> Self {
        Self {
            read: true,
            write: false,
            edge_trigger: true,
        }
    }

    fn events(self) -> u32 {
        let mut events = 0u32;
        if self.read {
            events |= libc::EPOLLIN as u32;
        }
        if self.write {
            events |= libc::EPOLLOUT as u32;
        }
        if self.edge_trigger {
            events |= libc::EPOLLET as u32;
        }
        events
    }
}

/// Thin safe wrapper over an epoll instance. The epoll fd closes on drop;
/// registered fds are not owned here.
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn create() -> Result<Self> {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(Error::from_errno("epoll_create1 failed"));
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    pub fn add(&self, fd: RawFd, options: AddOptions) -> Result<()> {
        let mut event = libc::epoll_event {
            events: options.events(),
            u64: fd as u64,
        };
        let rc = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        };
        if rc < 0 {
            return Err(Error::from_errno(format!("epoll_ctl add failed for fd {fd}")));
        }
        Ok(())
    }

    pub fn remove(&self, fd: RawFd) -> Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(
                self.fd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            return Err(Error::from_errno(format!("epoll_ctl del failed for fd {fd}")));
        }
        Ok(())
    }

    /// Wait for readiness, filling `events`. A zero timeout polls without
    /// blocking. `EINTR` reports as zero events.
    pub fn wait(&self, events: &mut [libc::epoll_event], timeout_ms: i32) -> Result<usize> {
        let count = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms,
            )
        };
        if count < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error();
            if errno == Some(libc::EINTR) {
                return Ok(0);
            }
            return Err(Error::from_errno("epoll_wait failed"));
        }
        Ok(count as usize)
    }
}
