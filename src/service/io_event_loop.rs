use crate::engine::context::RunnerContext;
use crate::error::{Error, Result, code};
use crate::event;
use crate::json::FlatJson;
use crate::net::epoll::{AddOptions, Epoll};
use crate::net::socket::{self, RecvOutcome};
use crate::service::{Kinded, Service, ServiceKind, kind};
use ahash::AHashSet;
use std::os::fd::RawFd;

const MAX_EVENTS: usize = 1024;
const READ_CHUNK: usize = 4096;

/// Exposes epoll readiness to collocated services as local events.
///
/// `on_update` polls with a zero timeout, so the cooperative tick never
/// blocks here. Registered fds are owned by this service: they are closed
/// on hangup, on EOF during a read, and on destroy — unless released first
/// via [`remove_fd`](Self::remove_fd).
pub struct IoEventLoopService {
    epoll: Option<Epoll>,
    tracked: AHashSet<RawFd>,
    events: Vec<libc::epoll_event>,
}

impl IoEventLoopService {
    pub fn new() -> Self {
        Self {
            epoll: None,
            tracked: AHashSet::new(),
            events: vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS],
        }
    }

    fn epoll(&self) -> Result<&Epoll> {
        self.epoll
            .as_ref()
            .ok_or_else(|| Error::message(code::FAILED, "io event loop is not created"))
    }

    /// Register an fd and take ownership of it.
    pub fn add_fd(&mut self, fd: RawFd, options: AddOptions) -> Result<()> {
        self.epoll()?.add(fd, options)?;
        self.tracked.insert(fd);
        Ok(())
    }

    /// Deregister an fd and release ownership; the caller closes it.
    /// No further events are emitted for it.
    pub fn remove_fd(&mut self, fd: RawFd) -> Result<()> {
        self.epoll()?.remove(fd)?;
        self.tracked.remove(&fd);
        Ok(())
    }

    /// Send all of `data`, retrying on back-pressure. The only point where
    /// a runner tick may stall; bounded by the peer draining its socket.
    pub fn write_to_fd(&self, fd: RawFd, data: &[u8]) -> Result<()> {
        socket::send_all(fd, data)
    }

    /// Drain everything currently readable, per edge-trigger discipline:
    /// one readiness edge, one exhaustive read.
    ///
    /// A peer close surfaces as a `socket_close` event (and the fd is
    /// closed); the call still returns the bytes read before EOF.
    pub fn read_from_fd(&mut self, ctx: &mut RunnerContext, fd: RawFd) -> Result<Vec<u8>> {
        if !self.tracked.contains(&fd) {
            return Err(Error::with_details(
                code::SOCKET_CLOSED,
                FlatJson::new().set("message", "fd is not registered").set("fd", fd),
            ));
        }

        let mut out = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match socket::recv_nonblocking(fd, &mut chunk)? {
                RecvOutcome::Data(n) => out.extend_from_slice(&chunk[..n]),
                RecvOutcome::WouldBlock => break,
                RecvOutcome::Eof => {
                    self.close_tracked(fd);
                    ctx.raise_event(
                        event::SOCKET_CLOSE,
                        FlatJson::new().set(event::key::SOCKET_ID, i64::from(fd)),
                    );
                    break;
                }
            }
        }
        Ok(out)
    }

    fn close_tracked(&mut self, fd: RawFd) {
        if self.tracked.remove(&fd) {
            if let Some(epoll) = &self.epoll {
                let _ = epoll.remove(fd);
            }
            socket::close_fd(fd);
        }
    }
}

impl Default for IoEventLoopService {
    fn default() -> Self {
        Self::new()
    }
}

impl Kinded for IoEventLoopService {
    const KIND: ServiceKind = kind::IO_EVENT_LOOP;
}

impl Service for IoEventLoopService {
    fn kind(&self) -> ServiceKind {
        kind::IO_EVENT_LOOP
    }

    fn on_create(&mut self, _ctx: &mut RunnerContext) -> Result<()> {
        self.epoll = Some(Epoll::create()?);
        Ok(())
    }

    fn on_destroy(&mut self, _ctx: &mut RunnerContext) {
        for fd in self.tracked.drain() {
            socket::close_fd(fd);
        }
        self.epoll = None;
    }

    fn on_update(&mut self, ctx: &mut RunnerContext) {
        let Some(epoll) = self.epoll.as_ref() else {
            return;
        };

        let count = match epoll.wait(&mut self.events, 0) {
            Ok(count) => count,
            Err(err) => {
                tracing::error!(error = %err, "epoll wait failed");
                return;
            }
        };
        if count > 0 {
            ctx.mark_busy();
        }

        for i in 0..count {
            let ev = self.events[i];
            let fd = ev.u64 as RawFd;
            if !self.tracked.contains(&fd) {
                continue;
            }

            if ev.events & libc::EPOLLERR as u32 != 0 {
                match socket::take_socket_error(fd) {
                    Ok(0) => {
                        tracing::debug!(fd, "EPOLLERR with no pending socket error");
                    }
                    Ok(err_code) => {
                        ctx.raise_event(
                            event::SOCKET_ERROR,
                            FlatJson::new()
                                .set(event::key::SOCKET_ID, i64::from(fd))
                                .set(event::key::ERROR_CODE, i64::from(err_code))
                                .set(
                                    event::key::ERROR_DESCRIPTION,
                                    socket::describe_os_error(err_code),
                                ),
                        );
                    }
                    Err(err) => {
                        tracing::error!(fd, error = %err, "failed to read socket error");
                    }
                }
            }

            if ev.events & libc::EPOLLHUP as u32 != 0 {
                ctx.raise_event(
                    event::SOCKET_CLOSE,
                    FlatJson::new().set(event::key::SOCKET_ID, i64::from(fd)),
                );
                self.close_tracked(fd);
                continue;
            }

            if ev.events & libc::EPOLLIN as u32 != 0 {
                ctx.raise_event(
                    event::SOCKET_READ,
                    FlatJson::new().set(event::key::SOCKET_ID, i64::from(fd)),
                );
            }

            if ev.events & libc::EPOLLOUT as u32 != 0 {
                ctx.raise_event(
                    event::SOCKET_WRITE,
                    FlatJson::new().set(event::key::SOCKET_ID, i64::from(fd)),
                );
            }
        }
    }
}
