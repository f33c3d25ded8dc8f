use crate::engine::context::RunnerContext;
use crate::error::{Error, Result, code};
use crate::event;
use crate::json::FlatJson;
use crate::net::epoll::AddOptions;
use crate::net::socket;
use crate::service::config::ConfigService;
use crate::service::io_event_loop::IoEventLoopService;
use crate::service::{Kinded, Service, ServiceKind, ServiceKindId, kind};
use std::io::ErrorKind;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};

const ACCEPT_BACKLOG: i32 = 128;

/// Owns the listening socket and turns its readiness into `socket_accept`
/// events, one per connection, each carrying ownership of a fresh
/// non-blocking fd.
pub struct TcpServerService {
    listener: Option<TcpListener>,
    listener_fd: RawFd,
    local_port: u16,
}

impl TcpServerService {
    pub fn new() -> Self {
        Self {
            listener: None,
            listener_fd: -1,
            local_port: 0,
        }
    }

    /// The bound port; differs from the configured one when that was 0.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    fn accept_loop(&self, ctx: &mut RunnerContext) {
        let Some(listener) = &self.listener else {
            return;
        };

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        tracing::error!(peer = %peer, error = %err, "failed to set accepted socket non-blocking");
                        continue;
                    }
                    let fd = stream.into_raw_fd();
                    tracing::debug!(peer = %peer, fd, "accepted connection");
                    ctx.raise_event(
                        event::SOCKET_ACCEPT,
                        FlatJson::new().set(event::key::SOCKET_ID, i64::from(fd)),
                    );
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!(error = %err, "accept failed");
                    break;
                }
            }
        }
    }
}

impl Default for TcpServerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Kinded for TcpServerService {
    const KIND: ServiceKind = kind::TCP_SERVER;
}

impl Service for TcpServerService {
    fn kind(&self) -> ServiceKind {
        kind::TCP_SERVER
    }

    fn dependencies(&self) -> &[ServiceKindId] {
        const DEPS: &[ServiceKindId] = &[kind::CONFIG.id, kind::IO_EVENT_LOOP.id];
        DEPS
    }

    fn on_create(&mut self, ctx: &mut RunnerContext) -> Result<()> {
        let port = ctx
            .with_service::<ConfigService, _>(|config, _| config.config().get_u64("port"))
            .flatten()
            .ok_or_else(|| Error::message(code::FAILED, "config is missing 'port'"))?;
        let port = u16::try_from(port).map_err(|_| {
            Error::with_details(
                code::FAILED,
                FlatJson::new()
                    .set("message", "port is out of range")
                    .set("port", port),
            )
        })?;

        let listener = socket::tcp_listener(port, ACCEPT_BACKLOG)?;
        let fd = listener.as_raw_fd();
        let local_port = listener.local_addr().map(|a| a.port()).unwrap_or(port);

        match ctx.with_service::<IoEventLoopService, _>(|io, _| {
            io.add_fd(fd, AddOptions::edge_read())
        }) {
            Some(Ok(())) => {}
            Some(Err(err)) => return Err(err),
            None => {
                return Err(Error::message(code::FAILED, "io event loop is unavailable"));
            }
        }

        self.listener = Some(listener);
        self.listener_fd = fd;
        self.local_port = local_port;
        tracing::info!(port = local_port, "tcp server listening");
        Ok(())
    }

    fn on_destroy(&mut self, ctx: &mut RunnerContext) {
        if let Some(listener) = self.listener.take() {
            let fd = listener.as_raw_fd();
            ctx.with_service::<IoEventLoopService, _>(|io, _| {
                let _ = io.remove_fd(fd);
            });
            // closed when the listener drops
        }
        self.listener_fd = -1;
    }

    fn on_event(&mut self, ctx: &mut RunnerContext, event_name: &str, body: &FlatJson) {
        if event_name != event::SOCKET_READ {
            return;
        }
        if body.get_i64(event::key::SOCKET_ID) != Some(i64::from(self.listener_fd)) {
            return;
        }
        self.accept_loop(ctx);
    }
}
