use crate::engine::context::RunnerContext;
use crate::event;
use crate::json::FlatJson;
use crate::net::socket;
use crate::service::actor::ActorService;
use crate::service::{Kinded, Service, ServiceKind, ServiceKindId, kind};
use std::os::fd::RawFd;

/// Relocates accepted connections to another runner.
///
/// The only component that moves an fd's ownership across threads: on
/// `socket_accept` it mails `socket_move` to the target actor, whose runner
/// must register the fd with its own I/O event loop. The accepting runner
/// stops managing the fd the moment the mail is sent.
pub struct SocketRouterService {
    target: String,
}

impl SocketRouterService {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Kinded for SocketRouterService {
    const KIND: ServiceKind = kind::SOCKET_ROUTER;
}

impl Service for SocketRouterService {
    fn kind(&self) -> ServiceKind {
        kind::SOCKET_ROUTER
    }

    fn dependencies(&self) -> &[ServiceKindId] {
        const DEPS: &[ServiceKindId] = &[kind::ACTOR.id];
        DEPS
    }

    fn on_event(&mut self, ctx: &mut RunnerContext, event_name: &str, body: &FlatJson) {
        if event_name != event::SOCKET_ACCEPT {
            return;
        }
        let Some(socket_id) = body.get_u64(event::key::SOCKET_ID) else {
            tracing::warn!("socket_accept event without socket_id");
            return;
        };

        let sent = ctx.with_service::<ActorService, _>(|actor, _| {
            actor.send_mail(
                &self.target,
                event::SOCKET_MOVE,
                FlatJson::new().set(event::key::SOCKET_ID, socket_id),
            )
        });
        match sent {
            Some(Ok(())) => {
                tracing::debug!(socket_id, target = %self.target, "socket routed");
            }
            Some(Err(err)) => {
                tracing::warn!(
                    socket_id,
                    target = %self.target,
                    error = %err,
                    "failed to route socket, closing it"
                );
                socket::close_fd(socket_id as RawFd);
            }
            None => {
                tracing::warn!(socket_id, "actor service unavailable, closing socket");
                socket::close_fd(socket_id as RawFd);
            }
        }
    }
}
