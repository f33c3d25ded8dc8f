use crate::protocol;
use relayrt::prelude::*;
use std::collections::VecDeque;
use std::os::fd::RawFd;

pub const KIND_MATCH: ServiceKind = ServiceKind::new(kind::USER_BASE, "match");

/// Buckets arriving players two at a time and hands each pair off to a
/// battle runner, chosen round-robin by battle id.
pub struct MatchService {
    battle_count: usize,
    next_battle: u64,
    waiting: VecDeque<RawFd>,
}

impl MatchService {
    pub fn new(battle_count: usize) -> Self {
        Self {
            battle_count: battle_count.max(1),
            next_battle: 0,
            waiting: VecDeque::new(),
        }
    }

    fn on_socket_move(&mut self, ctx: &mut RunnerContext, fd: RawFd) {
        let added = ctx
            .with_service::<IoEventLoopService, _>(|io, _| io.add_fd(fd, AddOptions::edge_read()))
            .unwrap_or_else(|| Err(Error::message(code::FAILED, "io event loop is unavailable")));
        if let Err(err) = added {
            tracing::warn!(fd, error = %err, "failed to adopt moved socket");
            relayrt::net::socket::close_fd(fd);
            return;
        }

        self.waiting.push_back(fd);
        protocol::send_line(ctx, fd, &FlatJson::new().set("event", "waiting"));
        self.try_pair(ctx);
    }

    fn try_pair(&mut self, ctx: &mut RunnerContext) {
        while self.waiting.len() >= 2 {
            let Some(first) = self.waiting.pop_front() else {
                break;
            };
            let Some(second) = self.waiting.pop_front() else {
                self.waiting.push_front(first);
                break;
            };

            // release both fds before mailing them away; a failed release
            // means the io loop already reaped the socket
            let first_ok = self.release(ctx, first);
            let second_ok = self.release(ctx, second);
            match (first_ok, second_ok) {
                (true, true) => {}
                (true, false) => {
                    self.readopt(ctx, first);
                    continue;
                }
                (false, true) => {
                    self.readopt(ctx, second);
                    continue;
                }
                (false, false) => continue,
            }

            let battle_id = self.next_battle;
            self.next_battle += 1;
            let target = format!("battle:{}", battle_id % self.battle_count as u64);

            for fd in [first, second] {
                let sent = ctx.with_service::<ActorService, _>(|actor, _| {
                    actor.send_mail(
                        &target,
                        event::SOCKET_MOVE,
                        FlatJson::new()
                            .set(event::key::SOCKET_ID, i64::from(fd))
                            .set("battle_id", battle_id as i64),
                    )
                });
                match sent {
                    Some(Ok(())) => {
                        tracing::debug!(fd, battle_id, target = %target, "player dispatched");
                    }
                    _ => {
                        tracing::warn!(fd, target = %target, "failed to dispatch player, dropping");
                        relayrt::net::socket::close_fd(fd);
                    }
                }
            }
        }
    }

    fn release(&self, ctx: &mut RunnerContext, fd: RawFd) -> bool {
        ctx.with_service::<IoEventLoopService, _>(|io, _| io.remove_fd(fd).is_ok())
            .unwrap_or(false)
    }

    fn readopt(&mut self, ctx: &mut RunnerContext, fd: RawFd) {
        let added = ctx
            .with_service::<IoEventLoopService, _>(|io, _| io.add_fd(fd, AddOptions::edge_read()))
            .unwrap_or_else(|| Err(Error::message(code::FAILED, "io event loop is unavailable")));
        match added {
            Ok(()) => self.waiting.push_front(fd),
            Err(err) => {
                tracing::warn!(fd, error = %err, "failed to requeue player");
                relayrt::net::socket::close_fd(fd);
            }
        }
    }
}

impl Kinded for MatchService {
    const KIND: ServiceKind = KIND_MATCH;
}

impl Service for MatchService {
    fn kind(&self) -> ServiceKind {
        KIND_MATCH
    }

    fn dependencies(&self) -> &[ServiceKindId] {
        const DEPS: &[ServiceKindId] = &[kind::ACTOR.id, kind::IO_EVENT_LOOP.id];
        DEPS
    }

    fn on_event(&mut self, ctx: &mut RunnerContext, event_name: &str, body: &FlatJson) {
        match event_name {
            event::SOCKET_MOVE => {
                let Some(fd) = body.get_u64(event::key::SOCKET_ID) else {
                    tracing::warn!("socket_move without socket_id");
                    return;
                };
                self.on_socket_move(ctx, fd as RawFd);
            }
            event::SOCKET_CLOSE => {
                if let Some(fd) = body.get_u64(event::key::SOCKET_ID) {
                    self.waiting.retain(|&w| w != fd as RawFd);
                }
            }
            event::SOCKET_READ => {
                // nothing to say to waiting players; drain per edge-trigger
                // discipline and ignore the bytes
                if let Some(fd) = body.get_u64(event::key::SOCKET_ID) {
                    let _ = ctx.with_service::<IoEventLoopService, _>(|io, ctx| {
                        io.read_from_fd(ctx, fd as RawFd)
                    });
                }
            }
            _ => {}
        }
    }
}
