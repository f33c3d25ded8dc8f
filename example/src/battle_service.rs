use crate::protocol;
use ahash::AHashMap;
use relayrt::prelude::*;
use std::os::fd::RawFd;

pub const KIND_BATTLE: ServiceKind = ServiceKind::new(kind::USER_BASE + 1, "battle");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Rock,
    Paper,
    Scissors,
    Lizard,
    Spock,
}

impl Move {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "rock" => Some(Move::Rock),
            "paper" => Some(Move::Paper),
            "scissors" => Some(Move::Scissors),
            "lizard" => Some(Move::Lizard),
            "spock" => Some(Move::Spock),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Move::Rock => "rock",
            Move::Paper => "paper",
            Move::Scissors => "scissors",
            Move::Lizard => "lizard",
            Move::Spock => "spock",
        }
    }

    fn beats(self, other: Self) -> bool {
        use Move::*;
        matches!(
            (self, other),
            (Rock, Scissors)
                | (Rock, Lizard)
                | (Paper, Rock)
                | (Paper, Spock)
                | (Scissors, Paper)
                | (Scissors, Lizard)
                | (Lizard, Spock)
                | (Lizard, Paper)
                | (Spock, Scissors)
                | (Spock, Rock)
        )
    }
}

struct BattleState {
    players: Vec<RawFd>,
    moves: [Option<Move>; 2],
}

/// Runs rounds of rock-paper-scissors-lizard-spock over sockets handed in
/// by the match runner. One service instance hosts many concurrent battles.
pub struct BattleService {
    battles: AHashMap<u64, BattleState>,
    seat_by_fd: AHashMap<RawFd, u64>,
    buffers: AHashMap<RawFd, Vec<u8>>,
}

impl BattleService {
    pub fn new() -> Self {
        Self {
            battles: AHashMap::new(),
            seat_by_fd: AHashMap::new(),
            buffers: AHashMap::new(),
        }
    }

    fn on_socket_move(&mut self, ctx: &mut RunnerContext, fd: RawFd, battle_id: u64) {
        let added = ctx
            .with_service::<IoEventLoopService, _>(|io, _| io.add_fd(fd, AddOptions::edge_read()))
            .unwrap_or_else(|| Err(Error::message(code::FAILED, "io event loop is unavailable")));
        if let Err(err) = added {
            tracing::warn!(fd, battle_id, error = %err, "failed to adopt player socket");
            relayrt::net::socket::close_fd(fd);
            return;
        }

        let battle = self.battles.entry(battle_id).or_insert_with(|| BattleState {
            players: Vec::with_capacity(2),
            moves: [None, None],
        });
        if battle.players.len() >= 2 {
            tracing::warn!(fd, battle_id, "battle is already full, dropping player");
            protocol::release_and_close(ctx, fd);
            return;
        }

        battle.players.push(fd);
        self.seat_by_fd.insert(fd, battle_id);
        self.buffers.insert(fd, Vec::new());

        if battle.players.len() == 2 {
            let players = battle.players.clone();
            for fd in players {
                protocol::send_line(
                    ctx,
                    fd,
                    &FlatJson::new()
                        .set("event", "battle_start")
                        .set("battle_id", battle_id as i64),
                );
            }
            tracing::info!(battle_id, "battle started");
        }
    }

    fn on_socket_read(&mut self, ctx: &mut RunnerContext, fd: RawFd) {
        let bytes = match ctx
            .with_service::<IoEventLoopService, _>(|io, ctx| io.read_from_fd(ctx, fd))
        {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                tracing::warn!(fd, error = %err, "read failed");
                return;
            }
            None => return,
        };

        let Some(buffer) = self.buffers.get_mut(&fd) else {
            return;
        };
        buffer.extend_from_slice(&bytes);
        let lines = protocol::take_lines(buffer);

        for line in lines {
            self.on_line(ctx, fd, &line);
        }
    }

    fn on_line(&mut self, ctx: &mut RunnerContext, fd: RawFd, line: &str) {
        let action = FlatJson::from_json_str(line)
            .ok()
            .and_then(|body| body.get_str("action").and_then(Move::parse));
        let Some(action) = action else {
            protocol::send_line(
                ctx,
                fd,
                &FlatJson::new()
                    .set("event", "error")
                    .set("message", "expected {\"action\": <move>}"),
            );
            return;
        };

        let Some(&battle_id) = self.seat_by_fd.get(&fd) else {
            return;
        };
        let Some(battle) = self.battles.get_mut(&battle_id) else {
            return;
        };
        let Some(seat) = battle.players.iter().position(|&p| p == fd) else {
            return;
        };
        if battle.moves[seat].is_some() {
            return;
        }
        battle.moves[seat] = Some(action);

        if let [Some(first), Some(second)] = battle.moves
            && battle.players.len() == 2
        {
            let players = [battle.players[0], battle.players[1]];
            self.finish(ctx, battle_id, players, [first, second]);
        }
    }

    fn finish(
        &mut self,
        ctx: &mut RunnerContext,
        battle_id: u64,
        players: [RawFd; 2],
        moves: [Move; 2],
    ) {
        self.forget(battle_id);

        for seat in 0..2 {
            let own = moves[seat];
            let other = moves[1 - seat];
            let result = if own.beats(other) {
                "win"
            } else if other.beats(own) {
                "lose"
            } else {
                "draw"
            };
            protocol::send_line(
                ctx,
                players[seat],
                &FlatJson::new()
                    .set("event", "battle_result")
                    .set("result", result)
                    .set("you", own.name())
                    .set("opponent", other.name()),
            );
        }

        for fd in players {
            protocol::release_and_close(ctx, fd);
        }
        tracing::info!(battle_id, "battle finished");
    }

    fn on_socket_close(&mut self, ctx: &mut RunnerContext, fd: RawFd) {
        self.buffers.remove(&fd);
        let Some(battle_id) = self.seat_by_fd.remove(&fd) else {
            return;
        };
        let Some(battle) = self.battles.remove(&battle_id) else {
            return;
        };

        // the remaining player wins by forfeit
        for other in battle.players {
            if other == fd {
                continue;
            }
            protocol::send_line(
                ctx,
                other,
                &FlatJson::new()
                    .set("event", "battle_result")
                    .set("result", "forfeit_win"),
            );
            protocol::release_and_close(ctx, other);
            self.seat_by_fd.remove(&other);
            self.buffers.remove(&other);
        }
        tracing::info!(battle_id, fd, "battle abandoned");
    }

    fn forget(&mut self, battle_id: u64) {
        if let Some(battle) = self.battles.remove(&battle_id) {
            for fd in battle.players {
                self.seat_by_fd.remove(&fd);
                self.buffers.remove(&fd);
            }
        }
    }
}

impl Default for BattleService {
    fn default() -> Self {
        Self::new()
    }
}

impl Kinded for BattleService {
    const KIND: ServiceKind = KIND_BATTLE;
}

impl Service for BattleService {
    fn kind(&self) -> ServiceKind {
        KIND_BATTLE
    }

    fn dependencies(&self) -> &[ServiceKindId] {
        const DEPS: &[ServiceKindId] = &[kind::ACTOR.id, kind::IO_EVENT_LOOP.id];
        DEPS
    }

    fn on_event(&mut self, ctx: &mut RunnerContext, event_name: &str, body: &FlatJson) {
        match event_name {
            event::SOCKET_MOVE => {
                let (Some(fd), Some(battle_id)) = (
                    body.get_u64(event::key::SOCKET_ID),
                    body.get_u64("battle_id"),
                ) else {
                    tracing::warn!("socket_move without socket_id or battle_id");
                    return;
                };
                self.on_socket_move(ctx, fd as RawFd, battle_id);
            }
            event::SOCKET_READ => {
                if let Some(fd) = body.get_u64(event::key::SOCKET_ID) {
                    self.on_socket_read(ctx, fd as RawFd);
                }
            }
            event::SOCKET_CLOSE => {
                if let Some(fd) = body.get_u64(event::key::SOCKET_ID) {
                    self.on_socket_close(ctx, fd as RawFd);
                }
            }
            _ => {}
        }
    }
}
