use crate::config::RunnerConfig;
use crate::engine::actor_system::ActorSystem;
use crate::engine::context::RunnerContext;
use crate::error::{Error, Result, code};
use crate::event;
use crate::json::FlatJson;
use crate::mailbox::{BROADCAST, Mail, Mailbox};
use crate::service::{Kinded, Service, ServiceKind, kind};
use std::sync::Arc;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Bridges a runner into the actor system.
///
/// On create it registers the runner's name and keeps the mailbox; every
/// update it drains received mail and re-raises each as a local event with
/// the sender's name merged into the body under `from`.
pub struct ActorService {
    capacity: usize,
    max_drain: usize,
    name: String,
    actors: Option<Arc<ActorSystem>>,
    mailbox: Option<Mailbox>,
}

impl ActorService {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            max_drain: capacity,
            name: String::new(),
            actors: None,
            mailbox: None,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        let capacity = config.mailbox_capacity.unwrap_or(DEFAULT_MAILBOX_CAPACITY);
        Self {
            capacity,
            max_drain: config.max_mails_drain.unwrap_or(capacity),
            name: String::new(),
            actors: None,
            mailbox: None,
        }
    }

    /// The actor name this service registered under (the runner name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a mail with `from` set to this runner's name. A `to` of
    /// [`BROADCAST`] delivers to every other actor.
    ///
    /// Mails from one sender to one destination arrive in send order; no
    /// ordering is promised across destination pairs.
    pub fn send_mail(&self, to: &str, event: &str, body: FlatJson) -> Result<()> {
        let Some(actors) = &self.actors else {
            return Err(Error::message(code::FAILED, "actor service is not created"));
        };

        if to == BROADCAST {
            actors.broadcast(&self.name, event, &body);
            return Ok(());
        }
        actors.send(Mail::new(self.name.clone(), to, event, body))
    }
}

impl Default for ActorService {
    fn default() -> Self {
        Self::new()
    }
}

impl Kinded for ActorService {
    const KIND: ServiceKind = kind::ACTOR;
}

impl Service for ActorService {
    fn kind(&self) -> ServiceKind {
        kind::ACTOR
    }

    fn on_create(&mut self, ctx: &mut RunnerContext) -> Result<()> {
        let engine = ctx
            .engine()
            .ok_or_else(|| Error::message(code::ENGINE_NOT_RUNNING, "engine handle is gone"))?;
        let actors = engine.actors();
        let mailbox = actors.register(ctx.name(), self.capacity)?;

        self.name = ctx.name().to_string();
        self.actors = Some(actors);
        self.mailbox = Some(mailbox);
        Ok(())
    }

    fn on_update(&mut self, ctx: &mut RunnerContext) {
        let Some(mailbox) = &self.mailbox else {
            return;
        };

        for _ in 0..self.max_drain {
            match mailbox.receiver.try_recv() {
                Ok(mail) => {
                    let mut body = mail.body;
                    body.insert(event::key::FROM, mail.from);
                    ctx.raise_event(mail.event, body);
                }
                Err(_) => break,
            }
        }
    }

    fn on_destroy(&mut self, _ctx: &mut RunnerContext) {
        let Some(actors) = self.actors.take() else {
            return;
        };
        actors.deregister(&self.name);

        if let Some(mailbox) = self.mailbox.take() {
            let leftover = mailbox.receiver.drain(usize::MAX);
            if !leftover.is_empty() {
                tracing::warn!(
                    runner = %self.name,
                    count = leftover.len(),
                    "discarding undelivered mail"
                );
            }
        }
    }
}
