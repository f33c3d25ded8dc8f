use crate::engine::context::RunnerContext;
use crate::error::{Error, Result, code};
use crate::json::FlatJson;
use crate::mailbox::BROADCAST;
use crate::service::actor::ActorService;
use crate::service::{Kinded, Service, ServiceKind, ServiceKindId, kind};
use crate::event;
use signal_hook::SigId;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::{flag, low_level};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Process-global interruption flag. Signal handlers may only flip an
/// atomic: no logging, no allocation on that path.
pub(crate) fn interrupt_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

/// Watches for termination signals and announces a cooperative shutdown.
///
/// On the first update after interruption it broadcasts `shutdown` exactly
/// once through the collocated [`ActorService`]; the hosting runner's loop
/// reads [`is_interrupted`](Self::is_interrupted) and exits after the tick.
pub struct SignalService {
    sig_ids: Vec<SigId>,
    announced: bool,
}

impl SignalService {
    pub fn new() -> Self {
        Self {
            sig_ids: Vec::new(),
            announced: false,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        interrupt_flag().load(Ordering::Relaxed)
    }
}

impl Default for SignalService {
    fn default() -> Self {
        Self::new()
    }
}

impl Kinded for SignalService {
    const KIND: ServiceKind = kind::SIGNAL;
}

impl Service for SignalService {
    fn kind(&self) -> ServiceKind {
        kind::SIGNAL
    }

    fn dependencies(&self) -> &[ServiceKindId] {
        const DEPS: &[ServiceKindId] = &[kind::ACTOR.id];
        DEPS
    }

    fn on_create(&mut self, _ctx: &mut RunnerContext) -> Result<()> {
        interrupt_flag().store(false, Ordering::Relaxed);
        self.announced = false;

        for sig in TERM_SIGNALS {
            let id = flag::register(*sig, interrupt_flag().clone()).map_err(|err| {
                Error::message(
                    code::FAILED,
                    format!("failed to register handler for signal {sig}: {err}"),
                )
            })?;
            self.sig_ids.push(id);
        }
        Ok(())
    }

    fn on_update(&mut self, ctx: &mut RunnerContext) {
        if self.announced || !self.is_interrupted() {
            return;
        }

        tracing::warn!("termination signal received, broadcasting shutdown");
        let sent = ctx.with_service::<ActorService, _>(|actor, _| {
            actor.send_mail(BROADCAST, event::SHUTDOWN, FlatJson::new())
        });
        match sent {
            Some(Ok(())) => self.announced = true,
            Some(Err(err)) => {
                tracing::error!(error = %err, "failed to broadcast shutdown");
            }
            None => {
                tracing::error!("actor service unavailable, cannot broadcast shutdown");
            }
        }
    }

    fn on_destroy(&mut self, _ctx: &mut RunnerContext) {
        for id in self.sig_ids.drain(..) {
            low_level::unregister(id);
        }
    }
}
