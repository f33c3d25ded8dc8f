use crate::engine::{Engine, EngineHandle};
use crate::event;
use crate::json::FlatJson;
use crate::service::{Kinded, Service, ServiceMap};
use std::any::Any;
use std::collections::VecDeque;

/// Per-runner shared state: the runner's name, its service map, the local
/// event queue and a weak handle back to the engine.
///
/// A context is only ever touched by its runner's thread. Hooks receive
/// `&mut RunnerContext` and reach collocated services through
/// [`with_service`](Self::with_service); the executing service's slot is
/// empty for the duration of its hook, so self-re-entry cannot compile into
/// anything worse than a `None`.
pub struct RunnerContext {
    name: String,
    engine: EngineHandle,
    services: ServiceMap,
    pending: VecDeque<(String, FlatJson)>,
    interrupted: bool,
    busy: bool,
}

impl RunnerContext {
    pub(crate) fn new(name: String, engine: EngineHandle, services: ServiceMap) -> Self {
        Self {
            name,
            engine,
            services,
            pending: VecDeque::new(),
            interrupted: false,
            busy: false,
        }
    }

    /// The runner's name; also its actor name once an `ActorService`
    /// registers.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upgrade the weak engine handle. `None` once the engine is gone.
    pub fn engine(&self) -> Option<Engine> {
        self.engine.upgrade()
    }

    pub fn services(&self) -> &ServiceMap {
        &self.services
    }

    /// Queue a local event for synchronous delivery to every collocated
    /// service once the current hook returns. Delivery order is queue order.
    pub fn raise_event(&mut self, event: impl Into<String>, body: FlatJson) {
        self.busy = true;
        self.pending.push_back((event.into(), body));
    }

    /// Mark the current tick as having done work, defeating idle backoff.
    pub fn mark_busy(&mut self) {
        self.busy = true;
    }

    /// Borrow a collocated service for the duration of `f`. Returns `None`
    /// if the service is absent or currently executing a hook of its own.
    pub fn with_service<S, R>(
        &mut self,
        f: impl FnOnce(&mut S, &mut RunnerContext) -> R,
    ) -> Option<R>
    where
        S: Service + Kinded,
    {
        let slot = self.services.slot_of(S::KIND.id)?;
        let mut boxed = self.services.take(slot)?;
        let any: &mut dyn Any = boxed.as_mut();
        let result = any.downcast_mut::<S>().map(|service| f(service, self));
        self.services.put_back(slot, boxed);
        result
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Create services in dependency order. On the first failure the
    /// already-created prefix is destroyed in reverse before the error
    /// surfaces.
    pub(crate) fn invoke_create(&mut self) -> crate::error::Result<()> {
        for slot in 0..self.services.len() {
            let kind = self.services.kind_at(slot);
            let Some(mut service) = self.services.take(slot) else {
                continue;
            };
            let result = service.on_create(self);
            self.services.put_back(slot, service);
            match result {
                Ok(()) => self.services.set_created(slot + 1),
                Err(err) => {
                    tracing::error!(
                        runner = %self.name,
                        service = %kind,
                        error = %err,
                        "service create failed"
                    );
                    self.invoke_destroy();
                    return Err(err);
                }
            }
        }
        self.drain_pending();
        Ok(())
    }

    /// One cooperative tick: update every service in dependency order,
    /// delivering events raised by each hook before the next service runs.
    /// Returns whether any service reported work.
    pub(crate) fn invoke_update(&mut self) -> bool {
        self.busy = false;
        for slot in 0..self.services.len() {
            let Some(mut service) = self.services.take(slot) else {
                continue;
            };
            service.on_update(self);
            self.services.put_back(slot, service);
            self.drain_pending();
        }
        self.busy
    }

    /// Destroy created services in reverse dependency order. Best-effort;
    /// runs each `on_destroy` at most once.
    pub(crate) fn invoke_destroy(&mut self) {
        for slot in (0..self.services.created()).rev() {
            let Some(mut service) = self.services.take(slot) else {
                continue;
            };
            service.on_destroy(self);
            self.services.put_back(slot, service);
        }
        self.services.set_created(0);
    }

    /// Deliver one event to every service in dependency order. A `shutdown`
    /// event additionally latches the interrupted flag so the runner loop
    /// exits after the current tick.
    pub(crate) fn invoke_event(&mut self, event: &str, body: &FlatJson) {
        if event == event::SHUTDOWN {
            self.interrupted = true;
        }
        for slot in 0..self.services.len() {
            let Some(mut service) = self.services.take(slot) else {
                continue;
            };
            service.on_event(self, event, body);
            self.services.put_back(slot, service);
        }
    }

    fn drain_pending(&mut self) {
        while let Some((event, body)) = self.pending.pop_front() {
            self.invoke_event(&event, &body);
        }
    }
}
