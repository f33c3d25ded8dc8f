use crate::engine::context::RunnerContext;
use crate::engine::runner::{Runner, ThreadRunner};
use crate::engine::{EngineHandle, EngineInner};
use crate::error::{Error, Result, code};
use crate::service::{BoxedService, ServiceMap};
use std::sync::{PoisonError, Weak};

/// Produces one service, deferred until the runner is built.
pub type ServiceFactory = Box<dyn FnOnce() -> Result<BoxedService> + Send>;

/// Accumulates a runner name and service factories, then assembles the
/// dependency-solved service map into a runner.
pub struct RunnerBuilder {
    name: String,
    engine: Weak<EngineInner>,
    factories: Vec<ServiceFactory>,
}

impl std::fmt::Debug for RunnerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RunnerBuilder {
    pub(crate) fn new(name: String, engine: Weak<EngineInner>) -> Self {
        Self {
            name,
            engine,
            factories: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_service<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Result<BoxedService> + Send + 'static,
    {
        self.factories.push(Box::new(factory));
        self
    }

    /// Build an owning runner for the calling thread. Fails before any
    /// `on_create` runs if a factory fails or the dependency graph is
    /// unsolvable.
    pub fn build_runner(self) -> Result<Runner> {
        if self.engine.upgrade().is_none() {
            return Err(Error::message(code::ENGINE_NOT_RUNNING, "engine is gone"));
        }

        let mut services = Vec::with_capacity(self.factories.len());
        for factory in self.factories {
            services.push(factory()?);
        }

        let map = ServiceMap::build(services)?;
        let ctx = RunnerContext::new(self.name, EngineHandle::new(self.engine), map);
        Ok(Runner::new(ctx))
    }

    /// Build a shared thread runner and register it with the engine so
    /// `Engine::stop` can join it.
    pub fn build_thread_runner(self) -> Result<ThreadRunner> {
        let engine = self.engine.clone();
        let runner = ThreadRunner::new(self.build_runner()?);

        if let Some(inner) = engine.upgrade() {
            inner
                .runners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(runner.clone());
        }
        Ok(runner)
    }
}
