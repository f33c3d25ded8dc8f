pub use actor_system::ActorSystem;
pub use builder::{RunnerBuilder, ServiceFactory};
pub use context::RunnerContext;
pub use runner::{Runner, ThreadRunner};

pub mod actor_system;
pub mod builder;
pub mod context;
pub mod runner;

use crate::error::{Error, Result, code};
use crate::event;
use crate::json::FlatJson;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Actor name used as the broadcast source for engine-initiated shutdown.
const ENGINE_NAME: &str = "engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Running,
    Stopped,
}

pub(crate) struct EngineInner {
    state: Mutex<EngineState>,
    actors: Arc<ActorSystem>,
    pub(crate) runners: Mutex<Vec<ThreadRunner>>,
}

/// Top-level lifecycle owner: the actor system plus every thread runner it
/// has handed out. Cheap to clone; runners keep only weak handles back.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState::Idle),
                actors: Arc::new(ActorSystem::new()),
                runners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Mark the engine running. One-shot: a stopped engine cannot restart.
    pub fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            EngineState::Idle => {
                *state = EngineState::Running;
                tracing::info!("engine started");
                Ok(())
            }
            EngineState::Running => Err(Error::new(code::ALREADY_RUNNING)),
            EngineState::Stopped => {
                Err(Error::message(code::NOT_RUNNING, "engine cannot be restarted"))
            }
        }
    }

    /// Cooperative teardown: broadcast `shutdown`, join thread runners in
    /// reverse creation order, then reject and clear the actor registry.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != EngineState::Running {
                return Err(Error::new(code::NOT_RUNNING));
            }
            *state = EngineState::Stopped;
        }

        tracing::info!("engine stopping");
        self.inner
            .actors
            .broadcast(ENGINE_NAME, event::SHUTDOWN, &FlatJson::new());

        let runners = {
            let mut runners = self.inner.runners.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *runners)
        };
        for runner in runners.iter().rev() {
            match runner.stop() {
                Ok(()) => {}
                Err(err) if err.code() == code::NOT_RUNNING => {}
                Err(err) => {
                    tracing::error!(runner = %runner.name(), error = %err, "failed to stop runner");
                }
            }
        }

        self.inner.actors.seal();
        for name in self.inner.actors.clear() {
            tracing::warn!(actor = %name, "actor still registered at engine stop");
        }

        tracing::info!("engine stopped");
        Ok(())
    }

    /// Hand out a builder for a named runner. Rejects unless running.
    pub fn create_runner_builder(&self, name: impl Into<String>) -> Result<RunnerBuilder> {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != EngineState::Running {
            return Err(Error::new(code::ENGINE_NOT_RUNNING));
        }
        Ok(RunnerBuilder::new(name.into(), Arc::downgrade(&self.inner)))
    }

    /// The process-wide actor registry.
    pub fn actors(&self) -> Arc<ActorSystem> {
        self.inner.actors.clone()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Weak child-to-parent handle stored in runner contexts; never owning, so
/// engine → runner → context → engine cannot form a cycle.
pub(crate) struct EngineHandle {
    inner: Weak<EngineInner>,
}

impl EngineHandle {
    pub(crate) fn new(inner: Weak<EngineInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}
