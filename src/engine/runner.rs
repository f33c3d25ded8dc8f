use crate::engine::context::RunnerContext;
use crate::error::{Error, Result, code};
use crate::service::signal::SignalService;
use std::hint::spin_loop;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// A single-threaded cooperative unit hosting a set of services.
///
/// `run()` executes on the calling thread; wrap in a [`ThreadRunner`] to
/// host the loop on a dedicated worker thread instead.
pub struct Runner {
    ctx: RunnerContext,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").finish_non_exhaustive()
    }
}

impl Runner {
    pub(crate) fn new(ctx: RunnerContext) -> Self {
        Self { ctx }
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Create services, tick the update loop until interrupted, then
    /// destroy services in reverse order.
    ///
    /// Returns the `Interrupted` error on a cooperative stop so callers can
    /// tell it apart from a create failure; the engine treats it as clean.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(runner = %self.ctx.name(), "runner starting");
        self.ctx.invoke_create()?;

        let mut idle: u32 = 0;
        loop {
            if self.interrupted() {
                break;
            }

            if self.ctx.invoke_update() {
                idle = 0;
            } else {
                idle = idle.saturating_add(1);
                if idle < 64 {
                    spin_loop();
                } else if idle < 256 {
                    thread::yield_now();
                } else {
                    thread::sleep(Duration::from_micros(200));
                }
            }
        }

        tracing::info!(runner = %self.ctx.name(), "runner interrupted, destroying services");
        self.ctx.invoke_destroy();
        Err(Error::new(code::INTERRUPTED))
    }

    /// True once the process was signalled (when a `SignalService` is
    /// collocated) or a `shutdown` event reached this runner.
    fn interrupted(&mut self) -> bool {
        if self.ctx.interrupted() {
            return true;
        }
        self.ctx
            .with_service::<SignalService, _>(|signal, _| signal.is_interrupted())
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn context_mut(&mut self) -> &mut RunnerContext {
        &mut self.ctx
    }
}

/// Shared handle over a runner hosted by a dedicated OS thread. The thread
/// is the sole toucher of the runner's services.
#[derive(Clone)]
pub struct ThreadRunner {
    inner: Arc<ThreadRunnerInner>,
}

struct ThreadRunnerInner {
    name: String,
    runner: Mutex<Option<Runner>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadRunner {
    pub(crate) fn new(runner: Runner) -> Self {
        Self {
            inner: Arc::new(ThreadRunnerInner {
                name: runner.name().to_string(),
                runner: Mutex::new(Some(runner)),
                join: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Spawn the worker thread. Fails if already started.
    pub fn start(&self) -> Result<()> {
        let mut join = self.inner.join.lock().unwrap_or_else(PoisonError::into_inner);
        if join.is_some() {
            return Err(Error::message(code::ALREADY_RUNNING, "thread already started"));
        }

        let mut runner = self
            .inner
            .runner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::message(code::ALREADY_RUNNING, "runner already consumed"))?;

        let name = self.inner.name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || match runner.run() {
                Err(err) if err.code() == code::INTERRUPTED => {
                    tracing::info!(runner = %name, "runner finished");
                }
                Ok(()) => {
                    tracing::info!(runner = %name, "runner finished");
                }
                Err(err) => {
                    tracing::error!(runner = %name, error = %err, "runner failed");
                }
            })
            .map_err(|err| {
                Error::message(code::FAILED, format!("failed to spawn runner thread: {err}"))
            })?;

        *join = Some(handle);
        Ok(())
    }

    /// Join the worker thread. Fails if not started. Joining waits for the
    /// runner's cooperative exit; deliver `shutdown` (or stop the engine)
    /// first.
    pub fn stop(&self) -> Result<()> {
        let handle = self
            .inner
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::message(code::NOT_RUNNING, "thread not started"))?;

        handle
            .join()
            .map_err(|_| Error::message(code::FAILED, "runner thread panicked"))
    }
}
