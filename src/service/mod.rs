pub use map::ServiceMap;

pub mod actor;
pub mod config;
pub mod io_event_loop;
pub mod map;
pub mod signal;
pub mod socket_router;
pub mod tcp_server;

use crate::engine::context::RunnerContext;
use crate::error::Result;
use crate::json::FlatJson;
use std::any::Any;
use std::fmt;

pub type ServiceKindId = u32;

/// Identity of a service type: a process-wide unique id plus a readable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKind {
    pub id: ServiceKindId,
    pub name: &'static str,
}

impl ServiceKind {
    pub const fn new(id: ServiceKindId, name: &'static str) -> Self {
        Self { id, name }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

/// Well-known service kinds. Application services must pick ids at or above
/// [`kind::USER_BASE`].
pub mod kind {
    use super::ServiceKind;

    pub const CONFIG: ServiceKind = ServiceKind::new(1, "config");
    pub const ACTOR: ServiceKind = ServiceKind::new(2, "actor");
    pub const SIGNAL: ServiceKind = ServiceKind::new(3, "signal");
    pub const IO_EVENT_LOOP: ServiceKind = ServiceKind::new(4, "io_event_loop");
    pub const TCP_SERVER: ServiceKind = ServiceKind::new(5, "tcp_server");
    pub const SOCKET_ROUTER: ServiceKind = ServiceKind::new(6, "socket_router");

    /// First kind id available to application services.
    pub const USER_BASE: u32 = 1024;
}

/// A named unit of state with a lifecycle, bound to exactly one runner.
///
/// Hooks are invoked by the owning runner only, always on the runner's
/// thread: `on_create` before any `on_update`; `on_destroy` at most once and
/// only if `on_create` succeeded; `on_event` for every local event delivered
/// to the runner, in topological service order.
pub trait Service: Any + Send {
    fn kind(&self) -> ServiceKind;

    /// Kind ids this service needs created before it.
    fn dependencies(&self) -> &[ServiceKindId] {
        &[]
    }

    fn on_create(&mut self, ctx: &mut RunnerContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn on_destroy(&mut self, ctx: &mut RunnerContext) {
        let _ = ctx;
    }

    fn on_update(&mut self, ctx: &mut RunnerContext) {
        let _ = ctx;
    }

    fn on_event(&mut self, ctx: &mut RunnerContext, event: &str, body: &FlatJson) {
        let _ = (ctx, event, body);
    }
}

/// Compile-time kind for typed lookup through
/// [`RunnerContext::with_service`].
pub trait Kinded {
    const KIND: ServiceKind;
}

pub type BoxedService = Box<dyn Service>;
