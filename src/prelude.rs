pub use crate::config::RunnerConfig;
pub use crate::engine::{Engine, Runner, RunnerBuilder, RunnerContext, ThreadRunner};
pub use crate::error::{Error, Result, code};
pub use crate::event;
pub use crate::json::{FlatJson, Scalar};
pub use crate::mailbox::{BROADCAST, Mail, Mailbox};
pub use crate::net::epoll::AddOptions;
pub use crate::service::actor::ActorService;
pub use crate::service::config::ConfigService;
pub use crate::service::io_event_loop::IoEventLoopService;
pub use crate::service::signal::SignalService;
pub use crate::service::socket_router::SocketRouterService;
pub use crate::service::tcp_server::TcpServerService;
pub use crate::service::{
    BoxedService, Kinded, Service, ServiceKind, ServiceKindId, ServiceMap, kind,
};
pub use crate::utils::{CancelToken, DeferStack};
