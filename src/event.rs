//! Event names and payload keys shared by the runtime services.
//!
//! These strings are a stable contract: they travel inside [`Mail`] across
//! runners and inside local event dispatch within a runner.
//!
//! [`Mail`]: crate::mailbox::Mail

/// Request to stop; broadcast on interruption and on engine stop.
pub const SHUTDOWN: &str = "shutdown";

/// A new connection was accepted locally. Payload: `{socket_id}`.
pub const SOCKET_ACCEPT: &str = "socket_accept";

/// Ownership transfer of a socket between runners. Payload: `{socket_id}`;
/// the recipient must register the fd with its own I/O event loop.
pub const SOCKET_MOVE: &str = "socket_move";

/// A registered fd is readable. Payload: `{socket_id}`.
pub const SOCKET_READ: &str = "socket_read";

/// A registered fd is writable. Payload: `{socket_id}`.
pub const SOCKET_WRITE: &str = "socket_write";

/// A registered fd hung up or reached EOF. Payload: `{socket_id}`.
pub const SOCKET_CLOSE: &str = "socket_close";

/// A registered fd reported an error condition.
/// Payload: `{socket_id, error_code, error_description}`.
pub const SOCKET_ERROR: &str = "socket_error";

/// Payload keys.
pub mod key {
    pub const SOCKET_ID: &str = "socket_id";
    pub const ERROR_CODE: &str = "error_code";
    pub const ERROR_DESCRIPTION: &str = "error_description";
    /// Merged into every mail body on delivery: the sending actor's name.
    pub const FROM: &str = "from";
}
