use crate::json::FlatJson;
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;

/// Error codes used across the runtime. Application code may define its own
/// codes starting from [`code::USER_BASE`].
pub mod code {
    pub const FAILED: i32 = 1;
    pub const PROPAGATED: i32 = 2;
    pub const INTERRUPTED: i32 = 3;
    pub const MISSING_DEPENDENCY: i32 = 4;
    pub const DEPENDENCY_CYCLE: i32 = 5;
    pub const DUPLICATE_ACTOR: i32 = 6;
    pub const ACTOR_NOT_FOUND: i32 = 7;
    pub const SOCKET_CLOSED: i32 = 8;
    pub const ERRNO: i32 = 9;
    pub const MAILBOX_FULL: i32 = 10;
    pub const MAILBOX_CLOSED: i32 = 11;
    pub const ENGINE_NOT_RUNNING: i32 = 12;
    pub const ALREADY_RUNNING: i32 = 13;
    pub const NOT_RUNNING: i32 = 14;

    /// First code available to application services.
    pub const USER_BASE: i32 = 1024;

    pub(crate) fn name(code: i32) -> &'static str {
        match code {
            FAILED => "failed",
            PROPAGATED => "propagated",
            INTERRUPTED => "interrupted",
            MISSING_DEPENDENCY => "missing_dependency",
            DEPENDENCY_CYCLE => "dependency_cycle",
            DUPLICATE_ACTOR => "duplicate_actor",
            ACTOR_NOT_FOUND => "actor_not_found",
            SOCKET_CLOSED => "socket_closed",
            ERRNO => "errno",
            MAILBOX_FULL => "mailbox_full",
            MAILBOX_CLOSED => "mailbox_closed",
            ENGINE_NOT_RUNNING => "engine_not_running",
            ALREADY_RUNNING => "already_running",
            NOT_RUNNING => "not_running",
            _ => "user",
        }
    }
}

/// Structured runtime error: an integer code, a flat key-value detail map,
/// the source location it was raised at, and an optional cause chain.
///
/// Immutable after construction; the cause chain is acyclic by construction
/// since a cause can only be attached by value.
#[derive(Debug)]
pub struct Error {
    code: i32,
    details: FlatJson,
    location: &'static Location<'static>,
    cause: Option<Box<Error>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    #[track_caller]
    pub fn new(code: i32) -> Self {
        Self {
            code,
            details: FlatJson::new(),
            location: Location::caller(),
            cause: None,
        }
    }

    #[track_caller]
    pub fn with_details(code: i32, details: FlatJson) -> Self {
        Self {
            code,
            details,
            location: Location::caller(),
            cause: None,
        }
    }

    /// Shorthand for a code with a single `message` detail.
    #[track_caller]
    pub fn message(code: i32, message: impl Into<String>) -> Self {
        Self::with_details(code, FlatJson::new().set("message", message.into()))
    }

    /// Wrap a lower-level error without adding new information.
    #[track_caller]
    pub fn propagate(cause: Error) -> Self {
        Self::new(code::PROPAGATED).because(cause)
    }

    /// Capture the calling thread's `errno` together with a context message.
    #[track_caller]
    pub fn from_errno(context: impl Into<String>) -> Self {
        let os = std::io::Error::last_os_error();
        Self::with_details(
            code::ERRNO,
            FlatJson::new()
                .set("message", context.into())
                .set("errno", i64::from(os.raw_os_error().unwrap_or(0)))
                .set("description", os.to_string()),
        )
    }

    /// Attach a cause, keeping this error as the outermost link.
    pub fn because(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn details(&self) -> &FlatJson {
        &self.details
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// Walk the error and its causes outermost-first.
    pub fn chain(&self) -> impl Iterator<Item = &Error> {
        let mut next = Some(self);
        std::iter::from_fn(move || {
            let current = next?;
            next = current.cause();
            Some(current)
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.chain().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{{code: {}", code::name(err.code))?;
            if err.code >= code::USER_BASE {
                write!(f, "({})", err.code)?;
            }
            if !err.details.is_empty() {
                write!(f, ", details: {}", err.details)?;
            }
            write!(f, ", at: {}:{}}}", err.location.file(), err.location.line())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause().map(|c| c as &(dyn StdError + 'static))
    }
}

const ERR_MSG_QUEUE_FULL: &str = "mailbox is full";
const ERR_MSG_TRANSPORT_CLOSED: &str = "mailbox transport is closed";
const ERR_MSG_TIMEOUT: &str = "operation timed out";
const ERR_MSG_CANCELLED: &str = "operation cancelled";

/// Why a mailbox push failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SendFailReason {
    Timeout,
    Cancelled,
    Full,
    Closed,
}

impl fmt::Display for SendFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendFailReason::Timeout => write!(f, "{ERR_MSG_TIMEOUT}"),
            SendFailReason::Cancelled => write!(f, "{ERR_MSG_CANCELLED}"),
            SendFailReason::Full => write!(f, "{ERR_MSG_QUEUE_FULL}"),
            SendFailReason::Closed => write!(f, "{ERR_MSG_TRANSPORT_CLOSED}"),
        }
    }
}

/// Failed push; carries the value back so the caller can retry or drop it.
#[derive(Debug)]
pub struct SendError<T> {
    pub value: Option<T>,
    pub reason: SendFailReason,
}

impl<T> SendError<T> {
    pub fn full(value: Option<T>) -> Self {
        Self {
            value,
            reason: SendFailReason::Full,
        }
    }

    pub fn closed(value: Option<T>) -> Self {
        Self {
            value,
            reason: SendFailReason::Closed,
        }
    }

    pub fn cancelled(value: Option<T>) -> Self {
        Self {
            value,
            reason: SendFailReason::Cancelled,
        }
    }

    pub fn timeout(value: Option<T>) -> Self {
        Self {
            value,
            reason: SendFailReason::Timeout,
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl<T: fmt::Debug> StdError for SendError<T> {}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TryRecvError {
    Empty,
    Disconnected,
}
