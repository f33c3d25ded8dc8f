use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One link in a cancellation chain: a flag plus an optional parent link.
struct Link {
    cancelled: AtomicBool,
    up: Option<Arc<Link>>,
}

/// Hierarchical cancellation token, cheap to clone and to poll.
///
/// Cancelling a token cancels every token derived from it; a child observes
/// its own flag and every ancestor's. The engine holds the root and cancels
/// it on stop, which aborts in-flight cooperative mailbox sends.
#[derive(Clone)]
pub struct CancelToken {
    link: Arc<Link>,
}

impl CancelToken {
    #[inline]
    pub fn new_root() -> Self {
        Self {
            link: Arc::new(Link {
                cancelled: AtomicBool::new(false),
                up: None,
            }),
        }
    }

    /// Derive a token that is cancelled whenever this one is.
    #[inline]
    pub fn new_child(&self) -> Self {
        Self {
            link: Arc::new(Link {
                cancelled: AtomicBool::new(false),
                up: Some(self.link.clone()),
            }),
        }
    }

    #[inline]
    pub fn cancel(&self) {
        self.link.cancelled.store(true, Ordering::Release);
    }

    /// Walk this link and its ancestors; true if any is cancelled.
    pub fn is_cancelled(&self) -> bool {
        let mut link = Some(&self.link);
        while let Some(current) = link {
            if current.cancelled.load(Ordering::Acquire) {
                return true;
            }
            link = current.up.as_ref();
        }
        false
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}
