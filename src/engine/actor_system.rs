use crate::error::{Error, Result, SendFailReason, code};
use crate::json::FlatJson;
use crate::mailbox::{Mail, MailSender, Mailbox};
use crate::utils::CancelToken;
use ahash::AHashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Upper bound on how long one mail push may wait on a full mailbox before
/// it fails; keeps a slow consumer from stalling a sender's tick forever.
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Process-wide registry from actor name to mailbox sender.
///
/// Reads dominate: every send snapshots a sender under the read lock, drops
/// the lock, and only then pushes. No push ever holds the registry lock.
pub struct ActorSystem {
    registry: RwLock<AHashMap<String, MailSender>>,
    cancel: CancelToken,
}

impl ActorSystem {
    pub(crate) fn new() -> Self {
        Self {
            registry: RwLock::new(AHashMap::new()),
            cancel: CancelToken::new_root(),
        }
    }

    /// Claim a name and hand back the mailbox. Rejects duplicates
    /// atomically and rejects registration once the engine is stopping.
    pub fn register(&self, name: &str, capacity: usize) -> Result<Mailbox> {
        if self.cancel.is_cancelled() {
            return Err(Error::message(code::ENGINE_NOT_RUNNING, "engine is stopping"));
        }

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.contains_key(name) {
            return Err(Error::with_details(
                code::DUPLICATE_ACTOR,
                FlatJson::new().set("actor", name),
            ));
        }

        let mailbox = Mailbox::bounded(capacity);
        registry.insert(name.to_string(), mailbox.sender.clone());
        Ok(mailbox)
    }

    /// Idempotent: removing an unknown name is a no-op.
    pub fn deregister(&self, name: &str) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.contains_key(name)
    }

    pub fn len(&self) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route one mail to its destination. Fails with `ActorNotFound` for an
    /// unknown name, `MailboxFull` when the push times out, and
    /// `Interrupted` once the engine is stopping.
    pub fn send(&self, mail: Mail) -> Result<()> {
        let sender = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry.get(&mail.to).cloned()
        };
        let Some(sender) = sender else {
            return Err(Error::with_details(
                code::ACTOR_NOT_FOUND,
                FlatJson::new().set("actor", mail.to),
            ));
        };

        sender
            .send(mail, &self.cancel, Some(SEND_TIMEOUT))
            .map_err(|err| match err.reason {
                SendFailReason::Full | SendFailReason::Timeout => {
                    Error::message(code::MAILBOX_FULL, "mailbox push timed out")
                }
                SendFailReason::Closed => Error::new(code::MAILBOX_CLOSED),
                SendFailReason::Cancelled => {
                    Error::message(code::INTERRUPTED, "engine is stopping")
                }
            })
    }

    /// Deliver `event` to every registered actor except `from`, cloning the
    /// body per recipient. Failed deliveries are logged, not propagated.
    pub fn broadcast(&self, from: &str, event: &str, body: &FlatJson) {
        let targets: Vec<(String, MailSender)> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .iter()
                .filter(|(name, _)| name.as_str() != from)
                .map(|(name, sender)| (name.clone(), sender.clone()))
                .collect()
        };

        for (name, sender) in targets {
            let mail = Mail::new(from, name.clone(), event, body.clone());
            if let Err(err) = sender.send(mail, &self.cancel, Some(SEND_TIMEOUT)) {
                tracing::warn!(actor = %name, event, error = %err, "broadcast delivery failed");
            }
        }
    }

    /// Reject all further sends and registrations.
    pub(crate) fn seal(&self) {
        self.cancel.cancel();
    }

    /// Drop every registration, returning the names that were still live.
    pub(crate) fn clear(&self) -> Vec<String> {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.drain().map(|(name, _)| name).collect()
    }
}
