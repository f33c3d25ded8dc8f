use crate::error::{SendError, TryRecvError};
use crate::json::FlatJson;
use crate::utils::CancelToken;
use crossbeam::channel as cbchan;
use crossbeam::utils::Backoff;
use std::thread;
use std::time::{Duration, Instant};

/// Destination sentinel: deliver to every registered actor except the sender.
pub const BROADCAST: &str = "*";

/// An addressed message exchanged between runners.
#[derive(Debug, Clone)]
pub struct Mail {
    pub from: String,
    pub to: String,
    pub event: String,
    pub body: FlatJson,
}

impl Mail {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        event: impl Into<String>,
        body: FlatJson,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            event: event.into(),
            body,
        }
    }
}

/// The two endpoints of one runner's mail channel. The sender half is
/// cloneable and safe to push from any thread; the receiver half belongs to
/// exactly one consumer.
#[derive(Debug)]
pub struct Mailbox {
    pub sender: MailSender,
    pub receiver: MailReceiver,
}

impl Mailbox {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = cbchan::bounded::<Mail>(capacity);
        Self {
            sender: MailSender { tx },
            receiver: MailReceiver { rx },
        }
    }

    pub fn unbounded() -> Self {
        let (tx, rx) = cbchan::unbounded::<Mail>();
        Self {
            sender: MailSender { tx },
            receiver: MailReceiver { rx },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailSender {
    tx: cbchan::Sender<Mail>,
}

impl MailSender {
    /// Non-blocking push.
    #[inline]
    pub fn try_send(&self, mail: Mail) -> Result<(), SendError<Mail>> {
        match self.tx.try_send(mail) {
            Ok(()) => Ok(()),
            Err(cbchan::TrySendError::Full(v)) => Err(SendError::full(Some(v))),
            Err(cbchan::TrySendError::Disconnected(v)) => Err(SendError::closed(Some(v))),
        }
    }

    /// Cooperative push: spins, then yields, then naps until the mailbox has
    /// room, the token is cancelled, or the timeout elapses.
    pub fn send(
        &self,
        mut mail: Mail,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<(), SendError<Mail>> {
        let start = Instant::now();
        let backoff = Backoff::new();
        let mut spins: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SendError::cancelled(Some(mail)));
            }
            if let Some(t) = timeout
                && start.elapsed() >= t
            {
                return Err(SendError::timeout(Some(mail)));
            }

            match self.tx.try_send(mail) {
                Ok(()) => return Ok(()),
                Err(cbchan::TrySendError::Full(v)) => {
                    mail = v;
                    spins = spins.saturating_add(1);
                    if spins < 64 {
                        backoff.spin();
                    } else if spins < 256 {
                        backoff.snooze();
                    } else {
                        thread::sleep(Duration::from_micros(2));
                    }
                }
                Err(cbchan::TrySendError::Disconnected(v)) => {
                    return Err(SendError::closed(Some(v)));
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct MailReceiver {
    rx: cbchan::Receiver<Mail>,
}

impl MailReceiver {
    #[inline]
    pub fn try_recv(&self) -> Result<Mail, TryRecvError> {
        match self.rx.try_recv() {
            Ok(v) => Ok(v),
            Err(cbchan::TryRecvError::Empty) => Err(TryRecvError::Empty),
            Err(cbchan::TryRecvError::Disconnected) => Err(TryRecvError::Disconnected),
        }
    }

    /// Drain up to `max` mails without blocking.
    pub fn drain(&self, max: usize) -> Vec<Mail> {
        let mut out = Vec::new();
        for _ in 0..max {
            match self.try_recv() {
                Ok(mail) => out.push(mail),
                Err(_) => break,
            }
        }
        out
    }
}
