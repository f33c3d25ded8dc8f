use serde::{Deserialize, Serialize};

/// Per-runner mailbox knobs. Small and explicit; `None` means default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Max mails queued for this runner (`None` = 1024).
    pub mailbox_capacity: Option<usize>,

    /// Max mails drained per update tick (`None` = mailbox capacity).
    pub max_mails_drain: Option<usize>,
}
