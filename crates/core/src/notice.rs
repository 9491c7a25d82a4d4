//! User-facing notices.
//!
//! Errors never reach the presentation layer raw. They are classified and
//! turned into a [`Notice`] carrying a short message and a stable code.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ErrorClass, SyncError};

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Informational, e.g. "already completed".
    Info,
    /// Something the user asked for did not happen, nothing is broken.
    Warning,
    /// The action failed.
    Error,
}

/// A message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human readable text.
    pub message: String,
}

impl Notice {
    /// Informational notice.
    pub fn info(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            code,
            message: message.into(),
        }
    }

    /// Warning notice.
    pub fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            code,
            message: message.into(),
        }
    }

    /// Error notice.
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            code,
            message: message.into(),
        }
    }

    /// Notice for a classified error.
    #[must_use]
    pub fn from_error(err: &SyncError) -> Self {
        let message = err.user_message();
        match (err.class(), err) {
            (ErrorClass::Constraint, _) => Self::info("already_done", message),
            (ErrorClass::NotFound, _) => Self::warning("unavailable", message),
            (ErrorClass::Authorization, _) => Self::error("reauthenticate", message),
            (ErrorClass::Invalid, _) => Self::warning("invalid", message),
            (ErrorClass::Transient, SyncError::Timeout(_)) => Self::error("timeout", message),
            (ErrorClass::Transient, _) => Self::error("network", message),
        }
    }

    /// Whether the notice asks the user to sign in again.
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        self.code == "reauthenticate"
    }
}

/// Broadcasts notices to any number of presentation consumers.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    /// Create a notifier buffering up to `capacity` notices per consumer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every notice emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Emit a notice. Dropped silently when nobody listens.
    pub fn notify(&self, notice: Notice) {
        tracing::debug!(level = ?notice.level, code = notice.code, "Notice");
        if self.tx.send(notice).is_err() {
            tracing::trace!("No notice consumers");
        }
    }

    /// Emit the notice for a classified error.
    pub fn notify_error(&self, err: &SyncError) {
        self.notify(Notice::from_error(err));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::row::Table;
    use std::time::Duration;

    #[test]
    fn test_notice_levels_follow_error_class() {
        let constraint = Notice::from_error(&SyncError::Constraint {
            table: Table::ChallengeCompletion,
            key: "actor_id,challenge_id".into(),
        });
        assert_eq!(constraint.level, NoticeLevel::Info);

        let expired = Notice::from_error(&SyncError::SessionExpired);
        assert_eq!(expired.level, NoticeLevel::Error);
        assert!(expired.requires_reauthentication());

        let timeout = Notice::from_error(&SyncError::Timeout(Duration::from_secs(10)));
        assert_eq!(timeout.code, "timeout");

        let network = Notice::from_error(&SyncError::Transient("reset".into()));
        assert_eq!(network.code, "network");
        assert!(!network.message.contains("reset"));
    }

    #[tokio::test]
    async fn test_notifier_broadcasts() {
        let notifier = Notifier::new(4);
        let mut rx = notifier.subscribe();

        notifier.notify(Notice::info("already_done", "Already completed"));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.message, "Already completed");
    }

    #[test]
    fn test_notify_without_consumers_is_silent() {
        let notifier = Notifier::default();
        notifier.notify(Notice::warning("unavailable", "gone"));
    }
}
