//! Producer status events.

use serde::{Deserialize, Serialize};

/// Kind of a status event emitted on the producer's status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Purely informational
    Info,
    /// Purely informational, but worth surfacing
    Warning,
    /// Producer failed; the consumer stops acquisition
    Error,
    /// Producer exhausted its source; normal terminal state
    Completed,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusKind::Info => write!(f, "INFO"),
            StatusKind::Warning => write!(f, "WARNING"),
            StatusKind::Error => write!(f, "ERROR"),
            StatusKind::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Typed status message with a free-text payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub kind: StatusKind,
    #[serde(default)]
    pub text: String,
}

impl StatusEvent {
    pub fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, text)
    }

    pub fn completed(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Completed, text)
    }

    /// Whether this event ends the acquisition session.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StatusKind::Error | StatusKind::Completed)
    }
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.text)
    }
}
