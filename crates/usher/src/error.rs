use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by the UI surface adapters.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("control not found: {0}")]
    ControlNotFound(String),

    #[error("control handle for {0} belongs to an earlier scan")]
    StaleHandle(String),

    #[error("timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    /// The driven application is gone or its window cannot be reached.
    #[error("UI surface unavailable: {0}")]
    Unavailable(String),

    #[error("UI surface error: {0}")]
    Other(String),
}

impl SurfaceError {
    /// Errors that should stop the run loop rather than end a single tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SurfaceError::Unavailable(_))
    }
}

/// Chat delivery and transcript failures.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("could not select chat recipient {0}")]
    RecipientNotFound(String),

    #[error("recipient {name} cannot receive messages: {reason}")]
    RecipientUnreachable { name: String, reason: String },

    #[error("recipient {0} is not attending yet")]
    RecipientNotAttending(String),

    #[error("unrecognized transcript message: {0:?}")]
    TranscriptFormat(String),

    #[error("transcript message changed without appending (was {previous:?}, now {current:?})")]
    TranscriptDiverged { previous: String, current: String },

    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

impl ChatError {
    /// Delivery failures that leave the message queued for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::RecipientNotAttending(_) | ChatError::RecipientNotFound(_)
        ) || matches!(self, ChatError::Surface(e) if !e.is_fatal())
    }
}

/// Errors surfaced from a tick of the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("failed to read allow-list {path}: {source}")]
    AllowList {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Surface(e) => e.is_fatal(),
            SessionError::Chat(ChatError::Surface(e)) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_fatal() {
        assert!(SurfaceError::Unavailable("gone".into()).is_fatal());
        assert!(!SurfaceError::ControlNotFound("Mute".into()).is_fatal());
        assert!(!SurfaceError::Timeout { what: "menu".into(), waited_ms: 10 }.is_fatal());

        let wrapped = SessionError::from(ChatError::from(SurfaceError::Unavailable("x".into())));
        assert!(wrapped.is_fatal());
    }

    #[test]
    fn test_chat_retryable() {
        assert!(ChatError::RecipientNotAttending("Jane".into()).is_retryable());
        assert!(!ChatError::RecipientUnreachable {
            name: "Bob".into(),
            reason: "dial-in".into()
        }
        .is_retryable());
    }
}
