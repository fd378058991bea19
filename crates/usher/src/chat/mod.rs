//! Chat delivery and transcript scanning.
//!
//! Sending a message is never acknowledged by the UI. A message stays queued
//! until the transcript shows it coming back from "Me" to the same
//! recipient.

pub mod outbound;
pub mod recipient;
pub mod transcript;

pub use outbound::{OutboundMessage, OutboundQueue, MAX_SEND_ATTEMPTS, RETRY_DELAY_SECS};
pub use recipient::Recipient;
pub use transcript::TranscriptScanner;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference to one message control in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle(pub u64);

/// A message (or the newly appended part of one) seen in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: String,
    pub to: Recipient,
    pub is_private: bool,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl ChatMessage {
    pub fn is_from_me(&self) -> bool {
        self.from == "Me"
    }

    pub fn is_to_me(&self) -> bool {
        matches!(&self.to, Recipient::Individual(name) if name.eq_ignore_ascii_case("me"))
    }

    /// One message per line of text.
    pub fn split_lines(&self) -> Vec<ChatMessage> {
        self.text
            .lines()
            .map(|line| ChatMessage {
                text: line.to_string(),
                ..self.clone()
            })
            .collect()
    }
}

/// Trim every line, drop blank ones, and join with `\n`.
///
/// Applied to both outgoing text and transcript bodies before comparing.
pub fn normalize_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
