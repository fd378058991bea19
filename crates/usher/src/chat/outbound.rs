//! Outbound chat queue with at-least-once delivery.

use crate::chat::{normalize_text, Recipient};
use crate::error::ChatError;
use crate::participant::{AudioDevice, Roster};
use crate::surface::ChatSurface;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

pub const MAX_SEND_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY_SECS: i64 = 10;
const MAX_SELECT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: Recipient,
    pub text: String,
    /// Speak the text aloud once delivery is confirmed.
    pub speak: bool,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Messages waiting to be seen in the transcript.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, to: Recipient, text: impl Into<String>, speak: bool) {
        let text = text.into();
        debug!(to = %to, "queued chat message");
        self.messages.push_back(OutboundMessage {
            to,
            text,
            speak,
            attempts: 0,
            last_attempt: None,
        });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.messages.iter()
    }

    /// Attempt every message that is due.
    ///
    /// Sent messages stay queued until [`confirm`](Self::confirm) sees them.
    /// Only fatal surface errors are returned; everything else is logged.
    pub fn flush(
        &mut self,
        roster: &Roster,
        surface: &mut dyn ChatSurface,
        now: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        let mut pending: VecDeque<OutboundMessage> = std::mem::take(&mut self.messages);

        while let Some(mut msg) = pending.pop_front() {
            if msg.attempts >= MAX_SEND_ATTEMPTS {
                error!(to = %msg.to, text = %msg.text, "giving up on chat message; max attempts");
                continue;
            }

            if let Some(last) = msg.last_attempt {
                if now < last + chrono::Duration::seconds(RETRY_DELAY_SECS) {
                    debug!(to = %msg.to, "too soon to resend");
                    self.messages.push_back(msg);
                    continue;
                }
            }

            msg.attempts += 1;
            msg.last_attempt = Some(now);

            let result = check_reachable(roster, &msg.to)
                .and_then(|_| {
                    info!(
                        to = %msg.to,
                        attempt = msg.attempts,
                        text = %msg.text,
                        "sending chat message"
                    );
                    select_recipient(surface, &msg.to)
                })
                .and_then(|_| surface.send(&msg.text).map_err(ChatError::from));

            match result {
                Ok(()) => self.messages.push_back(msg),
                Err(e) if e.is_retryable() => {
                    warn!(
                        to = %msg.to,
                        attempt = msg.attempts,
                        error = %e,
                        "chat message not sent; will retry"
                    );
                    self.messages.push_back(msg);
                }
                Err(ChatError::Surface(e)) if e.is_fatal() => {
                    self.messages.push_back(msg);
                    self.messages.extend(pending);
                    return Err(ChatError::Surface(e));
                }
                Err(e) => {
                    warn!(to = %msg.to, text = %msg.text, error = %e, "giving up on chat message");
                }
            }
        }

        Ok(())
    }

    /// Remove queued messages confirmed by a self-authored transcript delta.
    pub fn confirm(&mut self, to: &Recipient, delta: &str) -> Vec<OutboundMessage> {
        let mut confirmed = Vec::new();
        self.messages.retain(|msg| {
            if msg.to == *to && delta.contains(&normalize_text(&msg.text)) {
                info!(to = %msg.to, attempts = msg.attempts, "chat message delivery confirmed");
                confirmed.push(msg.clone());
                false
            } else {
                true
            }
        });
        confirmed
    }
}

fn check_reachable(roster: &Roster, to: &Recipient) -> Result<(), ChatError> {
    let Some(name) = to.individual() else {
        return Ok(());
    };
    let Some(p) = roster.get(name) else {
        return Err(ChatError::RecipientUnreachable {
            name: name.to_string(),
            reason: "not in the meeting".to_string(),
        });
    };
    if p.audio_device == AudioDevice::Telephone {
        return Err(ChatError::RecipientUnreachable {
            name: name.to_string(),
            reason: "dial-in only".to_string(),
        });
    }
    if !p.is_attending() {
        return Err(ChatError::RecipientNotAttending(name.to_string()));
    }
    Ok(())
}

/// Make `target` the selected chat recipient, re-selecting only if needed.
pub fn select_recipient(
    surface: &mut dyn ChatSurface,
    target: &Recipient,
) -> Result<(), ChatError> {
    let accepted = target.accepted_labels();

    for attempt in 1..=MAX_SELECT_ATTEMPTS + 1 {
        let current = Recipient::from_label(&surface.selected_recipient()?);
        if current == *target {
            return Ok(());
        }
        if attempt > MAX_SELECT_ATTEMPTS {
            break;
        }

        debug!(attempt, from = %current, to = %target, "changing chat recipient");
        let choices = surface.recipient_choices()?;
        match choices.iter().find(|c| accepted.contains(&c.as_str())) {
            Some(label) => match surface.choose_recipient(label) {
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!(attempt, error = %e, "failed to choose chat recipient"),
                Ok(()) => {}
            },
            None => warn!(attempt, to = %target, "chat recipient not offered"),
        }
    }

    Err(ChatError::RecipientNotFound(target.label().to_string()))
}
