//! Synchronous in-process event bus.
//!
//! Subscribers are called in registration order on the thread that
//! publishes, before `publish` returns.

use crate::chat::{ChatMessage, Recipient};
use crate::options::{MeetingOption, ToggleState};
use crate::participant::{Participant, ParticipantStatus};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Everything the session reports to the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A participant appeared in (or moved back to) the waiting room.
    ParticipantJoinedWaiting {
        participant: Participant,
        previous: Option<ParticipantStatus>,
    },
    ParticipantJoinedMeeting {
        participant: Participant,
        previous: Option<ParticipantStatus>,
    },
    /// Reported with status `Leaving`.
    ParticipantLeft { participant: Participant },
    /// Status changes other than arriving in the waiting room or meeting.
    ParticipantStatusChanged {
        participant: Participant,
        previous: Option<ParticipantStatus>,
    },
    /// Same status, other attributes changed (mute, video, role, ...).
    ParticipantUpdated { old: Participant, new: Participant },
    ChatMessageReceived(ChatMessage),
    ChatMessageConfirmed { to: Recipient, text: String },
    MeetingOptionChanged {
        option: MeetingOption,
        old: Option<ToggleState>,
        new: ToggleState,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::ParticipantJoinedWaiting { .. } => "participant_joined_waiting",
            SessionEvent::ParticipantJoinedMeeting { .. } => "participant_joined_meeting",
            SessionEvent::ParticipantLeft { .. } => "participant_left",
            SessionEvent::ParticipantStatusChanged { .. } => "participant_status_changed",
            SessionEvent::ParticipantUpdated { .. } => "participant_updated",
            SessionEvent::ChatMessageReceived(_) => "chat_message_received",
            SessionEvent::ChatMessageConfirmed { .. } => "chat_message_confirmed",
            SessionEvent::MeetingOptionChanged { .. } => "meeting_option_changed",
        }
    }

    /// The participant this event is about, if any.
    pub fn participant(&self) -> Option<&Participant> {
        match self {
            SessionEvent::ParticipantJoinedWaiting { participant, .. }
            | SessionEvent::ParticipantJoinedMeeting { participant, .. }
            | SessionEvent::ParticipantLeft { participant }
            | SessionEvent::ParticipantStatusChanged { participant, .. } => Some(participant),
            SessionEvent::ParticipantUpdated { new, .. } => Some(new),
            _ => None,
        }
    }
}

pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&self, event: SessionEvent) {
        debug!(event = event.kind(), subscribers = self.subscribers.len(), "publish");
        for subscriber in &self.subscribers {
            subscriber.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Keeps every event it sees. Handy for tests and for replay summaries.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSubscriber for EventLog {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Writes a one-line summary of every event to the log.
#[derive(Debug, Default)]
pub struct LogSubscriber;

impl EventSubscriber for LogSubscriber {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::ParticipantJoinedWaiting { participant, .. } => {
                info!(participant = %participant.name, "waiting room")
            }
            SessionEvent::ParticipantJoinedMeeting { participant, .. } => {
                info!(participant = %participant.name, role = %participant.role, "joined meeting")
            }
            SessionEvent::ParticipantLeft { participant } => {
                info!(participant = %participant.name, "left")
            }
            SessionEvent::ParticipantStatusChanged { participant, previous } => info!(
                participant = %participant.name,
                from = ?previous,
                to = %participant.status,
                "status changed"
            ),
            SessionEvent::ParticipantUpdated { new, .. } => debug!(
                participant = %new.name,
                audio = %new.audio_status,
                video = %new.video_status,
                "participant updated"
            ),
            SessionEvent::ChatMessageReceived(msg) => info!(
                from = %msg.from,
                to = %msg.to,
                private = msg.is_private,
                "chat: {}",
                msg.text
            ),
            SessionEvent::ChatMessageConfirmed { to, text } => {
                info!(to = %to, "delivered: {}", text)
            }
            SessionEvent::MeetingOptionChanged { option, old, new } => {
                info!(option = %option, old = ?old, new = %new, "meeting option changed")
            }
        }
    }
}
