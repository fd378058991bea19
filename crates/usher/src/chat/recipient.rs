use serde::{Deserialize, Serialize};
use std::fmt;

/// Who a chat message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Individual(String),
    EveryoneInMeeting,
    EveryoneInWaitingRoom,
}

impl Recipient {
    pub const EVERYONE: &'static str = "Everyone";
    pub const EVERYONE_IN_MEETING: &'static str = "Everyone (in Meeting)";
    pub const EVERYONE_IN_WAITING_ROOM: &'static str = "Everyone (in Waiting Room)";

    /// Interpret a picker or transcript label. The bare `Everyone` label
    /// means everyone in the meeting.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            Self::EVERYONE | Self::EVERYONE_IN_MEETING => Recipient::EveryoneInMeeting,
            Self::EVERYONE_IN_WAITING_ROOM => Recipient::EveryoneInWaitingRoom,
            name => Recipient::Individual(name.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Recipient::Individual(name) => name,
            Recipient::EveryoneInMeeting => Self::EVERYONE_IN_MEETING,
            Recipient::EveryoneInWaitingRoom => Self::EVERYONE_IN_WAITING_ROOM,
        }
    }

    /// Picker labels that select this recipient.
    pub fn accepted_labels(&self) -> Vec<&str> {
        match self {
            Recipient::EveryoneInMeeting => vec![Self::EVERYONE_IN_MEETING, Self::EVERYONE],
            other => vec![other.label()],
        }
    }

    pub fn is_everyone(&self) -> bool {
        !matches!(self, Recipient::Individual(_))
    }

    pub fn individual(&self) -> Option<&str> {
        match self {
            Recipient::Individual(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl From<&str> for Recipient {
    fn from(label: &str) -> Self {
        Recipient::from_label(label)
    }
}
