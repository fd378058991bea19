//! Participant model and the roster of everyone currently visible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declares a fieldless enum together with a static table mapping each
/// variant to its on-screen description, in both directions.
macro_rules! described_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $desc:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const DESCRIPTIONS: &'static [($name, &'static str)] = &[
                $(($name::$variant, $desc)),+
            ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $desc),+
                }
            }

            pub fn from_description(s: &str) -> Option<Self> {
                Self::DESCRIPTIONS
                    .iter()
                    .find(|(_, d)| *d == s)
                    .map(|(v, _)| *v)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

pub(crate) use described_enum;

described_enum! {
    /// Where a participant is in the join lifecycle.
    pub enum ParticipantStatus {
        Waiting => "Waiting",
        /// Admitted but not yet listed as attending.
        Joining => "Joining",
        Attending => "Attending",
        /// Only ever seen in leave events.
        Leaving => "Leaving",
    }
}

described_enum! {
    pub enum ParticipantRole {
        None => "None",
        CoHost => "Co-host",
        Host => "Host",
    }
}

described_enum! {
    pub enum AudioDevice {
        Unknown => "Unknown",
        Computer => "Computer audio",
        Telephone => "Telephone",
    }
}

described_enum! {
    pub enum AudioStatus {
        Disconnected => "No Audio Connected",
        Muted => "muted",
        Unmuted => "unmuted",
    }
}

described_enum! {
    pub enum VideoStatus {
        Disconnected => "No Video Connected",
        On => "Video on",
        Off => "Video off",
    }
}

impl ParticipantRole {
    /// Host satisfies a co-host requirement.
    pub fn satisfies(&self, required: ParticipantRole) -> bool {
        match required {
            ParticipantRole::None => true,
            ParticipantRole::CoHost => {
                matches!(self, ParticipantRole::CoHost | ParticipantRole::Host)
            }
            ParticipantRole::Host => *self == ParticipantRole::Host,
        }
    }
}

/// Opaque reference to a control, as handed out by the snapshot source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlRef(pub u64);

/// Non-owning handle to the on-screen control for a participant.
///
/// Stamped with the scan generation that produced it. Once a newer scan
/// starts the handle is stale and must be refreshed before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlHandle {
    pub generation: u64,
    pub control: ControlRef,
}

impl ControlHandle {
    pub fn new(generation: u64, control: ControlRef) -> Self {
        Self {
            generation,
            control,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

/// One participant as last observed.
#[derive(Debug, Clone)]
pub struct Participant {
    pub name: String,
    pub status: ParticipantStatus,
    pub role: ParticipantRole,
    pub audio_device: AudioDevice,
    pub audio_status: AudioStatus,
    pub video_status: VideoStatus,
    pub is_me: bool,
    pub is_sharing: bool,
    pub dt_waiting: Option<DateTime<Utc>>,
    pub dt_attending: Option<DateTime<Utc>>,
    /// When I clicked Admit for them, while the list may still show them waiting.
    pub dt_admitted: Option<DateTime<Utc>>,
    pub handle: Option<ControlHandle>,
}

impl Participant {
    pub fn new(name: impl Into<String>, status: ParticipantStatus) -> Self {
        Self {
            name: name.into(),
            status,
            role: ParticipantRole::None,
            audio_device: AudioDevice::Unknown,
            audio_status: AudioStatus::Disconnected,
            video_status: VideoStatus::Disconnected,
            is_me: false,
            is_sharing: false,
            dt_waiting: None,
            dt_attending: None,
            dt_admitted: None,
            handle: None,
        }
    }

    pub fn is_attending(&self) -> bool {
        self.status == ParticipantStatus::Attending
    }

    pub fn is_waiting(&self) -> bool {
        self.status == ParticipantStatus::Waiting
    }

    /// Compares the observable state, ignoring the control handle and the
    /// bookkeeping timestamps.
    pub fn same_state(&self, other: &Participant) -> bool {
        self.name == other.name
            && self.status == other.status
            && self.role == other.role
            && self.audio_device == other.audio_device
            && self.audio_status == other.audio_status
            && self.video_status == other.video_status
            && self.is_me == other.is_me
            && self.is_sharing == other.is_sharing
    }
}

/// Handles never take part in equality.
impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.same_state(other)
            && self.dt_waiting == other.dt_waiting
            && self.dt_attending == other.dt_attending
    }
}

impl Eq for Participant {}

/// Everyone visible in the participant list, keyed by display name.
///
/// Two participants with identical names collapse into one entry; the
/// later record wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    participants: BTreeMap<String, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Participant> {
        self.participants.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Participant> {
        self.participants.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.participants.contains_key(name)
    }

    /// Insert or replace; returns the previous entry under that name.
    pub fn insert(&mut self, participant: Participant) -> Option<Participant> {
        self.participants
            .insert(participant.name.clone(), participant)
    }

    pub fn remove(&mut self, name: &str) -> Option<Participant> {
        self.participants.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.participants.keys().map(String::as_str)
    }

    /// The bot's own participant entry.
    pub fn me(&self) -> Option<&Participant> {
        self.participants.values().find(|p| p.is_me)
    }

    pub fn count_with_status(&self, status: ParticipantStatus) -> usize {
        self.participants
            .values()
            .filter(|p| p.status == status)
            .count()
    }
}

impl FromIterator<Participant> for Roster {
    fn from_iter<I: IntoIterator<Item = Participant>>(iter: I) -> Self {
        let mut roster = Roster::new();
        for p in iter {
            roster.insert(p);
        }
        roster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_table_round_trips() {
        for (variant, desc) in VideoStatus::DESCRIPTIONS {
            assert_eq!(VideoStatus::from_description(desc), Some(*variant));
        }
        assert_eq!(ParticipantRole::from_description("Co-host"), Some(ParticipantRole::CoHost));
        assert_eq!(ParticipantRole::from_description("co-host"), None);
        assert_eq!(ParticipantStatus::Joining.to_string(), "Joining");
    }

    #[test]
    fn test_host_satisfies_cohost() {
        assert!(ParticipantRole::Host.satisfies(ParticipantRole::CoHost));
        assert!(ParticipantRole::CoHost.satisfies(ParticipantRole::CoHost));
        assert!(!ParticipantRole::CoHost.satisfies(ParticipantRole::Host));
        assert!(!ParticipantRole::None.satisfies(ParticipantRole::CoHost));
        assert!(ParticipantRole::None.satisfies(ParticipantRole::None));
    }

    #[test]
    fn test_equality_ignores_handle() {
        let mut a = Participant::new("Jane Doe", ParticipantStatus::Attending);
        let mut b = a.clone();
        a.handle = Some(ControlHandle::new(1, ControlRef(7)));
        b.handle = Some(ControlHandle::new(2, ControlRef(9)));
        assert_eq!(a, b);

        b.audio_status = AudioStatus::Muted;
        assert_ne!(a, b);
        assert!(!a.same_state(&b));
    }

    #[test]
    fn test_roster_me_and_duplicates() {
        let mut me = Participant::new("Usher", ParticipantStatus::Attending);
        me.is_me = true;
        let mut roster: Roster = vec![
            me,
            Participant::new("Bob", ParticipantStatus::Waiting),
        ]
        .into_iter()
        .collect();

        assert_eq!(roster.me().map(|p| p.name.as_str()), Some("Usher"));

        let replaced = roster.insert(Participant::new("Bob", ParticipantStatus::Attending));
        assert!(replaced.is_some());
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.count_with_status(ParticipantStatus::Attending), 2);
    }
}
