//! Automation policy - which behaviors the bot performs and how it paces them.
//!
//! These values seed the running session. Admin chat commands may flip flags
//! at runtime; a config file change reloads them from disk.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Set of enabled bot behaviors.
///
/// Serialized as a list of names (`["admit_known", "process_chat"]`), with
/// `"all"` as shorthand for every flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct AutomationFlags(u32);

impl AutomationFlags {
    pub const NONE: Self = Self(0);
    pub const RENAME_MYSELF: Self = Self(1);
    pub const RECLAIM_HOST: Self = Self(2);
    pub const PROCESS_PARTICIPANTS: Self = Self(4);
    pub const PROCESS_CHAT: Self = Self(8);
    pub const CO_HOST_KNOWN: Self = Self(16);
    pub const ADMIT_KNOWN: Self = Self(32);
    pub const ADMIT_OTHERS: Self = Self(64);
    pub const CONVERSE: Self = Self(128);
    pub const SPEAK: Self = Self(256);
    pub const UNMUTE_MYSELF: Self = Self(512);
    pub const ALL: Self = Self(1023);

    const NAMES: &'static [(&'static str, AutomationFlags)] = &[
        ("rename_myself", Self::RENAME_MYSELF),
        ("reclaim_host", Self::RECLAIM_HOST),
        ("process_participants", Self::PROCESS_PARTICIPANTS),
        ("process_chat", Self::PROCESS_CHAT),
        ("co_host_known", Self::CO_HOST_KNOWN),
        ("admit_known", Self::ADMIT_KNOWN),
        ("admit_others", Self::ADMIT_OTHERS),
        ("converse", Self::CONVERSE),
        ("speak", Self::SPEAK),
        ("unmute_myself", Self::UNMUTE_MYSELF),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag in `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Look up a single flag by its config name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name == "all" {
            return Some(Self::ALL);
        }
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, flag)| *flag)
    }

    /// Names of the flags that are set, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(n, _)| *n)
            .collect()
    }
}

impl std::ops::BitOr for AutomationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for AutomationFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for AutomationFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}

impl TryFrom<Vec<String>> for AutomationFlags {
    type Error = String;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        let mut flags = Self::NONE;
        for name in &names {
            match Self::from_name(name) {
                Some(flag) => flags.insert(flag),
                None => return Err(format!("unknown automation flag: {name}")),
            }
        }
        Ok(flags)
    }
}

impl From<AutomationFlags> for Vec<String> {
    fn from(flags: AutomationFlags) -> Self {
        flags.names().into_iter().map(String::from).collect()
    }
}

/// Automation policy and admission pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Enabled behaviors.
    /// Default: all
    #[serde(default)]
    pub flags: AutomationFlags,

    /// How long an unknown participant sits in the waiting room before
    /// being admitted.
    /// Default: 30
    #[serde(default = "AutomationConfig::default_unknown_participant_wait_secs")]
    pub unknown_participant_wait_secs: u64,

    /// Minimum spacing between admissions of unknown participants.
    /// Default: 15
    #[serde(default = "AutomationConfig::default_unknown_participant_throttle_secs")]
    pub unknown_participant_throttle_secs: u64,

    /// Display name the bot renames itself to.
    /// Default: UsherBot
    #[serde(default = "AutomationConfig::default_my_participant_name")]
    pub my_participant_name: String,

    /// Broadcast to the waiting room while anyone is waiting. Empty disables.
    #[serde(default)]
    pub waiting_room_announcement_message: String,

    /// Minimum spacing between waiting room announcements. 0 disables.
    /// Default: 60
    #[serde(default = "AutomationConfig::default_waiting_room_announcement_delay_secs")]
    pub waiting_room_announcement_delay_secs: u64,

    /// Skip all processing while set.
    /// Default: false
    #[serde(default)]
    pub paused: bool,
}

impl AutomationConfig {
    fn default_unknown_participant_wait_secs() -> u64 {
        30
    }

    fn default_unknown_participant_throttle_secs() -> u64 {
        15
    }

    fn default_my_participant_name() -> String {
        "UsherBot".to_string()
    }

    fn default_waiting_room_announcement_delay_secs() -> u64 {
        60
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            flags: AutomationFlags::default(),
            unknown_participant_wait_secs: Self::default_unknown_participant_wait_secs(),
            unknown_participant_throttle_secs: Self::default_unknown_participant_throttle_secs(),
            my_participant_name: Self::default_my_participant_name(),
            waiting_room_announcement_message: String::new(),
            waiting_room_announcement_delay_secs:
                Self::default_waiting_room_announcement_delay_secs(),
            paused: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_contains_every_flag() {
        for (_, flag) in AutomationFlags::NAMES {
            assert!(AutomationFlags::ALL.contains(*flag));
        }
        assert_eq!(AutomationFlags::ALL.names().len(), 10);
    }

    #[test]
    fn test_flags_from_names() {
        let flags = AutomationFlags::try_from(vec![
            "admit_known".to_string(),
            "Process_Chat".to_string(),
        ])
        .unwrap();
        assert!(flags.contains(AutomationFlags::ADMIT_KNOWN));
        assert!(flags.contains(AutomationFlags::PROCESS_CHAT));
        assert!(!flags.contains(AutomationFlags::ADMIT_OTHERS));
        assert_eq!(flags.bits(), 32 | 8);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let err = AutomationFlags::try_from(vec!["teleport".to_string()]).unwrap_err();
        assert!(err.contains("teleport"));
    }

    #[test]
    fn test_insert_remove() {
        let mut flags = AutomationFlags::NONE;
        flags.insert(AutomationFlags::ADMIT_OTHERS | AutomationFlags::ADMIT_KNOWN);
        flags.remove(AutomationFlags::ADMIT_OTHERS);
        assert_eq!(flags, AutomationFlags::ADMIT_KNOWN);
        assert!(flags.intersects(AutomationFlags::ADMIT_KNOWN | AutomationFlags::SPEAK));
        assert_eq!(AutomationFlags::NONE.to_string(), "none");
    }
}
