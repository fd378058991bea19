//! Parses one text record of the participant list.
//!
//! Attending entries look like
//! `Jane Doe,(Host, me), Screen sharing, Computer audio unmuted,Video on`.
//! Section headers (`Waiting Room (3), expanded`) are recognized and skipped.
//! Anything else is a waiting-room entry whose whole text is the name.

use crate::participant::{
    AudioDevice, AudioStatus, Participant, ParticipantRole, ParticipantStatus, VideoStatus,
};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Which section a header introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    WaitingRoom,
    InMeeting,
}

/// Result of parsing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Header { section: Section, count: usize },
    Participant(Participant),
}

const JOINING_SUFFIX: &str = "Joining...";
const MASKED_PHONE: &str = "****";

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(Waiting Room|In the Meeting) \((\d+)\), (?:expanded|collapsed)$")
            .expect("header pattern is valid")
    })
}

fn attending_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(.*?),",
            r"(?:\(((?:Host|Co-host|Me)[^)]*)\),|)",
            r" (?:(Screen sharing), |)",
            r"(No Audio Connected|(?:Telephone|Computer audio) (?:un|)muted),",
            r"(No Video Connected|Video (?:on|off))",
            r"(?:,(.*)|)$"
        ))
        .expect("attending pattern is valid")
    })
}

/// Parse the header count out of `In the Meeting (N), ...` style text.
pub fn parse_header(text: &str) -> Option<(Section, usize)> {
    let caps = header_re().captures(text.trim())?;
    let section = match &caps[1] {
        "Waiting Room" => Section::WaitingRoom,
        _ => Section::InMeeting,
    };
    let count = caps[2].parse().ok()?;
    Some((section, count))
}

/// Parse one record. Returns `None` for blank text.
pub fn parse_entry(text: &str) -> Option<Entry> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some((section, count)) = parse_header(text) {
        return Some(Entry::Header { section, count });
    }

    let Some(caps) = attending_re().captures(text) else {
        return Some(Entry::Participant(parse_waiting(text)));
    };

    let mut p = Participant::new(caps[1].trim(), ParticipantStatus::Attending);

    if let Some(statuses) = caps.get(2) {
        for token in statuses.as_str().split(',').map(str::trim) {
            match token {
                "Host" => p.role = ParticipantRole::Host,
                "Co-host" => p.role = ParticipantRole::CoHost,
                "me" | "Me" => p.is_me = true,
                t if t.starts_with("participant ID:") => {}
                "" => {}
                other => warn!(
                    participant = %p.name,
                    token = %other,
                    "unrecognized participant status token"
                ),
            }
        }
    }

    p.is_sharing = caps.get(3).is_some();

    let audio = &caps[4];
    if audio == AudioStatus::Disconnected.as_str() {
        p.audio_status = AudioStatus::Disconnected;
    } else {
        p.audio_device = if audio.starts_with(AudioDevice::Computer.as_str()) {
            AudioDevice::Computer
        } else {
            AudioDevice::Telephone
        };
        p.audio_status = if audio.ends_with(AudioStatus::Unmuted.as_str()) {
            AudioStatus::Unmuted
        } else {
            AudioStatus::Muted
        };
    }

    p.video_status = VideoStatus::from_description(&caps[5]).unwrap_or(VideoStatus::Disconnected);

    Some(Entry::Participant(p))
}

fn parse_waiting(text: &str) -> Participant {
    let (name, status) = match text.strip_suffix(JOINING_SUFFIX) {
        Some(rest) => (rest.trim(), ParticipantStatus::Joining),
        None => (text, ParticipantStatus::Waiting),
    };
    let mut p = Participant::new(name, status);
    if name.contains(MASKED_PHONE) {
        p.audio_device = AudioDevice::Telephone;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn participant(text: &str) -> Participant {
        match parse_entry(text) {
            Some(Entry::Participant(p)) => p,
            other => panic!("expected participant, got {other:?}"),
        }
    }

    #[test]
    fn test_headers_are_recognized() {
        assert_eq!(
            parse_entry("Waiting Room (3), expanded"),
            Some(Entry::Header { section: Section::WaitingRoom, count: 3 })
        );
        assert_eq!(
            parse_entry("In the Meeting (12), collapsed"),
            Some(Entry::Header { section: Section::InMeeting, count: 12 })
        );
        assert_eq!(parse_entry("   "), None);
    }

    #[test]
    fn test_host_me_sharing() {
        let p =
            participant("Usher Bot,(Host, me), Screen sharing, Computer audio unmuted,Video on");
        assert_eq!(p.name, "Usher Bot");
        assert_eq!(p.status, ParticipantStatus::Attending);
        assert_eq!(p.role, ParticipantRole::Host);
        assert!(p.is_me);
        assert!(p.is_sharing);
        assert_eq!(p.audio_device, AudioDevice::Computer);
        assert_eq!(p.audio_status, AudioStatus::Unmuted);
        assert_eq!(p.video_status, VideoStatus::On);
    }

    #[test]
    fn test_plain_attendee_on_phone() {
        let p = participant("Jane Doe, Telephone muted,Video off");
        assert_eq!(p.name, "Jane Doe");
        assert_eq!(p.role, ParticipantRole::None);
        assert!(!p.is_me);
        assert_eq!(p.audio_device, AudioDevice::Telephone);
        assert_eq!(p.audio_status, AudioStatus::Muted);
        assert_eq!(p.video_status, VideoStatus::Off);
    }

    #[test]
    fn test_cohost_with_participant_id_and_extra() {
        let p = participant(concat!(
            "Bob,(Co-host, participant ID: 1234), ",
            "No Audio Connected,No Video Connected,raised hand",
        ));
        assert_eq!(p.role, ParticipantRole::CoHost);
        assert_eq!(p.audio_status, AudioStatus::Disconnected);
        assert_eq!(p.audio_device, AudioDevice::Unknown);
        assert_eq!(p.video_status, VideoStatus::Disconnected);
    }

    #[test]
    fn test_unmatched_text_is_waiting() {
        let p = participant("Some Guest");
        assert_eq!(p.status, ParticipantStatus::Waiting);
        assert_eq!(p.name, "Some Guest");
        assert_eq!(p.audio_device, AudioDevice::Unknown);
    }

    #[test]
    fn test_joining_suffix_stripped() {
        let p = participant("Some Guest Joining...");
        assert_eq!(p.status, ParticipantStatus::Joining);
        assert_eq!(p.name, "Some Guest");
    }

    #[test]
    fn test_masked_phone_number_is_telephone() {
        let p = participant("+1 555 ****1234");
        assert_eq!(p.status, ParticipantStatus::Waiting);
        assert_eq!(p.audio_device, AudioDevice::Telephone);
    }
}
