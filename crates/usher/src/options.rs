//! Host-level meeting option toggles.

use crate::actions::verify_my_role;
use crate::error::SurfaceError;
use crate::events::{EventBus, SessionEvent};
use crate::participant::{described_enum, Participant, ParticipantRole};
use crate::surface::OptionsSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

described_enum! {
    pub enum MeetingOption {
        MuteParticipantsUponEntry => "Mute Participants upon Entry",
        AllowParticipantsToUnmuteThemselves => "Allow Participants to Unmute Themselves",
        AllowParticipantsToRenameThemselves => "Allow Participants to Rename Themselves",
        PlaySoundWhenSomeoneJoinsOrLeaves => "Play sound when someone joins or leaves",
        EnableWaitingRoom => "Enable Waiting Room",
        LockMeeting => "Lock Meeting",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleState {
    Off,
    On,
    Indeterminate,
}

impl fmt::Display for ToggleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToggleState::Off => "off",
            ToggleState::On => "on",
            ToggleState::Indeterminate => "indeterminate",
        })
    }
}

impl From<Option<bool>> for ToggleState {
    fn from(v: Option<bool>) -> Self {
        match v {
            Some(true) => ToggleState::On,
            Some(false) => ToggleState::Off,
            None => ToggleState::Indeterminate,
        }
    }
}

/// How often the options menu is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Once at startup, then only when a value is needed.
    OnDemand,
    EveryCall,
    Every(chrono::Duration),
}

impl RefreshPolicy {
    /// Interpret the configured delay: -1 (or any negative) is on demand,
    /// 0 polls every call, N polls at most once per N seconds.
    pub fn from_delay_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => RefreshPolicy::OnDemand,
            0 => RefreshPolicy::EveryCall,
            s => RefreshPolicy::Every(chrono::Duration::seconds(s)),
        }
    }
}

#[derive(Debug)]
pub struct MeetingOptions {
    states: HashMap<MeetingOption, ToggleState>,
    policy: RefreshPolicy,
    next_update: Option<DateTime<Utc>>,
    initialized: bool,
}

impl MeetingOptions {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            states: HashMap::new(),
            policy,
            next_update: None,
            initialized: false,
        }
    }

    pub fn set_policy(&mut self, policy: RefreshPolicy) {
        if self.policy != policy {
            self.policy = policy;
            self.next_update = None;
        }
    }

    /// Last known state; options never read are indeterminate.
    pub fn get(&self, option: MeetingOption) -> ToggleState {
        self.states
            .get(&option)
            .copied()
            .unwrap_or(ToggleState::Indeterminate)
    }

    /// Poll the options menu if the refresh policy allows it (or `force`).
    /// Returns true if the menu was read.
    pub fn update(
        &mut self,
        source: &mut dyn OptionsSource,
        bus: &EventBus,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<bool, SurfaceError> {
        if !force {
            match self.policy {
                RefreshPolicy::OnDemand if self.initialized => return Ok(false),
                RefreshPolicy::Every(delay) => {
                    if matches!(self.next_update, Some(next) if now < next) {
                        return Ok(false);
                    }
                    self.next_update = Some(now + delay);
                }
                _ => {}
            }
        }

        for (label, state) in source.read_options()? {
            if label.is_empty() {
                continue;
            }
            let Some(option) = MeetingOption::from_description(&label) else {
                debug!(label = %label, "ignoring unknown meeting option");
                continue;
            };
            let new = ToggleState::from(state);
            let old = self.states.get(&option).copied();
            if old != Some(new) {
                info!(option = %option, ?old, ?new, "meeting option changed");
                self.states.insert(option, new);
                bus.publish(SessionEvent::MeetingOptionChanged { option, old, new });
            }
        }

        self.initialized = true;
        Ok(true)
    }

    /// Drive an option to `state`, toggling only if it differs.
    pub fn set(
        &mut self,
        option: MeetingOption,
        state: ToggleState,
        me: Option<&Participant>,
        source: &mut dyn OptionsSource,
        bus: &EventBus,
        now: DateTime<Utc>,
    ) -> Result<bool, SurfaceError> {
        if !verify_my_role("set meeting option", me, ParticipantRole::Host) {
            return Ok(false);
        }

        if self.policy == RefreshPolicy::OnDemand {
            self.update(source, bus, now, true)?;
        }
        if self.get(option) == state {
            return Ok(true);
        }

        if !source.toggle(option.as_str())? {
            warn!(option = %option, "could not toggle meeting option");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::participant::ParticipantStatus;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeOptions {
        states: Vec<(String, Option<bool>)>,
        reads: usize,
        toggled: Vec<String>,
    }

    impl FakeOptions {
        fn with(states: &[(MeetingOption, bool)]) -> Self {
            Self {
                states: states
                    .iter()
                    .map(|(o, s)| (o.as_str().to_string(), Some(*s)))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl OptionsSource for FakeOptions {
        fn read_options(&mut self) -> Result<Vec<(String, Option<bool>)>, SurfaceError> {
            self.reads += 1;
            Ok(self.states.clone())
        }

        fn toggle(&mut self, label: &str) -> Result<bool, SurfaceError> {
            self.toggled.push(label.to_string());
            for (l, s) in &mut self.states {
                if l == label {
                    *s = s.map(|v| !v);
                }
            }
            Ok(true)
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn host() -> Participant {
        let mut me = Participant::new("UsherBot", ParticipantStatus::Attending);
        me.is_me = true;
        me.role = ParticipantRole::Host;
        me
    }

    fn bus_with_log() -> (EventBus, Arc<EventLog>) {
        let log = Arc::new(EventLog::new());
        let mut bus = EventBus::new();
        bus.subscribe(log.clone());
        (bus, log)
    }

    #[test]
    fn test_delay_policy() {
        assert_eq!(RefreshPolicy::from_delay_secs(-1), RefreshPolicy::OnDemand);
        assert_eq!(RefreshPolicy::from_delay_secs(0), RefreshPolicy::EveryCall);
        assert_eq!(
            RefreshPolicy::from_delay_secs(30),
            RefreshPolicy::Every(chrono::Duration::seconds(30))
        );
    }

    #[test]
    fn test_changes_fire_events_once() {
        let (bus, log) = bus_with_log();
        let mut src = FakeOptions::with(&[
            (MeetingOption::LockMeeting, false),
            (MeetingOption::EnableWaitingRoom, true),
        ]);
        src.states.push(("Some Future Option".into(), Some(true)));
        let mut opts = MeetingOptions::new(RefreshPolicy::EveryCall);

        assert!(opts.update(&mut src, &bus, t(0), false).unwrap());
        assert_eq!(log.len(), 2);
        assert_eq!(opts.get(MeetingOption::EnableWaitingRoom), ToggleState::On);
        assert_eq!(opts.get(MeetingOption::MuteParticipantsUponEntry), ToggleState::Indeterminate);

        opts.update(&mut src, &bus, t(1), false).unwrap();
        assert_eq!(log.len(), 2);

        src.states[0].1 = Some(true);
        opts.update(&mut src, &bus, t(2), false).unwrap();
        assert_eq!(
            log.events().last(),
            Some(&SessionEvent::MeetingOptionChanged {
                option: MeetingOption::LockMeeting,
                old: Some(ToggleState::Off),
                new: ToggleState::On,
            })
        );
    }

    #[test]
    fn test_refresh_policies() {
        let (bus, _log) = bus_with_log();
        let mut src = FakeOptions::with(&[(MeetingOption::LockMeeting, false)]);

        let mut opts = MeetingOptions::new(RefreshPolicy::OnDemand);
        assert!(opts.update(&mut src, &bus, t(0), false).unwrap());
        assert!(!opts.update(&mut src, &bus, t(100), false).unwrap());
        assert!(opts.update(&mut src, &bus, t(100), true).unwrap());

        let mut opts = MeetingOptions::new(RefreshPolicy::from_delay_secs(30));
        assert!(opts.update(&mut src, &bus, t(0), false).unwrap());
        assert!(!opts.update(&mut src, &bus, t(29), false).unwrap());
        assert!(opts.update(&mut src, &bus, t(30), false).unwrap());
    }

    #[test]
    fn test_set_toggles_only_when_different() {
        let (bus, _log) = bus_with_log();
        let mut src = FakeOptions::with(&[(MeetingOption::LockMeeting, false)]);
        let mut opts = MeetingOptions::new(RefreshPolicy::OnDemand);
        let me = host();

        assert!(opts
            .set(MeetingOption::LockMeeting, ToggleState::Off, Some(&me), &mut src, &bus, t(0))
            .unwrap());
        assert!(src.toggled.is_empty());

        assert!(opts
            .set(MeetingOption::LockMeeting, ToggleState::On, Some(&me), &mut src, &bus, t(1))
            .unwrap());
        assert_eq!(src.toggled, vec!["Lock Meeting".to_string()]);
    }

    #[test]
    fn test_set_requires_host() {
        let (bus, _log) = bus_with_log();
        let mut src = FakeOptions::with(&[(MeetingOption::LockMeeting, false)]);
        let mut opts = MeetingOptions::new(RefreshPolicy::OnDemand);
        let mut me = host();
        me.role = ParticipantRole::CoHost;

        assert!(!opts
            .set(MeetingOption::LockMeeting, ToggleState::On, Some(&me), &mut src, &bus, t(0))
            .unwrap());
        assert_eq!(src.reads, 0);
    }
}
