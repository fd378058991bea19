//! Waiting-room admission, co-host promotion and self-care.

use crate::actions::{self, ActionKind, ActionQueue, ParticipantAction};
use crate::allow_list::AllowList;
use crate::chat::{OutboundQueue, Recipient};
use crate::error::SurfaceError;
use crate::participant::{AudioStatus, ParticipantRole, ParticipantStatus, Roster};
use crate::surface::ActionExecutor;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::{info, warn};
use usherconf::{AutomationConfig, AutomationFlags};

/// What one admission pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdmissionReport {
    pub admitted: Vec<String>,
    pub promotions_queued: Vec<String>,
    pub announced: bool,
}

#[derive(Debug, Default)]
pub struct AdmissionController {
    /// Shared cooldown for unknown admissions.
    next_admission: Option<DateTime<Utc>>,
    /// INFO lines already logged, so each is shown once per wait.
    logged: HashSet<String>,
    last_announcement: Option<DateTime<Utc>>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_admission(&self) -> Option<DateTime<Utc>> {
        self.next_admission
    }

    /// Queue fixes for my own participant entry.
    pub fn self_care(
        &self,
        roster: &Roster,
        config: &AutomationConfig,
        queue: &mut ActionQueue,
        now: DateTime<Utc>,
    ) {
        let Some(me) = roster.me() else {
            return;
        };
        let flags = config.flags;

        if flags.contains(AutomationFlags::RECLAIM_HOST) && me.role != ParticipantRole::Host {
            warn!(role = %me.role, "I am not host; host must be reclaimed manually");
        }

        if flags.contains(AutomationFlags::RENAME_MYSELF)
            && !config.my_participant_name.is_empty()
            && me.name != config.my_participant_name
            && !queue.has_pending_kind(&me.name, ActionKind::Rename)
        {
            info!(from = %me.name, to = %config.my_participant_name, "renaming myself");
            queue.queue(
                &me.name,
                ParticipantAction::Rename(config.my_participant_name.clone()),
                now,
            );
        }

        if flags.contains(AutomationFlags::UNMUTE_MYSELF)
            && me.audio_status == AudioStatus::Muted
            && !queue.has_pending_kind(&me.name, ActionKind::Unmute)
        {
            info!("unmuting myself");
            queue.queue(&me.name, ParticipantAction::Unmute, now);
        }
    }

    /// Admit one waiting participant right now and mark them joining.
    pub fn admit_now(
        &mut self,
        roster: &mut Roster,
        name: &str,
        executor: &mut dyn ActionExecutor,
        now: DateTime<Utc>,
    ) -> Result<bool, SurfaceError> {
        let me = roster.me().cloned();
        let Some(target) = roster.get(name) else {
            return Ok(false);
        };
        if !actions::admit(target, me.as_ref(), executor)? {
            return Ok(false);
        }
        if let Some(p) = roster.get_mut(name) {
            p.status = ParticipantStatus::Joining;
            p.dt_admitted = Some(now);
        }
        Ok(true)
    }

    /// One pass over the roster.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        roster: &mut Roster,
        config: &AutomationConfig,
        allow: &AllowList,
        queue: &mut ActionQueue,
        outbound: &mut OutboundQueue,
        executor: &mut dyn ActionExecutor,
        now: DateTime<Utc>,
    ) -> Result<AdmissionReport, SurfaceError> {
        let flags = config.flags;
        let admit_known = flags.contains(AutomationFlags::ADMIT_KNOWN);
        let admit_others = flags.contains(AutomationFlags::ADMIT_OTHERS);
        let i_am_host = roster.me().is_some_and(|me| me.role == ParticipantRole::Host);
        let wait = Duration::seconds(config.unknown_participant_wait_secs as i64);
        let throttle = Duration::seconds(config.unknown_participant_throttle_secs as i64);

        let mut report = AdmissionReport::default();
        let mut anyone_waiting = false;

        type Candidate = (String, ParticipantStatus, ParticipantRole, Option<DateTime<Utc>>);
        let candidates: Vec<Candidate> = roster
            .iter()
            .filter(|p| !p.is_me)
            .map(|p| (p.name.clone(), p.status, p.role, p.dt_waiting))
            .collect();

        for (name, status, role, dt_waiting) in candidates {
            match status {
                ParticipantStatus::Waiting => {
                    anyone_waiting = true;
                    if !(admit_known || admit_others) {
                        continue;
                    }

                    if allow.is_known(&name) {
                        if admit_known {
                            info!(participant = %name, "admitting known participant");
                            if self.admit_now(roster, &name, executor, now)? {
                                report.admitted.push(name);
                            }
                        }
                        continue;
                    }

                    if !admit_others {
                        continue;
                    }

                    let waited_until = dt_waiting.unwrap_or(now) + wait;
                    let when = match self.next_admission {
                        Some(next) if next > waited_until => next,
                        _ => waited_until,
                    };
                    let pending = format!("{name}: waiting for admission");
                    if now < when {
                        if self.logged.insert(pending) {
                            info!(
                                participant = %name,
                                admit_at = %when,
                                "unknown participant waiting"
                            );
                        }
                        continue;
                    }

                    let admitting = format!("{name}: admitting");
                    if self.logged.insert(admitting.clone()) {
                        info!(
                            participant = %name,
                            "unknown participant waiting room time reached; admitting"
                        );
                    }

                    if self.admit_now(roster, &name, executor, now)? {
                        self.logged.remove(&pending);
                        self.logged.remove(&admitting);
                        self.next_admission = Some(now + throttle);
                        report.admitted.push(name);
                    }
                }
                ParticipantStatus::Attending => {
                    if flags.contains(AutomationFlags::CO_HOST_KNOWN)
                        && role == ParticipantRole::None
                        && i_am_host
                        && allow.is_admin(&name)
                    {
                        info!(participant = %name, "promoting to co-host");
                        let promote = ParticipantAction::Promote(ParticipantRole::CoHost);
                        if queue.queue(&name, promote, now) {
                            report.promotions_queued.push(name);
                        }
                    }
                }
                _ => {}
            }
        }

        if anyone_waiting {
            report.announced = self.announce(config, outbound, now);
        }

        Ok(report)
    }

    fn announce(
        &mut self,
        config: &AutomationConfig,
        outbound: &mut OutboundQueue,
        now: DateTime<Utc>,
    ) -> bool {
        let message = config.waiting_room_announcement_message.trim();
        if message.is_empty() || config.waiting_room_announcement_delay_secs == 0 {
            return false;
        }
        let delay = Duration::seconds(config.waiting_room_announcement_delay_secs as i64);
        if matches!(self.last_announcement, Some(last) if now < last + delay) {
            return false;
        }
        outbound.enqueue(Recipient::EveryoneInWaitingRoom, message, false);
        self.last_announcement = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::ScriptedExecutor;
    use crate::participant::Participant;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn me(role: ParticipantRole) -> Participant {
        let mut me = Participant::new("UsherBot", ParticipantStatus::Attending);
        me.is_me = true;
        me.role = role;
        me
    }

    fn waiting(name: &str, since: DateTime<Utc>) -> Participant {
        let mut p = Participant::new(name, ParticipantStatus::Waiting);
        p.dt_waiting = Some(since);
        p
    }

    fn config(flags: AutomationFlags) -> AutomationConfig {
        AutomationConfig {
            flags,
            ..AutomationConfig::default()
        }
    }

    #[test]
    fn test_known_admitted_immediately() {
        let mut roster: Roster = [me(ParticipantRole::Host), waiting("Jane Doe (Usher)", t(0))]
            .into_iter()
            .collect();
        let allow = AllowList::parse("jane doe^\n");
        let mut ctl = AdmissionController::new();
        let mut exec = ScriptedExecutor::default();

        let report = ctl
            .evaluate(
                &mut roster,
                &config(AutomationFlags::ADMIT_KNOWN),
                &allow,
                &mut ActionQueue::new(),
                &mut OutboundQueue::new(),
                &mut exec,
                t(1),
            )
            .unwrap();

        assert_eq!(report.admitted, vec!["Jane Doe (Usher)".to_string()]);
        assert_eq!(exec.calls, vec![("Jane Doe (Usher)".to_string(), "Admit".to_string())]);
        assert_eq!(
            roster.get("Jane Doe (Usher)").map(|p| p.status),
            Some(ParticipantStatus::Joining)
        );
    }

    #[test]
    fn test_unknown_admission_throttled() {
        let mut roster: Roster = [
            me(ParticipantRole::CoHost),
            waiting("Alice", t(0)),
            waiting("Bob", t(0)),
        ]
        .into_iter()
        .collect();
        let cfg = config(AutomationFlags::ADMIT_OTHERS);
        let allow = AllowList::new();
        let mut ctl = AdmissionController::new();
        let mut exec = ScriptedExecutor::default();
        let mut queue = ActionQueue::new();
        let mut outbound = OutboundQueue::new();

        let mut run = |roster: &mut Roster, now| {
            ctl.evaluate(roster, &cfg, &allow, &mut queue, &mut outbound, &mut exec, now)
                .unwrap()
                .admitted
        };

        // Before the wait period nobody is admitted
        assert!(run(&mut roster, t(10)).is_empty());

        // Both eligible at 30s, only one gets in
        assert_eq!(run(&mut roster, t(30)), vec!["Alice".to_string()]);
        assert!(run(&mut roster, t(40)).is_empty());
        assert_eq!(run(&mut roster, t(45)), vec!["Bob".to_string()]);
    }

    #[test]
    fn test_nothing_without_flags() {
        let mut roster: Roster = [me(ParticipantRole::Host), waiting("Alice", t(0))]
            .into_iter()
            .collect();
        let mut exec = ScriptedExecutor::default();
        let report = AdmissionController::new()
            .evaluate(
                &mut roster,
                &config(AutomationFlags::NONE),
                &AllowList::parse("alice"),
                &mut ActionQueue::new(),
                &mut OutboundQueue::new(),
                &mut exec,
                t(100),
            )
            .unwrap();
        assert!(report.admitted.is_empty());
        assert!(exec.calls.is_empty());
    }

    #[test]
    fn test_admin_promotion_queued_when_host() {
        let mut roster: Roster = [
            me(ParticipantRole::Host),
            Participant::new("Jane Doe", ParticipantStatus::Attending),
            Participant::new("Bob", ParticipantStatus::Attending),
        ]
        .into_iter()
        .collect();
        let allow = AllowList::parse("jane doe^\nbob\n");
        let mut queue = ActionQueue::new();

        let report = AdmissionController::new()
            .evaluate(
                &mut roster,
                &config(AutomationFlags::CO_HOST_KNOWN),
                &allow,
                &mut queue,
                &mut OutboundQueue::new(),
                &mut ScriptedExecutor::default(),
                t(0),
            )
            .unwrap();

        assert_eq!(report.promotions_queued, vec!["Jane Doe".to_string()]);
        assert!(queue.has_pending("Jane Doe"));
        assert!(!queue.has_pending("Bob"));
    }

    #[test]
    fn test_waiting_room_announcement_once_per_window() {
        let mut roster: Roster = [me(ParticipantRole::Host), waiting("Alice", t(0))]
            .into_iter()
            .collect();
        let cfg = AutomationConfig {
            flags: AutomationFlags::NONE,
            waiting_room_announcement_message: "The host will let you in shortly".into(),
            waiting_room_announcement_delay_secs: 60,
            ..AutomationConfig::default()
        };
        let mut ctl = AdmissionController::new();
        let mut outbound = OutboundQueue::new();
        let mut exec = ScriptedExecutor::default();
        let mut queue = ActionQueue::new();

        for secs in [0, 30, 59, 60] {
            let allow = AllowList::new();
            ctl.evaluate(&mut roster, &cfg, &allow, &mut queue, &mut outbound, &mut exec, t(secs))
                .unwrap();
        }
        assert_eq!(outbound.len(), 2);
        assert!(outbound.iter().all(|m| m.to == Recipient::EveryoneInWaitingRoom));
    }

    #[test]
    fn test_self_care_queues_rename_and_unmute() {
        let mut bot = me(ParticipantRole::Host);
        bot.name = "Zoom User".into();
        bot.audio_status = AudioStatus::Muted;
        let roster: Roster = std::iter::once(bot).collect();
        let mut queue = ActionQueue::new();

        AdmissionController::new().self_care(
            &roster,
            &config(AutomationFlags::ALL),
            &mut queue,
            t(0),
        );

        let kinds: Vec<String> = queue
            .pending_for("Zoom User")
            .map(|a| a.action.to_string())
            .collect();
        assert_eq!(kinds.len(), 2);
    }

    #[test]
    fn test_self_care_checks_pending_by_kind() {
        let mut bot = me(ParticipantRole::Host);
        bot.name = "Zoom User".into();
        bot.audio_status = AudioStatus::Muted;
        let roster: Roster = std::iter::once(bot).collect();
        let mut queue = ActionQueue::new();
        queue.queue("Zoom User", ParticipantAction::Mute, t(0));
        let ctl = AdmissionController::new();

        // Another pending action does not hold back the rename
        ctl.self_care(&roster, &config(AutomationFlags::ALL), &mut queue, t(0));
        ctl.self_care(&roster, &config(AutomationFlags::ALL), &mut queue, t(5));

        let kinds: Vec<ActionKind> =
            queue.pending_for("Zoom User").map(|a| a.action.kind()).collect();
        assert_eq!(kinds, vec![ActionKind::Mute, ActionKind::Rename, ActionKind::Unmute]);
    }

    #[test]
    fn test_unknown_wait_logged_once_until_admitted() {
        let mut roster: Roster = [me(ParticipantRole::Host), waiting("Alice", t(0))]
            .into_iter()
            .collect();
        let cfg = config(AutomationFlags::ADMIT_OTHERS);
        let allow = AllowList::new();
        let mut ctl = AdmissionController::new();
        let mut exec = ScriptedExecutor::default();
        let mut queue = ActionQueue::new();
        let mut outbound = OutboundQueue::new();

        for secs in [5, 10, 20] {
            ctl.evaluate(&mut roster, &cfg, &allow, &mut queue, &mut outbound, &mut exec, t(secs))
                .unwrap();
            assert_eq!(ctl.logged, HashSet::from(["Alice: waiting for admission".to_string()]));
        }

        let report = ctl
            .evaluate(&mut roster, &cfg, &allow, &mut queue, &mut outbound, &mut exec, t(30))
            .unwrap();
        assert_eq!(report.admitted, vec!["Alice".to_string()]);
        assert!(ctl.logged.is_empty());
    }
}
