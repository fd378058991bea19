//! Per-participant queue of pending actions.
//!
//! Actions are only attempted when their target has just been observed, so
//! the control handle is fresh. Each target's queue runs strictly in order:
//! a failure halts that target until it is next seen, and an action that
//! fails three times is discarded.

use crate::error::SurfaceError;
use crate::surface::ActionExecutor;
use crate::participant::{Participant, ParticipantRole, ParticipantStatus};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

pub const MAX_ACTION_ATTEMPTS: u32 = 3;

/// Something to do to one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantAction {
    Mute,
    /// Unmutes me, or asks anyone else to unmute.
    Unmute,
    Rename(String),
    Promote(ParticipantRole),
    Demote,
}

/// Action identity for de-duplication; arguments are not compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Mute,
    Unmute,
    Rename,
    Promote,
    Demote,
}

impl ParticipantAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            ParticipantAction::Mute => ActionKind::Mute,
            ParticipantAction::Unmute => ActionKind::Unmute,
            ParticipantAction::Rename(_) => ActionKind::Rename,
            ParticipantAction::Promote(_) => ActionKind::Promote,
            ParticipantAction::Demote => ActionKind::Demote,
        }
    }
}

impl std::fmt::Display for ParticipantAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantAction::Mute => write!(f, "mute"),
            ParticipantAction::Unmute => write!(f, "unmute"),
            ParticipantAction::Rename(name) => write!(f, "rename to {name:?}"),
            ParticipantAction::Promote(role) => write!(f, "promote to {role}"),
            ParticipantAction::Demote => write!(f, "demote"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedAction {
    pub action: ParticipantAction,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
}

fn more_options(target: &Participant) -> String {
    format!("More options for {}", target.name)
}

/// Check that I hold at least `required`. Logs and returns false if not.
pub(crate) fn verify_my_role(
    what: &str,
    me: Option<&Participant>,
    required: ParticipantRole,
) -> bool {
    match me {
        None => {
            warn!(action = what, "no participant entry for myself");
            false
        }
        Some(me) if !me.role.satisfies(required) => {
            warn!(action = what, my_role = %me.role, required = %required, "insufficient role");
            false
        }
        Some(_) => true,
    }
}

fn require_attending(what: &str, target: &Participant) -> bool {
    if target.status != ParticipantStatus::Attending {
        warn!(
            action = what,
            participant = %target.name,
            status = %target.status,
            "participant is not attending"
        );
        return false;
    }
    true
}

/// Perform one action against a freshly observed participant.
///
/// Returns `Ok(false)` when a precondition does not hold or a control could
/// not be driven; only fatal surface errors are returned as `Err`.
pub fn execute(
    action: &ParticipantAction,
    target: &Participant,
    me: Option<&Participant>,
    executor: &mut dyn ActionExecutor,
) -> Result<bool, SurfaceError> {
    let result = match action {
        ParticipantAction::Mute => {
            if !verify_my_role("mute", me, ParticipantRole::CoHost) {
                return Ok(false);
            }
            executor.invoke(target, "Mute")
        }
        ParticipantAction::Unmute => {
            if target.is_me {
                executor.invoke(target, "Unmute")
            } else {
                if !verify_my_role("unmute", me, ParticipantRole::CoHost) {
                    return Ok(false);
                }
                executor.invoke(target, "Ask to Unmute")
            }
        }
        ParticipantAction::Rename(new_name) => {
            // I can always rename myself
            if !target.is_me {
                let required = match target.role {
                    ParticipantRole::Host => {
                        warn!(participant = %target.name, "cannot rename the host");
                        return Ok(false);
                    }
                    ParticipantRole::CoHost => ParticipantRole::Host,
                    ParticipantRole::None => ParticipantRole::CoHost,
                };
                if !verify_my_role("rename", me, required) {
                    return Ok(false);
                }
            }
            if !require_attending("rename", target) {
                return Ok(false);
            }
            run_sequence(executor, target, &[&more_options(target), "Rename"]).and_then(|ok| {
                if ok {
                    executor.submit_text(new_name)
                } else {
                    Ok(false)
                }
            })
        }
        ParticipantAction::Promote(role) => {
            if !verify_my_role("promote", me, ParticipantRole::Host) {
                return Ok(false);
            }
            if !require_attending("promote", target) {
                return Ok(false);
            }
            if target.role == *role {
                warn!(participant = %target.name, role = %role, "already holds role");
                return Ok(true);
            }
            let item = if *role == ParticipantRole::Host {
                "Make Host"
            } else {
                "Make Co-Host"
            };
            run_sequence(executor, target, &[&more_options(target), item, "Yes"])
        }
        ParticipantAction::Demote => {
            if !verify_my_role("demote", me, ParticipantRole::Host) {
                return Ok(false);
            }
            if !require_attending("demote", target) {
                return Ok(false);
            }
            if target.role != ParticipantRole::CoHost {
                warn!(
                    participant = %target.name,
                    role = %target.role,
                    "not a co-host, nothing to demote"
                );
                return Ok(true);
            }
            run_sequence(
                executor,
                target,
                &[&more_options(target), "Withdraw Co-Host Permission"],
            )
        }
    };

    match result {
        Err(e) if !e.is_fatal() => {
            warn!(participant = %target.name, action = %action, error = %e, "action failed");
            Ok(false)
        }
        other => other,
    }
}

fn run_sequence(
    executor: &mut dyn ActionExecutor,
    target: &Participant,
    controls: &[&str],
) -> Result<bool, SurfaceError> {
    for control in controls {
        if !executor.invoke(target, control)? {
            debug!(participant = %target.name, control = %control, "control not invoked");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Admit a waiting participant. Not queued: the caller has just observed them.
pub fn admit(
    target: &Participant,
    me: Option<&Participant>,
    executor: &mut dyn ActionExecutor,
) -> Result<bool, SurfaceError> {
    if target.is_me || target.status != ParticipantStatus::Waiting {
        warn!(participant = %target.name, status = %target.status, "cannot admit: not waiting");
        return Ok(false);
    }
    if !verify_my_role("admit", me, ParticipantRole::CoHost) {
        return Ok(false);
    }
    match executor.invoke(target, "Admit") {
        Err(e) if !e.is_fatal() => {
            warn!(participant = %target.name, error = %e, "admit failed");
            Ok(false)
        }
        other => other,
    }
}

/// Pending actions keyed by participant name.
#[derive(Debug, Default)]
pub struct ActionQueue {
    pending: HashMap<String, VecDeque<QueuedAction>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an action. Returns false if an action of the same kind is
    /// already pending for this participant.
    pub fn queue(&mut self, target: &str, action: ParticipantAction, now: DateTime<Utc>) -> bool {
        let q = self.pending.entry(target.to_string()).or_default();
        if q.iter().any(|a| a.action.kind() == action.kind()) {
            warn!(participant = %target, action = %action, "ignoring duplicate action");
            return false;
        }
        debug!(participant = %target, action = %action, "queued action");
        q.push_back(QueuedAction {
            action,
            queued_at: now,
            attempts: 0,
        });
        true
    }

    pub fn has_pending(&self, target: &str) -> bool {
        self.pending.contains_key(target)
    }

    pub fn pending_for(&self, target: &str) -> impl Iterator<Item = &QueuedAction> {
        self.pending.get(target).into_iter().flatten()
    }

    pub fn has_pending_kind(&self, target: &str, kind: ActionKind) -> bool {
        self.pending_for(target).any(|a| a.action.kind() == kind)
    }

    /// Number of participants with pending actions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Run queued actions for a participant who has just been observed.
    ///
    /// Returns true if at least one action succeeded, in which case the
    /// participant's on-screen record is likely to have changed.
    pub fn flush(
        &mut self,
        target: &Participant,
        me: Option<&Participant>,
        executor: &mut dyn ActionExecutor,
    ) -> Result<bool, SurfaceError> {
        let Some(q) = self.pending.get_mut(&target.name) else {
            return Ok(false);
        };

        let mut any_succeeded = false;
        while let Some(head) = q.front_mut() {
            head.attempts += 1;
            info!(
                participant = %target.name,
                action = %head.action,
                attempt = head.attempts,
                "attempting action"
            );

            if execute(&head.action, target, me, executor)? {
                any_succeeded = true;
            } else if head.attempts >= MAX_ACTION_ATTEMPTS {
                error!(
                    participant = %target.name,
                    action = %head.action,
                    "max attempts reached, discarding action"
                );
            } else {
                warn!(
                    participant = %target.name,
                    action = %head.action,
                    attempt = head.attempts,
                    "action attempt failed"
                );
                break;
            }

            q.pop_front();
        }

        if q.is_empty() {
            self.pending.remove(&target.name);
            debug!(participant = %target.name, "done processing actions");
        }

        Ok(any_succeeded)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    /// Records invocations; fails any control listed in `broken`.
    #[derive(Default)]
    pub(crate) struct ScriptedExecutor {
        pub calls: Vec<(String, String)>,
        pub submitted: Vec<String>,
        pub broken: HashSet<String>,
    }

    impl ActionExecutor for ScriptedExecutor {
        fn invoke(&mut self, target: &Participant, control: &str) -> Result<bool, SurfaceError> {
            self.calls.push((target.name.clone(), control.to_string()));
            Ok(!self.broken.contains(control))
        }

        fn submit_text(&mut self, text: &str) -> Result<bool, SurfaceError> {
            self.submitted.push(text.to_string());
            Ok(true)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap()
    }

    fn attending(name: &str, role: ParticipantRole) -> Participant {
        let mut p = Participant::new(name, ParticipantStatus::Attending);
        p.role = role;
        p
    }

    fn host_me() -> Participant {
        let mut me = attending("Usher", ParticipantRole::Host);
        me.is_me = true;
        me
    }

    #[test]
    fn test_duplicate_kind_is_ignored() {
        let mut q = ActionQueue::new();
        assert!(q.queue("Bob", ParticipantAction::Rename("Robert".into()), now()));
        assert!(!q.queue("Bob", ParticipantAction::Rename("Bobby".into()), now()));
        assert!(q.queue("Bob", ParticipantAction::Mute, now()));
        assert_eq!(q.pending_for("Bob").count(), 2);
    }

    #[test]
    fn test_flush_runs_in_order_and_clears() {
        let mut q = ActionQueue::new();
        q.queue("Bob", ParticipantAction::Promote(ParticipantRole::CoHost), now());
        q.queue("Bob", ParticipantAction::Mute, now());

        let me = host_me();
        let mut exec = ScriptedExecutor::default();
        let bob = attending("Bob", ParticipantRole::None);

        assert!(q.flush(&bob, Some(&me), &mut exec).unwrap());
        let controls: Vec<&str> = exec.calls.iter().map(|(_, c)| c.as_str()).collect();
        assert_eq!(controls, vec!["More options for Bob", "Make Co-Host", "Yes", "Mute"]);
        assert!(!q.has_pending("Bob"));
    }

    #[test]
    fn test_failure_stops_target_until_third_attempt() {
        let mut q = ActionQueue::new();
        q.queue("Bob", ParticipantAction::Mute, now());
        q.queue("Bob", ParticipantAction::Unmute, now());

        let me = host_me();
        let mut exec = ScriptedExecutor::default();
        exec.broken.insert("Mute".to_string());
        let bob = attending("Bob", ParticipantRole::None);

        // Attempts one and two fail and leave Unmute untouched
        assert!(!q.flush(&bob, Some(&me), &mut exec).unwrap());
        assert!(!q.flush(&bob, Some(&me), &mut exec).unwrap());
        assert_eq!(q.pending_for("Bob").next().map(|a| a.attempts), Some(2));
        assert!(!exec.calls.iter().any(|(_, c)| c == "Ask to Unmute"));

        // Third failure discards Mute and moves on to Unmute
        assert!(q.flush(&bob, Some(&me), &mut exec).unwrap());
        assert_eq!(exec.calls.last().map(|(_, c)| c.as_str()), Some("Ask to Unmute"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_rename_role_rules() {
        let mut exec = ScriptedExecutor::default();
        let mut cohost_me = attending("Usher", ParticipantRole::CoHost);
        cohost_me.is_me = true;

        // Host can never be renamed
        let host = attending("Boss", ParticipantRole::Host);
        let rename = ParticipantAction::Rename("Big Boss".into());
        assert!(!execute(&rename, &host, Some(&host_me()), &mut exec).unwrap());

        // Co-host target requires me to be host
        let cohost = attending("Helper", ParticipantRole::CoHost);
        assert!(!execute(&rename, &cohost, Some(&cohost_me), &mut exec).unwrap());
        assert!(exec.calls.is_empty());
        assert!(execute(&rename, &cohost, Some(&host_me()), &mut exec).unwrap());
        assert_eq!(exec.submitted, vec!["Big Boss".to_string()]);

        // Renaming myself needs no role
        let mut plain_me = attending("iPad", ParticipantRole::None);
        plain_me.is_me = true;
        assert!(execute(&rename, &plain_me, Some(&plain_me), &mut exec).unwrap());
    }

    #[test]
    fn test_unmute_control_depends_on_target() {
        let mut exec = ScriptedExecutor::default();
        let me = host_me();
        execute(&ParticipantAction::Unmute, &me, Some(&me), &mut exec).unwrap();
        let bob = attending("Bob", ParticipantRole::None);
        execute(&ParticipantAction::Unmute, &bob, Some(&me), &mut exec).unwrap();
        let controls: Vec<&str> = exec.calls.iter().map(|(_, c)| c.as_str()).collect();
        assert_eq!(controls, vec!["Unmute", "Ask to Unmute"]);
    }

    #[test]
    fn test_promote_already_in_role_succeeds_without_clicks() {
        let mut exec = ScriptedExecutor::default();
        let helper = attending("Helper", ParticipantRole::CoHost);
        let promote = ParticipantAction::Promote(ParticipantRole::CoHost);
        assert!(execute(&promote, &helper, Some(&host_me()), &mut exec).unwrap());
        assert!(exec.calls.is_empty());
    }

    #[test]
    fn test_admit_requires_waiting_and_cohost() {
        let mut exec = ScriptedExecutor::default();
        let guest = Participant::new("Guest", ParticipantStatus::Waiting);
        let plain_me = attending("Usher", ParticipantRole::None);
        assert!(!admit(&guest, Some(&plain_me), &mut exec).unwrap());
        assert!(admit(&guest, Some(&host_me()), &mut exec).unwrap());
        let bob = attending("Bob", ParticipantRole::None);
        assert!(!admit(&bob, Some(&host_me()), &mut exec).unwrap());
        assert_eq!(exec.calls, vec![("Guest".to_string(), "Admit".to_string())]);
    }
}
