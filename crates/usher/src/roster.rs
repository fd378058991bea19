//! Roster reconciliation.
//!
//! The participant list can only be read a page at a time, and it shifts
//! while being read. A reconcile pass pages through it, tolerates small
//! count mismatches, retries larger ones, and then diffs the result against
//! the previous roster to produce lifecycle events.

use crate::actions::ActionQueue;
use crate::error::SurfaceError;
use crate::events::{EventBus, SessionEvent};
use crate::parser::{parse_entry, Entry};
use crate::participant::{ControlHandle, ParticipantStatus, Roster};
use crate::surface::{ActionExecutor, RawRecord, SnapshotSource};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use usherconf::ControllerConfig;

/// Pages without a new name before a scan gives up on reaching the count.
const STALL_PAGES: usize = 2;

/// How long someone I admitted may still be listed as waiting before the
/// list is believed again.
pub const ADMIT_GRACE_SECS: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub mismatch_retries: u32,
    pub paging_disabled: bool,
    pub max_pages: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for ScanSettings {
    fn from(c: &ControllerConfig) -> Self {
        Self {
            mismatch_retries: c.participant_count_mismatch_retries.max(1),
            paging_disabled: c.disable_participant_paging,
            max_pages: c.max_pages.max(1),
        }
    }
}

/// The collaborators a scan drives.
pub struct ScanDeps<'a> {
    pub source: &'a mut dyn SnapshotSource,
    pub actions: &'a mut ActionQueue,
    pub executor: &'a mut dyn ActionExecutor,
}

/// Owns the current roster and rebuilds it on every pass.
#[derive(Debug, Default)]
pub struct Reconciler {
    roster: Roster,
    generation: u64,
    settings: ScanSettings,
}

impl Reconciler {
    pub fn new(settings: ScanSettings) -> Self {
        Self {
            roster: Roster::new(),
            generation: 0,
            settings,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut Roster {
        &mut self.roster
    }

    /// Generation of the most recent scan; older handles are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_settings(&mut self, settings: ScanSettings) {
        self.settings = settings;
    }

    /// Rebuild the roster from the source, publish lifecycle events, and
    /// report whether anything changed.
    pub fn reconcile(
        &mut self,
        deps: ScanDeps<'_>,
        bus: &EventBus,
        now: DateTime<Utc>,
    ) -> Result<bool, SurfaceError> {
        let mut scanned = self.scan(deps)?;
        let changed = diff_rosters(&self.roster, &mut scanned, bus, now);
        self.roster = scanned;
        Ok(changed)
    }

    fn scan(&mut self, deps: ScanDeps<'_>) -> Result<Roster, SurfaceError> {
        let ScanDeps {
            source,
            actions,
            executor,
        } = deps;

        self.generation += 1;
        let expected = source.expected_count()?;
        let max_attempts = self.settings.mismatch_retries.max(1);

        let mut scanned = Roster::new();
        let mut seen = HashSet::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.scan_pages(source, actions, executor, expected, &mut scanned, &mut seen)?;
            let parsed = scanned.len();

            if parsed >= expected {
                break;
            }
            if self.settings.paging_disabled {
                warn!(
                    parsed,
                    expected,
                    "participant count short but paging is disabled; using what was read"
                );
                break;
            }
            // Within 10% of the header count is close enough
            if parsed * 10 >= expected * 9 {
                warn!(parsed, expected, "participant count within tolerance; using what was read");
                break;
            }
            if attempt >= max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    parsed,
                    expected,
                    "participant count mismatch; giving up"
                );
                break;
            }
            warn!(
                attempt,
                max_attempts,
                parsed,
                expected,
                "participant count mismatch; trying again"
            );
        }

        debug!(
            parsed = scanned.len(),
            expected,
            attempts = attempt,
            generation = self.generation,
            "scan complete"
        );
        Ok(scanned)
    }

    fn scan_pages(
        &self,
        source: &mut dyn SnapshotSource,
        actions: &mut ActionQueue,
        executor: &mut dyn ActionExecutor,
        expected: usize,
        scanned: &mut Roster,
        seen: &mut HashSet<String>,
    ) -> Result<(), SurfaceError> {
        let page_limit = if self.settings.paging_disabled {
            1
        } else {
            self.settings.max_pages
        };
        let mut stalled = 0;

        for index in 0..page_limit {
            let Some(records) = source.page(index)? else {
                debug!(page = index, "no more pages");
                break;
            };

            let before = scanned.len();
            for record in records {
                self.accept_record(record, source, actions, executor, scanned, seen)?;
            }
            let added = scanned.len().saturating_sub(before);
            debug!(page = index, added, total = scanned.len(), "parsed page");

            if scanned.len() >= expected {
                break;
            }
            if added == 0 {
                stalled += 1;
                if stalled >= STALL_PAGES {
                    warn!(page = index, "no new participants on consecutive pages; stopping");
                    break;
                }
            } else {
                stalled = 0;
            }
        }
        Ok(())
    }

    fn accept_record(
        &self,
        record: RawRecord,
        source: &mut dyn SnapshotSource,
        actions: &mut ActionQueue,
        executor: &mut dyn ActionExecutor,
        scanned: &mut Roster,
        seen: &mut HashSet<String>,
    ) -> Result<(), SurfaceError> {
        let Some(Entry::Participant(mut p)) = parse_entry(&record.text) else {
            return Ok(());
        };
        p.handle = Some(ControlHandle::new(self.generation, record.control));

        if seen.insert(p.name.clone()) && actions.has_pending(&p.name) {
            let me = if p.is_me {
                Some(p.clone())
            } else {
                scanned.me().or_else(|| self.roster.me()).cloned()
            };

            if actions.flush(&p, me.as_ref(), executor)? {
                // Acting on someone usually changes their record
                let refreshed = source
                    .refresh(record.control)?
                    .and_then(|fresh| match parse_entry(&fresh.text) {
                        Some(Entry::Participant(mut q)) => {
                            q.handle = Some(ControlHandle::new(self.generation, fresh.control));
                            Some(q)
                        }
                        _ => None,
                    });
                match refreshed {
                    Some(q) => p = q,
                    None => {
                        warn!(
                            participant = %p.name,
                            "record unreadable after action; skipping this pass"
                        );
                        return Ok(());
                    }
                }
            }
        }

        scanned.insert(p);
        Ok(())
    }
}

/// Diff `next` against `prev`, stamping arrival times into `next` and
/// publishing one event per participant that changed.
pub fn diff_rosters(
    prev: &Roster,
    next: &mut Roster,
    bus: &EventBus,
    now: DateTime<Utc>,
) -> bool {
    let mut changed = false;

    for old in prev.iter() {
        if !next.contains(&old.name) {
            let mut gone = old.clone();
            gone.status = ParticipantStatus::Leaving;
            gone.handle = None;
            info!(participant = %gone.name, "participant left");
            bus.publish(SessionEvent::ParticipantLeft { participant: gone });
            changed = true;
        }
    }

    let names: Vec<String> = next.names().map(String::from).collect();
    for name in names {
        let Some(p) = next.get_mut(&name) else {
            continue;
        };
        let old = prev.get(&name);

        // Timestamps survive from the previous pass unless the status moves
        if let Some(old) = old {
            p.dt_waiting = old.dt_waiting;
            p.dt_attending = old.dt_attending;
            p.dt_admitted = old.dt_admitted;

            let grace = Duration::seconds(ADMIT_GRACE_SECS);
            if old.status == ParticipantStatus::Joining
                && p.status == ParticipantStatus::Waiting
                && old.dt_admitted.is_some_and(|at| now < at + grace)
            {
                debug!(participant = %p.name, "admitted but still listed as waiting");
                p.status = ParticipantStatus::Joining;
            }
        }

        match old {
            Some(old) if old.status == p.status => {
                if !old.same_state(p) {
                    bus.publish(SessionEvent::ParticipantUpdated {
                        old: old.clone(),
                        new: p.clone(),
                    });
                    changed = true;
                }
            }
            _ => {
                let previous = old.map(|o| o.status);
                match p.status {
                    ParticipantStatus::Waiting => p.dt_waiting = Some(now),
                    ParticipantStatus::Attending => p.dt_attending = Some(now),
                    _ => {}
                }
                info!(
                    participant = %p.name,
                    from = ?previous,
                    to = %p.status,
                    "participant status changed"
                );
                let participant = p.clone();
                let status = participant.status;
                bus.publish(match status {
                    ParticipantStatus::Waiting => SessionEvent::ParticipantJoinedWaiting {
                        participant,
                        previous,
                    },
                    ParticipantStatus::Attending => SessionEvent::ParticipantJoinedMeeting {
                        participant,
                        previous,
                    },
                    _ => SessionEvent::ParticipantStatusChanged {
                        participant,
                        previous,
                    },
                });
                changed = true;
            }
        }
    }

    changed
}
