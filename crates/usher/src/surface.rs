//! Seams to the driven application's UI.
//!
//! Platform adapters implement these traits. Every call may fail with a
//! [`SurfaceError`]; only [`SurfaceError::Unavailable`] is fatal to the run.

use crate::chat::MessageHandle;
use crate::error::SurfaceError;
use crate::participant::{ControlRef, Participant};
use std::time::{Duration, Instant};

/// One raw record from the participant list, with the control it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub text: String,
    pub control: ControlRef,
}

impl RawRecord {
    pub fn new(text: impl Into<String>, control: ControlRef) -> Self {
        Self {
            text: text.into(),
            control,
        }
    }
}

/// Paginated view of the combined waiting + attending list.
pub trait SnapshotSource: Send {
    /// Total participant count announced by the list's section headers.
    fn expected_count(&mut self) -> Result<usize, SurfaceError>;

    /// Records on page `index`. Page 0 anchors the list at its top; later
    /// indices advance one page each. `None` means there is no such page.
    fn page(&mut self, index: usize) -> Result<Option<Vec<RawRecord>>, SurfaceError>;

    /// Re-read a single record after acting on it.
    fn refresh(&mut self, control: ControlRef) -> Result<Option<RawRecord>, SurfaceError>;
}

/// Invokes named controls on behalf of a participant.
pub trait ActionExecutor: Send {
    /// Invoke `control` (a button or menu item label) for `target`.
    /// `Ok(false)` means the control could not be found or did nothing.
    fn invoke(&mut self, target: &Participant, control: &str) -> Result<bool, SurfaceError>;

    /// Type text into the currently focused input and submit it.
    fn submit_text(&mut self, text: &str) -> Result<bool, SurfaceError>;
}

/// The chat panel's recipient picker and send box.
pub trait ChatSurface: Send {
    /// Label currently shown in the recipient picker.
    fn selected_recipient(&mut self) -> Result<String, SurfaceError>;

    /// Labels offered by the picker.
    fn recipient_choices(&mut self) -> Result<Vec<String>, SurfaceError>;

    fn choose_recipient(&mut self, label: &str) -> Result<(), SurfaceError>;

    fn send(&mut self, text: &str) -> Result<(), SurfaceError>;
}

/// Read access to the chat transcript, one message control at a time.
pub trait TranscriptSource: Send {
    /// The oldest message in the transcript, if any.
    fn first_message(&mut self) -> Result<Option<MessageHandle>, SurfaceError>;

    fn message_text(&mut self, handle: MessageHandle) -> Result<String, SurfaceError>;

    /// The message following `handle`, if one has appeared.
    fn next_message(
        &mut self,
        handle: MessageHandle,
    ) -> Result<Option<MessageHandle>, SurfaceError>;
}

/// Text-to-speech output.
pub trait Speaker: Send {
    fn speak(&mut self, text: &str);
}

/// Speaker that discards everything.
#[derive(Debug, Default)]
pub struct Silent;

impl Speaker for Silent {
    fn speak(&mut self, _text: &str) {}
}

/// Access to the host's meeting option toggles.
pub trait OptionsSource: Send {
    /// Current label and checked state of every toggle. `None` state means
    /// the toggle is present but indeterminate.
    fn read_options(&mut self) -> Result<Vec<(String, Option<bool>)>, SurfaceError>;

    fn toggle(&mut self, label: &str) -> Result<bool, SurfaceError>;
}

/// Call `check` every `poll` until it yields a value or `timeout` elapses.
///
/// Used for "wait for the menu to open" style interactions. A timeout is
/// reported as [`SurfaceError::Timeout`]; errors from `check` end the wait.
pub fn wait_until<T, F>(
    what: &str,
    poll: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T, SurfaceError>
where
    F: FnMut() -> Result<Option<T>, SurfaceError>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = check()? {
            return Ok(value);
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(SurfaceError::Timeout {
                what: what.to_string(),
                waited_ms: elapsed.as_millis() as u64,
            });
        }
        std::thread::sleep(poll.min(timeout - elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_until_returns_when_ready() {
        let mut calls = 0;
        let value = wait_until("menu", Duration::from_millis(1), Duration::from_secs(1), || {
            calls += 1;
            Ok((calls == 3).then_some("open"))
        })
        .unwrap();
        assert_eq!(value, "open");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_wait_until_times_out() {
        let err = wait_until::<(), _>(
            "rename dialog",
            Duration::from_millis(1),
            Duration::from_millis(5),
            || Ok(None),
        )
        .unwrap_err();
        assert!(matches!(err, SurfaceError::Timeout { ref what, .. } if what == "rename dialog"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_wait_until_propagates_check_error() {
        let err = wait_until::<(), _>("x", Duration::from_millis(1), Duration::from_secs(1), || {
            Err(SurfaceError::Unavailable("window closed".into()))
        })
        .unwrap_err();
        assert!(err.is_fatal());
    }
}
