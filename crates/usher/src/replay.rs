//! Scripted platform adapter.
//!
//! Plays back a JSON script of participant list snapshots, chat messages,
//! and option states, one step per tick. Everything the engine does to the
//! UI is recorded, and sent chat is echoed into the transcript the way the
//! real client does it, so delivery confirmation works end to end.

use crate::chat::{MessageHandle, Recipient};
use crate::error::SurfaceError;
use crate::parser::{parse_entry, parse_header, Entry};
use crate::participant::{ControlRef, Participant};
use crate::session::Surfaces;
use crate::surface::{
    ActionExecutor, ChatSurface, OptionsSource, RawRecord, SnapshotSource, Speaker,
    TranscriptSource,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read replay script {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid replay script: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A chat message typed by someone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedChat {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub time: Option<String>,
    pub text: String,
}

/// What changes before one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Replaces the participant list records, headers included.
    #[serde(default)]
    pub participants: Option<Vec<String>>,
    /// Overrides the count derived from section headers.
    #[serde(default)]
    pub expected: Option<usize>,
    #[serde(default)]
    pub chat: Vec<ScriptedChat>,
    /// Replaces the meeting option toggles.
    #[serde(default)]
    pub options: Option<Vec<(String, Option<bool>)>>,
    /// Wall-clock label for messages in this step, e.g. `7:05 PM`.
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default = "Script::default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Script {
    fn default_page_size() -> usize {
        10
    }
}

impl Default for Script {
    fn default() -> Self {
        Self {
            page_size: Self::default_page_size(),
            steps: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct ReplayState {
    script: Script,
    next_step: usize,
    records: Vec<String>,
    expected: Option<usize>,
    transcript: Vec<String>,
    time_label: String,
    selected: String,
    options: Vec<(String, Option<bool>)>,
    invoked: Vec<(String, String)>,
    submitted: Vec<String>,
    sent: Vec<(String, String)>,
    spoken: Vec<String>,
    closed: bool,
}

impl ReplayState {
    fn check_open(&self) -> Result<(), SurfaceError> {
        if self.closed {
            return Err(SurfaceError::Unavailable("replay closed".to_string()));
        }
        Ok(())
    }

    fn participants(&self) -> Vec<Participant> {
        self.records
            .iter()
            .filter_map(|r| match parse_entry(r) {
                Some(Entry::Participant(p)) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn header_count(&self) -> Option<usize> {
        let counts: Vec<usize> = self
            .records
            .iter()
            .filter_map(|r| parse_header(r).map(|(_, n)| n))
            .collect();
        (!counts.is_empty()).then(|| counts.iter().sum())
    }

    fn echo(&mut self, label: &str, text: &str) {
        let private = match Recipient::from_label(label) {
            Recipient::Individual(_) => " (Direct Message)",
            _ => "",
        };
        let header = format!("From Me to {label}:{private} {}", self.time_label);
        if let Some(last) = self.transcript.last_mut() {
            if last.starts_with(&header) {
                last.push('\n');
                last.push_str(text);
                return;
            }
        }
        self.transcript.push(format!("{header}\n{text}"));
    }
}

/// Cheap handle to shared replay state. Clones drive the same script.
#[derive(Debug, Clone)]
pub struct ReplaySurface {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplaySurface {
    pub fn new(script: Script) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState {
                script,
                next_step: 0,
                records: Vec::new(),
                expected: None,
                transcript: Vec::new(),
                time_label: "12:00 PM".to_string(),
                selected: Recipient::EVERYONE.to_string(),
                options: Vec::new(),
                invoked: Vec::new(),
                submitted: Vec::new(),
                sent: Vec::new(),
                spoken: Vec::new(),
                closed: false,
            })),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let json = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// One trait object per concern, all backed by this replay.
    pub fn surfaces(&self) -> Surfaces {
        Surfaces {
            snapshot: Box::new(self.clone()),
            executor: Box::new(self.clone()),
            chat: Box::new(self.clone()),
            transcript: Box::new(self.clone()),
            options: Box::new(self.clone()),
            speaker: Box::new(self.clone()),
        }
    }

    /// Apply the next step. Returns false once the script is exhausted.
    pub fn advance(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(step) = state.script.steps.get(state.next_step).cloned() else {
            return false;
        };
        state.next_step += 1;
        debug!(step = state.next_step, "replay step");

        if let Some(time) = step.time {
            state.time_label = time;
        }
        if let Some(records) = step.participants {
            state.records = records;
        }
        state.expected = step.expected;
        if let Some(options) = step.options {
            state.options = options;
        }
        for chat in step.chat {
            let marker = if chat.private { " (Direct Message)" } else { "" };
            let time = chat.time.unwrap_or_else(|| state.time_label.clone());
            state
                .transcript
                .push(format!("From {} to {}:{marker} {time}\n{}", chat.from, chat.to, chat.text));
        }
        true
    }

    /// Make every further call fail as if the meeting window vanished.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    pub fn steps_played(&self) -> usize {
        self.state.lock().unwrap().next_step
    }

    /// `(recipient label, text)` for everything sent.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    /// `(participant, control)` for every control invoked.
    pub fn invoked(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().invoked.clone()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.state.lock().unwrap().spoken.clone()
    }

    pub fn transcript(&self) -> Vec<String> {
        self.state.lock().unwrap().transcript.clone()
    }
}

impl SnapshotSource for ReplaySurface {
    fn expected_count(&mut self) -> Result<usize, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        Ok(state
            .expected
            .or_else(|| state.header_count())
            .unwrap_or_else(|| state.participants().len()))
    }

    fn page(&mut self, index: usize) -> Result<Option<Vec<RawRecord>>, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        let size = state.script.page_size.max(1);
        let start = index * size;
        if start >= state.records.len() && index > 0 {
            return Ok(None);
        }
        Ok(Some(
            state
                .records
                .iter()
                .enumerate()
                .skip(start)
                .take(size)
                .map(|(i, text)| RawRecord::new(text.clone(), ControlRef(i as u64)))
                .collect(),
        ))
    }

    fn refresh(&mut self, control: ControlRef) -> Result<Option<RawRecord>, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        Ok(state
            .records
            .get(control.0 as usize)
            .map(|text| RawRecord::new(text.clone(), control)))
    }
}

impl ActionExecutor for ReplaySurface {
    fn invoke(&mut self, target: &Participant, control: &str) -> Result<bool, SurfaceError> {
        let mut state = self.state.lock().unwrap();
        state.check_open()?;
        info!(participant = %target.name, control, "replay invoke");
        state.invoked.push((target.name.clone(), control.to_string()));
        Ok(true)
    }

    fn submit_text(&mut self, text: &str) -> Result<bool, SurfaceError> {
        let mut state = self.state.lock().unwrap();
        state.check_open()?;
        state.submitted.push(text.to_string());
        Ok(true)
    }
}

impl ChatSurface for ReplaySurface {
    fn selected_recipient(&mut self) -> Result<String, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        Ok(state.selected.clone())
    }

    fn recipient_choices(&mut self) -> Result<Vec<String>, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        let mut choices = vec![
            Recipient::EVERYONE_IN_MEETING.to_string(),
            Recipient::EVERYONE_IN_WAITING_ROOM.to_string(),
        ];
        choices.extend(
            state
                .participants()
                .into_iter()
                .filter(|p| !p.is_me)
                .map(|p| p.name),
        );
        Ok(choices)
    }

    fn choose_recipient(&mut self, label: &str) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        state.check_open()?;
        state.selected = label.to_string();
        Ok(())
    }

    fn send(&mut self, text: &str) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        state.check_open()?;
        let to = state.selected.clone();
        info!(to = %to, text, "replay chat send");
        state.sent.push((to.clone(), text.to_string()));
        state.echo(&to, text);
        Ok(())
    }
}

impl TranscriptSource for ReplaySurface {
    fn first_message(&mut self) -> Result<Option<MessageHandle>, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        Ok((!state.transcript.is_empty()).then_some(MessageHandle(0)))
    }

    fn message_text(&mut self, handle: MessageHandle) -> Result<String, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        state
            .transcript
            .get(handle.0 as usize)
            .cloned()
            .ok_or_else(|| SurfaceError::StaleHandle(format!("message {}", handle.0)))
    }

    fn next_message(
        &mut self,
        handle: MessageHandle,
    ) -> Result<Option<MessageHandle>, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        let next = handle.0 + 1;
        Ok(((next as usize) < state.transcript.len()).then_some(MessageHandle(next)))
    }
}

impl OptionsSource for ReplaySurface {
    fn read_options(&mut self) -> Result<Vec<(String, Option<bool>)>, SurfaceError> {
        let state = self.state.lock().unwrap();
        state.check_open()?;
        Ok(state.options.clone())
    }

    fn toggle(&mut self, label: &str) -> Result<bool, SurfaceError> {
        let mut state = self.state.lock().unwrap();
        state.check_open()?;
        match state.options.iter_mut().find(|(l, _)| l == label) {
            Some((_, value)) => {
                *value = Some(!value.unwrap_or(false));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Speaker for ReplaySurface {
    fn speak(&mut self, text: &str) {
        info!(text, "speak");
        self.state.lock().unwrap().spoken.push(text.to_string());
    }
}
