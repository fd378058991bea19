//! Queue of UI notifications fed by the platform's listener thread.
//!
//! The listener only enqueues. The tick drains the queue and decides what
//! to do, so nothing here touches session state.

use crate::chat::MessageHandle;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEventKind {
    FocusChanged,
    WindowOpened,
    WindowClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiEvent {
    pub kind: UiEventKind,
    pub control_type: String,
    pub name: String,
    /// Set when the control is a chat transcript entry.
    pub message: Option<MessageHandle>,
}

impl UiEvent {
    pub fn focus(control_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: UiEventKind::FocusChanged,
            control_type: control_type.into(),
            name: name.into(),
            message: None,
        }
    }

    pub fn chat_message(name: impl Into<String>, handle: MessageHandle) -> Self {
        Self {
            message: Some(handle),
            ..Self::focus("ListItem", name)
        }
    }

    fn key(&self) -> String {
        format!("{}:{}", self.control_type, self.name)
    }
}

#[derive(Debug, Default)]
struct WatchState {
    running: bool,
    queue: VecDeque<UiEvent>,
    last_key: Option<String>,
}

#[derive(Debug, Default)]
pub struct EventWatcher {
    state: Mutex<WatchState>,
    ready: Condvar,
}

impl EventWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = true;
        debug!("ui event watcher started");
    }

    /// Stop accepting events and wake any waiter.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        self.ready.notify_all();
        debug!(dropped = state.queue.len(), "ui event watcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.queue.clear();
        state.last_key = None;
    }

    /// Called from the listener thread. Returns false if the event was
    /// dropped (watcher stopped, or same control as the previous event).
    pub fn push(&self, event: UiEvent) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.running {
            return false;
        }
        let key = event.key();
        if state.last_key.as_deref() == Some(key.as_str()) {
            trace!(key = %key, "duplicate ui event");
            return false;
        }
        state.last_key = Some(key);
        state.queue.push_back(event);
        self.ready.notify_one();
        true
    }

    pub fn try_next_event(&self) -> Option<UiEvent> {
        self.state.lock().unwrap().queue.pop_front()
    }

    /// Block until an event arrives, the watcher stops, or `timeout` passes.
    pub fn wait_event(&self, timeout: Duration) -> Option<UiEvent> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some(event);
            }
            if !state.running {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self.ready.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    /// Everything currently queued.
    pub fn drain(&self) -> Vec<UiEvent> {
        self.state.lock().unwrap().queue.drain(..).collect()
    }
}
