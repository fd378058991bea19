//! The session context: everything one bot instance owns, driven one tick
//! at a time.

use crate::actions::ActionQueue;
use crate::admission::AdmissionController;
use crate::allow_list::AllowListFile;
use crate::chat::{ChatMessage, OutboundQueue, TranscriptScanner};
use crate::clock::Clock;
use crate::commands::{ChatCommands, CommandContext};
use crate::error::{Result, SessionError, SurfaceError};
use crate::events::{EventBus, EventSubscriber, SessionEvent};
use crate::options::{MeetingOptions, RefreshPolicy};
use crate::participant::Roster;
use crate::roster::{Reconciler, ScanDeps, ScanSettings};
use crate::surface::{
    wait_until, ActionExecutor, ChatSurface, OptionsSource, SnapshotSource, Speaker,
    TranscriptSource,
};
use crate::watcher::{EventWatcher, UiEventKind};
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use usherconf::{AutomationFlags, ConfigWatch, UsherConfig};

/// The platform adapter, one trait object per concern.
pub struct Surfaces {
    pub snapshot: Box<dyn SnapshotSource>,
    pub executor: Box<dyn ActionExecutor>,
    pub chat: Box<dyn ChatSurface>,
    pub transcript: Box<dyn TranscriptSource>,
    pub options: Box<dyn OptionsSource>,
    pub speaker: Box<dyn Speaker>,
}

/// What a single tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub paused: bool,
    pub roster_changed: bool,
    pub admitted: usize,
    pub messages_received: usize,
    pub messages_confirmed: usize,
    pub outbound_pending: usize,
}

pub struct Session {
    config: UsherConfig,
    config_watch: Option<ConfigWatch>,
    reconciler: Reconciler,
    actions: ActionQueue,
    outbound: OutboundQueue,
    scanner: TranscriptScanner,
    admission: AdmissionController,
    options: MeetingOptions,
    commands: ChatCommands,
    allow: AllowListFile,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    watcher: Arc<EventWatcher>,
    surfaces: Surfaces,
    offset: FixedOffset,
    ticks: u64,
}

impl Session {
    pub fn new(config: UsherConfig, surfaces: Surfaces, clock: Arc<dyn Clock>) -> Self {
        let offset = Local::now().offset().fix();
        Self {
            reconciler: Reconciler::new(ScanSettings::from(&config.controller)),
            actions: ActionQueue::new(),
            outbound: OutboundQueue::new(),
            scanner: TranscriptScanner::new(offset),
            admission: AdmissionController::new(),
            options: MeetingOptions::new(RefreshPolicy::from_delay_secs(
                config.controller.update_meeting_options_delay_secs,
            )),
            commands: ChatCommands::new(),
            allow: AllowListFile::new(&config.paths.allow_list),
            bus: EventBus::new(),
            watcher: Arc::new(EventWatcher::new()),
            config_watch: None,
            config,
            clock,
            surfaces,
            offset,
            ticks: 0,
        }
    }

    /// Reload settings whenever the config files change.
    pub fn with_config_watch(mut self, watch: ConfigWatch) -> Self {
        self.config_watch = Some(watch);
        self
    }

    /// Timezone the meeting UI prints chat times in.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self.scanner = TranscriptScanner::new(offset);
        self
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        self.bus.subscribe(subscriber);
    }

    /// Handle for the platform's UI listener thread.
    pub fn watcher(&self) -> Arc<EventWatcher> {
        self.watcher.clone()
    }

    pub fn config(&self) -> &UsherConfig {
        &self.config
    }

    pub fn roster(&self) -> &Roster {
        self.reconciler.roster()
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Queue a chat message for delivery.
    pub fn send_chat(
        &mut self,
        to: impl Into<crate::chat::Recipient>,
        text: impl Into<String>,
        speak: bool,
    ) {
        self.outbound.enqueue(to.into(), text, speak);
    }

    /// Block until the participant list reports anyone, using the
    /// configured poll interval and timeout. Timing out is fatal.
    pub fn wait_ready(&mut self) -> Result<usize> {
        let poll = Duration::from_millis(self.config.controller.wait_poll_ms);
        let timeout = Duration::from_millis(self.config.controller.wait_timeout_ms);
        let snapshot = &mut self.surfaces.snapshot;
        let count = wait_until("participant list", poll, timeout, || {
            snapshot.expected_count().map(|n| (n > 0).then_some(n))
        })
        .map_err(|e| match e {
            SurfaceError::Timeout { what, waited_ms } => {
                SurfaceError::Unavailable(format!("{what} did not appear within {waited_ms} ms"))
            }
            other => other,
        })?;
        info!(participants = count, "meeting ready");
        self.allow.reload_if_changed()?;
        Ok(count)
    }

    /// Run one pass. Only fatal errors are returned; anything else is
    /// logged and ends the tick early.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.ticks += 1;
        let now = self.clock.now();
        let mut report = TickReport::default();

        match self.run_tick(now, &mut report) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(tick = self.ticks, error = %e, "tick ended early"),
        }

        report.outbound_pending = self.outbound.len();
        Ok(report)
    }

    fn run_tick(&mut self, now: DateTime<Utc>, report: &mut TickReport) -> Result<()> {
        self.reload_settings();

        if self.config.automation.paused {
            debug!(tick = self.ticks, "paused");
            report.paused = true;
            return Ok(());
        }

        self.drain_ui_events();

        let flags = self.config.automation.flags;
        if flags.contains(AutomationFlags::PROCESS_PARTICIPANTS) {
            self.process_participants(now, report)?;
        }
        if flags.contains(AutomationFlags::PROCESS_CHAT) {
            self.process_chat(now, report)?;
        }
        Ok(())
    }

    fn reload_settings(&mut self) {
        if let Some(watch) = self.config_watch.as_mut() {
            match watch.reload() {
                Ok(Some((config, sources))) => {
                    info!(files = sources.files.len(), "settings reloaded");
                    self.apply_config(config);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "settings reload failed; keeping current settings"),
            }
        }

        match self.allow.reload_if_changed() {
            Ok(true) => info!(
                entries = self.allow.list().len(),
                path = %self.allow.path().display(),
                "allow-list loaded"
            ),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "allow-list reload failed"),
        }
    }

    fn apply_config(&mut self, config: UsherConfig) {
        self.reconciler.set_settings(ScanSettings::from(&config.controller));
        self.options.set_policy(RefreshPolicy::from_delay_secs(
            config.controller.update_meeting_options_delay_secs,
        ));
        self.allow.set_path(&config.paths.allow_list);
        self.config = config;
    }

    fn drain_ui_events(&mut self) {
        for event in self.watcher.drain() {
            if let Some(handle) = event.message {
                self.scanner.offer_handle(handle);
                continue;
            }
            match event.kind {
                UiEventKind::WindowClosed => info!(window = %event.name, "window closed"),
                _ => debug!(control = %event.control_type, name = %event.name, "ui event"),
            }
        }
    }

    fn process_participants(&mut self, now: DateTime<Utc>, report: &mut TickReport) -> Result<()> {
        let Surfaces {
            snapshot,
            executor,
            options,
            ..
        } = &mut self.surfaces;

        report.roster_changed = self.reconciler.reconcile(
            ScanDeps {
                source: snapshot.as_mut(),
                actions: &mut self.actions,
                executor: executor.as_mut(),
            },
            &self.bus,
            now,
        )?;

        self.admission
            .self_care(self.reconciler.roster(), &self.config.automation, &mut self.actions, now);

        if self.reconciler.roster().me().is_some() {
            if let Err(e) = self.options.update(options.as_mut(), &self.bus, now, false) {
                if e.is_fatal() {
                    return Err(e.into());
                }
                warn!(error = %e, "failed to read meeting options");
            }
        }

        let admission = self.admission.evaluate(
            self.reconciler.roster_mut(),
            &self.config.automation,
            self.allow.list(),
            &mut self.actions,
            &mut self.outbound,
            executor.as_mut(),
            now,
        )?;
        report.admitted = admission.admitted.len();
        Ok(())
    }

    fn process_chat(&mut self, now: DateTime<Utc>, report: &mut TickReport) -> Result<()> {
        let mut received = Vec::new();
        let scanned = self
            .scanner
            .scan(self.surfaces.transcript.as_mut(), now, &mut received);

        for msg in received {
            report.messages_confirmed += self.confirm_delivery(&msg);
            for line in msg.split_lines() {
                report.messages_received += 1;
                self.bus.publish(SessionEvent::ChatMessageReceived(line.clone()));
                self.handle_command(&line, now)?;
            }
        }

        if let Err(e) = scanned {
            let e = SessionError::from(e);
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "chat scan incomplete");
        }

        self.outbound
            .flush(self.reconciler.roster(), self.surfaces.chat.as_mut(), now)?;
        Ok(())
    }

    fn confirm_delivery(&mut self, msg: &ChatMessage) -> usize {
        if !msg.is_from_me() {
            return 0;
        }
        let confirmed = self.outbound.confirm(&msg.to, &msg.text);
        let speak_enabled = self.config.automation.flags.contains(AutomationFlags::SPEAK);
        for c in &confirmed {
            if c.speak && speak_enabled {
                self.surfaces.speaker.speak(&c.text);
            }
            self.bus.publish(SessionEvent::ChatMessageConfirmed {
                to: c.to.clone(),
                text: c.text.clone(),
            });
        }
        confirmed.len()
    }

    fn handle_command(
        &mut self,
        msg: &ChatMessage,
        now: DateTime<Utc>,
    ) -> std::result::Result<bool, SurfaceError> {
        let mut ctx = CommandContext {
            roster: self.reconciler.roster_mut(),
            allow: self.allow.list(),
            automation: &mut self.config.automation,
            actions: &mut self.actions,
            admission: &mut self.admission,
            outbound: &mut self.outbound,
            executor: self.surfaces.executor.as_mut(),
            now,
            offset: self.offset,
        };
        self.commands.handle(msg, &mut ctx)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ticks", &self.ticks)
            .field("participants", &self.reconciler.roster().len())
            .field("outbound", &self.outbound.len())
            .field("bus", &self.bus)
            .finish()
    }
}
