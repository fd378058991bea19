//! Chat commands from admins, plus the public topic query.
//!
//! Everything addressed to the bot goes through [`ChatCommands::handle`].
//! Replies are queued on the outbound queue and participant changes on the
//! action queue, so nothing here talks to the UI except `/admit`.

use crate::actions::{ActionQueue, ParticipantAction};
use crate::admission::AdmissionController;
use crate::allow_list::AllowList;
use crate::chat::{ChatMessage, OutboundQueue, Recipient};
use crate::error::SurfaceError;
use crate::participant::{ParticipantRole, ParticipantStatus, Roster, VideoStatus};
use crate::surface::ActionExecutor;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};
use usherconf::{AutomationConfig, AutomationFlags};

/// Flags left on in passive mode so the bot keeps watching.
fn passive_flags() -> AutomationFlags {
    AutomationFlags::PROCESS_PARTICIPANTS | AutomationFlags::PROCESS_CHAT
}

fn topic_query_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(topic|reading)\b").expect("topic pattern is valid"))
}

/// Everything a command may touch during one tick.
pub struct CommandContext<'a> {
    pub roster: &'a mut Roster,
    pub allow: &'a AllowList,
    pub automation: &'a mut AutomationConfig,
    pub actions: &'a mut ActionQueue,
    pub admission: &'a mut AdmissionController,
    pub outbound: &'a mut OutboundQueue,
    pub executor: &'a mut dyn ActionExecutor,
    pub now: DateTime<Utc>,
    /// Offset the meeting's wall clock runs in.
    pub offset: FixedOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Citadel,
    Lockdown,
    Passive,
    Pause,
}

impl Mode {
    fn parse(command: &str) -> Option<Self> {
        match command {
            "citadel" => Some(Mode::Citadel),
            "lockdown" => Some(Mode::Lockdown),
            "passive" => Some(Mode::Passive),
            "pause" => Some(Mode::Pause),
            _ => None,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Mode::Citadel => "Citadel",
            Mode::Lockdown => "Lockdown",
            Mode::Passive => "Passive",
            Mode::Pause => "Pause",
        }
    }

    fn lockdown_flags() -> AutomationFlags {
        AutomationFlags::ADMIT_OTHERS
            | AutomationFlags::ADMIT_KNOWN
            | AutomationFlags::CO_HOST_KNOWN
    }

    fn is_on(self, config: &AutomationConfig) -> bool {
        let flags = config.flags;
        match self {
            Mode::Citadel => !flags.contains(AutomationFlags::ADMIT_OTHERS),
            Mode::Lockdown => !flags.intersects(Self::lockdown_flags()),
            Mode::Passive => flags == passive_flags(),
            Mode::Pause => config.paused,
        }
    }

    /// Returns false if the mode was already in the requested state.
    fn set(self, config: &mut AutomationConfig, on: bool) -> bool {
        if self.is_on(config) == on {
            return false;
        }
        match (self, on) {
            (Mode::Citadel, true) => config.flags.remove(AutomationFlags::ADMIT_OTHERS),
            (Mode::Citadel, false) => config.flags.insert(AutomationFlags::ADMIT_OTHERS),
            (Mode::Lockdown, true) => config.flags.remove(Self::lockdown_flags()),
            (Mode::Lockdown, false) => config.flags.insert(Self::lockdown_flags()),
            (Mode::Passive, true) => config.flags = passive_flags(),
            (Mode::Passive, false) => config.flags = AutomationFlags::ALL,
            (Mode::Pause, on) => config.paused = on,
        }
        info!(mode = self.title(), on, flags = %config.flags, "mode changed");
        true
    }
}

#[derive(Debug, Default)]
pub struct ChatCommands {
    topic: Option<String>,
}

impl ChatCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    fn topic_line(&self, ctx: &CommandContext<'_>) -> String {
        match &self.topic {
            None => "The topic has not been set".to_string(),
            Some(topic) => {
                let hour = ctx.now.with_timezone(&ctx.offset).hour();
                let when = if hour >= 17 { "Tonight" } else { "Today" };
                format!("{when}'s topic: {topic}")
            }
        }
    }

    fn send_topic(&self, to: Recipient, ctx: &mut CommandContext<'_>) {
        let line = self.topic_line(ctx);
        ctx.outbound.enqueue(to, line, false);
    }

    /// React to one received chat line. Returns true if it was meant for us.
    pub fn handle(
        &mut self,
        msg: &ChatMessage,
        ctx: &mut CommandContext<'_>,
    ) -> Result<bool, SurfaceError> {
        if msg.is_from_me() {
            return Ok(false);
        }

        let mut text = msg.text.trim().to_string();
        let mut reply_to = Recipient::Individual(msg.from.clone());

        if !msg.is_private {
            let name = ctx.automation.my_participant_name.trim();
            if name.is_empty() {
                return Ok(false);
            }
            let mention = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name)))
                .map_err(|e| SurfaceError::Other(e.to_string()))?;
            let stripped = mention.replace_all(&text, "").trim().to_string();
            if stripped == text {
                return Ok(false);
            }
            text = stripped;
            reply_to = Recipient::EveryoneInMeeting;
        } else if !msg.is_to_me() {
            return Ok(false);
        }

        if !text.starts_with('/') {
            if topic_query_re().is_match(&text) {
                self.send_topic(reply_to, ctx);
                return Ok(true);
            }
            debug!(from = %msg.from, "ignoring small talk");
            return Ok(false);
        }

        if text == "/topic" {
            self.send_topic(reply_to, ctx);
            return Ok(true);
        }

        if !msg.is_to_me() {
            return Ok(false);
        }

        if !ctx.allow.is_admin(&msg.from) {
            warn!(command = %text, from = %msg.from, "ignoring command from non-admin");
            return Ok(false);
        }
        if !ctx.roster.contains(&msg.from) {
            error!(command = %text, from = %msg.from, "command from someone not in the roster");
            return Ok(false);
        }

        let sender = Recipient::Individual(msg.from.clone());
        let (command, arg) = match text[1..].split_once(char::is_whitespace) {
            Some((c, a)) => (c.to_lowercase(), a.trim().to_string()),
            None => (text[1..].to_lowercase(), String::new()),
        };
        info!(command = %command, from = %msg.from, "chat command");

        if command == "topic" {
            self.topic_command(&arg, reply_to, ctx);
            return Ok(true);
        }

        if arg.is_empty() {
            return Ok(true);
        }

        if let Some(mode) = Mode::parse(&command) {
            let on = match arg.to_lowercase().as_str() {
                "on" => true,
                "off" => false,
                _ => {
                    ctx.outbound.enqueue(
                        sender,
                        format!(
                            "Sorry, the {command} command requires either on or off as a parameter"
                        ),
                        false,
                    );
                    return Ok(true);
                }
            };
            let state = if on { "on" } else { "off" };
            let reply = if mode.set(ctx.automation, on) {
                format!("{} mode has been changed to {state}", mode.title())
            } else {
                format!("{} mode is already {state}", mode.title())
            };
            ctx.outbound.enqueue(sender, reply, false);
            return Ok(true);
        }

        match command.as_str() {
            "waitmsg" => {
                let current = &mut ctx.automation.waiting_room_announcement_message;
                let reply = if arg.eq_ignore_ascii_case("off") {
                    if current.is_empty() {
                        "Waiting room message is already off".to_string()
                    } else {
                        current.clear();
                        "Waiting room message has been turned off".to_string()
                    }
                } else if *current == arg {
                    format!("Waiting room message is already set to:\n{arg}")
                } else {
                    *current = arg.clone();
                    format!("Waiting room message has been set to:\n{arg}")
                };
                ctx.outbound.enqueue(sender, reply, false);
                return Ok(true);
            }
            "say" | "speak" => {
                ctx.outbound
                    .enqueue(Recipient::EveryoneInMeeting, arg, command == "speak");
                return Ok(true);
            }
            _ => {}
        }

        let (target_name, new_name) = if command == "rename" {
            match arg.split_once(" to ") {
                Some((old, new)) if !old.trim().is_empty() && !new.trim().is_empty() => {
                    (old.trim().to_string(), Some(new.trim().to_string()))
                }
                _ => {
                    ctx.outbound.enqueue(
                        sender.clone(),
                        "Please use the format: /rename Old Name to New Name",
                        false,
                    );
                    ctx.outbound
                        .enqueue(sender, "Example: /rename iPad User to John Doe", false);
                    return Ok(true);
                }
            }
        } else if arg.eq_ignore_ascii_case("me") {
            (msg.from.clone(), None)
        } else {
            (arg, None)
        };

        let Some(target) = ctx.roster.get(&target_name).cloned() else {
            ctx.outbound.enqueue(
                sender,
                format!(
                    "Sorry, I don't see anyone named {target_name:?} here. Remember, case matters!"
                ),
                false,
            );
            return Ok(true);
        };
        if target.is_me {
            ctx.outbound
                .enqueue(sender, "Sorry, I can't do that to myself", false);
            return Ok(true);
        }

        if let Some(new_name) = new_name {
            if target.name == msg.from {
                ctx.outbound
                    .enqueue(sender, "Why don't you just rename yourself?", false);
                return Ok(true);
            }
            ctx.outbound.enqueue(
                sender,
                format!("Renaming {:?} to {:?}", target.name, new_name),
                false,
            );
            ctx.actions
                .queue(&target.name, ParticipantAction::Rename(new_name), ctx.now);
            return Ok(true);
        }

        if command == "admit" {
            if target.status != ParticipantStatus::Waiting {
                ctx.outbound
                    .enqueue(sender, format!("Sorry, {:?} is not waiting", target.name), false);
            } else {
                ctx.outbound
                    .enqueue(sender, format!("Admitting {:?}", target.name), false);
                ctx.admission
                    .admit_now(ctx.roster, &target.name, ctx.executor, ctx.now)?;
            }
            return Ok(true);
        }

        let known = matches!(command.as_str(), "cohost" | "promote" | "demote" | "mute" | "unmute");
        if !known {
            ctx.outbound.enqueue(
                sender,
                format!("Sorry, I don't know the command {command:?}"),
                false,
            );
            return Ok(true);
        }

        if target.status != ParticipantStatus::Attending {
            ctx.outbound
                .enqueue(sender, format!("Sorry, {:?} is not attending", target.name), false);
            return Ok(true);
        }

        let (reply, action) = match command.as_str() {
            "cohost" | "promote" => {
                if target.role != ParticipantRole::None {
                    (
                        format!(
                            "Sorry, {:?} is already Host or Co-Host so cannot be promoted",
                            target.name
                        ),
                        None,
                    )
                } else if target.video_status != VideoStatus::On {
                    (format!("Co-Host name matched for {:?}, but video is off", target.name), None)
                } else {
                    (
                        format!("Promoting {:?} to Co-Host", target.name),
                        Some(ParticipantAction::Promote(ParticipantRole::CoHost)),
                    )
                }
            }
            "demote" => {
                if target.role != ParticipantRole::CoHost {
                    (format!("Sorry, {:?} isn't Co-Host so cannot be demoted", target.name), None)
                } else {
                    (format!("Demoting {:?}", target.name), Some(ParticipantAction::Demote))
                }
            }
            "mute" => (format!("Muting {:?}", target.name), Some(ParticipantAction::Mute)),
            _ => (
                format!("Requesting {:?} to Unmute", target.name),
                Some(ParticipantAction::Unmute),
            ),
        };

        ctx.outbound.enqueue(sender, reply, false);
        if let Some(action) = action {
            ctx.actions.queue(&target.name, action, ctx.now);
        }
        Ok(true)
    }

    fn topic_command(&mut self, arg: &str, reply_to: Recipient, ctx: &mut CommandContext<'_>) {
        if arg.is_empty() {
            self.send_topic(reply_to, ctx);
            return;
        }

        let (sub, rest) = match arg.split_once(char::is_whitespace) {
            Some((s, r)) => (s.trim_start_matches('/').to_lowercase(), r.trim()),
            None => (arg.trim_start_matches('/').to_lowercase(), ""),
        };

        let mut broadcast = false;
        let reply = if sub == "force" && !rest.is_empty() {
            self.topic = Some(rest.to_string());
            broadcast = true;
            format!("Topic forced to: {rest}")
        } else if sub == "clear" || sub == "off" {
            match self.topic.take() {
                Some(_) => "Topic cleared".to_string(),
                None => "The topic has not been set; There is nothing to clear".to_string(),
            }
        } else if self
            .topic
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(arg))
        {
            format!("The topic is already set to: {arg}")
        } else if self.topic.is_none() {
            self.topic = Some(arg.to_string());
            broadcast = true;
            format!("Topic set to: {arg}")
        } else {
            "Topic is already set; Use /topic force to change it".to_string()
        };

        ctx.outbound.enqueue(reply_to, reply, false);
        if broadcast {
            self.send_topic(Recipient::EveryoneInMeeting, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::ScriptedExecutor;
    use crate::participant::Participant;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    struct Harness {
        roster: Roster,
        allow: AllowList,
        automation: AutomationConfig,
        actions: ActionQueue,
        admission: AdmissionController,
        outbound: OutboundQueue,
        executor: ScriptedExecutor,
        commands: ChatCommands,
    }

    impl Harness {
        fn new() -> Self {
            let mut me = Participant::new("UsherBot", ParticipantStatus::Attending);
            me.is_me = true;
            me.role = ParticipantRole::Host;
            let mut bob = Participant::new("Bob", ParticipantStatus::Attending);
            bob.video_status = VideoStatus::On;
            let roster = [
                me,
                Participant::new("Jane Doe", ParticipantStatus::Attending),
                bob,
                Participant::new("Wally", ParticipantStatus::Waiting),
            ]
            .into_iter()
            .collect();
            Self {
                roster,
                allow: AllowList::parse("jane doe^\nbob\n"),
                automation: AutomationConfig::default(),
                actions: ActionQueue::new(),
                admission: AdmissionController::new(),
                outbound: OutboundQueue::new(),
                executor: ScriptedExecutor::default(),
                commands: ChatCommands::new(),
            }
        }

        fn send(&mut self, from: &str, to: &str, private: bool, text: &str) -> bool {
            let msg = ChatMessage {
                from: from.to_string(),
                to: Recipient::from_label(to),
                is_private: private,
                timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap(),
                text: text.to_string(),
            };
            let mut ctx = CommandContext {
                roster: &mut self.roster,
                allow: &self.allow,
                automation: &mut self.automation,
                actions: &mut self.actions,
                admission: &mut self.admission,
                outbound: &mut self.outbound,
                executor: &mut self.executor,
                now: msg.timestamp,
                offset: FixedOffset::east_opt(0).unwrap(),
            };
            self.commands.handle(&msg, &mut ctx).unwrap()
        }

        fn admin(&mut self, text: &str) -> bool {
            self.send("Jane Doe", "Me", true, text)
        }

        fn replies(&self) -> Vec<(String, String)> {
            self.outbound
                .iter()
                .map(|m| (m.to.label().to_string(), m.text.clone()))
                .collect()
        }

        fn last_reply(&self) -> String {
            self.outbound.iter().last().map(|m| m.text.clone()).unwrap_or_default()
        }
    }

    #[test]
    fn test_public_topic_query_needs_my_name() {
        let mut h = Harness::new();
        assert!(!h.send("Bob", "Everyone", false, "what is the topic?"));
        assert!(h.send("Bob", "Everyone", false, "usherbot what is the topic?"));
        assert_eq!(
            h.replies(),
            vec![(
                Recipient::EVERYONE_IN_MEETING.to_string(),
                "The topic has not been set".to_string()
            )]
        );
    }

    #[test]
    fn test_topic_lifecycle() {
        let mut h = Harness::new();
        h.admin("/topic Step 3");
        assert_eq!(h.replies()[0].1, "Topic set to: Step 3");
        assert_eq!(
            h.replies()[1],
            (
                Recipient::EVERYONE_IN_MEETING.to_string(),
                "Tonight's topic: Step 3".to_string()
            )
        );

        h.admin("/topic Step 4");
        assert_eq!(h.last_reply(), "Topic is already set; Use /topic force to change it");

        h.admin("/topic step 3");
        assert_eq!(h.last_reply(), "The topic is already set to: step 3");

        h.admin("/topic force Step 4");
        assert_eq!(h.commands.topic(), Some("Step 4"));

        h.admin("/topic clear");
        h.admin("/topic off");
        assert_eq!(h.last_reply(), "The topic has not been set; There is nothing to clear");
    }

    #[test]
    fn test_non_admin_ignored() {
        let mut h = Harness::new();
        assert!(!h.send("Bob", "Me", true, "/mute Jane Doe"));
        assert!(h.outbound.is_empty());
        assert!(h.actions.is_empty());
    }

    #[test]
    fn test_modes() {
        let mut h = Harness::new();
        h.admin("/citadel on");
        assert_eq!(h.last_reply(), "Citadel mode has been changed to on");
        assert!(!h.automation.flags.contains(AutomationFlags::ADMIT_OTHERS));
        h.admin("/citadel on");
        assert_eq!(h.last_reply(), "Citadel mode is already on");

        h.admin("/lockdown on");
        assert!(!h.automation.flags.contains(AutomationFlags::ADMIT_KNOWN));
        h.admin("/lockdown off");
        assert!(h.automation.flags.contains(Mode::lockdown_flags()));

        h.admin("/passive on");
        assert_eq!(h.automation.flags, passive_flags());
        h.admin("/passive off");
        assert_eq!(h.automation.flags, AutomationFlags::ALL);

        h.admin("/pause maybe");
        assert_eq!(
            h.last_reply(),
            "Sorry, the pause command requires either on or off as a parameter"
        );
    }

    #[test]
    fn test_participant_commands_queue_actions() {
        let mut h = Harness::new();
        h.admin("/promote Bob");
        h.admin("/mute me");
        h.admin("/rename Bob to Robert");

        let bob: Vec<String> = h.actions.pending_for("Bob").map(|a| a.action.to_string()).collect();
        assert_eq!(bob.len(), 2);
        assert!(h.actions.has_pending("Jane Doe"));
    }

    #[test]
    fn test_target_checks() {
        let mut h = Harness::new();
        h.admin("/mute Nobody");
        assert!(h.last_reply().starts_with("Sorry, I don't see anyone named"));

        h.admin("/mute UsherBot");
        assert_eq!(h.last_reply(), "Sorry, I can't do that to myself");

        h.admin("/mute Wally");
        assert_eq!(h.last_reply(), "Sorry, \"Wally\" is not attending");

        h.admin("/demote Bob");
        assert_eq!(h.last_reply(), "Sorry, \"Bob\" isn't Co-Host so cannot be demoted");

        h.admin("/frobnicate Bob");
        assert_eq!(h.last_reply(), "Sorry, I don't know the command \"frobnicate\"");
        assert!(h.actions.is_empty());
    }

    #[test]
    fn test_admit_command() {
        let mut h = Harness::new();
        h.admin("/admit Wally");
        assert_eq!(h.last_reply(), "Admitting \"Wally\"");
        assert_eq!(h.executor.calls, vec![("Wally".to_string(), "Admit".to_string())]);
        assert_eq!(h.roster.get("Wally").map(|p| p.status), Some(ParticipantStatus::Joining));
    }

    #[test]
    fn test_say_and_speak_broadcast() {
        let mut h = Harness::new();
        h.admin("/say hello all");
        h.admin("/speak welcome");
        let speak: Vec<bool> = h.outbound.iter().map(|m| m.speak).collect();
        assert_eq!(speak, vec![false, true]);
        assert!(h.outbound.iter().all(|m| m.to == Recipient::EveryoneInMeeting));
    }
}
