//! Incremental transcript scanning.
//!
//! The UI appends lines to the newest message control when the same author
//! keeps typing, so the scanner remembers the last text it saw for the
//! current control and only reports what was appended since.

use crate::chat::{normalize_text, ChatMessage, MessageHandle, Recipient};
use crate::error::ChatError;
use crate::surface::TranscriptSource;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, error, warn};

/// Scans without any message before the backlog is considered empty.
const BACKLOG_SCANS: u32 = 4;

fn message_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?s)^From (.+?) to (.+?):\s*(\(Direct Message\)|\(Privately\)|)\s*",
            r"(\d{1,2}:\d{2} [AP]M)\r?\n(.*)$",
        ))
        .expect("message pattern is valid")
    })
}

/// A parsed transcript entry before delta extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub from: String,
    pub to: String,
    pub is_private: bool,
    pub time: NaiveTime,
    pub body: String,
}

pub fn parse_message(text: &str) -> Option<RawMessage> {
    let caps = message_re().captures(text)?;
    let time = NaiveTime::parse_from_str(&caps[4], "%I:%M %p").ok()?;
    Some(RawMessage {
        from: caps[1].to_string(),
        to: caps[2].to_string(),
        is_private: !caps[3].is_empty(),
        time,
        body: caps[5].to_string(),
    })
}

/// Place a wall-clock `time` on the most recent day where it is not in the
/// future relative to `now`.
pub fn resolve_time(time: NaiveTime, now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_now = now.with_timezone(&offset);
    let naive = local_now.date_naive().and_time(time);
    let stamp = offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);
    if stamp > now {
        stamp - Duration::days(1)
    } else {
        stamp
    }
}

#[derive(Debug)]
pub struct TranscriptScanner {
    current: Option<MessageHandle>,
    last_text: Option<String>,
    first_scan: bool,
    scan_count: u32,
    offset: FixedOffset,
}

impl TranscriptScanner {
    /// `offset` is the timezone the UI prints message times in.
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            current: None,
            last_text: None,
            first_scan: true,
            scan_count: 0,
            offset,
        }
    }

    /// True until the backlog present at startup has been swallowed.
    pub fn is_first_scan(&self) -> bool {
        self.first_scan
    }

    pub fn current(&self) -> Option<MessageHandle> {
        self.current
    }

    /// Adopt a message handle discovered by a UI focus event. Ignored once
    /// the scanner is already tracking a message.
    pub fn offer_handle(&mut self, handle: MessageHandle) {
        if self.current.is_none() {
            debug!(handle = handle.0, "adopting transcript handle");
            self.current = Some(handle);
        }
    }

    /// Read everything appended since the previous scan into `out`.
    ///
    /// Messages found before an error stay in `out`. On the first pass the
    /// backlog is consumed without being reported.
    pub fn scan(
        &mut self,
        source: &mut dyn TranscriptSource,
        now: DateTime<Utc>,
        out: &mut Vec<ChatMessage>,
    ) -> Result<(), ChatError> {
        self.scan_count += 1;

        let mut handle = match self.current {
            Some(h) => h,
            None => match source.first_message()? {
                Some(h) => {
                    self.current = Some(h);
                    h
                }
                None => {
                    if self.first_scan && self.scan_count >= BACKLOG_SCANS {
                        debug!("no chat backlog");
                        self.first_scan = false;
                    }
                    return Ok(());
                }
            },
        };

        loop {
            let raw_text = source.message_text(handle)?;
            let Some(raw) = parse_message(&raw_text) else {
                warn!(text = %raw_text, "unrecognized chat message");
                if let Some(next) = source.next_message(handle)? {
                    self.current = Some(next);
                    self.last_text = None;
                }
                return Err(ChatError::TranscriptFormat(raw_text));
            };

            let body = normalize_text(&raw.body);
            let delta = match self.last_text.as_deref() {
                None => body.clone(),
                Some(last) if last == body => String::new(),
                Some(last) if body.starts_with(last) => body[last.len()..].trim().to_string(),
                Some(last) => {
                    error!(previous = %last, current = %body, "chat message text diverged");
                    let previous = last.to_string();
                    self.last_text = Some(body.clone());
                    return Err(ChatError::TranscriptDiverged {
                        previous,
                        current: body,
                    });
                }
            };

            if delta.is_empty() {
                match source.next_message(handle)? {
                    Some(next) => {
                        handle = next;
                        self.current = Some(next);
                        self.last_text = None;
                        continue;
                    }
                    None => break,
                }
            }

            if self.first_scan {
                debug!(from = %raw.from, "skipping chat backlog");
            } else {
                out.push(ChatMessage {
                    from: raw.from,
                    to: Recipient::from_label(&raw.to),
                    is_private: raw.is_private,
                    timestamp: resolve_time(raw.time, now, self.offset),
                    text: delta,
                });
            }
            self.last_text = Some(body);
        }

        self.first_scan = false;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::SurfaceError;
    use pretty_assertions::assert_eq;

    /// Transcript whose messages can be appended to and extended.
    #[derive(Default)]
    pub(crate) struct FakeTranscript {
        pub messages: Vec<String>,
    }

    impl FakeTranscript {
        pub(crate) fn push(&mut self, from: &str, to: &str, time: &str, body: &str) {
            self.messages.push(format!("From {from} to {to}: {time}\n{body}"));
        }

        pub(crate) fn append_to_last(&mut self, line: &str) {
            if let Some(last) = self.messages.last_mut() {
                last.push('\n');
                last.push_str(line);
            }
        }
    }

    impl TranscriptSource for FakeTranscript {
        fn first_message(&mut self) -> Result<Option<MessageHandle>, SurfaceError> {
            Ok((!self.messages.is_empty()).then_some(MessageHandle(0)))
        }

        fn message_text(&mut self, handle: MessageHandle) -> Result<String, SurfaceError> {
            self.messages
                .get(handle.0 as usize)
                .cloned()
                .ok_or_else(|| SurfaceError::StaleHandle(format!("message {}", handle.0)))
        }

        fn next_message(
            &mut self,
            handle: MessageHandle,
        ) -> Result<Option<MessageHandle>, SurfaceError> {
            let next = handle.0 + 1;
            Ok(((next as usize) < self.messages.len()).then_some(MessageHandle(next)))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 19, 30, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn scan(scanner: &mut TranscriptScanner, src: &mut FakeTranscript) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        scanner.scan(src, now(), &mut out).unwrap();
        out
    }

    #[test]
    fn test_parse_message() {
        let raw =
            parse_message("From Jane Doe to Me: (Direct Message) 7:05 PM\r\nhi there").unwrap();
        assert_eq!(raw.from, "Jane Doe");
        assert_eq!(raw.to, "Me");
        assert!(raw.is_private);
        assert_eq!(raw.time, NaiveTime::from_hms_opt(19, 5, 0).unwrap());
        assert_eq!(raw.body, "hi there");

        let raw = parse_message("From Me to Everyone: 12:00 AM\nline one\nline two").unwrap();
        assert!(!raw.is_private);
        assert_eq!(raw.body, "line one\nline two");

        assert!(parse_message("garbage").is_none());
    }

    #[test]
    fn test_resolve_time_rolls_back_a_day() {
        let t = resolve_time(NaiveTime::from_hms_opt(19, 0, 0).unwrap(), now(), utc());
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap());

        let t = resolve_time(NaiveTime::from_hms_opt(23, 50, 0).unwrap(), now(), utc());
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 4, 30, 23, 50, 0).unwrap());
    }

    #[test]
    fn test_backlog_is_swallowed() {
        let mut src = FakeTranscript::default();
        src.push("Bob", "Everyone", "7:00 PM", "old news");
        let mut scanner = TranscriptScanner::new(utc());

        assert!(scan(&mut scanner, &mut src).is_empty());
        assert!(!scanner.is_first_scan());

        src.push("Bob", "Everyone", "7:01 PM", "fresh");
        let out = scan(&mut scanner, &mut src);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "fresh");
        assert_eq!(out[0].to, Recipient::EveryoneInMeeting);
    }

    #[test]
    fn test_empty_transcript_ends_backlog_after_four_scans() {
        let mut src = FakeTranscript::default();
        let mut scanner = TranscriptScanner::new(utc());
        for _ in 0..3 {
            scan(&mut scanner, &mut src);
            assert!(scanner.is_first_scan());
        }
        scan(&mut scanner, &mut src);
        assert!(!scanner.is_first_scan());

        src.push("Bob", "Me", "7:10 PM", "hello bot");
        let out = scan(&mut scanner, &mut src);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, Recipient::from("Me"));
    }

    #[test]
    fn test_appended_lines_reported_once() {
        let mut src = FakeTranscript::default();
        let mut scanner = TranscriptScanner::new(utc());
        scan(&mut scanner, &mut src);
        for _ in 0..3 {
            scan(&mut scanner, &mut src);
        }

        src.push("Bob", "Everyone", "7:10 PM", "first");
        assert_eq!(scan(&mut scanner, &mut src)[0].text, "first");

        src.append_to_last("second");
        src.append_to_last("third");
        let out = scan(&mut scanner, &mut src);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "second\nthird");

        assert!(scan(&mut scanner, &mut src).is_empty());
    }

    #[test]
    fn test_divergence_resyncs() {
        let mut src = FakeTranscript::default();
        src.push("Bob", "Everyone", "7:00 PM", "hello");
        let mut scanner = TranscriptScanner::new(utc());
        scan(&mut scanner, &mut src);

        src.messages[0] = "From Bob to Everyone: 7:00 PM\nsomething else".to_string();
        let mut out = Vec::new();
        let err = scanner.scan(&mut src, now(), &mut out).unwrap_err();
        assert!(matches!(err, ChatError::TranscriptDiverged { .. }));

        // Baseline is the new text, so nothing is reported twice
        assert!(scan(&mut scanner, &mut src).is_empty());
    }

    #[test]
    fn test_offer_handle_only_when_idle() {
        let mut scanner = TranscriptScanner::new(utc());
        scanner.offer_handle(MessageHandle(7));
        scanner.offer_handle(MessageHandle(9));
        assert_eq!(scanner.current(), Some(MessageHandle(7)));
    }
}
