//! Free-form chat transcript parser.
//!
//! A line such as `User: hello` or `[2024-01-02 10:00] Assistant: hi` opens a
//! message; following non-blank lines are appended to it; a blank line or the
//! next speaker marker closes it.
//!
//! Transcripts exported newest-first are detected by a date density heuristic
//! and reversed entry by entry, so the yielded stream is always oldest-first.
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use super::encoding::LineDecoder;
use crate::io::MessageSource;
use crate::models::{Message, Role, Timestamp};
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;
use std::sync::LazyLock;

/// Lines scanned by the newest-first heuristic.
pub const REVERSE_SCAN_LINES: usize = 100;

/// Date-like matches above which a transcript counts as newest-first.
pub const REVERSE_DATE_THRESHOLD: usize = 5;

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        ^\s*
        (?:
            (?P<ts>
                \[[^\]]{1,40}\]
              | \d{4}-\d{2}-\d{2}[T\ ]\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?
              | \d{1,2}/\d{1,2}/\d{2,4},?\ \d{1,2}:\d{2}(?::\d{2})?(?:\ ?[AP]M)?
            )
            \s*(?:-\s*)?
        )?
        (?P<role>user|human|you|me|assistant|ai|bot|chatgpt|claude|gpt|system|@[\w.\-]+)
        \s*:\s?
        (?P<text>.*)$",
    )
    .expect("static regex: speaker marker")
});

static DATE_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4})\b")
        .expect("static regex: date-like substring")
});

/// How newest-first transcripts are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReverseDetection {
    /// Use the date density heuristic.
    #[default]
    Auto,
    /// Always read top to bottom.
    Never,
    /// Always treat the file as newest-first.
    Always,
}

impl FromStr for ReverseDetection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "never" | "off" | "false" => Ok(Self::Never),
            "always" | "on" | "true" => Ok(Self::Always),
            _ => Err(Error::InvalidInput(format!(
                "Unknown reverse detection mode: {s}"
            ))),
        }
    }
}

impl fmt::Display for ReverseDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Never => write!(f, "never"),
            Self::Always => write!(f, "always"),
        }
    }
}

/// Maps a speaker marker to a role.
fn marker_role(marker: &str) -> Role {
    if marker.starts_with('@') {
        return Role::Unknown;
    }
    match marker.to_lowercase().as_str() {
        "user" | "human" | "you" | "me" => Role::User,
        "system" => Role::System,
        _ => Role::Assistant,
    }
}

/// Counts date-like substrings across `lines`.
pub fn count_date_like<'a>(lines: impl IntoIterator<Item = &'a str>) -> usize {
    lines
        .into_iter()
        .map(|line| DATE_LIKE.find_iter(line).count())
        .sum()
}

/// Returns true when the leading lines look newest-first.
pub fn looks_newest_first<'a>(lines: impl IntoIterator<Item = &'a str>) -> bool {
    count_date_like(lines.into_iter().take(REVERSE_SCAN_LINES)) > REVERSE_DATE_THRESHOLD
}

/// Parsed speaker marker.
struct Marker {
    role: Role,
    text: String,
    timestamp: Option<Timestamp>,
}

fn parse_marker(line: &str) -> Option<Marker> {
    let caps = MARKER.captures(line)?;
    let role = marker_role(caps.name("role")?.as_str());
    let text = caps.name("text").map_or("", |m| m.as_str()).to_string();
    let timestamp = caps.name("ts").map(|m| {
        let raw = m.as_str().trim_start_matches('[').trim_end_matches(']');
        Timestamp::Text(raw.trim().to_string())
    });
    Some(Marker {
        role,
        text,
        timestamp,
    })
}

/// Splits lines into entries: a marker line with its continuation lines, or
/// a blank-separated paragraph.
fn split_entries(lines: impl IntoIterator<Item = String>) -> Vec<Vec<String>> {
    let mut entries = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            if !current.is_empty() {
                entries.push(std::mem::take(&mut current));
            }
        } else if MARKER.is_match(&line) {
            if !current.is_empty() {
                entries.push(std::mem::take(&mut current));
            }
            current.push(line);
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        entries.push(current);
    }
    entries
}

/// Reorders newest-first lines into oldest-first lines.
///
/// Entries are kept intact and separated by blank lines so the walker closes
/// each one on its own.
pub fn reverse_entries(lines: impl IntoIterator<Item = String>) -> VecDeque<String> {
    let mut out = VecDeque::new();
    for entry in split_entries(lines).into_iter().rev() {
        out.extend(entry);
        out.push_back(String::new());
    }
    out
}

struct OpenMessage {
    role: Role,
    lines: Vec<String>,
    timestamp: Option<Timestamp>,
}

enum Feed<R> {
    /// Lines still come from the file, after draining `buffered`.
    Streaming {
        buffered: VecDeque<String>,
        decoder: LineDecoder<R>,
    },
    /// The whole (reordered) file is in memory.
    Buffered(VecDeque<String>),
}

/// Streaming transcript source.
pub struct TranscriptSource<R> {
    feed: Option<Feed<R>>,
    pending_decoder: Option<(LineDecoder<R>, ReverseDetection)>,
    open: Option<OpenMessage>,
    last_role: Option<Role>,
    source_name: String,
    next_offset: u64,
    newest_first: bool,
}

impl<R: BufRead> TranscriptSource<R> {
    /// Creates a transcript source.
    ///
    /// Nothing is read until the first call to [`MessageSource::next`].
    pub fn new(reader: R, source_name: impl Into<String>, reverse: ReverseDetection) -> Self {
        let source_name = source_name.into();
        Self {
            feed: None,
            pending_decoder: Some((LineDecoder::new(reader, source_name.clone()), reverse)),
            open: None,
            last_role: None,
            source_name,
            next_offset: 0,
            newest_first: false,
        }
    }

    /// Whether the file was read as newest-first.
    ///
    /// Only meaningful once the first message has been requested.
    pub const fn is_newest_first(&self) -> bool {
        self.newest_first
    }

    fn start(&mut self) -> Result<()> {
        let Some((mut decoder, mode)) = self.pending_decoder.take() else {
            return Ok(());
        };

        let mut head = VecDeque::new();
        if mode == ReverseDetection::Auto {
            while head.len() < REVERSE_SCAN_LINES {
                match decoder.next_line()? {
                    Some(line) => head.push_back(line),
                    None => break,
                }
            }
        }

        self.newest_first = match mode {
            ReverseDetection::Auto => looks_newest_first(head.iter().map(String::as_str)),
            ReverseDetection::Never => false,
            ReverseDetection::Always => true,
        };

        if self.newest_first {
            tracing::info!(source = %self.source_name, "Transcript looks newest-first, reversing");
            let mut all: Vec<String> = head.into();
            while let Some(line) = decoder.next_line()? {
                all.push(line);
            }
            self.feed = Some(Feed::Buffered(reverse_entries(all)));
        } else {
            self.feed = Some(Feed::Streaming {
                buffered: head,
                decoder,
            });
        }
        Ok(())
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        match self.feed.as_mut() {
            Some(Feed::Streaming { buffered, decoder }) => match buffered.pop_front() {
                Some(line) => Ok(Some(line)),
                None => decoder.next_line(),
            },
            Some(Feed::Buffered(lines)) => Ok(lines.pop_front()),
            None => Ok(None),
        }
    }

    /// Closes the open message, returning it when it has content.
    fn close(&mut self) -> Option<Message> {
        let open = self.open.take()?;
        let content = open.lines.join("\n");
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let message = Message::new(open.role, content, self.source_name.clone(), self.next_offset)
            .with_timestamp(open.timestamp);
        self.next_offset += 1;
        Some(message)
    }

    /// Feeds one line, returning a message if the line closed one.
    fn feed_line(&mut self, line: String) -> Option<Message> {
        if line.trim().is_empty() {
            return self.close();
        }

        if let Some(marker) = parse_marker(&line) {
            let closed = self.close();
            self.last_role = Some(marker.role);
            self.open = Some(OpenMessage {
                role: marker.role,
                lines: vec![marker.text],
                timestamp: marker.timestamp,
            });
            return closed;
        }

        match self.open.as_mut() {
            Some(open) => open.lines.push(line),
            None => {
                self.open = Some(OpenMessage {
                    role: self.last_role.unwrap_or(Role::Assistant),
                    lines: vec![line],
                    timestamp: None,
                });
            },
        }
        None
    }
}

impl<R: BufRead> MessageSource for TranscriptSource<R> {
    fn next(&mut self) -> Result<Option<Message>> {
        self.start()?;
        loop {
            match self.next_line()? {
                Some(line) => {
                    if let Some(message) = self.feed_line(line) {
                        return Ok(Some(message));
                    }
                },
                None => return Ok(self.close()),
            }
        }
    }

    fn source_name(&self) -> &str {
        &self.source_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_case::test_case;

    fn parse(text: &str) -> Vec<Message> {
        parse_with(text, ReverseDetection::Auto)
    }

    fn parse_with(text: &str, mode: ReverseDetection) -> Vec<Message> {
        let mut source = TranscriptSource::new(Cursor::new(text.to_string()), "chat.txt", mode);
        let mut out = Vec::new();
        while let Some(message) = source.next().unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_two_speakers() {
        let messages = parse("User: hi\nAssistant: hello\n");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "hello");
        assert!(messages.iter().all(|m| m.conversation_id == "chat.txt"));
        assert_eq!(messages[1].offset, 1);
    }

    #[test_case("Human: x", Role::User)]
    #[test_case("you: x", Role::User)]
    #[test_case("AI: x", Role::Assistant)]
    #[test_case("ChatGPT: x", Role::Assistant)]
    #[test_case("Claude: x", Role::Assistant)]
    #[test_case("SYSTEM: x", Role::System)]
    #[test_case("@alice: x", Role::Unknown)]
    fn test_marker_roles(line: &str, expected: Role) {
        let messages = parse(line);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, expected);
        assert_eq!(messages[0].content, "x");
    }

    #[test]
    fn test_continuation_lines_join() {
        let messages = parse("User: first\nsecond line\nthird line\n\nAssistant: ok");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first\nsecond line\nthird line");
    }

    #[test]
    fn test_no_marker_is_implicit_assistant() {
        let messages = parse("just some notes\nmore notes\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "just some notes\nmore notes");
    }

    #[test]
    fn test_unmarked_paragraph_after_blank_keeps_last_role() {
        let messages = parse("User: question\n\nfollow-up paragraph\n");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "follow-up paragraph");
    }

    #[test]
    fn test_empty_marker_collects_following_lines() {
        let messages = parse("Assistant:\nline one\nline two\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "line one\nline two");
    }

    #[test]
    fn test_blank_only_messages_are_dropped() {
        let messages = parse("User:\n\n   \nAssistant: hi");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
    }

    #[test]
    fn test_timestamp_prefix() {
        let messages = parse("[2024-01-02 10:00] User: hi");
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].timestamp,
            Some(Timestamp::Text("2024-01-02 10:00".to_string()))
        );
    }

    #[test]
    fn test_colon_in_prose_is_not_a_marker() {
        let messages = parse("User: see below\nNote: this is prose\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "see below\nNote: this is prose");
    }

    #[test]
    fn test_newest_first_is_reversed() {
        let text = (1..=6)
            .rev()
            .map(|day| format!("[2024-01-0{day} 10:00] User: message {day}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut source = TranscriptSource::new(Cursor::new(text), "log.txt", ReverseDetection::Auto);
        let mut contents = Vec::new();
        while let Some(message) = source.next().unwrap() {
            contents.push(message.content);
        }
        assert!(source.is_newest_first());
        assert_eq!(contents.first().map(String::as_str), Some("message 1"));
        assert_eq!(contents.last().map(String::as_str), Some("message 6"));
    }

    #[test]
    fn test_few_dates_read_forward() {
        let text = "[2024-01-02 10:00] User: b\n[2024-01-01 10:00] User: a\n";
        let messages = parse(text);
        assert_eq!(messages[0].content, "b");
    }

    #[test]
    fn test_reverse_modes_override_heuristic() {
        let text = "User: a\nAssistant: b\n";
        let always = parse_with(text, ReverseDetection::Always);
        assert_eq!(always[0].content, "b");
        let never = parse_with(text, ReverseDetection::Never);
        assert_eq!(never[0].content, "a");
    }

    #[test]
    fn test_reverse_keeps_entries_intact() {
        let lines = ["User: q2", "detail", "", "Assistant: a1", "User: q1"]
            .map(String::from);
        let reordered: Vec<String> = reverse_entries(lines).into();
        assert_eq!(
            reordered,
            vec!["User: q1", "", "Assistant: a1", "", "User: q2", "detail", ""]
        );
    }

    #[test]
    fn test_reverse_detection_from_str() {
        assert_eq!(
            "NEVER".parse::<ReverseDetection>().unwrap(),
            ReverseDetection::Never
        );
        assert!("sideways".parse::<ReverseDetection>().is_err());
    }

    #[test]
    fn test_undecodable_bytes_fail() {
        let bytes = b"User: hi\nUser: \x81\x8D\n".to_vec();
        let mut source = TranscriptSource::new(Cursor::new(bytes), "bad.txt", ReverseDetection::Never);
        assert!(source.next().is_err());
    }
}
