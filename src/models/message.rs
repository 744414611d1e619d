//! Parsed conversational turns.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The model side of the conversation.
    Assistant,
    /// System prompts, tool output, and any other author.
    System,
    /// A speaker the parser could not attribute (e.g. `@name:` markers).
    #[default]
    Unknown,
}

impl Role {
    /// Returns the role as a lowercase string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Unknown => "unknown",
        }
    }

    /// Normalizes an export author role.
    ///
    /// Structured exports only distinguish `user` and `assistant`; every other
    /// author (`system`, `tool`, plugin names) collapses to [`Role::System`].
    #[must_use]
    pub fn from_export_author(author: &str) -> Self {
        match author.trim().to_lowercase().as_str() {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            _ => Self::System,
        }
    }

    /// Parses a stored role string, mapping anything unrecognized to `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Time a message was written, as the source expressed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Unix seconds, possibly fractional.
    Unix(f64),
    /// Textual date-time (ISO-8601 or a transcript prefix).
    Text(String),
}

impl Timestamp {
    /// Returns the timestamp as Unix seconds when it can be interpreted.
    ///
    /// Text timestamps are tried as RFC 3339 first, then as naive UTC
    /// date-times in a few common layouts.
    #[must_use]
    pub fn as_unix_seconds(&self) -> Option<f64> {
        match self {
            Self::Unix(secs) => secs.is_finite().then_some(*secs),
            Self::Text(text) => parse_text_timestamp(text).map(|dt| {
                #[allow(clippy::cast_precision_loss)]
                let millis = dt.timestamp_millis() as f64;
                millis / 1000.0
            }),
        }
    }

    /// Renders the timestamp for storage.
    ///
    /// Unix values become RFC 3339 when representable; text is kept verbatim.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        match self {
            Self::Unix(secs) => {
                #[allow(clippy::cast_possible_truncation)]
                let millis = (secs * 1000.0).round() as i64;
                DateTime::<Utc>::from_timestamp_millis(millis)
                    .map_or_else(|| secs.to_string(), |dt| dt.to_rfc3339())
            },
            Self::Text(text) => text.clone(),
        }
    }
}

const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y, %H:%M:%S",
    "%m/%d/%Y, %H:%M",
];

fn parse_text_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim().trim_start_matches('[').trim_end_matches(']').trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .map(|naive| naive.and_utc())
}

/// One parsed conversational turn.
///
/// Created once by a parser and consumed once by the chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker.
    pub role: Role,
    /// Text of the turn, never empty after trimming.
    pub content: String,
    /// When the turn was written, if the source says.
    pub timestamp: Option<Timestamp>,
    /// Source-local identifier, if the format provides one.
    pub message_id: Option<String>,
    /// Groups messages of one conversation.
    pub conversation_id: String,
    /// Zero-based position in the parsed stream.
    pub offset: u64,
}

impl Message {
    /// Creates a message with no timestamp or source id.
    #[must_use]
    pub fn new(
        role: Role,
        content: impl Into<String>,
        conversation_id: impl Into<String>,
        offset: u64,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
            message_id: None,
            conversation_id: conversation_id.into(),
            offset,
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Option<Timestamp>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the source-local id.
    #[must_use]
    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }
}
