//! Source parsing.
//!
//! Turns conversation export files into a lazy, ordered stream of
//! [`Message`](crate::models::Message)s.
//!
//! # Supported Formats
//!
//! | Format | Detected by | Notes |
//! |--------|-------------|-------|
//! | Tree export | leading `[` or `{` | Message-tree mappings or flat message lists |
//! | Transcript | anything else | `Speaker: text` lines, newest-first detection |
//!
//! # Example
//!
//! ```rust,ignore
//! use mnemos::io::{Messages, ParseOptions, open_message_source};
//!
//! let source = open_message_source(path, "chat-2024", ParseOptions::default())?;
//! for message in Messages::new(source) {
//!     let message = message?;
//!     println!("{}: {}", message.role, message.content);
//! }
//! ```

pub mod formats;
pub mod traits;

// Re-exports for convenience
pub use formats::{
    ParseOptions, ReverseDetection, SourceFormat, TranscriptSource, TreeExportSource,
    create_message_source, open_message_source,
};
pub use traits::{MessageSource, Messages};

/// Counts the messages a source yields.
///
/// Used to size an import before its first batch.
///
/// # Errors
///
/// Propagates the first parse error.
pub fn count_messages(source: impl MessageSource) -> crate::Result<u64> {
    Messages::new(source).try_fold(0_u64, |count, message| message.map(|_| count + 1))
}
