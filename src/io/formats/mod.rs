//! Source format detection and parser construction.
//!
//! Each format implements [`MessageSource`].

pub mod encoding;
pub mod transcript;
pub mod tree_export;

pub use transcript::{ReverseDetection, TranscriptSource};
pub use tree_export::TreeExportSource;

use crate::io::traits::MessageSource;
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

/// Bytes sniffed by [`SourceFormat::detect_file`].
pub const SNIFF_LEN: usize = 4096;

/// Parsing strategy for a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// JSON export of message trees (or flat message lists).
    TreeExport,
    /// Line-oriented chat transcript.
    FreeformTranscript,
}

impl SourceFormat {
    /// Returns the format name used on the command line.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TreeExport => "tree",
            Self::FreeformTranscript => "transcript",
        }
    }

    /// Detects the format from leading bytes.
    ///
    /// Content whose first non-whitespace byte (after an optional UTF-8 BOM)
    /// is `[` or `{` is a tree export; anything else, including empty
    /// content, is a transcript.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mnemos::io::SourceFormat;
    ///
    /// assert_eq!(SourceFormat::detect(b"  [{}]"), SourceFormat::TreeExport);
    /// assert_eq!(SourceFormat::detect(b"User: hi"), SourceFormat::FreeformTranscript);
    /// ```
    #[must_use]
    pub fn detect(head: &[u8]) -> Self {
        let head = head.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(head);
        match head.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[' | b'{') => Self::TreeExport,
            _ => Self::FreeformTranscript,
        }
    }

    /// Detects the format of a file by sniffing its first [`SNIFF_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn detect_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::OperationFailed {
            operation: "open_source_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        file.take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| Error::OperationFailed {
                operation: "sniff_source_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        Ok(Self::detect(&head))
    }
}

impl FromStr for SourceFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tree" | "tree-export" | "export" | "json" => Ok(Self::TreeExport),
            "transcript" | "text" | "txt" => Ok(Self::FreeformTranscript),
            _ => Err(Error::InvalidInput(format!("Unknown source format: {s}"))),
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options that shape how a source is parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Forces a format instead of sniffing the file.
    pub format: Option<SourceFormat>,
    /// Newest-first handling for transcripts.
    pub reverse_detection: ReverseDetection,
}

/// Creates a message source over a reader.
pub fn create_message_source<R: BufRead + Send + 'static>(
    reader: R,
    format: SourceFormat,
    source_name: &str,
    reverse_detection: ReverseDetection,
) -> Box<dyn MessageSource + Send> {
    match format {
        SourceFormat::TreeExport => Box::new(TreeExportSource::new(reader, source_name)),
        SourceFormat::FreeformTranscript => Box::new(TranscriptSource::new(
            reader,
            source_name,
            reverse_detection,
        )),
    }
}

/// Opens a file and creates the matching message source.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or sniffed.
pub fn open_message_source(
    path: &Path,
    source_name: &str,
    options: ParseOptions,
) -> Result<Box<dyn MessageSource + Send>> {
    let format = match options.format {
        Some(format) => format,
        None => SourceFormat::detect_file(path)?,
    };
    let file = File::open(path).map_err(|e| Error::OperationFailed {
        operation: "open_source_file".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    tracing::debug!(path = %path.display(), format = %format, "Opened message source");
    Ok(create_message_source(
        BufReader::new(file),
        format,
        source_name,
        options.reverse_detection,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_case::test_case;

    #[test_case(b"[]", SourceFormat::TreeExport; "array")]
    #[test_case(b"\n\t {\"a\":1}", SourceFormat::TreeExport; "object after whitespace")]
    #[test_case(b"\xEF\xBB\xBF[", SourceFormat::TreeExport; "bom")]
    #[test_case(b"User: hi", SourceFormat::FreeformTranscript; "marker")]
    #[test_case(b"", SourceFormat::FreeformTranscript; "empty")]
    #[test_case(b"   \n", SourceFormat::FreeformTranscript; "blank")]
    fn test_detect(head: &[u8], expected: SourceFormat) {
        assert_eq!(SourceFormat::detect(head), expected);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(
            SourceFormat::from_str("TREE").unwrap(),
            SourceFormat::TreeExport
        );
        assert_eq!(
            SourceFormat::from_str("transcript").unwrap(),
            SourceFormat::FreeformTranscript
        );
        assert!(SourceFormat::from_str("csv").is_err());
    }

    #[test]
    fn test_detect_missing_file() {
        let err = SourceFormat::detect_file(Path::new("/nonexistent/chat.json")).unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));
    }

    #[test]
    fn test_open_detects_transcript() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "User: hi\nAssistant: hello").unwrap();

        let mut source =
            open_message_source(file.path(), "chat.txt", ParseOptions::default()).unwrap();
        assert_eq!(source.source_name(), "chat.txt");
        let first = source.next().unwrap().unwrap();
        assert_eq!(first.content, "hi");
    }
}
