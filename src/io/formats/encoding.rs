//! Text decoding with a single Windows-1252 fallback.
//!
//! Input is decoded as strict UTF-8 until the first invalid sequence. From
//! there on, the rest of the file is decoded as Windows-1252. The five bytes
//! 1252 leaves undefined (`0x81`, `0x8D`, `0x8F`, `0x90`, `0x9D`) are
//! undecodable, which aborts the file.
//!
//! [`LineDecoder`] serves the line-oriented transcript parser;
//! [`Utf8FallbackReader`] re-encodes a byte stream as UTF-8 for `serde_json`.

use crate::{Error, Result};
use std::io::{self, BufRead, Read};

/// Code points for bytes `0x80..=0x9F`; `None` marks an undefined byte.
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

/// Decodes bytes as Windows-1252.
///
/// Returns the offending byte when it is undefined in the code page.
pub fn decode_windows_1252(bytes: &[u8]) -> std::result::Result<String, u8> {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        let ch = match byte {
            0x80..=0x9F => CP1252_HIGH[usize::from(byte - 0x80)].ok_or(byte)?,
            _ => char::from(byte),
        };
        out.push(ch);
    }
    Ok(out)
}

/// Which decoder is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEncoding {
    /// Strict UTF-8.
    Utf8,
    /// Windows-1252 after a UTF-8 failure.
    Windows1252,
}

/// Reads newline-terminated lines, switching encodings at most once.
pub struct LineDecoder<R> {
    reader: R,
    buf: Vec<u8>,
    line_number: usize,
    encoding: LineEncoding,
    source_name: String,
}

impl<R: BufRead> LineDecoder<R> {
    /// Creates a decoder over `reader`.
    pub fn new(reader: R, source_name: impl Into<String>) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_number: 0,
            encoding: LineEncoding::Utf8,
            source_name: source_name.into(),
        }
    }

    /// One-based number of the last line returned.
    pub const fn line_number(&self) -> usize {
        self.line_number
    }

    /// The active encoding.
    pub const fn encoding(&self) -> LineEncoding {
        self.encoding
    }

    /// Returns the next line without its terminator, or `None` at end of file.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(|e| Error::OperationFailed {
                operation: "read_transcript".to_string(),
                cause: e.to_string(),
            })?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;

        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        if self.line_number == 1 && self.buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.buf.drain(..3);
        }

        if self.encoding == LineEncoding::Utf8 {
            match std::str::from_utf8(&self.buf) {
                Ok(line) => return Ok(Some(line.to_string())),
                Err(e) => {
                    fallback_notice(&self.source_name, self.line_number, &e);
                    self.encoding = LineEncoding::Windows1252;
                },
            }
        }

        decode_windows_1252(&self.buf)
            .map(Some)
            .map_err(|byte| Error::Parse {
                source_name: self.source_name.clone(),
                line: self.line_number,
                cause: format!("byte 0x{byte:02X} is undecodable as UTF-8 or Windows-1252"),
            })
    }
}

fn count_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}

fn fallback_notice(source_name: &str, line: usize, error: &std::str::Utf8Error) {
    tracing::warn!(
        source = %source_name,
        line,
        error = %error,
        "Input is not valid UTF-8, falling back to Windows-1252"
    );
    metrics::counter!("ingest_encoding_fallbacks_total").increment(1);
}

/// Byte reader that yields UTF-8, switching to Windows-1252 at most once.
///
/// Reading stays streaming: only an incomplete trailing UTF-8 sequence is
/// carried between chunks of the inner reader. An undecodable byte surfaces
/// as an [`io::Error`] wrapping [`Error::Parse`].
pub struct Utf8FallbackReader<R> {
    inner: R,
    out: Vec<u8>,
    pos: usize,
    carry: Vec<u8>,
    encoding: LineEncoding,
    lines_seen: usize,
    source_name: String,
}

impl<R: BufRead> Utf8FallbackReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R, source_name: impl Into<String>) -> Self {
        Self {
            inner,
            out: Vec::new(),
            pos: 0,
            carry: Vec::new(),
            encoding: LineEncoding::Utf8,
            lines_seen: 0,
            source_name: source_name.into(),
        }
    }

    /// The active encoding.
    pub const fn encoding(&self) -> LineEncoding {
        self.encoding
    }

    fn decode_fallback(&self, bytes: &[u8]) -> io::Result<String> {
        decode_windows_1252(bytes).map_err(|byte| {
            let at = bytes.iter().position(|&b| b == byte).unwrap_or(0);
            let line = self.lines_seen + count_newlines(&bytes[..at]) + 1;
            io::Error::other(Error::Parse {
                source_name: self.source_name.clone(),
                line,
                cause: format!("byte 0x{byte:02X} is undecodable as UTF-8 or Windows-1252"),
            })
        })
    }

    /// Decodes the next chunk into `out`; false at end of input.
    fn refill(&mut self) -> io::Result<bool> {
        self.out.clear();
        self.pos = 0;

        let chunk = self.inner.fill_buf()?;
        let eof = chunk.is_empty();
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);
        let consumed = chunk.len();
        self.inner.consume(consumed);
        if bytes.is_empty() {
            return Ok(false);
        }

        if self.encoding == LineEncoding::Windows1252 {
            let decoded = self.decode_fallback(&bytes)?;
            self.lines_seen += count_newlines(&bytes);
            self.out = decoded.into_bytes();
            return Ok(true);
        }

        match std::str::from_utf8(&bytes).err() {
            None => {},
            Some(e) if e.error_len().is_none() && !eof => {
                self.carry = bytes.split_off(e.valid_up_to());
            },
            Some(e) => {
                let rest = bytes.split_off(e.valid_up_to());
                self.lines_seen += count_newlines(&bytes);
                fallback_notice(&self.source_name, self.lines_seen + 1, &e);
                self.encoding = LineEncoding::Windows1252;
                let decoded = self.decode_fallback(&rest)?;
                self.lines_seen += count_newlines(&rest);
                bytes.extend_from_slice(decoded.as_bytes());
                self.out = bytes;
                return Ok(true);
            },
        }

        self.lines_seen += count_newlines(&bytes);
        self.out = bytes;
        Ok(true)
    }
}

impl<R: BufRead> Read for Utf8FallbackReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for Utf8FallbackReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.out.len() {
            if !self.refill()? {
                break;
            }
        }
        Ok(&self.out[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.out.len());
    }
}

/// Recovers a decoding [`Error`] carried through an [`io::Error`].
pub fn unwrap_io_error(e: io::Error, operation: &str) -> Error {
    let cause = e.to_string();
    match e.into_inner().map(|inner| inner.downcast::<Error>()) {
        Some(Ok(decode)) => *decode,
        _ => Error::OperationFailed {
            operation: operation.to_string(),
            cause,
        },
    }
}
