//! Core trait for message sources.
//!
//! Defines the [`MessageSource`] trait that format parsers implement, and the
//! [`Messages`] adapter that exposes any source as an iterator.

use crate::Result;
use crate::models::Message;

/// Lazy, ordered, finite stream of parsed messages.
///
/// Implementations read their input incrementally and are not restartable:
/// re-reading a file means opening a new source.
pub trait MessageSource {
    /// Returns the next message, or `None` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is malformed or cannot be read. A source
    /// that returned an error must not be polled again.
    fn next(&mut self) -> Result<Option<Message>>;

    /// Identity of the file being parsed.
    fn source_name(&self) -> &str;
}

impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    fn next(&mut self) -> Result<Option<Message>> {
        (**self).next()
    }

    fn source_name(&self) -> &str {
        (**self).source_name()
    }
}

/// Iterator over a [`MessageSource`].
///
/// Yields each error once and then stops.
pub struct Messages<S> {
    source: S,
    done: bool,
}

impl<S: MessageSource> Messages<S> {
    /// Wraps a source.
    pub const fn new(source: S) -> Self {
        Self {
            source,
            done: false,
        }
    }
}

impl<S: MessageSource> Iterator for Messages<S> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}
