//! Conversation-aware batching of a message stream.

use crate::models::Message;
use crate::{Error, Result};

/// A group of consecutive messages from one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Position among all batches of the import, across runs.
    pub index: u64,
    /// Stream offset of the first message.
    pub start_offset: u64,
    /// Messages in stream order; never empty.
    pub messages: Vec<Message>,
}

impl Batch {
    /// Number of messages in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the batch holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Stream offset one past the last message.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.messages
            .last()
            .map_or(self.start_offset, |m| m.offset + 1)
    }

    /// The conversation every message belongs to.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        self.messages
            .first()
            .map_or("", |m| m.conversation_id.as_str())
    }
}

/// Lazy batching adapter.
///
/// Holds at most one open batch plus one pending item. A batch closes when
/// it is full or when the next message belongs to another conversation.
/// Errors from the inner stream are yielded after the batch that preceded
/// them, in stream order.
pub struct Chunker<I> {
    messages: I,
    max_batch_size: usize,
    next_index: u64,
    pending: Option<Result<Message>>,
}

impl<I> std::fmt::Debug for Chunker<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("max_batch_size", &self.max_batch_size)
            .field("next_index", &self.next_index)
            .finish_non_exhaustive()
    }
}

/// Splits `messages` into batches numbered from `first_index`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `max_batch_size` is zero.
///
/// # Example
///
/// ```rust
/// use mnemos::models::{Message, Role};
/// use mnemos::services::chunk;
///
/// let messages = vec![
///     Ok(Message::new(Role::User, "hi", "a", 0)),
///     Ok(Message::new(Role::Assistant, "hello", "a", 1)),
///     Ok(Message::new(Role::User, "new topic", "b", 2)),
/// ];
/// let batches: Vec<_> = chunk(messages.into_iter(), 10, 0)?
///     .collect::<mnemos::Result<_>>()?;
/// assert_eq!(batches.len(), 2);
/// assert_eq!(batches[1].start_offset, 2);
/// # Ok::<(), mnemos::Error>(())
/// ```
pub fn chunk<I>(messages: I, max_batch_size: usize, first_index: u64) -> Result<Chunker<I>>
where
    I: Iterator<Item = Result<Message>>,
{
    if max_batch_size == 0 {
        return Err(Error::InvalidInput(
            "max_batch_size must be positive".to_string(),
        ));
    }
    Ok(Chunker {
        messages,
        max_batch_size,
        next_index: first_index,
        pending: None,
    })
}

impl<I> Chunker<I>
where
    I: Iterator<Item = Result<Message>>,
{
    fn pull(&mut self) -> Option<Result<Message>> {
        self.pending.take().or_else(|| self.messages.next())
    }

    fn emit(&mut self, messages: Vec<Message>) -> Batch {
        let batch = Batch {
            index: self.next_index,
            start_offset: messages.first().map_or(0, |m| m.offset),
            messages,
        };
        self.next_index += 1;
        batch
    }
}

impl<I> Iterator for Chunker<I>
where
    I: Iterator<Item = Result<Message>>,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut open: Vec<Message> = Vec::new();
        while let Some(item) = self.pull() {
            match item {
                Ok(message) => {
                    if open
                        .first()
                        .is_some_and(|first| first.conversation_id != message.conversation_id)
                    {
                        self.pending = Some(Ok(message));
                        break;
                    }
                    open.push(message);
                    if open.len() == self.max_batch_size {
                        break;
                    }
                },
                Err(e) if open.is_empty() => return Some(Err(e)),
                Err(e) => {
                    self.pending = Some(Err(e));
                    break;
                },
            }
        }

        if open.is_empty() {
            None
        } else {
            Some(Ok(self.emit(open)))
        }
    }
}
