//! Structured conversation export parser.
//!
//! Accepts a JSON array of conversations, a single conversation object, or a
//! stream of concatenated (or newline-delimited) conversation objects. Only
//! one conversation is held in memory at a time.
//!
//! A conversation is either a `mapping` of message nodes linked by parent
//! pointers, or a flat `messages` array. Mapping nodes are walked parent
//! before child, earliest `create_time` first among the nodes that are ready.
//!
//! Bytes pass through [`Utf8FallbackReader`], so an export with stray
//! Windows-1252 text is transcoded instead of rejected.

use super::encoding::{Utf8FallbackReader, unwrap_io_error};
use crate::io::MessageSource;
use crate::models::{Message, Role, Timestamp};
use crate::{Error, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::io::BufRead;

#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    mapping: Option<OrderedNodes>,
    #[serde(default)]
    messages: Option<Vec<FlatMessage>>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    parent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    author: Option<RawAuthor>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    create_time: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    #[serde(default)]
    role: String,
}

#[derive(Debug, Deserialize)]
struct FlatMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    author: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "create_time")]
    timestamp: Option<Timestamp>,
}

/// Mapping entries in document order.
#[derive(Debug, Default)]
struct OrderedNodes(Vec<(String, RawNode)>);

impl<'de> Deserialize<'de> for OrderedNodes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NodesVisitor;

        impl<'de> Visitor<'de> for NodesVisitor {
            type Value = OrderedNodes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of message nodes")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut nodes = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, node)) = map.next_entry::<String, RawNode>()? {
                    nodes.push((key, node));
                }
                Ok(OrderedNodes(nodes))
            }
        }

        deserializer.deserialize_map(NodesVisitor)
    }
}

/// Extracts text from a message `content` value.
///
/// Handles plain strings, `{"parts": [...]}` where parts are strings or
/// objects carrying `text`, and `{"text": "..."}`. Parts are joined with a
/// single space.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.trim().to_string(),
        Value::Object(obj) => {
            if let Some(Value::Array(parts)) = obj.get("parts") {
                join_parts(parts)
            } else if let Some(Value::String(text)) = obj.get("text") {
                text.trim().to_string()
            } else {
                String::new()
            }
        },
        Value::Array(parts) => join_parts(parts),
        _ => String::new(),
    }
}

fn join_parts(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            Value::String(text) => Some(text.trim()),
            Value::Object(obj) => obj.get("text").and_then(Value::as_str).map(str::trim),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sort key of a ready node: earliest time first, then mapping order.
///
/// Nodes without a usable time sort before timed siblings.
fn order_key(message: Option<&RawMessage>, ordinal: usize) -> Reverse<(i64, usize)> {
    #[allow(clippy::cast_possible_truncation)]
    let millis = message
        .and_then(|m| m.create_time.as_ref())
        .and_then(Timestamp::as_unix_seconds)
        .map_or(i64::MIN, |secs| (secs * 1000.0).round() as i64);
    Reverse((millis, ordinal))
}

/// Returns mapping indices in walk order.
///
/// A node is ready once its parent has been visited (or it has no parent in
/// the mapping). Nodes caught in parent cycles are released in mapping order
/// once nothing else is ready, so every node is visited exactly once.
fn walk_order(nodes: &[(String, RawNode)]) -> Vec<usize> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (key, _))| (key.as_str(), i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut heap = BinaryHeap::new();
    for (i, (_, node)) in nodes.iter().enumerate() {
        match node.parent.as_deref().and_then(|p| index.get(p)) {
            Some(&parent) if parent != i => children[parent].push(i),
            _ => heap.push(order_key(node.message.as_ref(), i)),
        }
    }

    let mut visited = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    let mut next_unvisited = 0;
    loop {
        while let Some(Reverse((_, i))) = heap.pop() {
            if std::mem::replace(&mut visited[i], true) {
                continue;
            }
            order.push(i);
            for &child in &children[i] {
                heap.push(order_key(nodes[child].1.message.as_ref(), child));
            }
        }
        while next_unvisited < nodes.len() && visited[next_unvisited] {
            next_unvisited += 1;
        }
        if next_unvisited == nodes.len() {
            break;
        }
        heap.push(order_key(
            nodes[next_unvisited].1.message.as_ref(),
            next_unvisited,
        ));
    }
    order
}

/// Pending message before its stream offset is assigned.
struct Turn {
    role: Role,
    content: String,
    timestamp: Option<Timestamp>,
    message_id: Option<String>,
}

fn mapping_turns(nodes: OrderedNodes) -> Vec<Turn> {
    let order = walk_order(&nodes.0);
    let mut slots: Vec<Option<(String, RawNode)>> = nodes.0.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .filter_map(|(key, node)| {
            let message = node.message?;
            let content = message.content.as_ref().map(content_text)?;
            if content.is_empty() {
                return None;
            }
            let role = Role::from_export_author(
                message.author.as_ref().map_or("", |a| a.role.as_str()),
            );
            Some(Turn {
                role,
                content,
                timestamp: message.create_time,
                message_id: message.id.or(Some(key)),
            })
        })
        .collect()
}

fn flat_turns(messages: Vec<FlatMessage>) -> Vec<Turn> {
    messages
        .into_iter()
        .filter_map(|m| {
            let content = m
                .content
                .as_ref()
                .map(content_text)
                .filter(|c| !c.is_empty())
                .or_else(|| m.text.as_deref().map(str::trim).map(str::to_string))?;
            if content.is_empty() {
                return None;
            }
            let author = m.role.or_else(|| {
                m.author.as_ref().and_then(|a| match a {
                    Value::String(role) => Some(role.clone()),
                    Value::Object(obj) => obj.get("role").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
            });
            Some(Turn {
                role: Role::from_export_author(author.as_deref().unwrap_or("")),
                content,
                timestamp: m.timestamp,
                message_id: m.id,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Not yet sniffed.
    Unknown,
    /// Inside a top-level array.
    Array,
    /// Concatenated top-level objects.
    Objects,
    /// Nothing left to read.
    Done,
}

/// Streaming tree export source.
pub struct TreeExportSource<R> {
    reader: Utf8FallbackReader<R>,
    layout: Layout,
    buffered: VecDeque<Message>,
    source_name: String,
    conversations_read: usize,
    next_offset: u64,
}

impl<R: BufRead> TreeExportSource<R> {
    /// Creates a tree export source over `reader`.
    pub fn new(reader: R, source_name: impl Into<String>) -> Self {
        let source_name = source_name.into();
        Self {
            reader: Utf8FallbackReader::new(reader, source_name.clone()),
            layout: Layout::Unknown,
            buffered: VecDeque::new(),
            source_name,
            conversations_read: 0,
            next_offset: 0,
        }
    }

    fn io_error(e: std::io::Error) -> Error {
        unwrap_io_error(e, "read_export")
    }

    fn parse_error(&self, cause: impl Into<String>) -> Error {
        Error::Parse {
            source_name: self.source_name.clone(),
            line: self.conversations_read + 1,
            cause: cause.into(),
        }
    }

    /// Skips whitespace and returns the next byte without consuming it.
    fn peek_significant(&mut self) -> Result<Option<u8>> {
        loop {
            let (skip, available, next) = {
                let buf = self.reader.fill_buf().map_err(Self::io_error)?;
                let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
                (skip, buf.len(), buf.get(skip).copied())
            };
            if available == 0 {
                return Ok(None);
            }
            self.reader.consume(skip);
            if next.is_some() {
                return Ok(next);
            }
        }
    }

    fn skip_bom(&mut self) -> Result<()> {
        let has_bom = self
            .reader
            .fill_buf()
            .map_err(Self::io_error)?
            .starts_with(&[0xEF, 0xBB, 0xBF]);
        if has_bom {
            self.reader.consume(3);
        }
        Ok(())
    }

    /// Positions the reader at the start of the next conversation.
    ///
    /// Returns false when the export is exhausted.
    fn advance_to_value(&mut self) -> Result<bool> {
        if self.layout == Layout::Unknown {
            self.skip_bom()?;
            self.layout = match self.peek_significant()? {
                None => Layout::Done,
                Some(b'[') => {
                    self.reader.consume(1);
                    Layout::Array
                },
                Some(b'{') => Layout::Objects,
                Some(other) => {
                    return Err(self.parse_error(format!(
                        "expected '[' or '{{' at start of export, found '{}'",
                        char::from(other)
                    )));
                },
            };
        }

        loop {
            match (self.layout, self.peek_significant()?) {
                (Layout::Done, _) | (Layout::Objects, None) => {
                    self.layout = Layout::Done;
                    return Ok(false);
                },
                (Layout::Array, None) => {
                    return Err(self.parse_error("unterminated conversation array"));
                },
                (Layout::Array, Some(b']')) => {
                    self.reader.consume(1);
                    self.layout = Layout::Done;
                    return Ok(false);
                },
                (Layout::Array, Some(b',')) => self.reader.consume(1),
                (_, Some(_)) => return Ok(true),
                (Layout::Unknown, None) => return Ok(false),
            }
        }
    }

    fn read_conversation(&mut self) -> Result<Option<RawConversation>> {
        if !self.advance_to_value()? {
            return Ok(None);
        }
        let parsed = {
            let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
            RawConversation::deserialize(&mut de)
        };
        match parsed {
            Ok(conversation) => Ok(Some(conversation)),
            Err(e) if e.is_io() => Err(Self::io_error(e.into())),
            Err(e) => Err(self.parse_error(e.to_string())),
        }
    }

    fn buffer_conversation(&mut self, conversation: RawConversation) {
        let ordinal = self.conversations_read;
        self.conversations_read += 1;

        let conversation_id = conversation
            .conversation_id
            .or(conversation.id)
            .unwrap_or_else(|| format!("{}#{ordinal}", self.source_name));

        let turns = match (conversation.mapping, conversation.messages) {
            (Some(nodes), _) => mapping_turns(nodes),
            (None, Some(messages)) => flat_turns(messages),
            (None, None) => Vec::new(),
        };

        tracing::debug!(
            source = %self.source_name,
            conversation = %conversation_id,
            messages = turns.len(),
            "Parsed conversation"
        );

        for turn in turns {
            let message = Message::new(
                turn.role,
                turn.content,
                conversation_id.clone(),
                self.next_offset,
            )
            .with_timestamp(turn.timestamp)
            .with_message_id(turn.message_id);
            self.next_offset += 1;
            self.buffered.push_back(message);
        }
    }
}

impl<R: BufRead> MessageSource for TreeExportSource<R> {
    fn next(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.buffered.pop_front() {
                return Ok(Some(message));
            }
            match self.read_conversation()? {
                Some(conversation) => self.buffer_conversation(conversation),
                None => return Ok(None),
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
    use serde_json::json;
    use std::io::Cursor;

    fn parse(text: &str) -> Result<Vec<Message>> {
        let mut source = TreeExportSource::new(Cursor::new(text.to_string()), "export.json");
        let mut out = Vec::new();
        while let Some(message) = source.next()? {
            out.push(message);
        }
        Ok(out)
    }

    fn node(id: &str, parent: Option<&str>, role: &str, text: &str, time: f64) -> Value {
        json!({
            "id": id,
            "parent": parent,
            "children": [],
            "message": {
                "id": id,
                "author": {"role": role},
                "content": {"content_type": "text", "parts": [text]},
                "create_time": time
            }
        })
    }

    fn conversation(id: &str, nodes: &[(&str, Value)]) -> Value {
        let mut mapping = serde_json::Map::new();
        for (key, value) in nodes {
            mapping.insert((*key).to_string(), value.clone());
        }
        json!({"conversation_id": id, "title": "t", "mapping": Value::Object(mapping)})
    }

    fn three_turns() -> Value {
        conversation(
            "c1",
            &[
                ("root", json!({"id": "root", "parent": null, "children": ["a"], "message": null})),
                ("a", node("a", Some("root"), "user", "hi", 1.0)),
                ("b", node("b", Some("a"), "assistant", "hello", 2.0)),
                ("c", node("c", Some("b"), "user", "bye", 3.0)),
            ],
        )
    }

    #[test]
    fn test_three_message_export() {
        let text = json!([three_turns()]).to_string();
        let messages = parse(&text).unwrap();
        let summary: Vec<_> = messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Role::User, "hi"),
                (Role::Assistant, "hello"),
                (Role::User, "bye")
            ]
        );
        assert!(messages.iter().all(|m| m.conversation_id == "c1"));
        assert_eq!(messages[2].offset, 2);
        assert_eq!(messages[0].message_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_siblings_ordered_by_create_time() {
        let conv = conversation(
            "c1",
            &[
                ("root", node("root", None, "system", "sys", 0.0)),
                ("late", node("late", Some("root"), "user", "late", 9.0)),
                ("early", node("early", Some("root"), "user", "early", 5.0)),
            ],
        );
        let messages = parse(&conv.to_string()).unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "early", "late"]);
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn test_child_never_precedes_parent() {
        // Child has an earlier timestamp than its parent.
        let conv = conversation(
            "c1",
            &[
                ("p", node("p", None, "user", "parent", 10.0)),
                ("c", node("c", Some("p"), "assistant", "child", 1.0)),
            ],
        );
        let messages = parse(&conv.to_string()).unwrap();
        assert_eq!(messages[0].content, "parent");
    }

    #[test]
    fn test_parts_joined_and_empty_nodes_skipped() {
        let conv = json!({
            "id": "c9",
            "mapping": {
                "a": {"message": {"author": {"role": "user"},
                      "content": {"parts": ["one", {"text": "two"}, {"asset": "img"}]}}},
                "b": {"parent": "a", "message": {"author": {"role": "tool"},
                      "content": {"parts": ["   "]}}},
                "c": {"parent": "b", "message": {"author": {"role": "tool"},
                      "content": {"text": "tool says"}}}
            }
        });
        let messages = parse(&conv.to_string()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "one two");
        assert_eq!(messages[0].conversation_id, "c9");
        assert_eq!(messages[1].role, Role::System);
        assert_eq!(messages[1].message_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_concatenated_objects() {
        let mut second = three_turns();
        second["conversation_id"] = json!("c2");
        let text = format!("{}\n{}\n", three_turns(), second);
        let messages = parse(&text).unwrap();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[3].conversation_id, "c2");
        assert_eq!(messages[5].offset, 5);
    }

    #[test]
    fn test_flat_messages_and_fallback_id() {
        let text = json!([{
            "messages": [
                {"role": "user", "content": "q", "timestamp": "2024-01-01T00:00:00Z"},
                {"author": {"role": "assistant"}, "text": "a"},
                {"role": "user", "content": ""}
            ]
        }])
        .to_string();
        let messages = parse(&text).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].conversation_id, "export.json#0");
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[0].timestamp.is_some());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("  [ ]  ").unwrap().is_empty());
        assert!(parse("[{\"mapping\": {}}]").unwrap().is_empty());
    }

    #[test]
    fn test_bom_and_trailing_comma_tolerated() {
        let text = format!("\u{feff}[{},]", three_turns());
        assert_eq!(parse(&text).unwrap().len(), 3);
    }

    #[test]
    fn test_malformed_conversation_is_parse_error() {
        let text = format!("[{}, {{\"mapping\": 7}}]", three_turns());
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
    }

    #[test]
    fn test_unterminated_array_is_parse_error() {
        let text = format!("[{}", three_turns());
        assert!(matches!(parse(&text), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_parent_cycle_still_visits_every_node() {
        let conv = conversation(
            "c1",
            &[
                ("x", node("x", Some("y"), "user", "x", 1.0)),
                ("y", node("y", Some("x"), "assistant", "y", 2.0)),
            ],
        );
        let messages = parse(&conv.to_string()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "x");
    }

    #[test]
    fn test_windows_1252_text_is_transcoded() {
        let bytes = b"[{\"id\":\"c\",\"messages\":[{\"role\":\"user\",\"content\":\"caf\xE9 \x93ok\x94\"}]}]";
        let mut source = TreeExportSource::new(Cursor::new(bytes.to_vec()), "export.json");
        let message = source.next().unwrap().unwrap();
        assert_eq!(message.content, "café “ok”");
        assert!(source.next().unwrap().is_none());
    }

    #[test]
    fn test_undecodable_export_is_parse_error() {
        let bytes = b"[{\"id\":\"c\",\"messages\":[{\"role\":\"user\",\"content\":\"caf\xE9 \x81\"}]}]";
        let mut source = TreeExportSource::new(Cursor::new(bytes.to_vec()), "export.json");
        let err = source.next().unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
    }
}
