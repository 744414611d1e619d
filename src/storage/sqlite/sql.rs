//! SQL construction helpers.

use crate::storage::traits::{RecordFilter, RecordQuery};
use rusqlite::types::Value;

/// Escapes `%`, `_` and `\` so text matches literally under `LIKE ... ESCAPE '\'`.
#[must_use]
pub fn escape_like_wildcards(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            result.push('\\');
        }
        result.push(c);
    }
    result
}

/// Builds a `WHERE` clause (possibly empty) with numbered parameters.
#[must_use]
pub fn build_where_clause(filter: &RecordFilter, content_prefix: Option<&str>) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    let mut push = |column: &str, value: Value| {
        params.push(value);
        conditions.push(format!("{column} = ?{}", params.len()));
    };
    if let Some(construct_id) = &filter.construct_id {
        push("construct_id", Value::Text(construct_id.clone()));
    }
    if let Some(source) = &filter.source {
        push("source", Value::Text(source.clone()));
    }
    if let Some(batch_index) = filter.batch_index {
        #[allow(clippy::cast_possible_wrap)]
        push("batch_index", Value::Integer(batch_index as i64));
    }
    if let Some(content_hash) = &filter.content_hash {
        push("content_hash", Value::Text(content_hash.clone()));
    }

    if let Some(prefix) = content_prefix {
        params.push(Value::Text(format!("{}%", escape_like_wildcards(prefix))));
        conditions.push(format!("content LIKE ?{} ESCAPE '\\'", params.len()));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

/// Builds the `WHERE` clause for a [`RecordQuery`].
#[must_use]
pub fn build_query_clause(query: &RecordQuery) -> (String, Vec<Value>) {
    build_where_clause(&query.filter, query.content_prefix.as_deref())
}
