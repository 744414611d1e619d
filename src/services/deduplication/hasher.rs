//! Content hashing for duplicate detection.

use sha2::{Digest, Sha256};

/// Normalizes and hashes message content.
///
/// Normalization trims the content and collapses every internal whitespace
/// run to one space. Case is preserved: "Yes" and "yes" are different
/// messages.
///
/// # Example
///
/// ```rust
/// use mnemos::services::deduplication::ContentHasher;
///
/// let hash = ContentHasher::hash("  hello\n\tworld ");
/// assert_eq!(hash, ContentHasher::hash("hello world"));
/// assert_ne!(hash, ContentHasher::hash("Hello world"));
/// assert_eq!(hash.len(), 64);
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Returns the lowercase SHA-256 hex digest of normalized content.
    #[must_use]
    pub fn hash(content: &str) -> String {
        let normalized = Self::normalize(content);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Trims and collapses whitespace runs.
    #[must_use]
    pub fn normalize(content: &str) -> String {
        content.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Returns at most `max_chars` leading characters of `content`.
    #[must_use]
    pub fn prefix(content: &str, max_chars: usize) -> &str {
        content
            .char_indices()
            .nth(max_chars)
            .map_or(content, |(end, _)| &content[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_case_is_preserved() {
        assert_ne!(ContentHasher::hash("Yes"), ContentHasher::hash("yes"));
    }

    #[test]
    fn test_whitespace_collapse() {
        assert_eq!(ContentHasher::normalize("  a \n\n b\tc  "), "a b c");
        assert_eq!(
            ContentHasher::hash("line one\nline two"),
            ContentHasher::hash("line one line two")
        );
    }

    #[test]
    fn test_prefix_respects_char_boundaries() {
        assert_eq!(ContentHasher::prefix("数据库存储", 2), "数据");
        assert_eq!(ContentHasher::prefix("short", 64), "short");
        assert_eq!(ContentHasher::prefix("", 4), "");
    }

    proptest! {
        #[test]
        fn prop_hash_ignores_surrounding_whitespace(s in "[a-zA-Z ]{0,40}", pad in "[ \t\n]{0,5}") {
            let padded = format!("{pad}{s}{pad}");
            prop_assert_eq!(ContentHasher::hash(&padded), ContentHasher::hash(&s));
        }

        #[test]
        fn prop_prefix_is_prefix(s in "\\PC{0,80}", n in 0usize..100) {
            let p = ContentHasher::prefix(&s, n);
            prop_assert!(s.starts_with(p));
            prop_assert!(p.chars().count() <= n);
        }
    }
}
