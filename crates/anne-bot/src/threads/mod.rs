//! Thread metadata.
//!
//! One row per `(user_id, thread_id)` with a display title. Rows exist only
//! for signed-in users; the conversation itself lives in agent memory.

mod repository;
mod service;

pub use repository::ThreadRepository;
pub use service::{ThreadListing, ThreadService, WriteStatus};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::codec;
use crate::memory::Message;

/// Title given to a thread before its first exchange completes.
pub const PLACEHOLDER_TITLE: &str = "New Thread";

/// Maximum number of characters kept in titles and previews.
pub const TITLE_MAX_CHARS: usize = 50;

/// Preview shown for a thread without messages.
pub const EMPTY_PREVIEW: &str = "メッセージがありません";

/// A row of `user_threads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ThreadRecord {
    pub user_id: String,
    pub thread_id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ThreadRecord {
    /// Title to display, falling back to the placeholder.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => PLACEHOLDER_TITLE,
        }
    }
}

/// Cap `text` at [`TITLE_MAX_CHARS`] characters, appending `...` when cut.
pub fn truncate_title(text: &str) -> String {
    if text.chars().count() <= TITLE_MAX_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(TITLE_MAX_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Derive a thread title from the first user message.
///
/// The image payload is never part of a title.
pub fn title_from_message(content: &str) -> String {
    let text = codec::decode(content).text().trim().to_string();
    if text.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        truncate_title(&text)
    }
}

/// Preview of the last message of a thread.
pub fn summarize_last_message(messages: &[Message]) -> String {
    messages
        .last()
        .map(|m| codec::decode(&m.content).text().trim().to_string())
        .filter(|text| !text.is_empty())
        .map(|text| truncate_title(&text))
        .unwrap_or_else(|| EMPTY_PREVIEW.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ImageData;

    #[test]
    fn test_long_title_is_truncated() {
        let text = "a".repeat(80);
        let title = truncate_title(&text);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_short_title_unchanged() {
        let text = "b".repeat(30);
        assert_eq!(truncate_title(&text), text);
        assert_eq!(truncate_title(&"c".repeat(50)), "c".repeat(50));
    }

    #[test]
    fn test_truncation_counts_characters() {
        let text = "猫".repeat(60);
        let title = truncate_title(&text);
        assert_eq!(title, format!("{}...", "猫".repeat(50)));
    }

    #[test]
    fn test_title_excludes_image_payload() {
        let image = ImageData::from_bytes("image/png", vec![9; 64]);
        let wire = codec::encode("うちの猫です", &image);
        assert_eq!(title_from_message(&wire), "うちの猫です");
        assert_eq!(title_from_message("   "), PLACEHOLDER_TITLE);
    }

    #[test]
    fn test_summarize_last_message() {
        assert_eq!(summarize_last_message(&[]), EMPTY_PREVIEW);
        let messages = vec![Message::user("q"), Message::assistant("x".repeat(70))];
        assert_eq!(summarize_last_message(&messages), format!("{}...", "x".repeat(50)));
    }

    #[test]
    fn test_display_title_fallback() {
        let mut record = ThreadRecord {
            user_id: "u".into(),
            thread_id: "t".into(),
            title: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(record.display_title(), PLACEHOLDER_TITLE);
        record.title = Some("猫の話".into());
        assert_eq!(record.display_title(), "猫の話");
    }
}
