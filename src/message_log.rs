//! Ordered, de-duplicated chat history for the active room.

use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::protocol::ChatMessage;

/// Chat messages of the current room in arrival order.
///
/// An `id` is stored at most once: a message whose `id` has already been seen
/// is discarded, never reordered.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: IndexMap<String, ChatMessage>,
}

impl MessageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` unless an entry with the same `id` exists.
    ///
    /// Returns `true` if the message was inserted.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        match self.entries.entry(message.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(message);
                true
            }
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy of the messages at call time. It does not track later appends.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.values().cloned().collect()
    }

    /// Returns `true` if a message with `id` has been appended.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn msg(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            text: text.into(),
            sender: "bob".into(),
            timestamp: "t1".into(),
        }
    }

    #[test]
    fn append_reports_insertion() {
        let mut log = MessageLog::new();
        assert!(log.append(msg("m1", "hi")));
        assert!(!log.append(msg("m1", "hi")));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn duplicates_keep_first_arrival_order() {
        let mut log = MessageLog::new();
        for (id, text) in [("a", "1"), ("b", "2"), ("a", "3"), ("c", "4"), ("b", "5")] {
            log.append(msg(id, text));
        }

        let ids: Vec<_> = log.snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        // The first copy wins; the later duplicate's text is not applied.
        assert_eq!(log.snapshot()[0].text, "1");
    }

    #[test]
    fn snapshot_is_detached() {
        let mut log = MessageLog::new();
        log.append(msg("m1", "hi"));
        let snap = log.snapshot();
        log.append(msg("m2", "there"));
        assert_eq!(snap.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn clear_forgets_ids() {
        let mut log = MessageLog::new();
        log.append(msg("m1", "hi"));
        log.clear();
        assert!(log.is_empty());
        assert!(!log.contains("m1"));
        assert!(log.append(msg("m1", "hi again")));
    }
}
