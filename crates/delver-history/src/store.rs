//! The in-memory history store.
//!
//! Positions are assigned under the conversation's write lock, so they are
//! strictly increasing and gap-free per conversation no matter how many
//! tasks append concurrently. Events are returned in position order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::types::{CanonicalEvent, EventKind, Message, Role};

#[derive(Default)]
struct ConversationLog {
    events: Vec<CanonicalEvent>,
    next_position: u64,
}

/// Append-only store of canonical events plus the mutable message layer.
///
/// Cheap to clone (`Arc` inside); clones share state.
#[derive(Clone, Default)]
pub struct HistoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, ConversationLog>,
    messages: HashMap<String, Message>,
}

impl HistoryStore {
    /// New empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events for a conversation, in position order.
    #[must_use]
    pub fn canonical_events(&self, conversation_id: &str) -> Vec<CanonicalEvent> {
        let inner = self.inner.read();
        inner
            .conversations
            .get(conversation_id)
            .map(|log| log.events.clone())
            .unwrap_or_default()
    }

    /// Append one event, assigning the next position for the conversation.
    pub fn append_event(
        &self,
        conversation_id: &str,
        role: Role,
        kind: EventKind,
        content: Value,
        message_id: Option<String>,
        visible: bool,
    ) -> CanonicalEvent {
        let mut inner = self.inner.write();
        let log = inner
            .conversations
            .entry(conversation_id.to_string())
            .or_default();
        let event = CanonicalEvent {
            id: Uuid::now_v7().to_string(),
            conversation_id: conversation_id.to_string(),
            position: log.next_position,
            role,
            kind,
            content,
            message_id,
            visible,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        log.next_position += 1;
        log.events.push(event.clone());
        tracing::trace!(
            conversation_id,
            position = event.position,
            kind = ?event.kind,
            "event appended"
        );
        event
    }

    /// Create a new (initially empty) message.
    pub fn create_message(
        &self,
        conversation_id: &str,
        run_id: &str,
        request_index: u32,
        role: Role,
        model: Option<String>,
    ) -> Message {
        let message = Message {
            id: Uuid::now_v7().to_string(),
            conversation_id: conversation_id.to_string(),
            run_id: run_id.to_string(),
            request_index,
            role,
            model,
            content: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let _ = self
            .inner
            .write()
            .messages
            .insert(message.id.clone(), message.clone());
        message
    }

    /// Mutate a message in place. Returns the updated copy, or `None` if
    /// the id is unknown.
    pub fn update_message(
        &self,
        message_id: &str,
        mutate: impl FnOnce(&mut Message),
    ) -> Option<Message> {
        let mut inner = self.inner.write();
        let message = inner.messages.get_mut(message_id)?;
        mutate(message);
        Some(message.clone())
    }

    /// Look up a message by id.
    #[must_use]
    pub fn message(&self, message_id: &str) -> Option<Message> {
        self.inner.read().messages.get(message_id).cloned()
    }

    /// Number of events stored for a conversation.
    #[must_use]
    pub fn event_count(&self, conversation_id: &str) -> usize {
        self.inner
            .read()
            .conversations
            .get(conversation_id)
            .map_or(0, |log| log.events.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentBlock;
    use serde_json::json;

    #[test]
    fn positions_start_at_zero_and_increase() {
        let store = HistoryStore::new();
        let a = store.append_event("c1", Role::User, EventKind::Text, json!({"text": "hi"}), None, true);
        let b = store.append_event("c1", Role::Assistant, EventKind::Text, json!({"text": "yo"}), None, true);
        assert_eq!(a.position, 0);
        assert_eq!(b.position, 1);
    }

    #[test]
    fn positions_are_per_conversation() {
        let store = HistoryStore::new();
        let _ = store.append_event("c1", Role::User, EventKind::Text, json!({}), None, true);
        let other = store.append_event("c2", Role::User, EventKind::Text, json!({}), None, true);
        assert_eq!(other.position, 0);
    }

    #[test]
    fn events_come_back_in_position_order() {
        let store = HistoryStore::new();
        for i in 0..5 {
            let _ = store.append_event("c1", Role::User, EventKind::Text, json!({"i": i}), None, true);
        }
        let events = store.canonical_events("c1");
        let positions: Vec<u64> = events.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn concurrent_appends_never_duplicate_positions() {
        let store = HistoryStore::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let store = store.clone();
                let _ = scope.spawn(move || {
                    for _ in 0..50 {
                        let _ = store.append_event(
                            "c1",
                            Role::Tool,
                            EventKind::ToolResult,
                            json!({}),
                            None,
                            true,
                        );
                    }
                });
            }
        });
        let events = store.canonical_events("c1");
        assert_eq!(events.len(), 200);
        let mut positions: Vec<u64> = events.iter().map(|e| e.position).collect();
        positions.sort_unstable();
        positions.dedup();
        assert_eq!(positions.len(), 200);
    }

    #[test]
    fn update_message_mutates_in_place() {
        let store = HistoryStore::new();
        let message = store.create_message("c1", "run-1", 1, Role::Assistant, None);
        let updated = store
            .update_message(&message.id, |m| {
                m.content.push(ContentBlock::Text { text: "hello".into() });
            })
            .unwrap();
        assert_eq!(updated.text(), "hello");
        assert_eq!(store.message(&message.id).unwrap().text(), "hello");
    }

    #[test]
    fn update_unknown_message_returns_none() {
        let store = HistoryStore::new();
        assert!(store.update_message("nope", |_| {}).is_none());
    }
}
