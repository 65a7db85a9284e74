//! In-memory conversation driven by stream callbacks.

use crate::accumulator::StreamCallbacks;
use crate::error::ChatError;
use crate::types::{ConversationTurn, Role, UsageMetrics};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("message is empty")]
    Empty,
    #[error("a response is still streaming")]
    Busy,
}

/// A submitted user turn awaiting its streamed answer
#[derive(Debug, Clone)]
pub struct PendingReply {
    /// Id of the assistant placeholder to update
    pub id: Uuid,
    /// Turns preceding the new user turn
    pub history: Vec<ConversationTurn>,
    pub user_text: String,
}

#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
    in_flight: Option<Uuid>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn turn(&self, id: Uuid) -> Option<&ConversationTurn> {
        self.turns.iter().find(|t| t.id == id)
    }

    fn turn_mut(&mut self, id: Uuid) -> Option<&mut ConversationTurn> {
        self.turns.iter_mut().find(|t| t.id == id)
    }

    pub fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Record a user turn plus an empty assistant placeholder
    pub fn submit(&mut self, text: &str) -> Result<PendingReply, SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::Empty);
        }
        if self.in_flight.is_some() {
            return Err(SubmitError::Busy);
        }

        let history = self.turns.clone();
        let placeholder = ConversationTurn::assistant_placeholder();
        let id = placeholder.id;

        self.turns.push(ConversationTurn::user(text));
        self.turns.push(placeholder);
        self.in_flight = Some(id);

        Ok(PendingReply {
            id,
            history,
            user_text: text.to_string(),
        })
    }

    pub fn apply_chunk(&mut self, id: Uuid, content: &str, thinking: Option<&str>) {
        if let Some(turn) = self.turn_mut(id) {
            turn.content = content.to_string();
            turn.thinking = thinking.map(str::to_string);
        }
    }

    pub fn complete(&mut self, id: Uuid, usage: Option<UsageMetrics>, elapsed_ms: u64) {
        if let Some(turn) = self.turn_mut(id) {
            if usage.is_some() {
                turn.usage = usage;
            }
            turn.elapsed_ms = Some(elapsed_ms);
        }
        self.finish(id);
    }

    /// Mark the turn failed and append a visible error note to its text
    pub fn fail(&mut self, id: Uuid, message: &str) {
        if let Some(turn) = self.turn_mut(id) {
            turn.content.push_str(&format!("\n\n*Error: {}*", message));
            turn.failed = true;
        }
        self.finish(id);
    }

    /// Release the in-flight slot without touching the turn (cancelled stream)
    pub fn abandon(&mut self, id: Uuid) {
        self.finish(id);
    }

    fn finish(&mut self, id: Uuid) {
        if self.in_flight == Some(id) {
            self.in_flight = None;
        }
    }

    /// Drop every turn
    pub fn reset(&mut self) {
        self.turns.clear();
        self.in_flight = None;
    }

    pub fn last_assistant(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.role == Role::Assistant)
    }
}

/// Applies stream callbacks to one placeholder turn and times the response
pub struct TurnUpdater<'a> {
    conversation: &'a mut Conversation,
    id: Uuid,
    started: Instant,
}

impl<'a> TurnUpdater<'a> {
    pub fn new(conversation: &'a mut Conversation, id: Uuid) -> Self {
        Self {
            conversation,
            id,
            started: Instant::now(),
        }
    }
}

impl StreamCallbacks for TurnUpdater<'_> {
    fn on_chunk(&mut self, content: &str, thinking: Option<&str>) {
        self.conversation.apply_chunk(self.id, content, thinking);
    }

    fn on_complete(&mut self, usage: Option<UsageMetrics>) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.conversation.complete(self.id, usage, elapsed);
    }

    fn on_error(&mut self, error: ChatError) {
        tracing::error!("Chat stream failed: {}", error);
        self.conversation.fail(self.id, &error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_creates_user_and_placeholder() {
        let mut conv = Conversation::new();
        let pending = conv.submit("Hello").unwrap();

        assert_eq!(conv.turns().len(), 2);
        assert_eq!(conv.turns()[0].role, Role::User);
        assert_eq!(conv.turns()[0].content, "Hello");
        assert_eq!(conv.turns()[1].id, pending.id);
        assert_eq!(conv.turns()[1].role, Role::Assistant);
        assert!(pending.history.is_empty());
        assert!(conv.is_streaming());
    }

    #[test]
    fn test_submit_rejects_blank_and_busy() {
        let mut conv = Conversation::new();

        assert_eq!(conv.submit("   ").unwrap_err(), SubmitError::Empty);
        conv.submit("first").unwrap();
        assert_eq!(conv.submit("second").unwrap_err(), SubmitError::Busy);
    }

    #[test]
    fn test_history_excludes_new_turns() {
        let mut conv = Conversation::new();
        let first = conv.submit("one").unwrap();
        conv.apply_chunk(first.id, "uno", None);
        conv.complete(first.id, None, 10);

        let second = conv.submit("two").unwrap();

        assert_eq!(second.history.len(), 2);
        assert_eq!(second.history[1].content, "uno");
        assert_eq!(second.user_text, "two");
    }

    #[test]
    fn test_complete_records_usage_and_timing() {
        let mut conv = Conversation::new();
        let pending = conv.submit("Hi").unwrap();

        conv.apply_chunk(pending.id, "Hello", Some("greeting"));
        conv.complete(pending.id, Some(UsageMetrics::new(5, 3)), 1200);

        let turn = conv.turn(pending.id).unwrap();
        assert_eq!(turn.content, "Hello");
        assert_eq!(turn.thinking.as_deref(), Some("greeting"));
        assert_eq!(turn.usage, Some(UsageMetrics::new(5, 3)));
        assert_eq!(turn.elapsed_ms, Some(1200));
        assert!(!conv.is_streaming());
    }

    #[test]
    fn test_fail_annotates_turn() {
        let mut conv = Conversation::new();
        let pending = conv.submit("Hi").unwrap();

        conv.apply_chunk(pending.id, "partial", None);
        conv.fail(pending.id, "connection reset");

        let turn = conv.turn(pending.id).unwrap();
        assert_eq!(turn.content, "partial\n\n*Error: connection reset*");
        assert!(turn.failed);
        assert!(!conv.is_streaming());
    }

    #[test]
    fn test_turn_updater_drives_conversation() {
        let mut conv = Conversation::new();
        let pending = conv.submit("Hi").unwrap();

        {
            let mut updater = TurnUpdater::new(&mut conv, pending.id);
            updater.on_chunk("Hel", None);
            updater.on_chunk("Hello", None);
            updater.on_complete(Some(UsageMetrics::new(1, 2)));
        }

        let turn = conv.last_assistant().unwrap();
        assert_eq!(turn.content, "Hello");
        assert!(turn.elapsed_ms.is_some());
        assert_eq!(turn.usage.unwrap().total_tokens, 3);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut conv = Conversation::new();
        conv.submit("Hi").unwrap();

        conv.reset();

        assert!(conv.turns().is_empty());
        assert!(!conv.is_streaming());
    }
}
