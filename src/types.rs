use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Assistant,
}

/// A role-tagged message as sent to `/api/chat`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Token usage reported once a stream ends
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageMetrics {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One entry of the conversation shown to the user.
///
/// Assistant turns start out as empty placeholders and are rewritten in place
/// while their response streams in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default)]
    pub failed: bool,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            thinking: None,
            created_at: Utc::now(),
            usage: None,
            elapsed_ms: None,
            failed: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Local model as listed by `/api/tags`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub modified_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
    }

    #[test]
    fn test_model_role_alias() {
        let role: Role = serde_json::from_str(r#""model""#).unwrap();
        assert_eq!(role, Role::Assistant);
    }

    #[test]
    fn test_usage_total() {
        let usage = UsageMetrics::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(UsageMetrics::default().total_tokens, 0);
    }

    #[test]
    fn test_placeholder_turn() {
        let turn = ConversationTurn::assistant_placeholder();

        assert_eq!(turn.role, Role::Assistant);
        assert!(turn.content.is_empty());
        assert!(turn.thinking.is_none());
        assert!(turn.usage.is_none());
        assert!(!turn.failed);
    }

    #[test]
    fn test_turn_to_message() {
        let turn = ConversationTurn::user("Hello");
        let message = turn.to_message();

        assert_eq!(message.role, Role::User);
        assert_eq!(message.content, "Hello");
    }

    #[test]
    fn test_model_info_from_tags_entry() {
        let json = r#"{"name":"llama3.2:latest","size":2019393189,"digest":"a80c4f17","modified_at":"2024-10-01T12:00:00Z"}"#;
        let info: ModelInfo = serde_json::from_str(json).unwrap();

        assert_eq!(info.name, "llama3.2:latest");
        assert_eq!(info.size, 2019393189);
    }
}
