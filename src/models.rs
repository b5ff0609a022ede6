//! Core data types shared by the server, store, and client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a chat session's conversation. Immutable once appended;
/// insertion order is conversation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A retrieved Reddit discussion backing one research turn. Referenced from
/// assistant text by 1-based bracketed numerals (`[1]`..`[N]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub url: String,
    pub subreddit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<u64>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A persisted chat: ordered messages plus the sources backing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit_filter: Option<String>,
}

impl ChatSession {
    pub fn new(title: impl Into<String>, subreddit_filter: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            sources: Vec::new(),
            created_at: now,
            updated_at: now,
            subreddit_filter,
        }
    }

    /// Most recent assistant message, if any.
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// Whether an assistant message was appended at or after `since`.
    /// Used by the client to decide if a reconciliation fetch supersedes
    /// locally-held state.
    pub fn has_assistant_message_since(&self, since: DateTime<Utc>) -> bool {
        self.messages
            .iter()
            .any(|m| m.role == Role::Assistant && m.timestamp >= since)
    }
}

/// Five-band sentiment label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    #[serde(rename = "Very Negative")]
    VeryNegative,
    #[serde(rename = "Negative")]
    Negative,
    #[serde(rename = "Neutral")]
    Neutral,
    #[serde(rename = "Positive")]
    Positive,
    #[serde(rename = "Very Positive")]
    VeryPositive,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::VeryNegative => "Very Negative",
            SentimentLabel::Negative => "Negative",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Positive => "Positive",
            SentimentLabel::VeryPositive => "Very Positive",
        }
    }
}

/// Aggregate sentiment for one research turn. Ephemeral: streamed to the
/// client while the turn is active, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    /// 0 = very negative, 50 = neutral, 100 = very positive.
    pub score: f32,
    pub label: SentimentLabel,
    /// 0-1 confidence in the score.
    pub confidence: f32,
}

impl SentimentAnalysis {
    pub fn neutral(confidence: f32) -> Self {
        Self {
            score: 50.0,
            label: SentimentLabel::Neutral,
            confidence,
        }
    }

    /// Whether a decoded JSON value has the shape of a sentiment object.
    /// Text fragments arrive as JSON strings, so an object carrying these
    /// fields is unambiguous on the wire.
    pub fn matches_shape(value: &Value) -> bool {
        value.is_object()
            && value.get("score").is_some()
            && value.get("label").is_some()
            && value.get("confidence").is_some()
    }
}

/// Body of a research request (new session or a turn on an existing one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit_filter: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TitleUpdate {
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_sentiment_label_wire_form() {
        let json = serde_json::to_string(&SentimentLabel::VeryNegative).unwrap();
        assert_eq!(json, "\"Very Negative\"");
        let parsed: SentimentLabel = serde_json::from_str("\"Positive\"").unwrap();
        assert_eq!(parsed, SentimentLabel::Positive);
    }

    #[test]
    fn test_sentiment_shape_detection() {
        let sentiment = serde_json::json!({
            "score": 72.0, "label": "Positive", "confidence": 0.85
        });
        assert!(SentimentAnalysis::matches_shape(&sentiment));

        let fragment = serde_json::json!("just some text");
        assert!(!SentimentAnalysis::matches_shape(&fragment));

        let partial = serde_json::json!({"score": 10});
        assert!(!SentimentAnalysis::matches_shape(&partial));
    }

    #[test]
    fn test_session_round_trip() {
        let mut session = ChatSession::new("iPhone 16 sentiment", Some("apple".into()));
        session.messages.push(Message::new(Role::User, "how is it?"));
        session
            .messages
            .push(Message::new(Role::Assistant, "Mostly positive [1]."));

        let json = serde_json::to_string(&session).unwrap();
        let back: ChatSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.messages.len(), 2);
        assert_eq!(back.subreddit_filter.as_deref(), Some("apple"));
        assert_eq!(
            back.last_assistant_message().unwrap().content,
            "Mostly positive [1]."
        );
    }

    #[test]
    fn test_has_assistant_message_since() {
        let mut session = ChatSession::new("t", None);
        let before = Utc::now();
        assert!(!session.has_assistant_message_since(before));

        session.messages.push(Message::new(Role::User, "q"));
        assert!(!session.has_assistant_message_since(before));

        session.messages.push(Message::new(Role::Assistant, "a"));
        assert!(session.has_assistant_message_since(before));
    }
}
