// src/models/chat.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single chat message. Append-only: once stored it is never mutated
/// or deleted. Display order is ascending `timestamp`, sorted by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
    /// Epoch milliseconds. Bot replies carry the triggering user
    /// message's timestamp plus 100ms to bias ordering.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "bot" => Sender::Bot,
            _ => Sender::User,
        }
    }
}

impl Message {
    pub fn user(text: impl Into<String>, timestamp: i64) -> Self {
        Message {
            text: text.into(),
            sender: Sender::User,
            timestamp,
        }
    }

    pub fn bot(text: impl Into<String>, timestamp: i64) -> Self {
        Message {
            text: text.into(),
            sender: Sender::Bot,
            timestamp,
        }
    }
}

/// Message row as stored, with the store-assigned id.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: i32,
    pub user_id: i32,
    pub text: String,
    pub sender: String,
    pub timestamp_ms: i64,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            text: row.text,
            sender: Sender::from_str(&row.sender),
            timestamp: row.timestamp_ms,
        }
    }
}

/// Relay request, forwarded verbatim to the downstream agent backend.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Relay failure payload, returned with HTTP 500.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayError {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Sender::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Sender::Bot).unwrap(), "\"bot\"");
        assert_eq!(
            serde_json::from_str::<Sender>("\"bot\"").unwrap(),
            Sender::Bot
        );
    }

    #[test]
    fn test_chat_request_uses_camel_case_user_id() {
        let req = ChatRequest {
            message: "Hello".to_string(),
            user_id: "42".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["userId"], "42");
        assert_eq!(json["message"], "Hello");

        let back: ChatRequest =
            serde_json::from_str(r#"{"message":"hi","userId":"7"}"#).unwrap();
        assert_eq!(back.user_id, "7");
    }

    #[test]
    fn test_message_row_conversion() {
        let row = MessageRow {
            id: 1,
            user_id: 3,
            text: "Hi there".to_string(),
            sender: "bot".to_string(),
            timestamp_ms: 1_700_000_000_100,
        };
        let msg: Message = row.into();
        assert_eq!(msg.sender, Sender::Bot);
        assert_eq!(msg.timestamp, 1_700_000_000_100);
    }
}
