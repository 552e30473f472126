use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::relay::{Incoming, Outcome};

/// Bot API response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
}

impl Update {
    /// Text message carried by the update, as seen by `bot_id`
    pub fn into_incoming(self, bot_id: Option<i64>) -> Option<Incoming> {
        let msg = self.message.or(self.channel_post)?;
        let text = msg.text?;
        let from_self = match (&msg.from, bot_id) {
            (Some(from), Some(bot_id)) => from.id == bot_id,
            _ => false,
        };

        Some(Incoming {
            chat_id: msg.chat.id,
            message_id: Some(msg.message_id),
            chat_title: msg.chat.title,
            text,
            from_self,
        })
    }
}

/// Body accepted by the ingestion endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    pub chat_title: Option<String>,
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub received_at: DateTime<Utc>,
}

impl IngestResponse {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            received_at: Utc::now(),
        }
    }
}
