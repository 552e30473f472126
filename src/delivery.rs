use anyhow::{bail, Result};
use async_trait::async_trait;

/// Whether targets receive a rendered copy or the original message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Copy,
    Forward,
}

impl SendMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "forward" => Ok(Self::Forward),
            other => bail!("unknown send mode: {}", other),
        }
    }
}

/// Outbound side of a messaging API
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn forward(&self, from_chat_id: i64, message_id: i64, to_chat_id: i64) -> Result<()>;
}

/// Strips the Bot API sign and `-100` channel prefix off a chat id, so
/// ids coming from MTProto updates compare equal to configured ones.
pub fn bare_chat_id(id: i64) -> i64 {
    const CHANNEL_OFFSET: i64 = 1_000_000_000_000;

    if id <= -CHANNEL_OFFSET {
        -id - CHANNEL_OFFSET
    } else {
        id.abs()
    }
}
