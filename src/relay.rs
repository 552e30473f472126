use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info};
use serde::Serialize;

use crate::dedup::ForwardedSet;
use crate::delivery::{bare_chat_id, Delivery, SendMode};
use crate::format::MessageStyle;
use crate::routing::RoutingTable;

/// A message seen by one of the transports
#[derive(Debug, Clone, Default)]
pub struct Incoming {
    pub chat_id: i64,
    pub message_id: Option<i64>,
    pub chat_title: Option<String>,
    pub text: String,
    pub from_self: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    NotSource,
    OwnMessage,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Ignored { reason: IgnoreReason },
    Duplicate,
    NoTargets,
    Delivered { targets: Vec<i64>, failed: usize },
}

pub struct Relay {
    routes: RoutingTable,
    style: MessageStyle,
    send_mode: SendMode,
    /// `None` accepts every chat
    source_chat_id: Option<i64>,
    forwarded: ForwardedSet,
    delivery: Arc<dyn Delivery>,
}

impl Relay {
    pub fn new(
        routes: RoutingTable,
        style: MessageStyle,
        send_mode: SendMode,
        source_chat_id: Option<i64>,
        forwarded: ForwardedSet,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        Self {
            routes,
            style,
            send_mode,
            source_chat_id,
            forwarded,
            delivery,
        }
    }

    pub fn source_chat_id(&self) -> Option<i64> {
        self.source_chat_id
    }

    pub fn is_source(&self, chat_id: i64) -> bool {
        self.source_chat_id
            .map_or(true, |source| bare_chat_id(source) == bare_chat_id(chat_id))
    }

    /// Routes one message and fans it out to every matching target.
    /// Delivery failures are logged and counted in the outcome.
    pub async fn handle(&self, msg: Incoming) -> Outcome {
        if !self.is_source(msg.chat_id) {
            return Outcome::Ignored { reason: IgnoreReason::NotSource };
        }
        if msg.from_self {
            return Outcome::Ignored { reason: IgnoreReason::OwnMessage };
        }
        if msg.text.trim().is_empty() {
            return Outcome::Ignored { reason: IgnoreReason::Empty };
        }

        if let Some(id) = msg.message_id {
            if self.forwarded.contains(msg.chat_id, id) {
                debug!("Message {} in chat {} was already relayed", id, msg.chat_id);
                return Outcome::Duplicate;
            }
        }

        let targets = self.routes.match_targets(&msg.text);
        if targets.is_empty() {
            return Outcome::NoTargets;
        }

        let content = self.style.render(&msg.text, msg.chat_title.as_deref());
        if content.trim().is_empty() {
            return Outcome::Ignored { reason: IgnoreReason::Empty };
        }

        info!("Relaying message {:?} from chat {} to {:?}", msg.message_id, msg.chat_id, targets);

        let sends = targets.iter().map(|&target| {
            let content = content.as_str();
            let msg = &msg;
            async move {
                // chat id 0 stands for "no source chat" and cannot be forwarded from
                match (self.send_mode, msg.message_id) {
                    (SendMode::Forward, Some(id)) if msg.chat_id != 0 => {
                        self.delivery.forward(msg.chat_id, id, target).await
                    }
                    _ => self.delivery.send_text(target, content).await,
                }
            }
        });

        let mut failed = 0;
        for (target, result) in targets.iter().zip(join_all(sends).await) {
            if let Err(err) = result {
                error!("Failed to deliver to chat {}: {:#}", target, err);
                failed += 1;
            }
        }

        if failed < targets.len() {
            if let Some(id) = msg.message_id {
                self.forwarded.record(msg.chat_id, id);
                debug!("{} relayed messages tracked", self.forwarded.len());
            }
        }

        Outcome::Delivered { targets, failed }
    }
}
