use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use grammers_client::{
    types::{Chat, Message},
    Client, InputMessage, Update,
};
use grammers_session::{PackedChat, PackedType};
use log::{info, warn};

use crate::delivery::{bare_chat_id, Delivery};
use crate::relay::{Incoming, Relay};

/// Access details of every chat the account has seen, keyed by bare id
#[derive(Default)]
pub struct PeerCache {
    peers: DashMap<i64, PackedChat>,
}

impl PeerCache {
    pub fn remember(&self, chat: &Chat) {
        self.peers.insert(bare_chat_id(chat.id()), chat.pack());
    }

    /// Resolves a configured chat id. Basic groups need no access hash, so
    /// they resolve even before the account has seen them.
    pub fn resolve(&self, chat_id: i64) -> Result<PackedChat> {
        if let Some(packed) = self.peers.get(&bare_chat_id(chat_id)) {
            return Ok(*packed);
        }

        if chat_id < 0 && chat_id > -1_000_000_000_000 {
            return Ok(PackedChat {
                ty: PackedType::Chat,
                id: -chat_id,
                access_hash: None,
            });
        }

        Err(anyhow!("chat {} is not among the account's dialogs", chat_id))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }
}

/// Userbot: an MTProto user session reading the source chat
pub struct Bot {
    client: Client,
    peers: Arc<PeerCache>,
}

impl Bot {
    pub fn new(client: Client) -> Arc<Self> {
        Arc::new(Self {
            client,
            peers: Arc::new(PeerCache::default()),
        })
    }

    /// Fills the peer cache from the dialog list
    pub async fn load_dialogs(&self) -> Result<()> {
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await? {
            self.peers.remember(dialog.chat());
        }
        info!("Loaded {} peers from dialogs", self.peers.len());
        Ok(())
    }

    /// Main loop to receive updates asynchronously. Returns once Ctrl+C is
    /// received, or with an error when the update stream is lost.
    pub async fn run(self: Arc<Self>, relay: Arc<Relay>) -> Result<()> {
        if let Err(err) = self.load_dialogs().await {
            warn!("Failed to load dialogs: {:#}", err);
        }

        if let Some(source) = relay.source_chat_id() {
            info!("Listening on source chat {}", source);
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, exiting");
                    return Ok(());
                }
                update = self.client.next_update() => {
                    let update = update.context("update stream failed")?;

                    let self_ = Arc::clone(&self);
                    let relay = Arc::clone(&relay);
                    tokio::spawn(async move {
                        self_.handle_update(update, &relay).await;
                    });
                }
            }
        }
    }

    async fn handle_update(&self, update: Update, relay: &Relay) {
        if let Update::NewMessage(msg) = update {
            self.handle_message(msg, relay).await;
        }
    }

    async fn handle_message(&self, msg: Message, relay: &Relay) {
        let chat = msg.chat();
        self.peers.remember(&chat);

        if !relay.is_source(chat.id()) {
            return;
        }

        let outcome = relay
            .handle(Incoming {
                chat_id: chat.id(),
                message_id: Some(msg.id() as i64),
                chat_title: Some(chat.name().to_string()),
                text: msg.text().to_string(),
                from_self: msg.outgoing(),
            })
            .await;

        info!("Message {} from source chat: {:?}", msg.id(), outcome);
    }

    pub fn delivery(self: &Arc<Self>) -> Arc<dyn Delivery> {
        Arc::new(MtprotoDelivery {
            client: self.client.clone(),
            peers: Arc::clone(&self.peers),
        })
    }
}

struct MtprotoDelivery {
    client: Client,
    peers: Arc<PeerCache>,
}

#[async_trait]
impl Delivery for MtprotoDelivery {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let chat = self.peers.resolve(chat_id)?;
        self.client.send_message(chat, InputMessage::text(text)).await?;
        Ok(())
    }

    async fn forward(&self, from_chat_id: i64, message_id: i64, to_chat_id: i64) -> Result<()> {
        let source = self.peers.resolve(from_chat_id)?;
        let destination = self.peers.resolve(to_chat_id)?;
        let message_id = i32::try_from(message_id)?;
        self.client
            .forward_messages(destination, &[message_id], source)
            .await?;
        Ok(())
    }
}
