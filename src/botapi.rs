use std::{fmt, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::delivery::Delivery;
use crate::models::{ApiResponse, Update, User};
use crate::relay::Relay;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 50;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// A request the Bot API answered with `ok: false`
#[derive(Debug, Clone)]
pub struct ApiError {
    pub method: String,
    pub code: i32,
    pub description: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.method, self.code, self.description)
    }
}

impl std::error::Error for ApiError {}

/// The token itself was refused; retrying cannot help
fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>()
        .map_or(false, |e| matches!(e.code, 401 | 404))
}

/// Minimal Bot API client over HTTPS
pub struct BotApi {
    http: reqwest::Client,
    base: String,
}

impl BotApi {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                // long polls hold the connection open for POLL_TIMEOUT_SECS
                .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
                .build()?,
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token.trim()),
        })
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: &impl Serialize) -> Result<T> {
        let response: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(params)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?
            .json()
            .await
            .with_context(|| format!("{} returned malformed response", method))?;

        if !response.ok {
            return Err(ApiError {
                method: method.to_string(),
                code: response.error_code.unwrap_or_default(),
                description: response.description.unwrap_or_default(),
            }
            .into());
        }

        response
            .result
            .ok_or_else(|| anyhow!("{} returned no result", method))
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &json!({})).await
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "channel_post"],
            }),
        )
        .await
    }

    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<()> {
        let mut params = json!({
            "url": url,
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(secret) = secret {
            params["secret_token"] = json!(secret);
        }
        self.call::<bool>("setWebhook", &params).await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<()> {
        self.call::<bool>("deleteWebhook", &json!({})).await?;
        Ok(())
    }

    /// Retries `getMe` until it succeeds; gives up only on a refused token
    pub async fn boot(&self) -> Result<User> {
        loop {
            match self.get_me().await {
                Ok(me) => {
                    info!(
                        "Bot started as @{} (id={})",
                        me.username.as_deref().unwrap_or_default(),
                        me.id
                    );
                    return Ok(me);
                }
                Err(err) if is_unauthorized(&err) => {
                    return Err(err).context("Bot API rejected BOT_TOKEN");
                }
                Err(err) => {
                    error!("Boot failed: {:#}", err);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

#[async_trait]
impl Delivery for BotApi {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call::<serde_json::Value>(
            "sendMessage",
            &json!({
                "chat_id": chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }),
        )
        .await?;
        Ok(())
    }

    async fn forward(&self, from_chat_id: i64, message_id: i64, to_chat_id: i64) -> Result<()> {
        self.call::<serde_json::Value>(
            "forwardMessage",
            &json!({
                "chat_id": to_chat_id,
                "from_chat_id": from_chat_id,
                "message_id": message_id,
            }),
        )
        .await?;
        Ok(())
    }
}

/// Fetches one batch of updates and relays it; returns the next offset
pub async fn poll_once(api: &BotApi, relay: &Relay, bot_id: i64, offset: i64) -> Result<i64> {
    let mut next = offset;
    for update in api.get_updates(offset).await? {
        let update_id = update.update_id;
        next = next.max(update_id + 1);

        let Some(incoming) = update.into_incoming(Some(bot_id)) else {
            continue;
        };
        let outcome = relay.handle(incoming).await;
        debug!("Update {}: {:?}", update_id, outcome);
    }
    Ok(next)
}

/// Long-polling loop. Returns on Ctrl+C, or with an error once the Bot API
/// refuses the token.
pub async fn poll(api: Arc<BotApi>, relay: Arc<Relay>) -> Result<()> {
    let me = api.boot().await?;

    // getUpdates is rejected while a webhook is registered
    if let Err(err) = api.delete_webhook().await {
        warn!("Failed to clear webhook: {:#}", err);
    }

    let mut offset = 0;
    loop {
        let step = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, exiting");
                return Ok(());
            }
            step = poll_once(&api, &relay, me.id, offset) => step,
        };

        match step {
            Ok(next) => offset = next,
            Err(err) if is_unauthorized(&err) => {
                return Err(err).context("polling stopped");
            }
            Err(err) => {
                error!("Poll error: {:#}", err);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
