use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::LevelFilter;

use crate::botapi::DEFAULT_API_BASE;
use crate::dedup::DEFAULT_CAPACITY;
use crate::delivery::SendMode;
use crate::format::MessageStyle;
use crate::routing::{RoutingTable, SOURCE_CHAT_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// MTProto user session
    Userbot,
    /// Bot API long polling
    Polling,
    /// Bot API webhook
    Webhook,
    /// HTTP ingestion only, delivering through the Bot API
    Ingest,
}

impl Mode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "userbot" => Ok(Self::Userbot),
            "polling" => Ok(Self::Polling),
            "webhook" => Ok(Self::Webhook),
            "ingest" => Ok(Self::Ingest),
            other => bail!("unknown RELAY_MODE: {}", other),
        }
    }
}

/// MTProto application credentials
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_id: i32,
    pub api_hash: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub api: Option<ApiCredentials>,
    /// Base64 session string; takes precedence over `session_file`
    pub session: Option<String>,
    pub session_file: PathBuf,
    pub bot_token: Option<String>,
    pub bot_api_url: String,
    pub source_chat_id: Option<i64>,
    pub send_mode: SendMode,
    pub style: MessageStyle,
    pub routes: RoutingTable,
    pub dedup_capacity: usize,
    pub port: u16,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub ingest_token: Option<String>,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Settings for the `login` command: only the MTProto credentials matter
    pub fn login_from_env() -> Result<Self> {
        let config = Self::parse(|key| std::env::var(key).ok())?;
        config.api()?;
        Ok(config)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self::parse(lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mode = get("RELAY_MODE").map_or(Ok(Mode::Userbot), |v| Mode::parse(&v))?;

        let routes = match get("ROUTES_FILE") {
            Some(path) => RoutingTable::load_file(path)?,
            None => match get("ROUTING_PRESET").as_deref().unwrap_or("accounts") {
                "accounts" => RoutingTable::accounts(),
                "keywords" => RoutingTable::keywords(),
                other => bail!("unknown ROUTING_PRESET: {}", other),
            },
        };

        let source_chat_id = match get("SOURCE_CHAT_ID") {
            Some(v) => v.parse::<i64>().context("SOURCE_CHAT_ID is not a chat id")?,
            None => SOURCE_CHAT_ID,
        };

        let config = Self {
            mode,
            api: api_credentials(&get)?,
            session: get("SESSION"),
            session_file: get("SESSION_FILE").unwrap_or_else(|| "session.bin".into()).into(),
            bot_token: get("BOT_TOKEN"),
            bot_api_url: get("BOT_API_URL").unwrap_or_else(|| DEFAULT_API_BASE.into()),
            source_chat_id: Some(source_chat_id).filter(|id| *id != 0),
            send_mode: get("SEND_MODE").map_or(Ok(SendMode::Copy), |v| SendMode::parse(&v))?,
            style: get("MESSAGE_STYLE").map_or(Ok(MessageStyle::Summary), |v| MessageStyle::parse(&v))?,
            routes,
            dedup_capacity: match get("DEDUP_CAPACITY") {
                Some(v) => match v.parse::<usize>().context("DEDUP_CAPACITY is not a number")? {
                    0 => bail!("DEDUP_CAPACITY must be at least 1"),
                    capacity => capacity,
                },
                None => DEFAULT_CAPACITY,
            },
            port: match get("PORT") {
                Some(v) => v.parse().context("PORT is not a port number")?,
                None => 10000,
            },
            webhook_url: get("WEBHOOK_URL"),
            webhook_secret: get("WEBHOOK_SECRET"),
            ingest_token: get("INGEST_TOKEN"),
            log_level: match get("LOG_LEVEL") {
                Some(v) => v.parse().with_context(|| format!("unknown LOG_LEVEL: {}", v))?,
                None => LevelFilter::Info,
            },
        };

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.mode {
            Mode::Userbot => {
                if self.api.is_none() {
                    bail!("API_ID and API_HASH env are required in userbot mode");
                }
                if self.session.is_none() && !self.session_file.exists() {
                    bail!(
                        "SESSION env is not set and {} does not exist; run `login` first",
                        self.session_file.display()
                    );
                }
            }
            Mode::Polling | Mode::Ingest => {
                self.bot_token()?;
            }
            Mode::Webhook => {
                self.bot_token()?;
                if self.webhook_url.is_none() {
                    bail!("WEBHOOK_URL env is required in webhook mode");
                }
            }
        }
        Ok(())
    }

    pub fn bot_token(&self) -> Result<&str> {
        self.bot_token.as_deref().context("BOT_TOKEN env is not set")
    }

    pub fn api(&self) -> Result<&ApiCredentials> {
        self.api.as_ref().context("API_ID and API_HASH env are not set")
    }
}

/// Both or neither of API_ID and API_HASH
fn api_credentials(get: &impl Fn(&str) -> Option<String>) -> Result<Option<ApiCredentials>> {
    match (get("API_ID"), get("API_HASH")) {
        (Some(id), Some(api_hash)) => Ok(Some(ApiCredentials {
            api_id: id.parse().context("API_ID is not a number")?,
            api_hash,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => bail!("API_HASH env is not set"),
        (None, Some(_)) => bail!("API_ID env is not set"),
    }
}
