use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use bot::Bot;
use botapi::BotApi;
use clap::{Parser, Subcommand};
use config::{Config, Mode};
use dedup::ForwardedSet;
use delivery::Delivery;
use dotenv::dotenv;
use grammers_client::{Client, InitParams};
use grammers_mtsender::{FixedReconnect, ReconnectionPolicy};
use grammers_session::Session;
use log::{info, warn};
use relay::Relay;
use server::{AppState, WebhookState};
use simplelog::TermLogger;

mod bot;
mod botapi;
mod config;
mod dedup;
mod delivery;
mod format;
mod login;
mod models;
mod relay;
mod routing;
mod server;

/// Relays bank deposit notices from a source chat to the matching target chats
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the relay in the configured RELAY_MODE (default)
    Run,
    /// Sign in interactively and print a SESSION string for userbot mode
    Login,
}

/// Connects an MTProto client with the configured session
async fn connect(config: &Config, session: Session) -> Result<Client> {
    static RECONNECTION_POLICY: &dyn ReconnectionPolicy = &FixedReconnect {
        attempts: 5,
        delay: Duration::from_secs(5),
    };

    let api = config.api()?;
    let client = Client::connect(grammers_client::Config {
        api_id: api.api_id,
        api_hash: api.api_hash.clone(),
        session,
        params: InitParams {
            reconnection_policy: RECONNECTION_POLICY,
            ..Default::default()
        },
    })
    .await
    .context("failed to connect to Telegram")?;

    Ok(client)
}

fn load_session(config: &Config) -> Result<Session> {
    match &config.session {
        Some(encoded) => login::decode_session(encoded),
        None => Session::load_file_or_create(&config.session_file)
            .with_context(|| format!("failed to load {}", config.session_file.display())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenv().ok();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let config = match command {
        Command::Login => Config::login_from_env()?,
        Command::Run => Config::from_env()?,
    };

    TermLogger::init(
        config.log_level,
        simplelog::ConfigBuilder::new()
            .set_time_format_rfc3339()
            .build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .context("error initializing termlogger")?;

    match command {
        Command::Login => {
            let session = Session::load_file_or_create(&config.session_file)?;
            let client = connect(&config, session).await?;
            login::run(client, &config).await
        }
        Command::Run => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    info!(
        "Starting in {:?} mode with {} routing rules, {:?} style, {:?} send mode",
        config.mode,
        config.routes.rule_count(),
        config.style,
        config.send_mode
    );

    let mut userbot = None;
    let mut bot_api = None;

    let delivery: Arc<dyn Delivery> = match config.mode {
        Mode::Userbot => {
            let client = connect(&config, load_session(&config)?).await?;
            if !client.is_authorized().await? {
                anyhow::bail!("session is not authorized; run `login` first");
            }
            info!("Userbot connected");

            if config.session.is_none() {
                client.session().save_to_file(&config.session_file)?;
            }

            let bot = Bot::new(client);
            let delivery = bot.delivery();
            userbot = Some(bot);
            delivery
        }
        Mode::Polling | Mode::Webhook | Mode::Ingest => {
            let api = Arc::new(BotApi::new(&config.bot_api_url, config.bot_token()?)?);
            bot_api = Some(Arc::clone(&api));
            api
        }
    };

    let relay = Arc::new(Relay::new(
        config.routes.clone(),
        config.style,
        config.send_mode,
        config.source_chat_id,
        ForwardedSet::new(config.dedup_capacity),
        delivery,
    ));

    let webhook = (config.mode == Mode::Webhook).then(|| WebhookState {
        secret: config.webhook_secret.clone(),
        bot_id: OnceLock::new(),
    });

    if config.ingest_token.is_none() {
        warn!("INGEST_TOKEN is not set, /ingest accepts unauthenticated requests");
    }

    // Create the HTTP server
    let state = Arc::new(AppState {
        relay: Arc::clone(&relay),
        webhook,
        ingest_token: config.ingest_token.clone(),
    });
    let app = server::router(Arc::clone(&state));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("HTTP server on {}", addr);

    // Run the transport and the HTTP server concurrently
    match (userbot, bot_api) {
        (Some(bot), _) => {
            tokio::select! {
                res = bot.run(relay) => res?,
                res = axum::serve(listener, app) => res?,
            }
        }
        (None, Some(api)) if config.mode == Mode::Polling => {
            tokio::select! {
                res = botapi::poll(api, relay) => res?,
                res = axum::serve(listener, app) => res?,
            }
        }
        (None, Some(api)) if config.mode == Mode::Webhook => {
            let url = format!(
                "{}{}",
                config.webhook_url.as_deref().unwrap_or_default().trim_end_matches('/'),
                server::WEBHOOK_PATH
            );
            let registered = async {
                register_webhook(&api, &state, &url, config.webhook_secret.as_deref()).await?;
                tokio::signal::ctrl_c().await?;
                info!("Received Ctrl+C, exiting");
                anyhow::Ok(())
            };
            tokio::select! {
                res = registered => res?,
                res = axum::serve(listener, app) => res?,
            }
        }
        _ => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, exiting"),
                res = axum::serve(listener, app) => res?,
            }
        }
    }

    Ok(())
}

/// Boots the bot and points Telegram at the already listening server
async fn register_webhook(api: &BotApi, state: &AppState, url: &str, secret: Option<&str>) -> Result<()> {
    let me = api.boot().await?;
    if let Some(webhook) = &state.webhook {
        let _ = webhook.bot_id.set(me.id);
    }

    api.set_webhook(url, secret).await?;
    info!("Webhook registered at {}", url);
    Ok(())
}
