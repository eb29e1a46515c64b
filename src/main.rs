mod auth;
mod bot;
mod config;
mod sales;
mod sheets;
mod webhook;

use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::AuthorizedUsers;
use crate::bot::AppState;
use crate::config::{Config, SheetsConfig};
use crate::sheets::google::GoogleSheet;
use crate::sheets::SheetWriter;
use crate::webhook::WebhookState;

#[tokio::main]
async fn main() -> Result<()> {
    // A local .env is optional; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,checkin_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");
    info!("  Webhook URL: {}", config.telegram.webhook_url);
    info!("  Sheet tab: {}", config.sheets.tab_name);

    let sheet = connect_sheet(&config.sheets).await;

    info!("Loading authorized sales IDs...");
    let authorized = AuthorizedUsers::parse(&config.authorized_sales);
    info!("Authorized sales IDs loaded: {:?}", authorized.sorted_ids());
    if authorized.is_empty() {
        warn!("AUTHORIZED_SALES is empty; every sender will be refused");
    }

    // One-time bot initialization, finished before the listener accepts updates.
    info!("Initializing Telegram bot (webhook mode)...");
    let bot = Bot::new(&config.telegram.bot_token);
    let me = bot
        .get_me()
        .await
        .context("Failed to initialize Telegram bot")?;
    let bot_username = me.username().to_string();
    info!("Telegram handlers initialized for @{}", bot_username);

    let state = Arc::new(AppState::new(authorized, sheet, bot_username));
    let app = webhook::router(WebhookState::new(bot, state));

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}{}", addr, webhook::WEBHOOK_PATH);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Connect to the configured worksheet. Failure is logged and leaves the bot in
/// degraded mode, where every record attempt is answered with an error reply.
async fn connect_sheet(config: &SheetsConfig) -> Option<Arc<dyn SheetWriter>> {
    match GoogleSheet::connect(config).await {
        Ok(sheet) => {
            info!(
                "Connected to Google Sheet (ID: '{}', Tab: '{}')",
                sheet.spreadsheet_id(),
                sheet.tab_name()
            );
            Some(Arc::new(sheet))
        }
        Err(e) => {
            error!("ERROR: {:#}", anyhow::Error::from(e));
            error!("Failed to initialize Google Sheets. The bot will not be able to record data.");
            None
        }
    }
}
