use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::RequestError;
use tracing::{error, info};

use crate::bot::{self, AppState};

pub const WEBHOOK_PATH: &str = "/telegram";

#[derive(Clone)]
pub struct WebhookState {
    bot: Bot,
    app: Arc<AppState>,
    handler: Arc<UpdateHandler<RequestError>>,
}

impl WebhookState {
    pub fn new(bot: Bot, app: Arc<AppState>) -> Self {
        Self {
            bot,
            app,
            handler: Arc::new(bot::schema()),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(telegram_webhook))
        .with_state(state)
}

// The body is taken as raw bytes so updates are parsed whatever Content-Type is sent.
async fn telegram_webhook(
    State(state): State<WebhookState>,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    info!("Received update from Telegram.");

    match handle_update(&state, &body).await {
        Ok(()) => (
            StatusCode::OK,
            Json(WebhookResponse {
                status: "ok",
                message: None,
            }),
        ),
        Err(e) => {
            error!("Failed to process Telegram update: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse {
                    status: "error",
                    message: Some(format!("{:#}", e)),
                }),
            )
        }
    }
}

async fn handle_update(state: &WebhookState, body: &[u8]) -> Result<()> {
    let update: Update = serde_json::from_slice(body).context("Invalid update payload")?;
    bot::process_update(
        &state.handler,
        state.bot.clone(),
        state.app.clone(),
        update,
    )
    .await
    .context("Failed to dispatch update")?;
    Ok(())
}
