use std::sync::Arc;

use axum::{Json, extract::State, http::{HeaderMap, StatusCode}};
use tracing::{info, warn};

use crate::{orchestrator::RepaintOrchestrator, telegram::{TelegramTransport, Update}};

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RepaintOrchestrator>,
    pub telegram: Arc<TelegramTransport>,
    pub webhook_secret: Option<Arc<str>>,
}

pub async fn health() -> &'static str {
    "ok"
}

/// Accepts a Bot API update and hands it to its own task; Telegram only needs a quick 200.
pub async fn telegram_webhook(State(state): State<AppState>, headers: HeaderMap, Json(update): Json<Update>) -> StatusCode {
    if let Some(expected) = &state.webhook_secret {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_ref()) {
            warn!("🚫 Rejected webhook call with a bad secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update_id = update.update_id;
    let callback_id = update.callback_query.as_ref().map(|q| q.id.clone());
    let Some(event) = update.into_event() else {
        info!(update_id, "⏭️ Ignoring update with nothing to handle");
        return StatusCode::OK;
    };

    tokio::spawn(async move {
        if let Some(id) = callback_id {
            if let Err(e) = state.telegram.answer_callback_query(&id).await {
                warn!("⚠️ Failed to answer callback query: {}", e);
            }
        }
        state.orchestrator.handle_event(event).await;
    });
    StatusCode::OK
}
