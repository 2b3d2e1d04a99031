mod backend;
mod chooser;
mod collaborators;
mod config;
mod error;
mod meta;
mod models;
mod orchestrator;
mod render;
mod routes;
mod store;
mod telegram;

use anyhow::Context;
use axum::{Router, routing::{post, get}};
use routes::{health, telegram_webhook, AppState};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};
use std::sync::Arc;
use tower_http::{cors::{CorsLayer, Any}, trace::TraceLayer};

use crate::backend::BackendClient;
use crate::chooser::Chooser;
use crate::config::Config;
use crate::orchestrator::{Collaborators, RepaintOrchestrator};
use crate::render::ModelTable;
use crate::telegram::TelegramTransport;

const WEBHOOK_PATH: &str = "/telegram/webhook";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cfg = Config::from_env().context("loading configuration")?;
    tracing::info!("Using backend at {}", cfg.api_url);

    let backend = Arc::new(BackendClient::new(&cfg));
    let telegram = Arc::new(TelegramTransport::new(&cfg));
    let orchestrator = RepaintOrchestrator::new(
        Collaborators {
            transport: telegram.clone(),
            captioner: backend.clone(),
            chat: backend.clone(),
            renderer: backend.clone(),
            transcriber: backend,
        },
        ModelTable::from_config(&cfg),
        Chooser::from_entropy(),
    );

    if let Some(public_url) = &cfg.public_url {
        telegram
            .set_webhook(&format!("{public_url}{WEBHOOK_PATH}"), cfg.webhook_secret.as_deref())
            .await
            .context("registering webhook")?;
    }

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        telegram,
        webhook_secret: cfg.webhook_secret.as_deref().map(Arc::from),
    };

    let app = Router::new()
        .route(WEBHOOK_PATH, post(telegram_webhook))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state);

    let addr = SocketAddr::from(([0,0,0,0], cfg.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding listener")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("serving http")?;
    Ok(())
}
