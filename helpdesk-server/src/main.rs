mod config;
mod conversation;
mod error;
mod identity;
mod llm;
mod rate_limit;
mod relay;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use config::Config;
use llm::OpenAiGenerator;
use routes::AppState;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config.openai_base_url.is_none() && !config.openai_api_key.starts_with("sk-") {
        warn!("OPENAI_API_KEY doesn't start with 'sk-'. Please check your .env file");
    }
    info!("Using OpenAI model: {}", config.openai_model);
    let generator = Arc::new(OpenAiGenerator::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
        config.openai_base_url.clone(),
    ));

    let state = Arc::new(AppState::new(&config, generator));
    info!(
        limit = config.rate_limit,
        window_secs = config.rate_window.as_secs(),
        prompt_mode = ?config.prompt_mode,
        max_history = config.max_history,
        "Chat pipeline ready"
    );

    let sweeper = {
        let state = Arc::clone(&state);
        let period = config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = state.limiter.sweep(Instant::now());
                debug!(
                    evicted,
                    tracked = state.limiter.tracked_identities(),
                    "Rate limiter sweep"
                );
            }
        })
    };

    let app = routes::router(state);

    info!("Server listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
