mod ads;
mod app_params;
mod app_state;
mod cache;
mod complaints;
mod config;
mod database;
mod devices;
mod http;
mod licenses;
mod logging;
mod migrations;
mod stations;

use std::env;

use anyhow::Context;
use serde_json::json;

use app_state::AppState;
use config::Config;
use migrations::run_migrations;

use crate::logging::init_logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logger = init_logger("radio-directory-rs");

    let config = Config::load().context("failed to load configuration")?;

    if matches!(env::args().nth(1).as_deref(), Some("check-config")) {
        logger.info(
            "config.check_passed",
            serde_json::to_value(&config).unwrap_or_else(|_| json!({ "status": "ok" })),
        );
        return Ok(());
    }

    let state = AppState::initialize(config.clone())
        .await
        .context("failed to initialize application state")?;

    run_migrations(&state.postgres)
        .await
        .context("failed to run migrations")?;

    logger.info(
        "server.initialized",
        json!({
            "port": config.port,
            "postgresConfigured": true,
            "cacheConfigured": state.cache.is_enabled(),
        }),
    );

    http::serve(state.clone()).await.context("http server failed")?;
    state.shutdown().await;
    Ok(())
}
