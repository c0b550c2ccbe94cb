//! HTTP status endpoint: reports the bridge as running and each bot's connection state.

use crate::channels::BotConnectionPool;
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

pub fn status_router(pool: Arc<BotConnectionPool>) -> Router {
    Router::new().route("/", get(status_http)).with_state(pool)
}

/// Serve the status endpoint on `bind:port` until `shutdown` resolves.
pub async fn serve_status(
    bind: &str,
    port: u16,
    pool: Arc<BotConnectionPool>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let bind_addr = format!("{}:{}", bind.trim(), port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding status endpoint to {}", bind_addr))?;
    log::info!("status endpoint listening on {}", bind_addr);
    axum::serve(listener, status_router(pool))
        .with_graceful_shutdown(shutdown)
        .await
        .context("status endpoint exited")?;
    Ok(())
}

/// GET / returns runtime and per-bot connection state and subscribed rooms.
async fn status_http(State(pool): State<Arc<BotConnectionPool>>) -> Json<serde_json::Value> {
    let mut bots = Vec::new();
    for (username, state) in pool.bot_states().await {
        let rooms = pool.subscribed_rooms(&username).await;
        bots.push(json!({ "username": username, "state": state.as_str(), "rooms": rooms }));
    }
    Json(json!({
        "runtime": "running",
        "bots": bots,
    }))
}
