//! Bridge service: wire config, pool, router and dispatcher together; run until a shutdown signal.

use crate::channels::{BotConnectionPool, BotIdentity, ChatApi, RestClient};
use crate::config::{resolve_bot_credential, resolve_server_url, Config, GroupConfig};
use crate::dispatch::{DispatchAdapter, HttpDispatcher, UnavailableDispatcher};
use crate::realtime::ConnectionOptions;
use crate::routing::{RoomPolicy, Router};
use crate::status;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Events from all bots waiting for the router.
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// A started bridge: connected bots feeding a running router.
pub struct Bridge {
    pub pool: Arc<BotConnectionPool>,
    pub router: Router,
    router_task: JoinHandle<()>,
}

impl Bridge {
    pub async fn shutdown(self) {
        self.pool.shutdown_all().await;
        self.router_task.abort();
        log::info!("bridge stopped");
    }
}

fn build_dispatcher(config: &Config) -> Arc<dyn DispatchAdapter> {
    match config.dispatch.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            log::info!("dispatching to {}", url);
            Arc::new(HttpDispatcher::new(url))
        }
        _ => {
            log::warn!("dispatch.url not set; every message will be answered with an unavailable notice");
            Arc::new(UnavailableDispatcher)
        }
    }
}

/// Connect the bots named by `only` (all configured bots when None) and start routing.
/// A bot that cannot connect is logged and skipped. Groups are wired only when `with_rooms` is set.
async fn start(config: &Config, only: Option<&str>, with_rooms: bool) -> Result<Bridge> {
    let server_url = resolve_server_url(config);
    let api: Arc<dyn ChatApi> = Arc::new(RestClient::new(&server_url));
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let pool = Arc::new(BotConnectionPool::new(
        server_url.clone(),
        api,
        ConnectionOptions::from(&config.connection),
        inbound_tx,
    ));
    let router = Router::new(&config.router, pool.clone(), build_dispatcher(config));
    let router_task = router.start(inbound_rx);
    log::info!("connecting to {}", server_url);

    for bot in config
        .bots
        .iter()
        .filter(|b| only.map_or(true, |name| b.username == name))
    {
        let Some(credential) = resolve_bot_credential(bot) else {
            log::warn!("bot {}: no password or token configured, skipping", bot.username);
            continue;
        };
        if let Err(e) = pool.add_bot(BotIdentity::from(bot), credential).await {
            log::warn!("bot {}: connect failed: {}", bot.username, e);
        }
    }

    let bridge = Bridge {
        pool,
        router,
        router_task,
    };
    if with_rooms {
        subscribe_direct_rooms(&bridge).await;
        for (name, group) in &config.groups {
            wire_group(&bridge, name, group).await;
        }
    }
    Ok(bridge)
}

/// Connect every configured bot, subscribe DMs and groups, and start the router.
pub async fn start_bridge(config: &Config) -> Result<Bridge> {
    start(config, None, true).await
}

async fn subscribe_direct_rooms(bridge: &Bridge) {
    for identity in bridge.pool.identities().await {
        match bridge.pool.list_existing_rooms(&identity.username).await {
            Ok(rooms) => {
                for room_id in &rooms {
                    bridge.pool.subscribe_room(&identity.username, room_id).await;
                }
                log::info!("bot {}: watching {} direct room(s)", identity.username, rooms.len());
            }
            Err(e) => log::warn!("bot {}: listing rooms failed: {}", identity.username, e),
        }
    }
}

async fn wire_group(bridge: &Bridge, name: &str, group: &GroupConfig) {
    let registered: Vec<String> = bridge
        .pool
        .identities()
        .await
        .into_iter()
        .map(|i| i.username)
        .collect();
    let members: Vec<String> = if group.bots.is_empty() {
        registered
    } else {
        group
            .bots
            .iter()
            .filter(|b| registered.contains(b))
            .cloned()
            .collect()
    };
    let Some(first) = members.first() else {
        log::warn!("group {}: no connected member bots, skipping", name);
        return;
    };

    let room_id = match group.room_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => match bridge.pool.lookup_group(first, name).await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("group {}: room lookup failed: {}", name, e);
                return;
            }
        },
    };

    bridge
        .router
        .register_group_room(
            room_id.clone(),
            RoomPolicy {
                name: name.to_string(),
                require_mention: group.require_mention,
                bots: members.clone(),
            },
        )
        .await;
    for bot in &members {
        bridge.pool.subscribe_room(bot, &room_id).await;
    }
}

/// Run the bridge until Ctrl+C or SIGTERM.
pub async fn run_bridge(config: Config) -> Result<()> {
    if config.bots.is_empty() {
        anyhow::bail!("no bots configured; add at least one entry to \"bots\" in the config file");
    }
    let bridge = start_bridge(&config).await?;
    if bridge.pool.identities().await.is_empty() {
        bridge.shutdown().await;
        anyhow::bail!("no bot could connect to {}", resolve_server_url(&config));
    }

    let (status_stop_tx, status_stop_rx) = oneshot::channel::<()>();
    let status_task = if config.status.enabled {
        let pool = bridge.pool.clone();
        let bind = config.status.bind.clone();
        let port = config.status.port;
        Some(tokio::spawn(async move {
            let stop = async move {
                let _ = status_stop_rx.await;
            };
            if let Err(e) = status::serve_status(&bind, port, pool, stop).await {
                log::error!("{:#}", e);
            }
        }))
    } else {
        None
    };

    shutdown_signal().await;
    log::info!("shutdown signal received, disconnecting bots");
    let _ = status_stop_tx.send(());
    if let Some(task) = status_task {
        let _ = task.await;
    }
    bridge.shutdown().await;
    Ok(())
}

/// Connect a single bot, send `text` to `to` through the outbound path, then disconnect.
/// Returns the number of messages sent.
pub async fn send_once(config: &Config, bot: &str, to: &str, text: &str) -> Result<usize> {
    if !config.bots.iter().any(|b| b.username == bot) {
        anyhow::bail!("bot {} is not in the config file", bot);
    }
    let bridge = start(config, Some(bot), false).await?;
    let result = bridge
        .router
        .send_outbound(Some(bot), to, text, None)
        .await
        .with_context(|| format!("sending as {} to {}", bot, to));
    bridge.shutdown().await;
    result
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
