//! Integration test: serve the status endpoint on a free port, GET /, assert status JSON.
//! Uses the in-process mock chat server; no external services needed.

mod common;

use chatbridge::channels::{BotConnectionPool, BotIdentity};
use chatbridge::config::BotCredential;
use chatbridge::status;
use common::{fast_options, MockApi, MockServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

#[tokio::test]
async fn status_http_reports_bot_states() {
    let server = MockServer::start().await;
    let (tx, _rx) = mpsc::channel(16);
    let pool = Arc::new(BotConnectionPool::new(
        server.url.clone(),
        Arc::new(MockApi::default()),
        fast_options(),
        tx,
    ));
    pool.add_bot(
        BotIdentity {
            username: "alice-bot".to_string(),
            display_name: None,
            agent_id: "main".to_string(),
        },
        BotCredential::Password("pw".to_string()),
    )
    .await
    .unwrap();
    pool.subscribe_room("alice-bot", "D1").await;

    let port = free_port();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serve_pool = pool.clone();
    let server_handle = tokio::spawn(async move {
        let stop = async move {
            let _ = stop_rx.await;
        };
        let _ = status::serve_status("127.0.0.1", port, serve_pool, stop).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(
                    json["bots"],
                    serde_json::json!([{ "username": "alice-bot", "state": "open", "rooms": ["D1"] }])
                );
                let _ = stop_tx.send(());
                let _ = server_handle.await;
                pool.shutdown_all().await;
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    server_handle.abort();
    panic!(
        "GET {} did not return 200 with status JSON within 5s; last error: {:?}",
        url, last_err
    );
}
