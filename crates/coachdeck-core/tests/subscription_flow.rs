//! End-to-end subscription tests: a real bridge against a real local
//! WebSocket stream server. Exercises the whole pipeline — channel,
//! forwarder, reconciler, store — without a daemon.
#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;
use url::Url;

use coachdeck_core::{Bridge, BridgeConfig, SubscriptionState};

// ── Test stream server ──────────────────────────────────────────────

/// Accept stream connections; each sends the given frames then holds the
/// socket open. Returns the bound address and a handshake counter.
async fn spawn_stream_server(frames: Vec<serde_json::Value>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let server_accepted = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            server_accepted.fetch_add(1, Ordering::SeqCst);
            let frames = frames.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                for frame in &frames {
                    let message =
                        tokio_tungstenite::tungstenite::Message::Text(frame.to_string().into());
                    if ws.send(message).await.is_err() {
                        return;
                    }
                }
                // Hold the connection until the client closes it.
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    (addr, accepted)
}

fn bridge_for(addr: SocketAddr) -> Bridge {
    let mut config = BridgeConfig::new(Url::parse(&format!("http://{addr}")).unwrap());
    config.reconnect_interval_secs = 1;
    Bridge::new(config).unwrap()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_activation_opens_exactly_one_socket() {
    let (addr, accepted) = spawn_stream_server(vec![json!({
        "id": "light-1",
        "state": "on",
        "kind": "light",
    })])
    .await;
    let bridge = bridge_for(addr);

    bridge.activate_view("lights").unwrap();
    bridge.activate_view("lights").unwrap();
    bridge.activate_view("lights").unwrap();

    wait_until(|| bridge.entity(&"light-1".into()).is_some()).await;
    wait_until(|| bridge.view_state("lights") == SubscriptionState::Active).await;

    // Repeated activations while connecting or open are no-ops.
    bridge.activate_view("lights").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    bridge.shutdown();
}

#[tokio::test]
async fn deactivate_releases_the_socket_and_reactivate_opens_a_new_one() {
    let (addr, accepted) = spawn_stream_server(vec![json!({
        "id": "lock-3",
        "state": "locked",
        "kind": "lock",
    })])
    .await;
    let bridge = bridge_for(addr);

    bridge.activate_view("locks").unwrap();
    wait_until(|| bridge.entity(&"lock-3".into()).is_some()).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    bridge.deactivate_view("locks");
    assert_eq!(bridge.view_state("locks"), SubscriptionState::Inactive);

    bridge.activate_view("locks").unwrap();
    wait_until(|| accepted.load(Ordering::SeqCst) == 2).await;

    bridge.shutdown();
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_breaking_the_stream() {
    let (addr, _accepted) = spawn_stream_server(vec![
        json!({ "foo": 1 }),
        json!("just a string"),
        json!({ "id": "sensor-4", "state": "ok", "kind": "sensor" }),
    ])
    .await;
    let bridge = bridge_for(addr);

    bridge.activate_view("sensors").unwrap();

    // The good frame lands even though two bad ones preceded it.
    wait_until(|| bridge.entity(&"sensor-4".into()).is_some()).await;
    assert_eq!(bridge.entities().len(), 1);

    bridge.shutdown();
}

#[tokio::test]
async fn entity_descriptors_flow_through_to_the_store() {
    let (addr, _accepted) = spawn_stream_server(vec![json!({
        "id": "light-7",
        "state": "on",
        "kind": "light",
        "name": "Bedroom Reading",
        "area": "bedroom",
        "capabilities": ["on_off", "brightness"],
        "attributes": { "brightness_raw": 120 },
    })])
    .await;
    let bridge = bridge_for(addr);

    bridge.activate_view("lights").unwrap();
    wait_until(|| bridge.entity(&"light-7".into()).is_some()).await;

    let record = bridge.entity(&"light-7".into()).unwrap();
    assert_eq!(record.display_name.as_deref(), Some("Bedroom Reading"));
    assert_eq!(record.area.as_deref(), Some("bedroom"));
    // Raw half-percent bus scale normalized to percent at the boundary.
    assert_eq!(record.brightness(), Some(60));

    bridge.shutdown();
}
