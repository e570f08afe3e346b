//! Integration test for the heartbeat link's resend-on-reconnect behaviour.
//!
//! The fake control plane accepts the first link, acknowledges the handshake,
//! and closes it.  While the provider is disconnected it queues updates for
//! devices X and Y.  The control plane accepts the reconnect but holds the
//! handshake acknowledgement until both updates are queued, so they can only
//! reach it through the post-reconnect resend.  After the link reports
//! itself connected again the provider queues Z.
//!
//! The control plane must then see X and Y exactly once, followed by Z, and
//! nothing else.

use std::time::Duration;

use fleet_core::domain::heartbeat::Handshake;
use fleet_provider::infrastructure::heartbeat::{
    Backoff, HeartbeatLink, HeartbeatSettings, LinkStatus,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

fn settings(port: u16) -> HeartbeatSettings {
    HeartbeatSettings {
        url: format!("ws://127.0.0.1:{port}/websocket/heartbeat"),
        handshake: Handshake {
            name: "rack-7".to_string(),
            owner: Some("ops@example.com".to_string()),
            secret: "ABCDEF1234".to_string(),
            url: "http://10.0.0.9:3500".to_string(),
            priority: 2,
        },
        platform: "android".to_string(),
        backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(100)),
    }
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_buffered_updates_are_resent_once_before_new_ones() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (queued_tx, queued_rx) = oneshot::channel::<()>();

    let control_plane = tokio::spawn(async move {
        // First link: acknowledge, then hang up.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        assert_eq!(next_json(&mut ws).await["command"], "handshake");
        ws.send(Message::Text("{\"success\":true}".into())).await.unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        // Second link: acknowledge only once X and Y are queued.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let hello = next_json(&mut ws).await;
        queued_rx.await.unwrap();
        ws.send(Message::Text("{\"success\":true}".into())).await.unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(next_json(&mut ws).await);
        }
        let extra = tokio::time::timeout(Duration::from_millis(300), next_json(&mut ws)).await;
        (hello, received, extra.is_err())
    });

    let link = HeartbeatLink::connect(settings(port)).await;
    let mut status = link.status();

    // Act
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == LinkStatus::Disconnected),
    )
    .await
    .expect("link should notice the hang-up")
    .unwrap();

    link.enqueue_update(json!({
        "udid": "X",
        "colding": false,
        "provider": { "atxAgentAddress": "10.0.0.9:30001" },
    }));
    link.enqueue_update(json!({ "udid": "Y", "provider": null }));
    queued_tx.send(()).unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == LinkStatus::Connected),
    )
    .await
    .expect("link should reconnect")
    .unwrap();
    link.enqueue_update(json!({ "udid": "Z", "provider": null }));

    let (hello, received, quiet) = tokio::time::timeout(Duration::from_secs(5), control_plane)
        .await
        .expect("control plane should receive three updates")
        .unwrap();

    // Assert
    assert_eq!(hello["command"], "handshake");
    assert_eq!(hello["owner"], "ops@example.com");

    let udids: Vec<&str> = received
        .iter()
        .map(|m| m["udid"].as_str().unwrap())
        .collect();
    assert_eq!(udids, vec!["X", "Y", "Z"]);
    assert!(quiet, "no duplicate resend after Z");

    assert_eq!(received[0]["command"], "update");
    assert_eq!(received[0]["platform"], "android");
    assert_eq!(received[0]["provider"]["atxAgentAddress"], "10.0.0.9:30001");
    assert_eq!(received[1]["provider"], Value::Null);
}
