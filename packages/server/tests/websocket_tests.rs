//! End-to-end tests for the task WebSocket observer.
//!
//! Serves the app on an ephemeral port and connects real WebSocket clients.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use task_orchestrator::JobId;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::common::TestApp;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_observer_receives_connected_then_lifecycle() {
    let app = TestApp::new(1, Duration::from_millis(30));
    let addr = serve(&app).await;
    let id = app.start("xhs").await;

    let (mut client, _) = connect_async(format!("ws://{addr}/ws/task/{id}"))
        .await
        .unwrap();

    let connected = next_event(&mut client).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["data"]["jobId"], id.to_string());
    assert!(connected["timestamp"].is_string());

    // inbound frames are ignored
    client.send(Message::Text("hello".into())).await.unwrap();

    let mut last_progress = 0;
    loop {
        let event = next_event(&mut client).await;
        match event["type"].as_str().unwrap() {
            "started" => {}
            "progress" => {
                let progress = event["data"]["progress"].as_u64().unwrap();
                assert!(progress >= last_progress);
                last_progress = progress;
            }
            "completed" => {
                assert_eq!(event["data"]["status"], "completed");
                assert_eq!(event["data"]["itemsCollected"], 13);
                break;
            }
            other => panic!("unexpected event type {other}"),
        }
    }
    assert_eq!(last_progress, 100);
}

#[tokio::test]
async fn test_late_observer_only_gets_connected() {
    let app = TestApp::new(1, Duration::ZERO);
    let addr = serve(&app).await;
    let id = app.start("weibo").await;
    app.orchestrator.wait(id).await.unwrap();

    let (mut client, _) = connect_async(format!("ws://{addr}/ws/task/{id}"))
        .await
        .unwrap();
    assert_eq!(next_event(&mut client).await["type"], "connected");

    let quiet = tokio::time::timeout(Duration::from_millis(100), client.next()).await;
    assert!(quiet.is_err(), "no further events expected for a finished task");
}

#[tokio::test]
async fn test_disconnect_unsubscribes() {
    let app = TestApp::new(1, Duration::from_secs(60));
    let addr = serve(&app).await;
    let id = app.start("tieba").await;

    let (mut client, _) = connect_async(format!("ws://{addr}/ws/task/{id}"))
        .await
        .unwrap();
    next_event(&mut client).await;
    assert_eq!(app.orchestrator.hub().subscriber_count(id), 1);

    client.close(None).await.unwrap();
    for _ in 0..100 {
        if app.orchestrator.hub().subscriber_count(id) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(app.orchestrator.hub().subscriber_count(id), 0);

    app.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_unknown_task_refuses_upgrade() {
    let app = TestApp::new(1, Duration::ZERO);
    let addr = serve(&app).await;

    let result = connect_async(format!("ws://{addr}/ws/task/{}", JobId::new())).await;
    assert!(result.is_err());
}
