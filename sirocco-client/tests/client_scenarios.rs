//! End-to-end client scenarios against an in-process WebSocket server.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use sirocco_client::prelude::*;
use sirocco_client::ReceiveHandler;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// How the test server treats inbound frames. Every frame is recorded
/// regardless.
#[derive(Debug, Clone, Copy)]
enum ServerMode {
    /// Echo text frames back verbatim.
    Echo,
    /// Answer every ack request with the matching ack.
    AckAll,
    /// Record and stay silent.
    Swallow,
}

/// Accept loop recording every inbound frame.
async fn spawn_server(mode: ServerMode) -> (u16, mpsc::UnboundedReceiver<Message>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(serve(listener, mode, seen_tx));
    (port, seen_rx)
}

async fn serve(listener: TcpListener, mode: ServerMode, seen_tx: mpsc::UnboundedSender<Message>) {
    while let Ok((stream, _)) = listener.accept().await {
        let seen_tx = seen_tx.clone();
        tokio::spawn(async move {
            let Ok(mut ws) = accept_async(stream).await else {
                return;
            };
            while let Some(Ok(frame)) = ws.next().await {
                let _ = seen_tx.send(frame.clone());
                match mode {
                    ServerMode::Echo => {
                        if frame.is_text() {
                            let _ = ws.send(frame).await;
                        }
                    }
                    ServerMode::AckAll => {
                        if let Message::Text(text) = &frame {
                            if let Some(id) = ack_request_id(text) {
                                let ack = format!(r#"{{"type":"ack","id":{id}}}"#);
                                let _ = ws.send(Message::Text(ack)).await;
                            }
                        }
                    }
                    ServerMode::Swallow => {}
                }
            }
        });
    }
}

fn ack_request_id(text: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value["type"] == "ack_request" {
        value["id"].as_u64()
    } else {
        None
    }
}

/// Body of a text-envelope frame, if that is what the frame is.
fn envelope_body(frame: &Message) -> Option<String> {
    let Message::Text(text) = frame else {
        return None;
    };
    let value: Value = serde_json::from_str(text).ok()?;
    if value["type"] == "text" {
        value["body"].as_str().map(str::to_string)
    } else {
        None
    }
}

struct Recorder {
    tx: mpsc::UnboundedSender<InMessage>,
}

#[async_trait]
impl ReceiveHandler for Recorder {
    async fn on_message(&self, message: InMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

fn recording_client(settings: ConnectionSettings) -> (WebSocketClient, mpsc::UnboundedReceiver<InMessage>) {
    let mut client = WebSocketClient::new(settings);
    let (tx, rx) = mpsc::unbounded_channel();
    client.set_handler(Recorder { tx });
    (client, rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<InMessage>) -> InMessage {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

/// Next recorded frame that is a text-envelope payload, returning its body.
async fn next_payload(seen: &mut mpsc::UnboundedReceiver<Message>) -> String {
    loop {
        let frame = timeout(Duration::from_secs(5), seen.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server recording ended");
        if let Some(body) = envelope_body(&frame) {
            return body;
        }
    }
}

#[tokio::test]
async fn echo_roundtrip_and_clean_disconnect() {
    let (port, mut seen) = spawn_server(ServerMode::Echo).await;
    let settings = ConnectionSettings::builder()
        .url(format!("ws://127.0.0.1:{port}"))
        .throttle(Throttle::none())
        .build();
    let (mut client, mut events) = recording_client(settings);

    assert_eq!(client.connect().await.unwrap(), Completion::Success);
    assert!(client.is_connected());
    // Idempotent while open.
    assert_eq!(client.connect().await.unwrap(), Completion::Success);

    client.send_text("hello").await.unwrap();

    assert_eq!(next_event(&mut events).await, InMessage::Connected);
    assert_eq!(
        next_event(&mut events).await,
        InMessage::Text("hello".into())
    );
    // The server saw the enveloped payload.
    assert_eq!(next_payload(&mut seen).await, "hello");

    assert_eq!(client.disconnect().await, Completion::Success);
    assert!(!client.is_connected());
    assert_eq!(next_event(&mut events).await, InMessage::Disconnected(None));
}

#[tokio::test]
async fn buffered_sends_replay_in_order_before_connected() {
    // Reserve a port, but bring the server up only later.
    let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = placeholder.local_addr().unwrap().port();
    drop(placeholder);

    let buffer = Arc::new(MemoryBuffer::new());
    let settings = ConnectionSettings::builder()
        .url(format!("ws://127.0.0.1:{port}"))
        .buffer(buffer.clone())
        .throttle(Throttle::exponential(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
        ))
        .build();
    let (mut client, mut events) = recording_client(settings);

    // Sent while down: both divert to the buffer.
    assert_eq!(client.send_text("A").await.unwrap(), Completion::Success);
    assert_eq!(client.send_text("B").await.unwrap(), Completion::Success);
    assert_eq!(buffer.len(), 2);

    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        serve(listener, ServerMode::Swallow, seen_tx).await;
    });

    assert_eq!(client.connect().await.unwrap(), Completion::Success);
    client.send_text("C").await.unwrap();

    // FIFO: the backlog lands ahead of anything sent after Connected.
    assert_eq!(next_payload(&mut seen).await, "A");
    assert_eq!(next_payload(&mut seen).await, "B");
    assert_eq!(next_payload(&mut seen).await, "C");
    assert!(buffer.is_empty());

    // One reconnect episode, announced once, and Connected after the drain.
    let mut lifecycle = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        let done = event == InMessage::Connected;
        lifecycle.push(event);
        if done {
            break;
        }
    }
    let reconnecting = lifecycle
        .iter()
        .filter(|e| **e == InMessage::Reconnecting)
        .count();
    assert_eq!(reconnecting, 1);
}

#[tokio::test]
async fn acked_send_resolves_success() {
    let (port, _seen) = spawn_server(ServerMode::AckAll).await;
    let settings = ConnectionSettings::builder()
        .url(format!("ws://127.0.0.1:{port}"))
        .throttle(Throttle::none())
        .build();
    let (mut client, mut events) = recording_client(settings);

    client.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, InMessage::Connected);

    let completion = client
        .send(OutMessage::ackable(
            Duration::from_secs(1),
            OutMessage::text("x"),
        ))
        .await
        .unwrap();
    assert_eq!(completion, Completion::Success);

    // No AckFailed may surface afterwards.
    sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert_ne!(event.kind(), "ack_failed");
    }
}

#[tokio::test]
async fn unacked_send_times_out() {
    let (port, _seen) = spawn_server(ServerMode::Swallow).await;
    let settings = ConnectionSettings::builder()
        .url(format!("ws://127.0.0.1:{port}"))
        .throttle(Throttle::none())
        .build();
    let (mut client, mut events) = recording_client(settings);

    client.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, InMessage::Connected);

    let started = Instant::now();
    let completion = client
        .send(OutMessage::ackable(
            Duration::from_millis(100),
            OutMessage::text("y"),
        ))
        .await
        .unwrap();
    assert_eq!(completion, Completion::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(
        next_event(&mut events).await,
        InMessage::AckFailed(Box::new(OutMessage::text("y")))
    );
    // The ack failure does not cost the connection.
    assert!(client.is_connected());
}

#[tokio::test]
async fn idle_connection_is_pinged() {
    let (port, mut seen) = spawn_server(ServerMode::Swallow).await;
    let settings = ConnectionSettings::builder()
        .url(format!("ws://127.0.0.1:{port}"))
        .ping_interval(Duration::from_millis(200))
        .throttle(Throttle::none())
        .build();
    let (mut client, _events) = recording_client(settings);

    client.connect().await.unwrap();
    sleep(Duration::from_millis(700)).await;

    let mut pings = 0;
    while let Ok(frame) = seen.try_recv() {
        if matches!(frame, Message::Ping(_)) {
            pings += 1;
        }
    }
    assert!(pings >= 2, "expected at least 2 pings, saw {pings}");
    assert!(client.is_connected());
}

#[tokio::test]
async fn reconnect_schedule_caps_attempts() {
    // A port nothing listens on.
    let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = placeholder.local_addr().unwrap().port();
    drop(placeholder);

    let settings = ConnectionSettings::builder()
        .url(format!("ws://127.0.0.1:{port}"))
        .throttle(Throttle::schedule(vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
        ]))
        .build();
    let (mut client, mut events) = recording_client(settings);

    assert_eq!(client.connect().await.unwrap(), Completion::Cancelled);
    assert_eq!(client.connect_attempts(), 3);
    assert_eq!(client.state(), ConnectionPhase::Closed);

    // Exactly one Reconnecting, terminated by Disconnected.
    let mut reconnecting = 0;
    loop {
        let event = next_event(&mut events).await;
        match event {
            InMessage::Reconnecting => reconnecting += 1,
            InMessage::Disconnected(_) => break,
            _ => {}
        }
    }
    assert_eq!(reconnecting, 1);
}

#[tokio::test]
async fn disconnect_preempts_reconnect_delay() {
    let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = placeholder.local_addr().unwrap().port();
    drop(placeholder);

    let settings = ConnectionSettings::builder()
        .url(format!("ws://127.0.0.1:{port}"))
        .throttle(Throttle::fixed(Duration::from_secs(30)))
        .build();
    let (mut client, _events) = recording_client(settings);

    // The first attempt fails fast and parks the client in a 30 s delay;
    // disconnect must cancel the pending connect instead of waiting it out.
    let started = Instant::now();
    tokio::select! {
        outcome = client.connect() => {
            assert_eq!(outcome.unwrap(), Completion::Cancelled);
        }
        () = sleep(Duration::from_millis(500)) => {}
    }
    assert_eq!(client.disconnect().await, Completion::Success);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!client.is_connected());
}
