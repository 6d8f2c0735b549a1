mod common;

use std::time::Duration;

use common::{FakeMedia, wait_until};
use futures::{SinkExt, StreamExt};
use koda_call_signal::channel::SignalingChannel;
use koda_call_signal::controller::ControllerEvent;
use koda_call_signal::protocol::{SessionDescription, SignalingMessage};
use koda_call_signal::{CallClient, ClientConfig, IdentityStore};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Accepts one WebSocket and returns its first text frame, then drops it.
async fn first_frame(listener: &TcpListener) -> SignalingMessage {
    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = accept_async(stream).await.unwrap();
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return SignalingMessage::from_json(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended before register: {other:?}"),
        }
    }
}

#[tokio::test]
async fn reconnect_registers_the_same_identity() {
    let dir = tempfile::tempdir().unwrap();
    let identity = IdentityStore::file(dir.path().join("identity.json"));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ClientConfig {
        relay_url: format!("ws://{}/ws", listener.local_addr().unwrap()),
        reconnect_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    };

    let client = CallClient::spawn(&config, &identity, FakeMedia::new()).unwrap();
    let mut state = client.subscribe();

    let first = tokio::time::timeout(Duration::from_secs(5), first_frame(&listener))
        .await
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), first_frame(&listener))
        .await
        .unwrap();

    assert_eq!(first, SignalingMessage::register(client.id().clone()));
    assert_eq!(second, first);
    // the persisted identity is what a restarted process would load
    assert_eq!(&identity.load_or_create().unwrap(), client.id());

    wait_until(&mut state, |s| !s.channel_open).await;
    client.shutdown().await;
}

#[tokio::test]
async fn unparsable_frames_never_reach_the_controller() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ClientConfig {
        relay_url: format!("ws://{}/ws", listener.local_addr().unwrap()),
        reconnect_delay: Duration::from_secs(30),
        ..ClientConfig::default()
    };
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (_sink, channel) = SignalingChannel::new(&config, "1111".into(), events_tx);
    let task = tokio::spawn(channel.run());

    let offer = SignalingMessage::offer(SessionDescription::offer("v=0"), "1111".into())
        .with_from("2222".into());
    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = accept_async(stream).await.unwrap();
    let register = socket.next().await.unwrap().unwrap();
    assert!(register.to_text().unwrap().contains("\"register\""));
    socket.send(Message::text("garbage")).await.unwrap();
    socket.send(Message::text(r#"{"type":"offer","offer":"not a description"}"#)).await.unwrap();
    socket.send(Message::text(offer.to_json().unwrap())).await.unwrap();
    socket.close(None).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let closed = event == ControllerEvent::ChannelClosed;
        seen.push(event);
        if closed {
            break;
        }
    }

    assert_eq!(
        seen,
        vec![
            ControllerEvent::ChannelOpened,
            ControllerEvent::Inbound(offer),
            ControllerEvent::ChannelClosed,
        ]
    );
    task.abort();
}
