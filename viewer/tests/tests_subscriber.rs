// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use futures_util::SinkExt;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use viewer::subscriber::{ReconnectingSubscriber, SubscriberEvent};

const RETRY_DELAY: Duration = Duration::from_millis(50);

fn gps_update_frame(latitude: f64) -> String {
    format!(
        r#"{{"type":"gps_update","payload":{{"lat":{latitude},"lng":2.0,"timestamp":1700000000000}}}}"#
    )
}

async fn bind_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let port = listener.local_addr().unwrap().port();
    (listener, format!("ws://127.0.0.1:{port}"))
}

async fn next_event(receiver: &mut mpsc::Receiver<SubscriberEvent>) -> SubscriberEvent {
    tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("No subscriber event received")
        .expect("Subscriber event channel closed")
}

fn expect_fix(event: SubscriberEvent, latitude: f64) {
    match event {
        SubscriberEvent::Fix(fix) => assert_eq!(fix.latitude(), latitude),
        other => panic!("Expected fix event, got {:?}", other),
    }
}

#[tokio::test]
#[test_log::test]
async fn fixes_and_availability_are_delivered() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(gps_update_frame(19.4).into()))
            .await
            .unwrap();
        ws.send(Message::Text(gps_update_frame(19.5).into()))
            .await
            .unwrap();
        // Keep the connection open until the subscriber disconnects.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut subscriber = ReconnectingSubscriber::with_retry_delay(&url, RETRY_DELAY);
    let mut events = subscriber.register_consumer();
    assert!(subscriber.connect());

    assert_eq!(next_event(&mut events).await, SubscriberEvent::Availability(true));
    expect_fix(next_event(&mut events).await, 19.4);
    expect_fix(next_event(&mut events).await, 19.5);

    subscriber.disconnect();
    server.abort();
}

#[tokio::test]
#[test_log::test]
async fn connection_loss_reports_unavailability_and_reconnects() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(gps_update_frame(1.0).into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(gps_update_frame(2.0).into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut subscriber = ReconnectingSubscriber::with_retry_delay(&url, RETRY_DELAY);
    let mut events = subscriber.register_consumer();
    assert!(subscriber.connect());

    assert_eq!(next_event(&mut events).await, SubscriberEvent::Availability(true));
    expect_fix(next_event(&mut events).await, 1.0);
    assert_eq!(next_event(&mut events).await, SubscriberEvent::Availability(false));

    // The subscriber retries on its own and reports availability again
    // once the new connection delivers.
    assert_eq!(next_event(&mut events).await, SubscriberEvent::Availability(true));
    expect_fix(next_event(&mut events).await, 2.0);

    subscriber.disconnect();
    server.abort();
}

#[tokio::test]
#[test_log::test]
async fn unrecognized_frames_are_dropped() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"something_else","payload":{"lat":9.9,"lng":0.0,"timestamp":1700000000000}}"#
                .into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(gps_update_frame(3.0).into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut subscriber = ReconnectingSubscriber::with_retry_delay(&url, RETRY_DELAY);
    let mut events = subscriber.register_consumer();
    assert!(subscriber.connect());

    // The dropped frames produce no events, not even availability.
    assert_eq!(next_event(&mut events).await, SubscriberEvent::Availability(true));
    expect_fix(next_event(&mut events).await, 3.0);

    subscriber.disconnect();
    server.abort();
}

#[tokio::test]
#[test_log::test]
async fn dropped_consumer_is_pruned_and_others_keep_receiving() {
    let (listener, url) = bind_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(gps_update_frame(1.0).into()))
            .await
            .unwrap();
        ws.send(Message::Text(gps_update_frame(2.0).into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut subscriber = ReconnectingSubscriber::with_retry_delay(&url, RETRY_DELAY);
    let mut live = subscriber.register_consumer();
    let gone = subscriber.register_consumer();
    drop(gone);
    assert_eq!(subscriber.consumer_count(), 2);
    assert!(subscriber.connect());

    assert_eq!(next_event(&mut live).await, SubscriberEvent::Availability(true));
    expect_fix(next_event(&mut live).await, 1.0);
    expect_fix(next_event(&mut live).await, 2.0);
    // The dead channel was dropped from the consumer list on the first
    // failed delivery.
    assert_eq!(subscriber.consumer_count(), 1);

    subscriber.disconnect();
    server.abort();
}

#[tokio::test]
#[test_log::test]
async fn second_connect_does_not_spawn_a_second_loop() {
    let (listener, url) = bind_server().await;
    drop(listener);

    let mut subscriber = ReconnectingSubscriber::with_retry_delay(&url, RETRY_DELAY);
    assert!(subscriber.connect());
    assert!(!subscriber.connect());

    subscriber.disconnect();
}

#[tokio::test]
#[test_log::test]
async fn disconnect_stops_retrying() {
    // No server is listening, the subscriber sits in its retry loop.
    let (listener, url) = bind_server().await;
    drop(listener);

    let mut subscriber = ReconnectingSubscriber::with_retry_delay(&url, RETRY_DELAY);
    let mut events = subscriber.register_consumer();
    assert!(subscriber.connect());
    tokio::time::sleep(Duration::from_millis(150)).await;

    subscriber.disconnect();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!subscriber.is_connected());
    // A connection that never delivered a fix produces no events.
    assert!(events.try_recv().is_err());
}
