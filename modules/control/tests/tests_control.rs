// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use control::{CONTROL_ADDR, Control, ControlConfig};
use module_core::test_helper::{ResponseHandler, stop_module};
use module_core::{Event, EventBus, EventKind, EventKindType, Module, ModuleCtx, Response};
use serial_test::serial;
use std::time::Duration;
use tokio::task::JoinHandle;

const TEST_PORT: u16 = 28071;

fn create_module(ctx: ModuleCtx) -> JoinHandle<Result<(), ()>> {
    tokio::spawn(async move {
        let mut control = Control::new(ctx, ControlConfig { port: TEST_PORT });
        control.run().await
    })
}

fn start_response(message: &str) -> Event {
    Event {
        kind: EventKind::ReaderStartResponseEvent(
            Response::new(0, CONTROL_ADDR, message.to_string()).into(),
        ),
    }
}

fn stop_response(message: &str) -> Event {
    Event {
        kind: EventKind::ReaderStopResponseEvent(
            Response::new(0, CONTROL_ADDR, message.to_string()).into(),
        ),
    }
}

async fn get_body(path: &str) -> String {
    reqwest::get(format!("http://localhost:{TEST_PORT}{path}"))
        .await
        .expect("Failed to send control request")
        .text()
        .await
        .expect("Failed to read control response body")
}

#[tokio::test]
#[test_log::test]
#[serial]
async fn connect_reports_reader_status() {
    let eb = EventBus::default();
    let mut control = create_module(eb.context());
    let _responder = ResponseHandler::new(
        eb.context(),
        EventKindType::ReaderStartRequestEvent,
        start_response("sensor reader started"),
    );
    tokio::time::sleep(Duration::from_millis(500)).await;

    let body = get_body("/v1/connect").await;
    assert_eq!(body, r#"{"message":"sensor reader started"}"#);

    stop_module(&eb, &mut control).await;
}

#[tokio::test]
#[test_log::test]
#[serial]
async fn disconnect_reports_reader_status() {
    let eb = EventBus::default();
    let mut control = create_module(eb.context());
    let _responder = ResponseHandler::new(
        eb.context(),
        EventKindType::ReaderStopRequestEvent,
        stop_response("sensor reader not active"),
    );
    tokio::time::sleep(Duration::from_millis(500)).await;

    let body = get_body("/v1/disconnect").await;
    assert_eq!(body, r#"{"message":"sensor reader not active"}"#);

    stop_module(&eb, &mut control).await;
}

#[tokio::test]
#[test_log::test]
#[serial]
async fn missing_reader_module_reports_no_response() {
    let eb = EventBus::default();
    let mut control = create_module(eb.context());
    tokio::time::sleep(Duration::from_millis(500)).await;

    // No module answers start requests, the endpoint degrades to a status
    // message instead of hanging.
    let body = get_body("/v1/connect").await;
    assert_eq!(body, r#"{"message":"sensor reader did not respond"}"#);

    stop_module(&eb, &mut control).await;
}
