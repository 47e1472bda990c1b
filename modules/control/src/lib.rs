// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Control Modul for the position relay
//!
//! Thin REST surface consumed by the viewer GUI to start and stop the
//! sensor reader. Both operations are delegated to the reader module
//! through request/response events on the bus, failures are mapped to
//! status messages and never thrown across the boundary.

use async_trait::async_trait;
use module_core::{EventKind, EventKindType, Module, ModuleCtx, Request, payload_ref};
use rocket::serde::json::Json;
use rocket::{State, get, routes};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};

/// Bus address of the control module, used to route response events back.
pub const CONTROL_ADDR: u32 = 0xC0;

/// Configuration of the control module.
#[derive(Clone, Debug)]
pub struct ControlConfig {
    /// TCP port the REST control surface listens on.
    pub port: u16,
}

/// Body of every control endpoint response.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

struct ControlCtx {
    ctx: ModuleCtx,
    next_request_id: u32,
}

impl ControlCtx {
    fn request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Drops any buffered bus backlog so the following wait only scans
    /// events published after the request.
    fn refresh_receiver(&mut self) {
        self.ctx.receiver = self.ctx.sender.subscribe();
    }
}

#[derive(Clone, Copy)]
enum ReaderAction {
    Start,
    Stop,
}

/// Publishes a start or stop request for the reader module and waits for
/// the matching response, returning its status message.
async fn request_reader_action(ctx: &Arc<Mutex<ControlCtx>>, action: ReaderAction) -> String {
    let mut guard = ctx.lock().await;
    let req_id = guard.request_id();
    guard.refresh_receiver();
    let (published, response_type) = match action {
        ReaderAction::Start => (
            guard
                .ctx
                .publish_event(EventKind::ReaderStartRequestEvent(
                    Request::empty_request(req_id, CONTROL_ADDR).into(),
                ))
                .is_ok(),
            EventKindType::ReaderStartResponseEvent,
        ),
        ReaderAction::Stop => (
            guard
                .ctx
                .publish_event(EventKind::ReaderStopRequestEvent(
                    Request::empty_request(req_id, CONTROL_ADDR).into(),
                ))
                .is_ok(),
            EventKindType::ReaderStopResponseEvent,
        ),
    };
    if !published {
        error!("Failed to publish reader request on the bus");
        return "sensor reader unavailable".to_string();
    }
    match guard
        .ctx
        .wait_for_event(req_id, CONTROL_ADDR, &response_type)
        .await
    {
        Ok(event) => {
            let message = match action {
                ReaderAction::Start => payload_ref!(event.kind, EventKind::ReaderStartResponseEvent)
                    .map(|response| response.data.clone()),
                ReaderAction::Stop => payload_ref!(event.kind, EventKind::ReaderStopResponseEvent)
                    .map(|response| response.data.clone()),
            };
            message.unwrap_or_else(|| {
                error!("Received response event without the expected payload");
                "sensor reader unavailable".to_string()
            })
        }
        Err(e) => {
            error!("No response from reader module: {e}");
            "sensor reader did not respond".to_string()
        }
    }
}

#[get("/v1/connect")]
async fn connect_handler(ctx: &State<Arc<Mutex<ControlCtx>>>) -> Json<MessageResponse> {
    info!("Control request: connect");
    Json(MessageResponse {
        message: request_reader_action(ctx.inner(), ReaderAction::Start).await,
    })
}

#[get("/v1/disconnect")]
async fn disconnect_handler(ctx: &State<Arc<Mutex<ControlCtx>>>) -> Json<MessageResponse> {
    info!("Control request: disconnect");
    Json(MessageResponse {
        message: request_reader_action(ctx.inner(), ReaderAction::Stop).await,
    })
}

pub struct Control {
    ctx: ModuleCtx,
    config: ControlConfig,
}

impl Control {
    pub fn new(ctx: ModuleCtx, config: ControlConfig) -> Self {
        Control { ctx, config }
    }
}

#[async_trait]
impl Module for Control {
    async fn run(&mut self) -> Result<(), ()> {
        let figment = rocket::Config::figment()
            .merge(("port", self.config.port))
            .merge(("address", "0.0.0.0"))
            .merge(("log_level", "off"))
            .merge(("shutdown.grace", 0))
            .merge(("shutdown.mercy", 0));
        let control_ctx = Arc::new(Mutex::new(ControlCtx {
            ctx: self.ctx.clone(),
            next_request_id: 0,
        }));
        let rocket = match rocket::custom(figment)
            .manage(control_ctx)
            .mount("/", routes![connect_handler, disconnect_handler])
            .ignite()
            .await
        {
            Ok(rocket) => rocket,
            Err(e) => {
                error!("Failed to ignite control server: {e}");
                return Err(());
            }
        };
        info!("Control server listening on port {}", self.config.port);
        let shutdown = rocket.shutdown();
        let mut receiver = self.ctx.receiver();
        let quit_task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let EventKind::QuitEvent = event.kind {
                            info!("Shutting down control server due to QuitEvent");
                            shutdown.notify();
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        shutdown.notify();
                        break;
                    }
                    Err(RecvError::Lagged(_)) => {}
                }
            }
        });
        let result = rocket.launch().await;
        quit_task.abort();
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Control server terminated with error: {e}");
                Err(())
            }
        }
    }
}
