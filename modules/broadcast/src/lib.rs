// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Broadcast Modul for the position relay
//!
//! Fans every published fix out to all connected WebSocket subscribers.
//! Delivery is best effort and at most once per fix: a subscriber that is
//! closed, slow, or gone at publish time misses the fix, there is no
//! queuing and no replay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::fix::Fix;
use common::wire::GpsUpdate;
use futures_util::{SinkExt, StreamExt};
use module_core::{Event, EventKind, Module, ModuleCtx};
use rand::{Rng, distr::Alphanumeric, rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Configuration of the broadcast module.
#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    /// TCP port the fan-out WebSocket server listens on.
    pub port: u16,
}

/// Tracks the currently connected subscribers.
///
/// Entries are owned exclusively by the broadcast module: a subscriber is
/// registered when its connection is accepted and removed when the
/// connection closes or errors, it never outlives its connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ConnectionRegistry {
    fn register(&self, id: &str) {
        self.connections
            .lock()
            .unwrap_or_else(|c| c.into_inner())
            .insert(id.to_string(), Utc::now());
    }

    fn unregister(&self, id: &str) {
        self.connections
            .lock()
            .unwrap_or_else(|c| c.into_inner())
            .remove(id);
    }

    /// Returns the number of currently connected subscribers.
    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|c| c.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serializes one fix into the fan-out wire envelope.
fn serialize_gps_update(fix: &Fix) -> String {
    match serde_json::to_string(&GpsUpdate::from_fix(fix)) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize gps update: {}", e);
            "{}".to_string()
        }
    }
}

/// Generates a random connection ID.
///
/// This function creates a random alphanumeric string of length 16,
/// which can be used as a unique identifier for connections.
pub fn generate_connection_id() -> String {
    let id: String = rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    id
}

pub struct Broadcast {
    ctx: ModuleCtx,
    config: BroadcastConfig,
    registry: Arc<ConnectionRegistry>,
}

impl Broadcast {
    pub fn new(ctx: ModuleCtx, config: BroadcastConfig) -> Self {
        Broadcast {
            ctx,
            config,
            registry: Arc::new(ConnectionRegistry::default()),
        }
    }

    /// Returns the registry of currently connected subscribers.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }
}

#[async_trait]
impl Module for Broadcast {
    async fn run(&mut self) -> Result<(), ()> {
        let listener = match TcpListener::bind(("0.0.0.0", self.config.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind fan-out server to port {}: {e}",
                    self.config.port
                );
                return Err(());
            }
        };
        info!("Fan-out server listening on port {}", self.config.port);
        let mut run = true;
        while run {
            tokio::select! {
                event = self.ctx.receiver.recv() => {
                    match event {
                        Ok(event) => {
                            if let EventKind::QuitEvent = event.kind {
                                info!("Shutting down fan-out server");
                                run = false;
                            }
                        }
                        Err(e) => error!("Failed to receive event in module Broadcast. Error:{e}"),
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Incoming fan-out connection from {peer}");
                            // The bus receiver is created before the handshake, so a
                            // subscriber never observes fixes published before it
                            // connected and never misses one published after.
                            let receiver = self.ctx.receiver();
                            let registry = self.registry.clone();
                            tokio::spawn(async move {
                                subscriber_task(stream, receiver, registry).await;
                            });
                        }
                        Err(e) => warn!("Failed to accept fan-out connection: {e}"),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Serves one subscriber until its connection closes, errors, or the
/// module shuts down.
///
/// Every received [`FixEvent`](EventKind::FixEvent) is forwarded as one
/// `gps_update` text frame. A failed send terminates only this subscriber,
/// other subscribers are unaffected because each one is driven by its own
/// task and bus receiver.
async fn subscriber_task(
    stream: TcpStream,
    mut receiver: tokio::sync::broadcast::Receiver<Event>,
    registry: Arc<ConnectionRegistry>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed: {e}");
            return;
        }
    };
    let connection_id = generate_connection_id();
    registry.register(&connection_id);
    info!(
        "Fan-out subscriber connected with connection_id: {connection_id} ({} active)",
        registry.len()
    );
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        match event.kind {
                            EventKind::FixEvent(fix) => {
                                let json = serialize_gps_update(&fix);
                                if let Err(e) = write.send(Message::Text(json.into())).await {
                                    warn!("Failed to push fix to subscriber {connection_id}: {e}");
                                    break;
                                }
                            }
                            EventKind::QuitEvent => {
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                            _ => {}
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // Best effort, at most once: a slow subscriber misses
                        // fixes instead of stalling everyone else.
                        warn!("Subscriber {connection_id} lagged, {skipped} fixes missed");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Fan-out subscriber {connection_id} disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error on subscriber {connection_id}: {e}");
                        break;
                    }
                }
            }
        }
    }
    registry.unregister(&connection_id);
}
