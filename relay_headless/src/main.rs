// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Headless position relay
//!
//! Wires the reader, broadcast, and control modules onto one event bus
//! and runs them until interrupted.

use broadcast::{Broadcast, BroadcastConfig};
use clap::Parser;
use control::{Control, ControlConfig};
use module_core::{Event, EventBus, EventKind, Module};
use reader::{Reader, ReaderConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Relays positions from a sensor helper to WebSocket subscribers")]
struct Cli {
    /// Port of the REST control surface.
    #[arg(long, default_value_t = 3001)]
    control_port: u16,

    /// Port of the fan-out WebSocket server.
    #[arg(long, default_value_t = 8080)]
    broadcast_port: u16,

    /// Program executed as the sensor-reading helper.
    #[arg(long, default_value = "python")]
    reader_cmd: String,

    /// Argument passed to the helper, repeatable.
    #[arg(long = "reader-arg", default_values_t = ["-u".to_string(), "gps_reader.py".to_string()])]
    reader_args: Vec<String>,

    /// Respawn the helper after an unexpected exit.
    #[arg(long)]
    restart_on_exit: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let event_bus = EventBus::default();
    let mut reader = Reader::new(
        event_bus.context(),
        ReaderConfig {
            program: cli.reader_cmd,
            args: cli.reader_args,
            restart_on_exit: cli.restart_on_exit,
        },
    );
    let mut broadcast = Broadcast::new(
        event_bus.context(),
        BroadcastConfig {
            port: cli.broadcast_port,
        },
    );
    let mut control = Control::new(
        event_bus.context(),
        ControlConfig {
            port: cli.control_port,
        },
    );

    let quit_sender = event_bus.context().sender;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = quit_sender.send(Event {
                kind: EventKind::QuitEvent,
            });
        }
    });

    let _ = tokio::join!(reader.run(), broadcast.run(), control.run());
}
