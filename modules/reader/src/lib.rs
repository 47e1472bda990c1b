// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Reader Modul for the position relay
//!
//! Supervises the external sensor-reading helper process and turns its
//! line-oriented stdout into [`FixEvent`](module_core::EventKind::FixEvent)s
//! on the event bus. Start and stop requests are served over the bus.

use async_trait::async_trait;
use module_core::{EventKind, Module, ModuleCtx, RequestPtr, Response};
use tracing::{error, info, warn};

pub mod parser;
pub mod supervisor;

use supervisor::{HelperCommand, SensorProcessSupervisor, StartOutcome, StopOutcome};

/// Delay before an unexpectedly exited helper is respawned, so a helper
/// that dies at startup is not relaunched in a tight loop.
const RESTART_BACKOFF: std::time::Duration = std::time::Duration::from_millis(500);

/// Configuration of the reader module.
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    /// Program executed as the sensor-reading helper.
    pub program: String,
    /// Arguments passed to the helper.
    pub args: Vec<String>,
    /// Respawn the helper after an unexpected exit. Off by default, an
    /// unexpected exit is only reported as a lifecycle event.
    pub restart_on_exit: bool,
}

pub struct Reader {
    ctx: ModuleCtx,
    supervisor: SensorProcessSupervisor,
    restart_on_exit: bool,
    pending_restart: Option<tokio::time::Instant>,
}

impl Reader {
    pub fn new(ctx: ModuleCtx, config: ReaderConfig) -> Self {
        let supervisor = SensorProcessSupervisor::new(
            HelperCommand {
                program: config.program,
                args: config.args,
            },
            ctx.sender.clone(),
        );
        Reader {
            ctx,
            supervisor,
            restart_on_exit: config.restart_on_exit,
            pending_restart: None,
        }
    }

    async fn on_start_request(&mut self, request: RequestPtr<()>) {
        let message = match self.supervisor.start().await {
            Ok(StartOutcome::Started) => "sensor reader started".to_string(),
            Ok(StartOutcome::AlreadyActive) => "sensor reader already active".to_string(),
            Err(e) => format!("failed to start sensor reader: {e}"),
        };
        let _ = self.ctx.publish_event(EventKind::ReaderStartResponseEvent(
            Response::new(request.id, request.sender_addr, message).into(),
        ));
    }

    async fn on_stop_request(&mut self, request: RequestPtr<()>) {
        // An explicit stop also cancels a pending respawn.
        self.pending_restart = None;
        let message = match self.supervisor.stop().await {
            StopOutcome::Stopped => "sensor reader stopped".to_string(),
            StopOutcome::NotActive => "sensor reader not active".to_string(),
        };
        let _ = self.ctx.publish_event(EventKind::ReaderStopResponseEvent(
            Response::new(request.id, request.sender_addr, message).into(),
        ));
    }

    /// Handles the end of the helper's stdout stream without a stop request.
    async fn on_helper_exit(&mut self) {
        let code = self.supervisor.reap().await;
        warn!("Sensor helper exited unexpectedly with code {:?}", code);
        if self.restart_on_exit {
            self.pending_restart = Some(tokio::time::Instant::now() + RESTART_BACKOFF);
        }
    }

    async fn on_restart_due(&mut self) {
        self.pending_restart = None;
        info!("Restarting sensor helper after unexpected exit");
        if let Err(e) = self.supervisor.start().await {
            error!("Failed to restart sensor helper: {e}");
        }
    }
}

#[async_trait]
impl Module for Reader {
    async fn run(&mut self) -> Result<(), ()> {
        let mut run = true;
        while run {
            tokio::select! {
                event = self.ctx.receiver.recv() => {
                    match event {
                        Ok(event) => {
                            match event.kind {
                                EventKind::QuitEvent => {
                                    let _ = self.supervisor.stop().await;
                                    run = false;
                                }
                                EventKind::ReaderStartRequestEvent(request) => {
                                    self.on_start_request(request).await;
                                }
                                EventKind::ReaderStopRequestEvent(request) => {
                                    self.on_stop_request(request).await;
                                }
                                _ => (),
                            }
                        }
                        Err(e) => {
                            error!("Failed to receive event in module Reader. Error:{e}");
                        }
                    }
                }
                line = self.supervisor.next_line(), if self.supervisor.is_running() => {
                    match line {
                        Some(Ok(line)) => self.supervisor.handle_line(&line),
                        Some(Err(e)) => warn!("Failed to read helper output: {e}"),
                        None => self.on_helper_exit().await,
                    }
                }
                _ = tokio::time::sleep_until(
                    self.pending_restart.unwrap_or_else(tokio::time::Instant::now)
                ), if self.pending_restart.is_some() => {
                    self.on_restart_due().await;
                }
            }
        }
        Ok(())
    }
}
