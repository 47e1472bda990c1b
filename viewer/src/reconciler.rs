// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Arbitration between the device position source and the external
//! fan-out stream.
//!
//! Exactly one source is rendered at a time. The device source is the
//! default, the external stream only becomes the active source through an
//! explicit toggle and only while it is available. Fixes of the inactive
//! source are tracked but never rendered, so a later switch can show the
//! freshest known position immediately.

use crate::subscriber::SubscriberEvent;
use common::fix::{Fix, FixSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Rendering state of the reconciler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReconciliationState {
    /// No fix of the active source has been seen yet.
    NoFix,
    /// The device source is active.
    UsingDevice,
    /// The external stream is active.
    UsingExternal,
}

/// The position the viewer shall render.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivePosition {
    pub fix: Arc<Fix>,
    pub source: FixSource,
}

/// Arbitrates between the device source and the external stream.
pub struct SourceReconciler {
    state: ReconciliationState,
    external_available: bool,
    prefer_external: bool,
    last_device: Option<Arc<Fix>>,
    last_external: Option<Arc<Fix>>,
    consumers: Vec<mpsc::Sender<ActivePosition>>,
}

impl SourceReconciler {
    pub fn new() -> Self {
        SourceReconciler {
            state: ReconciliationState::NoFix,
            external_available: false,
            prefer_external: false,
            last_device: None,
            last_external: None,
            consumers: Vec::new(),
        }
    }

    pub fn state(&self) -> ReconciliationState {
        self.state
    }

    pub fn external_available(&self) -> bool {
        self.external_available
    }

    /// Registers a consumer and returns the receiving end of its
    /// [`ActivePosition`] channel.
    pub fn register_consumer(&mut self) -> mpsc::Receiver<ActivePosition> {
        let (sender, receiver) = mpsc::channel(100);
        self.consumers.push(sender);
        receiver
    }

    /// Handles a fix from the device source.
    ///
    /// Rendered unless the external stream is the active source, in which
    /// case the fix is only tracked for a later switch back.
    pub fn on_device_fix(&mut self, fix: Arc<Fix>) -> Option<ActivePosition> {
        self.last_device = Some(fix.clone());
        if self.state == ReconciliationState::UsingExternal {
            return None;
        }
        self.state = ReconciliationState::UsingDevice;
        Some(ActivePosition {
            fix,
            source: FixSource::Device,
        })
    }

    /// Handles a fix from the external stream.
    ///
    /// Rendered only while the external stream is the active source.
    pub fn on_external_fix(&mut self, fix: Arc<Fix>) -> Option<ActivePosition> {
        self.last_external = Some(fix.clone());
        if self.state != ReconciliationState::UsingExternal {
            return None;
        }
        Some(ActivePosition {
            fix,
            source: FixSource::External,
        })
    }

    /// Handles an availability change of the external stream.
    ///
    /// Losing the stream while it is the active source falls back to the
    /// device source, rendering its last known fix when one exists. The
    /// preference does not survive the loss, a recovered stream has to be
    /// toggled to again.
    pub fn on_availability(&mut self, available: bool) -> Option<ActivePosition> {
        self.external_available = available;
        if available {
            return None;
        }
        self.prefer_external = false;
        self.last_external = None;
        if self.state != ReconciliationState::UsingExternal {
            return None;
        }
        info!("External stream lost, falling back to device source");
        match &self.last_device {
            Some(fix) => {
                self.state = ReconciliationState::UsingDevice;
                Some(ActivePosition {
                    fix: fix.clone(),
                    source: FixSource::Device,
                })
            }
            None => {
                self.state = ReconciliationState::NoFix;
                None
            }
        }
    }

    /// Handles a source toggle request from the viewer.
    ///
    /// Ignored while the external stream is unavailable. Switching
    /// renders the last known fix of the newly active source immediately
    /// when one exists.
    pub fn on_toggle(&mut self) -> Option<ActivePosition> {
        if !self.external_available {
            debug!("Ignoring source toggle, external stream not available");
            return None;
        }
        self.prefer_external = !self.prefer_external;
        if self.prefer_external {
            self.state = ReconciliationState::UsingExternal;
            self.last_external.as_ref().map(|fix| ActivePosition {
                fix: fix.clone(),
                source: FixSource::External,
            })
        } else {
            match &self.last_device {
                Some(fix) => {
                    self.state = ReconciliationState::UsingDevice;
                    Some(ActivePosition {
                        fix: fix.clone(),
                        source: FixSource::Device,
                    })
                }
                None => {
                    self.state = ReconciliationState::NoFix;
                    None
                }
            }
        }
    }

    /// Delivers one position to every consumer, dropping consumers whose
    /// receiving end is gone.
    async fn render(&mut self, position: ActivePosition) {
        let mut closed = Vec::new();
        for (index, consumer) in self.consumers.iter().enumerate() {
            if consumer.send(position.clone()).await.is_err() {
                closed.push(index);
            }
        }
        for index in closed.into_iter().rev() {
            self.consumers.remove(index);
        }
    }

    /// Drives the reconciler from its input channels until cancelled or
    /// all inputs close.
    pub async fn run(
        mut self,
        mut device_rx: mpsc::Receiver<Arc<Fix>>,
        mut subscriber_rx: mpsc::Receiver<SubscriberEvent>,
        mut toggle_rx: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) {
        loop {
            let rendered = tokio::select! {
                _ = cancel.cancelled() => break,
                fix = device_rx.recv() => {
                    match fix {
                        Some(fix) => self.on_device_fix(fix),
                        None => break,
                    }
                }
                event = subscriber_rx.recv() => {
                    match event {
                        Some(SubscriberEvent::Fix(fix)) => self.on_external_fix(fix),
                        Some(SubscriberEvent::Availability(available)) => {
                            self.on_availability(available)
                        }
                        None => break,
                    }
                }
                toggled = toggle_rx.recv() => {
                    match toggled {
                        Some(()) => self.on_toggle(),
                        None => break,
                    }
                }
            };
            if let Some(position) = rendered {
                self.render(position).await;
            }
        }
    }
}

impl Default for SourceReconciler {
    fn default() -> Self {
        Self::new()
    }
}
