// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Reconnecting subscriber for the fan-out stream.

use common::fix::Fix;
use common::wire::GpsUpdate;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay between reconnect attempts while the fan-out server is
/// unreachable.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Event delivered to the consumers of a [`ReconnectingSubscriber`].
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriberEvent {
    /// A position fix received over the fan-out stream.
    Fix(Arc<Fix>),

    /// The external stream became usable or stopped being usable.
    ///
    /// `true` is reported once per connection, when the first fix
    /// arrives. `false` is reported when a connection that had delivered
    /// fixes closes, errors, or is disconnected on request.
    Availability(bool),
}

type ConsumerList = Arc<Mutex<Vec<mpsc::Sender<SubscriberEvent>>>>;

/// Subscribes to the fan-out WebSocket stream and keeps retrying until
/// disconnected.
///
/// A connection that closes or errors is reattempted after the retry
/// delay, indefinitely. Consumers observe the stream only through
/// [`SubscriberEvent`]s, a connection that never delivered a fix comes
/// and goes without any event.
pub struct ReconnectingSubscriber {
    url: String,
    retry_delay: Duration,
    consumers: ConsumerList,
    task: Option<tokio::task::JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl ReconnectingSubscriber {
    pub fn new(url: &str) -> Self {
        Self::with_retry_delay(url, DEFAULT_RETRY_DELAY)
    }

    pub fn with_retry_delay(url: &str, retry_delay: Duration) -> Self {
        ReconnectingSubscriber {
            url: url.to_string(),
            retry_delay,
            consumers: Arc::new(Mutex::new(Vec::new())),
            task: None,
            cancel: None,
        }
    }

    /// Registers a consumer and returns the receiving end of its event
    /// channel.
    pub fn register_consumer(&self) -> mpsc::Receiver<SubscriberEvent> {
        let (sender, receiver) = mpsc::channel(100);
        self.consumers
            .lock()
            .unwrap_or_else(|c| c.into_inner())
            .push(sender);
        receiver
    }

    /// Starts the subscription loop.
    ///
    /// Returns `false` when the subscriber is already running, a second
    /// connect never spawns a second loop.
    pub fn connect(&mut self) -> bool {
        if self.is_connected() {
            debug!("Subscriber already running, ignoring connect");
            return false;
        }
        let cancel = CancellationToken::new();
        let url = self.url.clone();
        let retry_delay = self.retry_delay;
        let consumers = self.consumers.clone();
        let task_cancel = cancel.clone();
        self.task = Some(tokio::spawn(async move {
            subscription_loop(url, retry_delay, consumers, task_cancel).await;
        }));
        self.cancel = Some(cancel);
        true
    }

    /// Stops the subscription loop, including any pending retry.
    pub fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.task = None;
    }

    pub fn is_connected(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Returns the number of registered consumers that are still alive.
    pub fn consumer_count(&self) -> usize {
        self.consumers
            .lock()
            .unwrap_or_else(|c| c.into_inner())
            .len()
    }
}

impl Drop for ReconnectingSubscriber {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

/// Delivers one event to every consumer. Consumers whose receiving end
/// was dropped are removed from the list.
async fn emit(consumers: &ConsumerList, event: SubscriberEvent) {
    let senders = consumers
        .lock()
        .unwrap_or_else(|c| c.into_inner())
        .clone();
    let mut closed = Vec::new();
    for sender in senders {
        if sender.send(event.clone()).await.is_err() {
            closed.push(sender);
        }
    }
    if !closed.is_empty() {
        consumers
            .lock()
            .unwrap_or_else(|c| c.into_inner())
            .retain(|sender| !closed.iter().any(|gone| gone.same_channel(sender)));
    }
}

async fn subscription_loop(
    url: String,
    retry_delay: Duration,
    consumers: ConsumerList,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            connected = connect_async(url.as_str()) => {
                match connected {
                    Ok((ws, _)) => {
                        info!("Connected to fan-out stream at {url}");
                        serve_connection(ws, &consumers, &cancel).await;
                    }
                    Err(e) => debug!("Failed to connect to fan-out stream at {url}: {e}"),
                }
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
}

/// Serves one established connection until it ends.
///
/// Availability is reported `true` when the first fix of this connection
/// arrives and `false` when the connection ends, but only if it had
/// delivered a fix before.
async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    consumers: &ConsumerList,
    cancel: &CancellationToken,
) {
    let (mut write, mut read) = ws.split();
    let mut delivered = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match GpsUpdate::from_json(text.as_str()) {
                            Ok(update) => {
                                if let Some(fix) = update.to_fix() {
                                    if !delivered {
                                        delivered = true;
                                        emit(consumers, SubscriberEvent::Availability(true)).await;
                                    }
                                    emit(consumers, SubscriberEvent::Fix(Arc::new(fix))).await;
                                } else {
                                    debug!("Ignoring fan-out frame of type {}", update.kind);
                                }
                            }
                            Err(e) => warn!("Dropping unparsable fan-out frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Fan-out stream closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Fan-out stream error: {e}");
                        break;
                    }
                }
            }
        }
    }
    if delivered {
        emit(consumers, SubscriberEvent::Availability(false)).await;
    }
}
