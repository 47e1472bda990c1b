// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use std::io::{Error, ErrorKind};
use std::sync::Arc;
use strum_macros::EnumDiscriminants;
use tracing::debug;

/// Represents a high-level event in the system.
///
/// Each `Event` wraps an [`EventKind`], which defines the actual type
/// and data carried by the event.
///
/// This structure is designed to be passed through an [`EventBus`]
/// between asynchronous modules.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The inner event type and associated data.
    pub kind: EventKind,
}

impl Event {
    /// Returns the variant type of the wrapped [`EventKind`] without its payload.
    pub fn event_type(&self) -> EventKindType {
        EventKindType::from(&self.kind)
    }
}

/// A thread-safe, reference-counted pointer to a [`Fix`](common::fix::Fix).
///
/// This type alias wraps a parsed position fix inside an [`Arc`], allowing
/// multiple parts of the program (or multiple modules) to share ownership
/// of the same fix data without copying it.
pub type FixPtr = Arc<common::fix::Fix>;

/// A request envelope sent from one module to another over the [`EventBus`].
///
/// The `id` together with the `sender_addr` identifies the request, the
/// answering module copies both into the matching [`Response`] so the
/// requester can wait for exactly its own answer.
#[derive(Clone, Debug, PartialEq)]
pub struct Request<T> {
    pub id: u32,
    pub sender_addr: u32,
    pub data: T,
}

impl Request<()> {
    /// Creates a request without payload.
    pub fn empty_request(id: u32, sender_addr: u32) -> Request<()> {
        Request {
            id,
            sender_addr,
            data: (),
        }
    }
}

/// A response envelope answering a [`Request`] with the same `id` and the
/// requester's address as `receiver_addr`.
#[derive(Clone, Debug, PartialEq)]
pub struct Response<T> {
    pub id: u32,
    pub receiver_addr: u32,
    pub data: T,
}

impl<T> Response<T> {
    pub fn new(id: u32, receiver_addr: u32, data: T) -> Response<T> {
        Response {
            id,
            receiver_addr,
            data,
        }
    }
}

pub type RequestPtr<T> = Arc<Request<T>>;
pub type ResponsePtr<T> = Arc<Response<T>>;

/// Lifecycle transition of the supervised sensor helper process.
#[derive(Clone, Debug, PartialEq)]
pub enum ReaderLifecycle {
    /// The helper process was spawned and line streaming began.
    Started,
    /// The helper process terminated on request.
    Stopped,
    /// The helper process terminated without a stop request, with the
    /// exit code when one was available.
    UnexpectedExit(Option<i32>),
    /// The helper process could not be spawned.
    Failed(String),
}

/// Enumerates the different kinds of events that can be emitted
/// and transmitted via the [`EventBus`].
///
/// The derived [`EventKindType`] discriminants enum carries the variant
/// types without payloads and is used to wait for specific events.
#[derive(Clone, Debug, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(EventKindType), derive(Hash))]
pub enum EventKind {
    /// Indicates that a module shall terminate.
    QuitEvent,

    /// A parsed position fix from the supervised sensor helper.
    FixEvent(FixPtr),

    /// A state transition of the sensor helper process.
    ReaderLifecycleEvent(ReaderLifecycle),

    /// Request to start the sensor helper process.
    ReaderStartRequestEvent(RequestPtr<()>),

    /// Answer to a start request, carrying a status message.
    ReaderStartResponseEvent(ResponsePtr<String>),

    /// Request to stop the sensor helper process.
    ReaderStopRequestEvent(RequestPtr<()>),

    /// Answer to a stop request, carrying a status message.
    ReaderStopResponseEvent(ResponsePtr<String>),
}

impl EventKind {
    /// Returns `(id, receiver_addr)` when the event is a response envelope.
    fn response_meta(&self) -> Option<(u32, u32)> {
        match self {
            EventKind::ReaderStartResponseEvent(response) => {
                Some((response.id, response.receiver_addr))
            }
            EventKind::ReaderStopResponseEvent(response) => {
                Some((response.id, response.receiver_addr))
            }
            _ => None,
        }
    }
}

/// Extracts a reference to the payload of a specific [`EventKind`] variant.
///
/// Evaluates to `Some(&payload)` when the expression matches the given
/// variant path and `None` otherwise.
#[macro_export]
macro_rules! payload_ref {
    ($kind:expr, $variant:path) => {
        match &$kind {
            $variant(payload) => Some(payload),
            _ => None,
        }
    };
}

/// A simple asynchronous event bus for publishing and subscribing to [`Event`]s.
///
/// The event bus uses a [`tokio::sync::broadcast::channel`] under the hood,
/// allowing multiple receivers to listen for the same stream of events.
///
/// Each published event is cloned and distributed to all active subscribers.
/// If no subscribers exist at the time of publication, the event is discarded silently.
pub struct EventBus {
    /// The broadcast sender used internally to distribute events.
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new [`EventBus`] with a fixed buffer capacity of 100 messages.
    ///
    /// When the buffer is full, the oldest messages are dropped automatically
    /// as new ones are published.
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(100);
        EventBus { sender }
    }

    /// Subscribes to the event bus and returns a [`tokio::sync::broadcast::Receiver`].
    ///
    /// The returned receiver will receive all future events published after the
    /// subscription is created.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an [`Event`] to all active subscribers.
    ///
    /// This method clones the event and attempts to send it to each receiver.
    /// If no subscribers exist, the event is discarded silently.
    ///
    /// # Arguments
    ///
    /// * `event` - The event instance to be published.
    pub fn publish(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }

    /// Creates a [`ModuleCtx`] bound to this [`EventBus`].
    ///
    /// The returned context can be used by modules implementing [`Module`]
    /// to send and receive events within their execution scope.
    pub fn context(&self) -> ModuleCtx {
        ModuleCtx::new(self)
    }
}

/// Provides a default instance of [`EventBus`].
impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Defines the common interface for an asynchronous module
/// that can be executed and communicate via the [`EventBus`].
#[async_trait::async_trait]
pub trait Module {
    /// Runs the module asynchronously until completion.
    ///
    /// This function typically contains the module's main event loop,
    /// reacting to messages received through the [`ModuleCtx`].
    async fn run(&mut self) -> Result<(), ()>;
}

/// Timeout applied while waiting for a response event on the bus.
const WAIT_FOR_EVENT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Provides a module-scoped context for interacting with the [`EventBus`].
///
/// Each `ModuleCtx` owns both a sender and a receiver, allowing the module
/// to both publish and listen for events concurrently.
pub struct ModuleCtx {
    /// The broadcast sender used to publish events.
    pub sender: tokio::sync::broadcast::Sender<Event>,

    /// The broadcast receiver used to listen for events.
    pub receiver: tokio::sync::broadcast::Receiver<Event>,
}

impl ModuleCtx {
    /// Constructs a new [`ModuleCtx`] from the given [`EventBus`].
    ///
    /// Clones the internal broadcast sender and creates a new receiver.
    pub fn new(event_bus: &EventBus) -> Self {
        ModuleCtx {
            sender: event_bus.sender.clone(),
            receiver: event_bus.subscribe(),
        }
    }

    /// Publishes an [`EventKind`] on the bus.
    pub fn publish_event(
        &self,
        kind: EventKind,
    ) -> Result<usize, tokio::sync::broadcast::error::SendError<Event>> {
        self.sender.send(Event { kind })
    }

    /// Returns a fresh receiver observing all events published from now on.
    pub fn receiver(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.receiver.resubscribe()
    }

    /// Waits for a response event of the given type answering the request
    /// identified by `id` and `receiver_addr`.
    ///
    /// Events of other types, responses addressed to other modules, and
    /// lag notifications are skipped.
    ///
    /// # Returns
    ///
    /// * `Ok(Event)` - The matching response event.
    /// * `Err(Error)` - `TimedOut` when no matching event arrived within
    ///   the waiting period, `BrokenPipe` when the bus closed.
    pub async fn wait_for_event(
        &mut self,
        id: u32,
        receiver_addr: u32,
        kind: &EventKindType,
    ) -> Result<Event, Error> {
        let wait = tokio::time::timeout(WAIT_FOR_EVENT_TIMEOUT, async {
            loop {
                match self.receiver.recv().await {
                    Ok(event) => {
                        if event.event_type() == *kind
                            && event.kind.response_meta() == Some((id, receiver_addr))
                        {
                            return Ok(event);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Receiver lagged while waiting, skipped {skipped} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        return Err(Error::new(ErrorKind::BrokenPipe, "event bus closed"));
                    }
                }
            }
        });
        match wait.await {
            Ok(result) => result,
            Err(_) => Err(Error::new(
                ErrorKind::TimedOut,
                format!("no {kind:?} response for request {id}"),
            )),
        }
    }
}

impl Clone for ModuleCtx {
    /// Clones the context with a fresh receiver observing events published
    /// after the clone.
    fn clone(&self) -> Self {
        ModuleCtx {
            sender: self.sender.clone(),
            receiver: self.receiver.resubscribe(),
        }
    }
}

pub mod test_helper;
