//! # Subscriptions
//!
//! The message-queue side of the health checks. A [`Subscription`] is an external,
//! long-lived message stream handle that the health checks observe but never own:
//! they attach listeners for `message` and `error` events and detach them again.
//!
//! [`PubSubSubscription`] is a concrete handle backed by an [`EventEmitter`]; client
//! code feeds it either directly with [`PubSubSubscription::emit_message`] or by
//! forwarding an mpsc channel of events.

pub mod monitor;
pub mod restart;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::endpoint::HealthFailure;

pub use monitor::{CheckOutcome, MonitorSnapshot, MonitorState, RestartOutcome, SubscriptionMonitor};
pub use restart::{restart_handler, BoxError, SubscriptionRestarter};

/// A received message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    /// When the message was published, as stamped by the broker
    pub publish_time: Option<DateTime<Utc>>,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            publish_time: None,
            data: Vec::new(),
        }
    }

    pub fn with_publish_time(mut self, publish_time: DateTime<Utc>) -> Self {
        self.publish_time = Some(publish_time);
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }
}

/// Events a subscription delivers to its listeners
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Message(Message),
    Error(HealthFailure),
}

impl SubscriptionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SubscriptionEvent::Message(_) => EventKind::Message,
            SubscriptionEvent::Error(_) => EventKind::Error,
        }
    }
}

/// The two event kinds listeners can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Message => f.write_str("message"),
            EventKind::Error => f.write_str("error"),
        }
    }
}

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&SubscriptionEvent) + Send + Sync>;

/// Capability contract of a monitored subscription
pub trait Subscription: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Client the subscription is bound to; unbound handles fail the capability check
    fn parent(&self) -> Option<&str>;

    fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerId;

    /// Remove a listener, returning whether it was registered
    fn remove_listener(&self, id: ListenerId) -> bool;

    fn listener_count(&self, kind: EventKind) -> usize;
}

/// Identity of a subscription object, independent of its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(usize);

impl SubscriptionKey {
    pub fn of(subscription: &Arc<dyn Subscription>) -> Self {
        Self(Arc::as_ptr(subscription) as *const () as usize)
    }

    /// Key of a borrowed subscription; equal to [`Self::of`] for the same object
    pub fn of_ref(subscription: &dyn Subscription) -> Self {
        Self(subscription as *const dyn Subscription as *const () as usize)
    }
}

/// In-process listener registry
///
/// Listeners are invoked outside the registry lock, in registration order, so a
/// listener may add or remove listeners without deadlocking.
#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, EventKind, Listener)>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, kind, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.lock().clear();
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().iter().filter(|(_, k, _)| *k == kind).count()
    }

    /// Deliver an event, returning how many listeners received it
    pub fn emit(&self, event: &SubscriptionEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in &targets {
            listener(event);
        }
        targets.len()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("message_listeners", &self.listener_count(EventKind::Message))
            .field("error_listeners", &self.listener_count(EventKind::Error))
            .finish()
    }
}

/// A subscription handle bound to a client, driven through an [`EventEmitter`]
#[derive(Debug)]
pub struct PubSubSubscription {
    name: String,
    parent: Option<String>,
    emitter: EventEmitter,
}

impl PubSubSubscription {
    pub fn new(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
            emitter: EventEmitter::new(),
        }
    }

    /// A handle with no client binding; it fails the capability check
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            emitter: EventEmitter::new(),
        }
    }

    pub fn emit_message(&self, message: Message) -> usize {
        self.emitter.emit(&SubscriptionEvent::Message(message))
    }

    pub fn emit_error(&self, error: impl Into<HealthFailure>) -> usize {
        self.emitter.emit(&SubscriptionEvent::Error(error.into()))
    }

    pub fn remove_all_listeners(&self) {
        self.emitter.remove_all_listeners();
    }

    /// Re-emit every event received on `events` until the sender side closes
    pub fn forward_from(self: &Arc<Self>, mut events: mpsc::Receiver<SubscriptionEvent>) -> JoinHandle<()> {
        let subscription = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                subscription.emitter.emit(&event);
            }
            tracing::debug!(subscription = %subscription.name, "Event source closed");
        })
    }
}

impl Subscription for PubSubSubscription {
    fn name(&self) -> &str {
        &self.name
    }

    fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.emitter.add_listener(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.emitter.remove_listener(id)
    }

    fn listener_count(&self, kind: EventKind) -> usize {
        self.emitter.listener_count(kind)
    }
}
