//! [`MessageBus`] – the router between operator tasks.
//!
//! Two message families travel through the bus:
//!
//! - **Events** go to exactly one subscriber of their kind. Subscribers are
//!   kept in an ordered list; each send takes the head and rotates it to the
//!   tail, so equivalent workers (e.g. several lidar trackers) share the load
//!   round-robin without any explicit scheduling. Every posted event gets a
//!   fresh [`Promise`] the consumer can resolve through
//!   [`MessageBus::complete`].
//! - **Broadcasts** are fanned out to every subscriber of their kind, in
//!   subscription order. Two broadcasts enqueue in the same order into every
//!   mailbox they share.
//!
//! Each registered participant owns one FIFO [`Mailbox`]; the bus keeps only
//! the sending half. Mailboxes are unbounded, so a handler can never block on
//! delivering to a slow peer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use mapfuse_types::{Broadcast, BroadcastKind, Event, EventId, EventKind, EventPayload};

use crate::promise::Promise;

/// Anything that can land in a participant's mailbox.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Event(Event),
    Broadcast(Broadcast),
}

/// The receiving half of a participant's queue. FIFO; insertion order is
/// delivery order.
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Mailbox {
    /// Block until a message is available and return it. `None` once the bus
    /// has dropped this participant (unregistered) and the queue is drained.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

struct PendingEvent {
    target: String,
    promise: Promise<bool>,
}

#[derive(Default)]
struct BusState {
    mailboxes: HashMap<String, mpsc::UnboundedSender<BusMessage>>,
    event_subs: HashMap<EventKind, VecDeque<String>>,
    broadcast_subs: HashMap<BroadcastKind, Vec<String>>,
    pending: HashMap<EventId, PendingEvent>,
}

/// The process-wide router. Constructed once at wiring time and shared by
/// `Arc`; all internal state lives behind one lock that is never held across
/// an await point.
#[derive(Default)]
pub struct MessageBus {
    state: Mutex<BusState>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mailbox for `name` and hand back the receiving half.
    ///
    /// Registering a name twice replaces the previous mailbox; the old
    /// receiver drains whatever it already holds and then closes.
    pub fn register(&self, name: &str) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if state.mailboxes.insert(name.to_string(), tx).is_some() {
            warn!(participant = name, "re-registered; previous mailbox dropped");
        }
        Mailbox { rx }
    }

    /// Remove `name` from the bus: its mailbox, every subscription, and any
    /// pending promise whose target it was.
    pub fn unregister(&self, name: &str) {
        let mut state = self.lock();
        state.mailboxes.remove(name);
        for subs in state.event_subs.values_mut() {
            subs.retain(|s| s != name);
        }
        for subs in state.broadcast_subs.values_mut() {
            subs.retain(|s| s != name);
        }
        state.pending.retain(|_, pending| pending.target != name);
    }

    /// Subscribe `name` to events of `kind`. Idempotent; first subscription
    /// fixes the participant's slot in the round-robin order.
    pub fn subscribe_event(&self, kind: EventKind, name: &str) {
        let mut state = self.lock();
        let subs = state.event_subs.entry(kind).or_default();
        if !subs.iter().any(|s| s == name) {
            subs.push_back(name.to_string());
        }
    }

    /// Subscribe `name` to broadcasts of `kind`. Idempotent.
    pub fn subscribe_broadcast(&self, kind: BroadcastKind, name: &str) {
        let mut state = self.lock();
        let subs = state.broadcast_subs.entry(kind).or_default();
        if !subs.iter().any(|s| s == name) {
            subs.push(name.to_string());
        }
    }

    /// Post an event to the next subscriber of its kind, round-robin.
    ///
    /// Returns the event's promise, or `None` when nobody subscribes to this
    /// kind and the event is dropped.
    pub fn send_event(&self, payload: EventPayload) -> Option<Promise<bool>> {
        let event = Event::new(payload);
        let mut state = self.lock();

        let subs = state.event_subs.get_mut(&event.kind())?;
        let target = subs.pop_front()?;
        subs.push_back(target.clone());

        let promise = Promise::new();
        state.pending.insert(
            event.id,
            PendingEvent {
                target: target.clone(),
                promise: promise.clone(),
            },
        );

        match state.mailboxes.get(&target) {
            Some(tx) => {
                // The receiver lives as long as the registration; a send can
                // only fail during teardown, where the event is moot anyway.
                let _ = tx.send(BusMessage::Event(event));
            }
            None => debug!(participant = %target, "event subscriber has no mailbox"),
        }

        Some(promise)
    }

    /// Fan a broadcast out to every subscriber of its kind, in subscription
    /// order.
    pub fn send_broadcast(&self, broadcast: Broadcast) {
        let state = self.lock();
        let Some(subs) = state.broadcast_subs.get(&broadcast.kind()) else {
            return;
        };
        for name in subs {
            if let Some(tx) = state.mailboxes.get(name) {
                let _ = tx.send(BusMessage::Broadcast(broadcast.clone()));
            }
        }
    }

    /// Resolve the promise of event `id` with `result`. Safely ignored when
    /// no such promise is pending.
    pub fn complete(&self, id: EventId, result: bool) {
        let pending = self.lock().pending.remove(&id);
        if let Some(pending) = pending {
            pending.promise.resolve(result);
        }
    }

    /// Number of currently registered participants. Zero after a clean
    /// shutdown.
    pub fn participant_count(&self) -> usize {
        self.lock().mailboxes.len()
    }

    /// Number of events posted but not yet completed.
    pub fn pending_event_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        // A poisoned bus lock means a panic mid-route; the state itself is
        // still coherent for the remaining participants.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
