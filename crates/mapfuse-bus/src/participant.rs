//! The participant runtime: the loop every operator task runs.
//!
//! An operator implements [`Operator`]; [`run_operator`] drives it:
//!
//! 1. Register with the bus, obtaining the mailbox.
//! 2. Call [`Operator::init`], which declares subscriptions through the
//!    [`Context`].
//! 3. Signal readiness on the start barrier. The clock's timer waits on the
//!    same barrier, so no tick is emitted before every participant is
//!    subscribed.
//! 4. Dispatch mailbox messages to the operator's handlers until a handler
//!    calls [`Context::terminate`].
//! 5. Unregister.
//!
//! Handlers are synchronous and run to completion before the next message is
//! taken; a participant suspends only while waiting on its mailbox.

use std::sync::Arc;

use tokio::sync::Barrier;
use tracing::debug;

use mapfuse_types::{Broadcast, BroadcastKind, Event, EventId, EventKind, EventPayload};

use crate::bus::{BusMessage, MessageBus};
use crate::promise::Promise;

/// A bus participant. One instance runs on one task; handlers have exclusive
/// `&mut self` access, so operator state needs no locking.
pub trait Operator: Send + 'static {
    /// Unique participant name, used for registration and as the message
    /// sender identity.
    fn name(&self) -> &str;

    /// Declare subscriptions. Called once, after registration and before the
    /// first message is delivered.
    fn init(&mut self, ctx: &mut Context);

    /// Handle an event delivered to this participant.
    fn on_event(&mut self, event: Event, ctx: &mut Context) {
        let _ = (event, ctx);
    }

    /// Handle a broadcast delivered to this participant.
    fn on_broadcast(&mut self, broadcast: Broadcast, ctx: &mut Context) {
        let _ = (broadcast, ctx);
    }
}

/// The operator's handle to the bus, plus its termination flag.
pub struct Context {
    bus: Arc<MessageBus>,
    name: String,
    terminated: bool,
}

impl Context {
    fn new(bus: Arc<MessageBus>, name: String) -> Self {
        Self {
            bus,
            name,
            terminated: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe_event(&self, kind: EventKind) {
        self.bus.subscribe_event(kind, &self.name);
    }

    pub fn subscribe_broadcast(&self, kind: BroadcastKind) {
        self.bus.subscribe_broadcast(kind, &self.name);
    }

    /// Post an event; `None` when nobody subscribes to its kind.
    pub fn send_event(&self, payload: EventPayload) -> Option<Promise<bool>> {
        self.bus.send_event(payload)
    }

    pub fn send_broadcast(&self, broadcast: Broadcast) {
        self.bus.send_broadcast(broadcast);
    }

    /// Resolve the promise of a handled event.
    pub fn complete(&self, id: EventId, result: bool) {
        self.bus.complete(id, result);
    }

    /// Leave the dispatch loop after the current handler returns.
    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// Drive `operator` until it terminates. See the module docs for the exact
/// lifecycle.
pub async fn run_operator<O: Operator>(mut operator: O, bus: Arc<MessageBus>, ready: Arc<Barrier>) {
    let name = operator.name().to_string();
    let mut mailbox = bus.register(&name);
    let mut ctx = Context::new(Arc::clone(&bus), name.clone());

    operator.init(&mut ctx);
    debug!(operator = %name, "initialized");
    ready.wait().await;

    while !ctx.is_terminated() {
        match mailbox.recv().await {
            Some(BusMessage::Event(event)) => operator.on_event(event, &mut ctx),
            Some(BusMessage::Broadcast(broadcast)) => operator.on_broadcast(broadcast, &mut ctx),
            // Mailbox dropped by the bus; nothing further can arrive.
            None => break,
        }
    }

    bus.unregister(&name);
    debug!(operator = %name, "unregistered");
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
