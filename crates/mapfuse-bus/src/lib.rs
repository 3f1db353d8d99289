//! `mapfuse-bus` – the concurrency substrate of the simulator.
//!
//! Routes the finite message alphabet of `mapfuse-types` between operator
//! tasks without caring what the messages mean.
//!
//! # Modules
//!
//! - [`promise`] – [`Promise`]: a single-assignment cell carrying the result
//!   of an event, with blocking and bounded-wait retrieval.
//! - [`bus`] – [`MessageBus`]: per-participant FIFO mailboxes, fan-out
//!   broadcasts, and strict round-robin event delivery with a promise per
//!   posted event.
//! - [`participant`] – the [`Operator`] trait and [`run_operator`], the loop
//!   every participant runs: register, declare subscriptions, dispatch
//!   messages until told to terminate, unregister.

pub mod bus;
pub mod participant;
pub mod promise;

pub use bus::{BusMessage, Mailbox, MessageBus};
pub use participant::{run_operator, Context, Operator};
pub use promise::Promise;
