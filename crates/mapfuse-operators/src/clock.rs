//! The clock: tick source, sensor bookkeeping, and the crash latch.
//!
//! The clock is split across two tasks sharing one [`ClockState`]:
//!
//! - [`ClockOperator`] is a normal bus participant. It counts sensors down as
//!   they report `Terminated` and latches the first `Crashed` fault raised by
//!   anyone else. It terminates when it sees its own final broadcast.
//! - [`run_timer`] is the dedicated timer task. After the start barrier it
//!   emits `Tick(1), Tick(2), …` every `tick_period` while ticks remain,
//!   sensors remain, and no fault is latched; then it broadcasts the
//!   system-wide shutdown: `Crashed` (preserving the original fault) if the
//!   latch is set, `Terminated` otherwise.
//!
//! Tick `n` is enqueued to every subscriber before tick `n+1` is broadcast;
//! a sensor crash lands between ticks, so the in-flight tick still counts as
//! delivered.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Barrier;
use tracing::{debug, error, info};

use mapfuse_bus::{Context, MessageBus, Operator};
use mapfuse_types::{Broadcast, BroadcastKind, Statistics, Tick};

/// Participant name of the clock; the sender every operator recognizes as
/// the system-wide shutdown authority.
pub const CLOCK_NAME: &str = "clock";

/// A latched sensor fault, preserved verbatim into the clock's final
/// `Crashed` broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub error_maker: String,
    pub message: String,
}

/// State shared between the clock participant and its timer task.
#[derive(Debug)]
pub struct ClockState {
    active_sensors: AtomicUsize,
    fault: Mutex<Option<Fault>>,
}

impl ClockState {
    pub fn new(sensor_count: usize) -> Self {
        Self {
            active_sensors: AtomicUsize::new(sensor_count),
            fault: Mutex::new(None),
        }
    }

    pub fn active_sensors(&self) -> usize {
        self.active_sensors.load(Ordering::Acquire)
    }

    /// One sensor reported data exhaustion; returns how many remain.
    pub fn sensor_down(&self) -> usize {
        let previous = self.active_sensors.fetch_sub(1, Ordering::AcqRel);
        previous.saturating_sub(1)
    }

    /// Latch a fault. The first one wins; later faults are dropped.
    pub fn latch_fault(&self, error_maker: String, message: String) {
        let mut fault = self.lock_fault();
        if fault.is_none() {
            *fault = Some(Fault { error_maker, message });
        }
    }

    pub fn fault(&self) -> Option<Fault> {
        self.lock_fault().clone()
    }

    fn lock_fault(&self) -> std::sync::MutexGuard<'_, Option<Fault>> {
        self.fault.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The clock's participant half: watches lifecycle broadcasts on behalf of
/// the timer.
pub struct ClockOperator {
    sensors: HashSet<String>,
    state: Arc<ClockState>,
}

impl ClockOperator {
    /// `sensors` is the set of participant names whose termination counts
    /// against the active-sensor total (cameras, lidars, pose, not fusion).
    pub fn new(sensors: HashSet<String>, state: Arc<ClockState>) -> Self {
        Self { sensors, state }
    }
}

impl Operator for ClockOperator {
    fn name(&self) -> &str {
        CLOCK_NAME
    }

    fn init(&mut self, ctx: &mut Context) {
        ctx.subscribe_broadcast(BroadcastKind::Terminated);
        ctx.subscribe_broadcast(BroadcastKind::Crashed);
    }

    fn on_broadcast(&mut self, broadcast: Broadcast, ctx: &mut Context) {
        match broadcast {
            Broadcast::Terminated { sender } => {
                if sender == CLOCK_NAME {
                    ctx.terminate();
                } else if self.sensors.contains(&sender) {
                    let remaining = self.state.sensor_down();
                    info!(sensor = %sender, remaining, "sensor finished");
                }
            }
            Broadcast::Crashed { sender, error_maker, message } => {
                if sender == CLOCK_NAME {
                    ctx.terminate();
                } else {
                    error!(sensor = %error_maker, %message, "fault latched");
                    self.state.latch_fault(error_maker, message);
                }
            }
            Broadcast::Tick { .. } => {}
        }
    }
}

/// The dedicated timer task. Consult the module docs for the loop contract.
pub async fn run_timer(
    state: Arc<ClockState>,
    bus: Arc<MessageBus>,
    stats: Arc<Statistics>,
    tick_period: Duration,
    duration: Tick,
    ready: Arc<Barrier>,
) {
    ready.wait().await;
    info!(?tick_period, duration, "timer started");

    let mut current: Tick = 0;
    while current < duration && state.active_sensors() > 0 && state.fault().is_none() {
        current += 1;
        debug!(tick = current, "tick");
        bus.send_broadcast(Broadcast::Tick { tick: current });
        stats.add_tick();
        tokio::time::sleep(tick_period).await;
    }

    match state.fault() {
        Some(fault) => {
            error!(sensor = %fault.error_maker, "timer stopping on fault");
            bus.send_broadcast(Broadcast::Crashed {
                sender: CLOCK_NAME.to_string(),
                error_maker: fault.error_maker,
                message: fault.message,
            });
        }
        None => {
            info!(ticks = current, "timer finished");
            bus.send_broadcast(Broadcast::Terminated {
                sender: CLOCK_NAME.to_string(),
            });
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
