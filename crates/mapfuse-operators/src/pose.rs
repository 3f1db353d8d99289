//! The pose operator: replays the recorded pose track.
//!
//! On each tick the cursor advances over past poses; the pose stamped with
//! the current tick (if any) is emitted as a `RobotPose` event, and future
//! poses wait for their tick. When the track runs out the operator goes down
//! like any other sensor.

use tracing::{debug, info};

use mapfuse_bus::{Context, Operator};
use mapfuse_types::{Broadcast, BroadcastKind, EventPayload, Pose, Status, Tick};

use crate::clock::CLOCK_NAME;

/// Participant name of the pose operator.
pub const POSE_NAME: &str = "pose";

/// Replays `poses` (ascending by time), one event per matching tick.
pub struct PoseOperator {
    poses: Vec<Pose>,
    cursor: usize,
    status: Status,
}

impl PoseOperator {
    pub fn new(poses: Vec<Pose>) -> Self {
        Self {
            poses,
            cursor: 0,
            status: Status::Up,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    fn on_tick(&mut self, tick: Tick, ctx: &mut Context) {
        if self.status != Status::Up {
            return;
        }

        if self.cursor >= self.poses.len() {
            info!("pose track exhausted");
            self.status = Status::Down;
            ctx.send_broadcast(Broadcast::Terminated { sender: POSE_NAME.to_string() });
            return;
        }

        while self.cursor < self.poses.len() {
            let pose = self.poses[self.cursor];
            if pose.time == tick {
                debug!(tick, x = pose.x, y = pose.y, yaw = pose.yaw, "pose emitted");
                let _ = ctx.send_event(EventPayload::RobotPose { tick, pose });
                self.cursor += 1;
                break;
            } else if pose.time > tick {
                break;
            } else {
                // Pose for a tick that already passed; skip it.
                self.cursor += 1;
            }
        }
    }
}

impl Operator for PoseOperator {
    fn name(&self) -> &str {
        POSE_NAME
    }

    fn init(&mut self, ctx: &mut Context) {
        ctx.subscribe_broadcast(BroadcastKind::Tick);
        ctx.subscribe_broadcast(BroadcastKind::Terminated);
        ctx.subscribe_broadcast(BroadcastKind::Crashed);
    }

    fn on_broadcast(&mut self, broadcast: Broadcast, ctx: &mut Context) {
        match broadcast {
            Broadcast::Tick { tick } => self.on_tick(tick, ctx),
            Broadcast::Terminated { sender } | Broadcast::Crashed { sender, .. }
                if sender == CLOCK_NAME =>
            {
                ctx.terminate();
            }
            _ => {}
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
