//! The camera operator: replays recorded frames with per-camera latency.
//!
//! A frame detected at tick `d` becomes *available* at `d + latency`,
//! modelling the processing delay between seeing an object and being able to
//! hand it to a lidar tracker. On every tick the camera walks its cursor
//! forward: frames whose availability equals the tick are emitted (once to
//! the lidar pool, once to fusion for crash snapshotting), frames whose
//! availability has already passed are dropped as stale, and the walk stops
//! at the first frame still in the future.
//!
//! A frame containing the [`ERROR_ID`] marker at its detection tick raises
//! the crash protocol with the marker's description as the fault message.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use mapfuse_bus::{Context, Operator};
use mapfuse_types::{
    Broadcast, BroadcastKind, EventPayload, StampedDetection, Statistics, Status, Tick,
};

use crate::clock::CLOCK_NAME;

/// One camera sensor. Frames must be in ascending detection time.
pub struct CameraOperator {
    name: String,
    latency: Tick,
    frames: Vec<StampedDetection>,
    cursor: usize,
    status: Status,
    stats: Arc<Statistics>,
}

impl CameraOperator {
    pub fn new(id: u32, latency: Tick, frames: Vec<StampedDetection>, stats: Arc<Statistics>) -> Self {
        Self {
            name: format!("camera{id}"),
            latency,
            frames,
            cursor: 0,
            status: Status::Up,
            stats,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    fn on_tick(&mut self, tick: Tick, ctx: &mut Context) {
        if self.status != Status::Up {
            return;
        }

        if self.cursor == self.frames.len() {
            info!(camera = %self.name, "frames exhausted");
            self.status = Status::Down;
            ctx.send_broadcast(Broadcast::Terminated { sender: self.name.clone() });
            return;
        }

        while self.cursor < self.frames.len() {
            let frame = self.frames[self.cursor].clone();

            // Fault markers surface at detection time, before the frame would
            // ever become available.
            if frame.time == tick {
                if let Some(fault) = frame.detected_objects.iter().find(|o| o.is_fault()) {
                    error!(camera = %self.name, message = %fault.description, "fault marker in frame");
                    ctx.send_broadcast(Broadcast::Crashed {
                        sender: self.name.clone(),
                        error_maker: self.name.clone(),
                        message: fault.description.clone(),
                    });
                    self.cursor += 1;
                    self.status = Status::Error;
                    return;
                }
            }

            let available = frame.time + self.latency;
            if available == tick {
                let count = frame.detected_objects.len() as u64;
                debug!(camera = %self.name, tick, objects = count, "frame available");
                let _ = ctx.send_event(EventPayload::DetectObjects {
                    frame: frame.clone(),
                    sender: self.name.clone(),
                });
                let _ = ctx.send_event(EventPayload::DetectObjectsForFusion {
                    frame,
                    sender: self.name.clone(),
                });
                self.stats.add_detected(count);
                self.cursor += 1;
            } else if tick < available {
                break;
            } else {
                warn!(camera = %self.name, frame_time = frame.time, tick, "dropping stale frame");
                self.cursor += 1;
            }
        }
    }
}

impl Operator for CameraOperator {
    fn name(&self) -> &str {
        &self.name
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

#[cfg(test)]
mod tests {
    use super::*;
    use mapfuse_bus::{run_operator, BusMessage, MessageBus};
    use mapfuse_types::{DetectedObject, EventKind};
    use tokio::sync::Barrier;

    fn frame(time: Tick, objects: &[(&str, &str)]) -> StampedDetection {
        StampedDetection {
            time,
            detected_objects: objects
                .iter()
                .map(|(id, desc)| DetectedObject::new(*id, *desc))
                .collect(),
        }
    }

    /// Spawn a camera against a fresh bus; returns the bus plus a mailbox
    /// registered for all camera output (events and broadcasts).
    async fn harness(
        camera: CameraOperator,
    ) -> (Arc<MessageBus>, mapfuse_bus::Mailbox, tokio::task::JoinHandle<()>) {
        let bus = Arc::new(MessageBus::new());
        let observer = bus.register("observer");
        bus.subscribe_event(EventKind::DetectObjects, "observer");
        bus.subscribe_event(EventKind::DetectObjectsForFusion, "observer");
        bus.subscribe_broadcast(BroadcastKind::Terminated, "observer");
        bus.subscribe_broadcast(BroadcastKind::Crashed, "observer");

        let ready = Arc::new(Barrier::new(2));
        let task = tokio::spawn(run_operator(camera, Arc::clone(&bus), Arc::clone(&ready)));
        ready.wait().await;
        (bus, observer, task)
    }

    #[tokio::test]
    async fn frame_is_emitted_at_availability_tick() {
        let stats = Arc::new(Statistics::new());
        let camera = CameraOperator::new(
            1,
            2,
            vec![frame(1, &[("Wall_1", "wall"), ("Door_1", "door")])],
            Arc::clone(&stats),
        );
        let (bus, mut observer, task) = harness(camera).await;

        // Detection tick: nothing is available yet.
        bus.send_broadcast(Broadcast::Tick { tick: 1 });
        // Availability tick: both events fire.
        bus.send_broadcast(Broadcast::Tick { tick: 3 });
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();
        bus.unregister("observer");

        let mut kinds = Vec::new();
        while let Some(message) = observer.recv().await {
            if let BusMessage::Event(event) = message {
                kinds.push(event.kind());
            }
        }
        assert_eq!(
            kinds,
            vec![EventKind::DetectObjects, EventKind::DetectObjectsForFusion]
        );
        assert_eq!(stats.snapshot().detected, 2);
    }

    #[tokio::test]
    async fn exhausted_camera_goes_down_and_reports_termination() {
        let stats = Arc::new(Statistics::new());
        let camera = CameraOperator::new(1, 1, vec![frame(1, &[("Wall_1", "wall")])], stats);
        let (bus, mut observer, task) = harness(camera).await;

        bus.send_broadcast(Broadcast::Tick { tick: 2 }); // frame emitted
        bus.send_broadcast(Broadcast::Tick { tick: 3 }); // cursor exhausted
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();
        bus.unregister("observer");

        let mut terminated_by_camera = false;
        while let Some(message) = observer.recv().await {
            if let BusMessage::Broadcast(Broadcast::Terminated { sender }) = message {
                if sender == "camera1" {
                    terminated_by_camera = true;
                }
            }
        }
        assert!(terminated_by_camera);
    }

    #[tokio::test]
    async fn fault_marker_raises_crash_with_its_description() {
        let stats = Arc::new(Statistics::new());
        let camera = CameraOperator::new(
            1,
            1,
            vec![
                frame(1, &[("Wall_1", "wall")]),
                frame(2, &[(mapfuse_types::ERROR_ID, "camera disconnected")]),
            ],
            Arc::clone(&stats),
        );
        let (bus, mut observer, task) = harness(camera).await;

        bus.send_broadcast(Broadcast::Tick { tick: 2 });
        bus.send_broadcast(Broadcast::Crashed {
            sender: CLOCK_NAME.to_string(),
            error_maker: "camera1".to_string(),
            message: "camera disconnected".to_string(),
        });
        task.await.unwrap();
        bus.unregister("observer");

        let mut crash = None;
        while let Some(message) = observer.recv().await {
            if let BusMessage::Broadcast(Broadcast::Crashed { sender, message, .. }) = message {
                if sender == "camera1" {
                    crash = Some(message);
                }
            }
        }
        assert_eq!(crash.as_deref(), Some("camera disconnected"));
        // Frame 1 (availability tick 2) was emitted before the walk reached
        // the faulty frame, so its detection still counted.
        assert_eq!(stats.snapshot().detected, 1);
    }

    #[tokio::test]
    async fn stale_frames_are_dropped_without_events() {
        let stats = Arc::new(Statistics::new());
        let camera = CameraOperator::new(
            1,
            1,
            vec![frame(1, &[("Wall_1", "wall")]), frame(4, &[("Door_1", "door")])],
            Arc::clone(&stats),
        );
        let (bus, mut observer, task) = harness(camera).await;

        // Tick 3 skips frame 1 (availability 2 already passed) and leaves
        // frame 4 (availability 5) for later.
        bus.send_broadcast(Broadcast::Tick { tick: 3 });
        bus.send_broadcast(Broadcast::Tick { tick: 5 });
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();
        bus.unregister("observer");

        let mut emitted = Vec::new();
        while let Some(message) = observer.recv().await {
            if let BusMessage::Event(event) = message {
                if let EventPayload::DetectObjects { frame, .. } = event.payload {
                    emitted.push(frame.time);
                }
            }
        }
        assert_eq!(emitted, vec![4]);
        assert_eq!(stats.snapshot().detected, 1);
    }

    #[tokio::test]
    async fn downed_camera_ignores_further_ticks() {
        let stats = Arc::new(Statistics::new());
        let camera = CameraOperator::new(1, 1, vec![], stats);
        let (bus, mut observer, task) = harness(camera).await;

        bus.send_broadcast(Broadcast::Tick { tick: 1 });
        bus.send_broadcast(Broadcast::Tick { tick: 2 });
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();
        bus.unregister("observer");

        let mut terminations = 0;
        while let Some(message) = observer.recv().await {
            if matches!(
                message,
                BusMessage::Broadcast(Broadcast::Terminated { ref sender }) if sender == "camera1"
            ) {
                terminations += 1;
            }
        }
        // Down after the first tick; the second tick must not re-announce.
        assert_eq!(terminations, 1);
    }
}
