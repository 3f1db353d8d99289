//! The lidar operator: matches camera detections to raw point clouds.
//!
//! All lidar workers share one immutable [`LidarDatabase`], loaded once at
//! startup and ordered by time. A worker with frequency `f` may process a
//! detection stamped `d` only from tick `d + f` onwards; earlier arrivals
//! wait in the pending set and are drained as ticks pass.
//!
//! Matching a detected object means scanning the database for the record with
//! the same id and the largest `time ≤ d`; among records sharing that time,
//! the one encountered last in database order wins. A record carrying the
//! [`ERROR_ID`] marker with `time ≤ d` aborts the run through the crash
//! protocol.
//!
//! Exhaustion (the tick passing the final database record) downs the worker
//! for tick processing, but a detection already delivered to its mailbox is
//! still matched: the camera's latency guarantees the data it needs is in
//! the past of the database.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use mapfuse_bus::{Context, Operator};
use mapfuse_types::{
    Broadcast, BroadcastKind, Event, EventKind, EventPayload, StampedCloudPoints,
    StampedDetection, Statistics, Status, Tick, TrackedObject, ERROR_ID,
};

use crate::clock::CLOCK_NAME;

/// The shared read-only lidar dataset, ordered by ascending time.
#[derive(Debug, Default)]
pub struct LidarDatabase {
    records: Vec<StampedCloudPoints>,
}

impl LidarDatabase {
    pub fn new(records: Vec<StampedCloudPoints>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[StampedCloudPoints] {
        &self.records
    }

    /// Timestamp of the final record; `None` for an empty database.
    pub fn last_time(&self) -> Option<Tick> {
        self.records.last().map(|record| record.time)
    }
}

/// One lidar tracker worker.
pub struct LidarOperator {
    name: String,
    frequency: Tick,
    database: Arc<LidarDatabase>,
    status: Status,
    current_tick: Tick,
    pending: Vec<StampedDetection>,
    last_tracked: Vec<TrackedObject>,
    stats: Arc<Statistics>,
}

enum MatchOutcome {
    Tracked(Vec<TrackedObject>),
    Fault,
}

impl LidarOperator {
    pub fn new(id: u32, frequency: Tick, database: Arc<LidarDatabase>, stats: Arc<Statistics>) -> Self {
        Self {
            name: format!("lidar{id}"),
            frequency,
            database,
            status: Status::Up,
            current_tick: 0,
            pending: Vec::new(),
            last_tracked: Vec::new(),
            stats,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The most recent batch this worker produced, kept for crash forensics.
    pub fn last_tracked(&self) -> &[TrackedObject] {
        &self.last_tracked
    }

    fn on_tick(&mut self, tick: Tick, ctx: &mut Context) {
        if self.status != Status::Up {
            return;
        }
        self.current_tick = tick;

        let exhausted = match self.database.last_time() {
            Some(last) => tick > last,
            None => true,
        };
        if exhausted {
            info!(lidar = %self.name, "database exhausted");
            self.status = Status::Down;
            ctx.send_broadcast(Broadcast::Terminated { sender: self.name.clone() });
            return;
        }

        // Drain every pending detection whose availability has been reached.
        let frequency = self.frequency;
        let mut ready = Vec::new();
        self.pending.retain(|detection| {
            if detection.time + frequency <= tick {
                ready.push(detection.clone());
                false
            } else {
                true
            }
        });
        for detection in ready {
            self.process(detection, ctx);
            if self.status != Status::Up {
                return;
            }
        }
    }

    fn on_detections(&mut self, frame: StampedDetection, ctx: &mut Context) {
        // A worker that ran out of database records can still match a
        // detection that was already in flight; only a faulted worker stops.
        if self.status == Status::Error {
            return;
        }
        if frame.time + self.frequency <= self.current_tick {
            self.process(frame, ctx);
        } else {
            debug!(lidar = %self.name, detection_time = frame.time, "detection pending");
            self.pending.push(frame);
        }
    }

    fn process(&mut self, frame: StampedDetection, ctx: &mut Context) {
        match self.match_detections(&frame) {
            MatchOutcome::Fault => {
                error!(lidar = %self.name, "fault record in database");
                ctx.send_broadcast(Broadcast::Crashed {
                    sender: self.name.clone(),
                    error_maker: self.name.clone(),
                    message: "LiDar Error".to_string(),
                });
                self.status = Status::Error;
            }
            MatchOutcome::Tracked(tracked) => {
                self.last_tracked = tracked.clone();
                if !tracked.is_empty() {
                    debug!(lidar = %self.name, batch = tracked.len(), "tracked objects ready");
                    self.stats.add_tracked(tracked.len() as u64);
                    let _ = ctx.send_event(EventPayload::TrackedObjects {
                        batch: tracked,
                        sender: self.name.clone(),
                    });
                }
            }
        }
    }

    /// Pair every detection in `frame` with its latest database record.
    fn match_detections(&self, frame: &StampedDetection) -> MatchOutcome {
        let mut tracked = Vec::new();

        for object in &frame.detected_objects {
            let mut latest: Option<&StampedCloudPoints> = None;
            for record in self.database.records() {
                if record.time > frame.time {
                    break;
                }
                if record.id == ERROR_ID {
                    return MatchOutcome::Fault;
                }
                if record.id == object.id {
                    // No early exit on an exact timestamp match: with equal
                    // times the record encountered last wins.
                    latest = Some(record);
                }
            }

            match latest {
                Some(record) => tracked.push(TrackedObject {
                    id: object.id.clone(),
                    time: frame.time,
                    description: object.description.clone(),
                    coordinates: record.points(),
                }),
                None => {
                    warn!(lidar = %self.name, object = %object.id, "no scan for detection")
                }
            }
        }

        MatchOutcome::Tracked(tracked)
    }
}

impl Operator for LidarOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &mut Context) {
        ctx.subscribe_broadcast(BroadcastKind::Tick);
        ctx.subscribe_broadcast(BroadcastKind::Terminated);
        ctx.subscribe_broadcast(BroadcastKind::Crashed);
        ctx.subscribe_event(EventKind::DetectObjects);
    }

    fn on_event(&mut self, event: Event, ctx: &mut Context) {
        if let EventPayload::DetectObjects { frame, .. } = event.payload {
            self.on_detections(frame, ctx);
        }
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
    use mapfuse_types::DetectedObject;
    use tokio::sync::Barrier;

    fn record(id: &str, time: Tick, points: &[[f64; 2]]) -> StampedCloudPoints {
        StampedCloudPoints {
            id: id.to_string(),
            time,
            cloud_points: points.iter().map(|p| p.to_vec()).collect(),
        }
    }

    fn detections(time: Tick, ids: &[&str]) -> StampedDetection {
        StampedDetection {
            time,
            detected_objects: ids.iter().map(|id| DetectedObject::new(*id, "object")).collect(),
        }
    }

    async fn harness(
        lidar: LidarOperator,
    ) -> (Arc<MessageBus>, mapfuse_bus::Mailbox, tokio::task::JoinHandle<()>) {
        let bus = Arc::new(MessageBus::new());
        let observer = bus.register("observer");
        bus.subscribe_event(EventKind::TrackedObjects, "observer");
        bus.subscribe_broadcast(BroadcastKind::Terminated, "observer");
        bus.subscribe_broadcast(BroadcastKind::Crashed, "observer");

        let ready = Arc::new(Barrier::new(2));
        let task = tokio::spawn(run_operator(lidar, Arc::clone(&bus), Arc::clone(&ready)));
        ready.wait().await;
        (bus, observer, task)
    }

    async fn drain(bus: &MessageBus, mut observer: mapfuse_bus::Mailbox) -> Vec<BusMessage> {
        bus.unregister("observer");
        let mut messages = Vec::new();
        while let Some(message) = observer.recv().await {
            messages.push(message);
        }
        messages
    }

    fn tracked_batches(messages: &[BusMessage]) -> Vec<Vec<TrackedObject>> {
        messages
            .iter()
            .filter_map(|message| match message {
                BusMessage::Event(event) => match &event.payload {
                    EventPayload::TrackedObjects { batch, .. } => Some(batch.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn detection_matches_latest_record_at_or_before_its_time() {
        let stats = Arc::new(Statistics::new());
        let database = Arc::new(LidarDatabase::new(vec![
            record("Wall_1", 1, &[[1.0, 1.0]]),
            record("Wall_1", 3, &[[2.0, 2.0]]),
            record("Wall_1", 9, &[[9.0, 9.0]]),
        ]));
        let lidar = LidarOperator::new(1, 1, database, Arc::clone(&stats));
        let (bus, observer, task) = harness(lidar).await;

        bus.send_broadcast(Broadcast::Tick { tick: 5 });
        bus.send_event(EventPayload::DetectObjects {
            frame: detections(4, &["Wall_1"]),
            sender: "camera1".to_string(),
        });
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();

        let batches = tracked_batches(&drain(&bus, observer).await);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].time, 4);
        // The tick-3 record is the latest not newer than the detection.
        assert_eq!(batches[0][0].coordinates, vec![mapfuse_types::CloudPoint::new(2.0, 2.0)]);
        assert_eq!(stats.snapshot().tracked, 1);
    }

    #[tokio::test]
    async fn equal_timestamps_take_the_last_record_in_database_order() {
        let stats = Arc::new(Statistics::new());
        let database = Arc::new(LidarDatabase::new(vec![
            record("Wall_1", 2, &[[1.0, 1.0]]),
            record("Wall_1", 2, &[[5.0, 5.0]]),
        ]));
        let lidar = LidarOperator::new(1, 1, database, stats);
        let (bus, observer, task) = harness(lidar).await;

        bus.send_broadcast(Broadcast::Tick { tick: 3 });
        bus.send_event(EventPayload::DetectObjects {
            frame: detections(2, &["Wall_1"]),
            sender: "camera1".to_string(),
        });
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();

        let batches = tracked_batches(&drain(&bus, observer).await);
        assert_eq!(batches[0][0].coordinates, vec![mapfuse_types::CloudPoint::new(5.0, 5.0)]);
    }

    #[tokio::test]
    async fn early_detection_waits_for_its_availability_tick() {
        let stats = Arc::new(Statistics::new());
        let database = Arc::new(LidarDatabase::new(vec![record("Wall_1", 1, &[[1.0, 1.0]])]));
        let lidar = LidarOperator::new(1, 2, database, Arc::clone(&stats));
        let (bus, observer, task) = harness(lidar).await;

        bus.send_broadcast(Broadcast::Tick { tick: 1 });
        // Arrives at tick 1 but only becomes processable at tick 3.
        bus.send_event(EventPayload::DetectObjects {
            frame: detections(1, &["Wall_1"]),
            sender: "camera1".to_string(),
        });
        bus.send_broadcast(Broadcast::Tick { tick: 2 });
        bus.send_broadcast(Broadcast::Tick { tick: 3 });
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();

        // Database's last record is at tick 1, so ticks 2 and 3 exhaust the
        // worker before the pending detection drains.
        let messages = drain(&bus, observer).await;
        assert!(tracked_batches(&messages).is_empty());
        assert_eq!(stats.snapshot().tracked, 0);
    }

    #[tokio::test]
    async fn pending_detection_drains_once_ready() {
        let stats = Arc::new(Statistics::new());
        let database = Arc::new(LidarDatabase::new(vec![
            record("Wall_1", 1, &[[1.0, 1.0]]),
            record("Door_1", 8, &[[8.0, 8.0]]),
        ]));
        let lidar = LidarOperator::new(1, 2, database, Arc::clone(&stats));
        let (bus, observer, task) = harness(lidar).await;

        bus.send_broadcast(Broadcast::Tick { tick: 1 });
        bus.send_event(EventPayload::DetectObjects {
            frame: detections(1, &["Wall_1"]),
            sender: "camera1".to_string(),
        });
        bus.send_broadcast(Broadcast::Tick { tick: 2 });
        bus.send_broadcast(Broadcast::Tick { tick: 3 });
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();

        let batches = tracked_batches(&drain(&bus, observer).await);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].id, "Wall_1");
        assert_eq!(stats.snapshot().tracked, 1);
    }

    #[tokio::test]
    async fn fault_record_raises_crash_without_a_batch() {
        let stats = Arc::new(Statistics::new());
        let database = Arc::new(LidarDatabase::new(vec![
            record(ERROR_ID, 1, &[]),
            record("Wall_1", 2, &[[1.0, 1.0]]),
        ]));
        let lidar = LidarOperator::new(1, 0, database, Arc::clone(&stats));
        let (bus, observer, task) = harness(lidar).await;

        bus.send_broadcast(Broadcast::Tick { tick: 2 });
        bus.send_event(EventPayload::DetectObjects {
            frame: detections(2, &["Wall_1"]),
            sender: "camera1".to_string(),
        });
        bus.send_broadcast(Broadcast::Crashed {
            sender: CLOCK_NAME.to_string(),
            error_maker: "lidar1".to_string(),
            message: "LiDar Error".to_string(),
        });
        task.await.unwrap();

        let messages = drain(&bus, observer).await;
        assert!(tracked_batches(&messages).is_empty());
        let crashed = messages.iter().any(|message| {
            matches!(
                message,
                BusMessage::Broadcast(Broadcast::Crashed { sender, message, .. })
                    if sender == "lidar1" && message == "LiDar Error"
            )
        });
        assert!(crashed);
        assert_eq!(stats.snapshot().tracked, 0);
    }

    #[tokio::test]
    async fn worker_goes_down_past_the_final_record() {
        let stats = Arc::new(Statistics::new());
        let database = Arc::new(LidarDatabase::new(vec![record("Wall_1", 2, &[[1.0, 1.0]])]));
        let lidar = LidarOperator::new(1, 1, database, stats);
        let (bus, observer, task) = harness(lidar).await;

        bus.send_broadcast(Broadcast::Tick { tick: 2 });
        bus.send_broadcast(Broadcast::Tick { tick: 3 });
        bus.send_broadcast(Broadcast::Tick { tick: 4 });
        bus.send_broadcast(Broadcast::Terminated { sender: CLOCK_NAME.to_string() });
        task.await.unwrap();

        let messages = drain(&bus, observer).await;
        let terminations = messages
            .iter()
            .filter(|message| {
                matches!(
                    message,
                    BusMessage::Broadcast(Broadcast::Terminated { sender }) if sender == "lidar1"
                )
            })
            .count();
        assert_eq!(terminations, 1);
    }
}
