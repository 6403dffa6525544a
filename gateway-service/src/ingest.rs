//! Interrupt-to-database ingestion pipeline.
//!
//! Architecture: radio ISR → [`FrameQueue`] → [`DecodeWorker`] → (store,
//! event queue, display queue). The worker is the only mutator of the
//! per-node serial tracker and the only writer of sensor readings.

use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task;
use tracing::{debug, error, info, warn};

use telemetry_protocol::{check_and_strip, next_serial, Frame};

use crate::display::DisplayHandle;
use crate::events::{EventHandle, PendingEvent};
use crate::store::Store;

/// Raw frames pending decode; the ISR side of the pipeline.
///
/// Bounded. When the decode worker falls behind, the oldest frame is
/// dropped so the interrupt thread never blocks.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Arc<FrameQueue> {
        Arc::new(FrameQueue {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        })
    }

    fn lock_frames(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.frames.lock().expect("frame queue mutex poisoned")
    }

    /// Enqueues a raw frame. Never blocks; safe from the interrupt thread.
    pub fn push(&self, frame: Vec<u8>) {
        {
            let mut frames = self.lock_frames();
            if frames.len() == self.capacity {
                frames.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "frame queue full, oldest frame dropped");
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Dequeues the next frame; `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        let mut notified = pin!(self.notify.notified());
        loop {
            notified.as_mut().enable();
            if let Some(frame) = self.lock_frames().pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }

    /// Stops the queue; the worker drains what is left, then exits.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock_frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the serial tracker concluded about a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing seen from this node before.
    FirstSight,
    /// Same serial as the previous frame; nodes send each frame twice.
    Duplicate,
    /// A fresh frame; `gap` is true when at least one serial was skipped.
    Accepted { gap: bool },
}

#[derive(Debug)]
struct NodeTrack {
    last_serial: u16,
    last_timestamp: DateTime<Utc>,
}

/// Per-node memory of the most recently accepted packet serial.
///
/// Owned by the decode worker alone; zero-initialized empty and kept for
/// the process lifetime.
#[derive(Debug, Default)]
pub struct LastSeen {
    nodes: HashMap<u8, NodeTrack>,
}

impl LastSeen {
    pub fn observe(&mut self, node_id: u8, serial: u16, at: DateTime<Utc>) -> Disposition {
        match self.nodes.get_mut(&node_id) {
            None => {
                self.nodes.insert(
                    node_id,
                    NodeTrack {
                        last_serial: serial,
                        last_timestamp: at,
                    },
                );
                Disposition::FirstSight
            }
            Some(track) if track.last_serial == serial => Disposition::Duplicate,
            Some(track) => {
                let gap = serial != next_serial(track.last_serial);
                track.last_serial = serial;
                track.last_timestamp = at;
                Disposition::Accepted { gap }
            }
        }
    }

    /// Serial of the most recently accepted frame from `node_id`.
    pub fn last_serial(&self, node_id: u8) -> Option<u16> {
        self.nodes.get(&node_id).map(|track| track.last_serial)
    }

    /// When that frame was popped from the queue.
    pub fn last_heard(&self, node_id: u8) -> Option<DateTime<Utc>> {
        self.nodes.get(&node_id).map(|track| track.last_timestamp)
    }
}

/// The single consumer of the frame queue.
pub struct DecodeWorker {
    frames: Arc<FrameQueue>,
    store: Arc<Store>,
    display: DisplayHandle,
    events: EventHandle,
    seen: LastSeen,
}

impl DecodeWorker {
    pub fn new(
        frames: Arc<FrameQueue>,
        store: Arc<Store>,
        display: DisplayHandle,
        events: EventHandle,
    ) -> DecodeWorker {
        DecodeWorker {
            frames,
            store,
            display,
            events,
            seen: LastSeen::default(),
        }
    }

    /// Runs until the frame queue is closed and drained.
    pub async fn run(mut self) {
        info!("decode worker started");
        while let Some(raw) = self.frames.pop().await {
            self.process(raw).await;
        }
        info!("decode worker stopped");
    }

    /// Steps one frame through CRC check, dedup, persistence and fan-out.
    ///
    /// The frame either fully succeeds or is abandoned as a unit; no error
    /// here may kill the worker.
    async fn process(&mut self, raw: Vec<u8>) {
        // Receive time is stamped at pop; queue latency is bounded well
        // below the node sample interval.
        let received = Utc::now();

        let frame = match check_and_strip(&raw).and_then(Frame::unpack) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(len = raw.len(), %err, "Bad data packet detected");
                self.display.post("*Bad data packet Rx*");
                return;
            }
        };

        match self.seen.observe(frame.node_id, frame.serial, received) {
            Disposition::Duplicate => {
                debug!(
                    node_id = frame.node_id,
                    serial = frame.serial,
                    "duplicate packet dropped"
                );
                return;
            }
            Disposition::FirstSight => {
                info!("First data packet from node 0x{:02x}", frame.node_id);
                self.display
                    .post(format!("First data node 0x{:02x}", frame.node_id));
                self.post_rx_line(&frame);
            }
            Disposition::Accepted { gap } => {
                if gap {
                    warn!("Data packet missing from node 0x{:02x}", frame.node_id);
                    self.display
                        .post(format!("*Data missing from node 0x{:02x}*", frame.node_id));
                }
                self.post_rx_line(&frame);
            }
        }

        let readings: Vec<(u8, f32)> = frame.readings().collect();
        if !readings.is_empty() {
            let store = Arc::clone(&self.store);
            let written =
                task::spawn_blocking(move || store.write_readings(received, &readings)).await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(node_id = frame.node_id, %err, "failed to write sensor readings");
                    return;
                }
                Err(err) => {
                    error!(%err, "reading writer task failed");
                    return;
                }
            }
        }

        if frame.status != 0 {
            self.events.post(PendingEvent {
                node_id: frame.node_id,
                status_register: frame.status,
            });
        }
    }

    fn post_rx_line(&self, frame: &Frame) {
        info!(
            "Rx from node 0x{:02x}, packet serial 0x{:04x}",
            frame.node_id, frame.serial
        );
        self.display
            .post(format!("Rx 0x{:02x} sn 0x{:04x}", frame.node_id, frame.serial));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplaySink;
    use crate::events::EventDispatcher;
    use telemetry_protocol::{append_crc, PAD_SENSOR_ID, SENSOR_SLOTS};

    #[test]
    fn first_frame_is_first_sight() {
        let mut seen = LastSeen::default();
        let at = Utc::now();
        assert_eq!(seen.observe(0x01, 0x0100, at), Disposition::FirstSight);
        assert_eq!(seen.last_serial(0x01), Some(0x0100));
        assert_eq!(seen.last_heard(0x01), Some(at));
    }

    #[test]
    fn repeated_serial_is_duplicate_and_not_recorded_twice() {
        let mut seen = LastSeen::default();
        seen.observe(0x01, 0x0100, Utc::now());
        assert_eq!(seen.observe(0x01, 0x0100, Utc::now()), Disposition::Duplicate);
        assert_eq!(seen.last_serial(0x01), Some(0x0100));
    }

    #[test]
    fn consecutive_serial_accepts_without_gap() {
        let mut seen = LastSeen::default();
        seen.observe(0x01, 0x0100, Utc::now());
        assert_eq!(
            seen.observe(0x01, 0x0101, Utc::now()),
            Disposition::Accepted { gap: false }
        );
        assert_eq!(seen.last_serial(0x01), Some(0x0101));
    }

    #[test]
    fn skipped_serial_flags_a_gap_but_updates() {
        let mut seen = LastSeen::default();
        seen.observe(0x01, 0x0101, Utc::now());
        assert_eq!(
            seen.observe(0x01, 0x1012, Utc::now()),
            Disposition::Accepted { gap: true }
        );
        assert_eq!(seen.last_serial(0x01), Some(0x1012));
    }

    #[test]
    fn serial_wraparound_is_not_a_gap() {
        let mut seen = LastSeen::default();
        seen.observe(0x01, 0xFFFE, Utc::now());
        assert_eq!(
            seen.observe(0x01, 0xFFFF, Utc::now()),
            Disposition::Accepted { gap: false }
        );
        assert_eq!(
            seen.observe(0x01, 0x0000, Utc::now()),
            Disposition::Accepted { gap: false }
        );
    }

    #[test]
    fn nodes_are_tracked_independently() {
        let mut seen = LastSeen::default();
        seen.observe(0x01, 0x0005, Utc::now());
        assert_eq!(seen.observe(0x02, 0x0005, Utc::now()), Disposition::FirstSight);
    }

    #[tokio::test]
    async fn queue_drops_oldest_when_full() {
        let queue = FrameQueue::new(2);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.push(vec![3]);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await, Some(vec![2]));
        assert_eq!(queue.pop().await, Some(vec![3]));
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let queue = FrameQueue::new(4);
        queue.push(vec![1]);
        queue.close();
        assert_eq!(queue.pop().await, Some(vec![1]));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = FrameQueue::new(4);
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(vec![9]);
        assert_eq!(waiter.await.unwrap(), Some(vec![9]));
    }

    #[tokio::test]
    async fn corrupt_frame_is_abandoned_without_rows() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let frames = FrameQueue::new(4);
        let (display, _sink) = DisplaySink::new(None);
        let (events, _dispatcher) =
            EventDispatcher::new(Default::default(), Arc::clone(&store)).unwrap();
        let worker = DecodeWorker::new(Arc::clone(&frames), Arc::clone(&store), display, events);

        let mut sensors = [(PAD_SENSOR_ID, 0.0f32); SENSOR_SLOTS];
        sensors[0] = (0x01, 3.5);
        let frame = Frame {
            node_id: 0x0A,
            serial: 1,
            status: 0,
            sensors,
        };
        let mut rx = append_crc(&frame.pack());
        rx[0] ^= 0xFF;

        frames.push(rx);
        frames.close();
        worker.run().await;

        assert!(store.latest_readings(10).unwrap().is_empty());
    }
}
