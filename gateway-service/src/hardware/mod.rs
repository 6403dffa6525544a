//! Hardware collaborators: packet radio, GPIO ingress, OLED panel.

pub mod oled;
pub mod rfm69;

use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::ingest::FrameQueue;

/// The receive surface of a packet radio.
///
/// The gateway never transmits; this is the whole contract.
pub trait Radio: Send {
    /// True while a received payload waits in the FIFO.
    fn payload_ready(&mut self) -> anyhow::Result<bool>;
    /// Non-blocking drain of one received payload.
    fn receive(&mut self) -> anyhow::Result<Option<Vec<u8>>>;
    /// Enters receive mode.
    fn listen(&mut self) -> anyhow::Result<()>;
    /// Leaves receive mode.
    fn standby(&mut self) -> anyhow::Result<()>;
}

/// Bound into the GPIO interrupt registration; closes over the frame queue.
///
/// The interrupt path drains one frame from the radio FIFO and enqueues it.
/// It never blocks on storage or HTTP.
#[derive(Clone)]
pub struct Ingress {
    radio: Arc<Mutex<Box<dyn Radio>>>,
    frames: Arc<FrameQueue>,
}

impl Ingress {
    pub fn new(radio: Arc<Mutex<Box<dyn Radio>>>, frames: Arc<FrameQueue>) -> Ingress {
        Ingress { radio, frames }
    }

    /// Called on each rising edge of the payload-ready line.
    pub fn on_payload_ready(&self) {
        let mut radio = self.radio.lock().expect("radio mutex poisoned");
        match radio.payload_ready() {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                error!(%err, "payload-ready poll failed");
                return;
            }
        }
        match radio.receive() {
            Ok(Some(frame)) => {
                debug!(len = frame.len(), "frame received");
                self.frames.push(frame);
            }
            Ok(None) => {}
            Err(err) => error!(%err, "radio receive failed"),
        }
    }
}
