//! Status-register decode and webhook dispatch.
//!
//! A node asserts bits in its status register; each asserted bit maps
//! through the configured action table to one outbound HTTP GET. The
//! dispatcher is single-threaded so webhooks from one node stay in order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{EventAction, EventActions};
use crate::store::Store;

/// Webhook timeout; expiry is treated like a bad response.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// The event queue is expected to stay shallow.
const EVENT_QUEUE_DEPTH: usize = 32;

/// A node's asserted status register, queued for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEvent {
    pub node_id: u8,
    pub status_register: u16,
}

/// The asserted bit indices of a status register, LSB first.
pub fn decode_register(register: u16) -> Vec<u8> {
    (0u8..16).filter(|&bit| register & (1 << bit) != 0).collect()
}

/// Producer side of the event queue.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<PendingEvent>,
}

impl EventHandle {
    /// Enqueues an event; drops the newest with a warning on overflow.
    pub fn post(&self, event: PendingEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(node_id = event.node_id, "event queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("event dispatcher gone, event dropped");
            }
        }
    }
}

#[derive(Debug, Error)]
enum DispatchError {
    #[error("bad response from server: status {0}")]
    BadResponse(StatusCode),
    #[error("bad response from server: {0}")]
    Request(#[from] reqwest::Error),
}

/// Single consumer of the event queue.
///
/// One HTTP call per asserted bit per frame, no retries. Audit rows are
/// written before any webhook fires so the trail survives HTTP failures.
pub struct EventDispatcher {
    rx: mpsc::Receiver<PendingEvent>,
    actions: EventActions,
    store: Arc<Store>,
    http: Client,
}

impl EventDispatcher {
    pub fn new(
        actions: EventActions,
        store: Arc<Store>,
    ) -> Result<(EventHandle, EventDispatcher)> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok((
            EventHandle { tx },
            EventDispatcher {
                rx,
                actions,
                store,
                http,
            },
        ))
    }

    /// Runs until every producer handle is dropped and the queue drains.
    pub async fn run(mut self) {
        info!("event dispatcher started");
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;
        }
        info!("event dispatcher stopped");
    }

    async fn handle(&self, event: PendingEvent) {
        let codes = decode_register(event.status_register);
        debug!(
            node_id = event.node_id,
            register = event.status_register,
            count = codes.len(),
            "handling node events"
        );

        self.write_audit_rows(event.node_id, &codes).await;

        for code in codes {
            let action = self
                .actions
                .get(&event.node_id)
                .and_then(|bits| bits.get(&code));
            let Some(action) = action else {
                error!(
                    "Event 0x{:02x} from node 0x{:02x} does not exist",
                    code, event.node_id
                );
                continue;
            };
            if let Err(err) = self.invoke(action).await {
                error!(node_id = event.node_id, code, url = %action.url, %err, "webhook failed");
            } else {
                info!(node_id = event.node_id, code, url = %action.url, "webhook delivered");
            }
        }
    }

    async fn write_audit_rows(&self, node_id: u8, codes: &[u8]) {
        let timestamp = Utc::now();
        let store = Arc::clone(&self.store);
        let codes = codes.to_vec();
        let written =
            task::spawn_blocking(move || store.write_events(timestamp, node_id, &codes)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(node_id, %err, "failed to write node events"),
            Err(err) => error!(%err, "event writer task failed"),
        }
    }

    async fn invoke(&self, action: &EventAction) -> Result<(), DispatchError> {
        if action.delay > 0 {
            sleep(Duration::from_secs(action.delay)).await;
        }
        let response = self.http.get(&action.url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(DispatchError::BadResponse(response.status()));
        }
        Ok(())
    }
}
