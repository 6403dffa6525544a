//! SQLite-backed catalog and telemetry store.
//!
//! The store owns its connection and serializes access internally. Writers
//! on the ingestion path take one short transaction per frame; the CLI
//! collaborator takes short read transactions.

mod readings;
mod registry;

pub use readings::{EventRow, ReadingRow};
pub use registry::{NodeRecord, Quantity, SensorRecord, MAX_ID};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;

// Schema per the deployed database: telemetry tables are append-only with
// generated keys, catalog tables are keyed by the 1-byte on-air IDs.
// Readings deliberately carry no foreign key to the sensor catalog; the
// catalog is edited out of band and data from unregistered sensors is kept.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "Nodes" (
    "ID" INTEGER PRIMARY KEY,
    "Name" TEXT NOT NULL UNIQUE,
    "Location" TEXT
);
CREATE TABLE IF NOT EXISTS "Sensors" (
    "ID" INTEGER PRIMARY KEY,
    "Node_ID" INTEGER REFERENCES "Nodes"("ID"),
    "Name" TEXT NOT NULL UNIQUE,
    "Quantity" TEXT
);
CREATE TABLE IF NOT EXISTS "Sensor Readings" (
    "ID" INTEGER PRIMARY KEY AUTOINCREMENT,
    "Timestamp_UTC" DATETIME,
    "Sensor_ID" INTEGER,
    "Reading" FLOAT
);
CREATE TABLE IF NOT EXISTS "Events" (
    "ID" INTEGER PRIMARY KEY AUTOINCREMENT,
    "Timestamp_UTC" DATETIME,
    "Node_ID" INTEGER REFERENCES "Nodes"("ID"),
    "Event_Code" INTEGER
);
"#;

/// Owns the database connection and the schema.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Store, StoreError> {
        debug!(path = %path.display(), "opening database");
        Store::with_connection(Connection::open(path)?)
    }

    /// An in-memory store, used by tests.
    pub fn open_in_memory() -> Result<Store, StoreError> {
        Store::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Store, StoreError> {
        conn.execute_batch(SCHEMA)?;
        info!("database initialized");
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// A poisoned lock means a writer panicked mid-statement; nothing
    /// sensible can continue.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }
}
