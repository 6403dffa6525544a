//! Append-only telemetry persistence.

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;

use super::Store;
use crate::error::StoreError;

/// One persisted sensor sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    pub timestamp_utc: DateTime<Utc>,
    pub sensor_id: u8,
    pub value: f64,
}

/// One persisted node event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub timestamp_utc: DateTime<Utc>,
    pub node_id: u8,
    pub event_code: u8,
}

impl Store {
    /// Inserts one row per (sensor, value) pair in a single transaction.
    ///
    /// Readings from sensors not yet in the catalog are recorded too; the
    /// catalog is edited out of band.
    pub fn write_readings(
        &self,
        timestamp: DateTime<Utc>,
        readings: &[(u8, f32)],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO "Sensor Readings" ("Timestamp_UTC", "Sensor_ID", "Reading")
                   VALUES (?1, ?2, ?3)"#,
            )?;
            for (sensor_id, value) in readings {
                stmt.execute(params![timestamp, sensor_id, f64::from(*value)])?;
            }
        }
        tx.commit()?;
        debug!(rows = readings.len(), "sensor readings written");
        Ok(())
    }

    /// Inserts one row per event code in a single transaction.
    pub fn write_events(
        &self,
        timestamp: DateTime<Utc>,
        node_id: u8,
        codes: &[u8],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO "Events" ("Timestamp_UTC", "Node_ID", "Event_Code")
                   VALUES (?1, ?2, ?3)"#,
            )?;
            for code in codes {
                stmt.execute(params![timestamp, node_id, code])?;
            }
        }
        tx.commit()?;
        debug!(node_id, rows = codes.len(), "node events written");
        Ok(())
    }

    /// Most recent readings, newest row first.
    pub fn latest_readings(&self, limit: u32) -> Result<Vec<ReadingRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT "Timestamp_UTC", "Sensor_ID", "Reading" FROM "Sensor Readings"
               ORDER BY "ID" DESC LIMIT ?1"#,
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ReadingRow {
                    timestamp_utc: row.get(0)?,
                    sensor_id: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Audit trail for one node, oldest row first.
    pub fn events_for_node(&self, node_id: u8) -> Result<Vec<EventRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT "Timestamp_UTC", "Node_ID", "Event_Code" FROM "Events"
               WHERE "Node_ID" = ?1 ORDER BY "ID""#,
        )?;
        let rows = stmt
            .query_map(params![node_id], |row| {
                Ok(EventRow {
                    timestamp_utc: row.get(0)?,
                    node_id: row.get(1)?,
                    event_code: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
