//! Gateway for a sub-GHz wireless sensor network.
//!
//! Listens on an RFM69 packet radio for fixed-format encrypted frames from
//! battery-powered field nodes, validates and de-duplicates them, persists
//! the decoded samples to SQLite, drives an operator OLED status panel and
//! fires outbound webhooks for node-asserted event bits.
//!
//! Architecture: radio ISR → frame queue → decode worker → (store, event
//! dispatcher, display sink)

pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod hardware;
pub mod ingest;
pub mod logging;
pub mod store;
pub mod supervisor;
