//! Gateway configuration, loaded from a JSON file.
//!
//! Every field has a default so a partial file works; the defaults match a
//! stock Raspberry Pi wiring (RFM69 G0 on BCM 24, reset on BCM 25, CE1 as
//! chip select, 128x64 SSD1306 panel).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// One outbound action for an asserted status bit.
#[derive(Debug, Clone, Deserialize)]
pub struct EventAction {
    /// Webhook target, called with HTTP GET.
    pub url: String,
    /// Seconds to wait before issuing the call.
    #[serde(default)]
    pub delay: u64,
}

/// Node ID -> status bit -> action.
pub type EventActions = HashMap<u8, HashMap<u8, EventAction>>;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// SQLite database holding the catalog and the telemetry tables.
    #[serde(default = "default_db_url")]
    pub db_url: PathBuf,
    /// BCM pin wired to the radio's "payload ready" line (G0/DIO0).
    #[serde(default = "default_irq_pin")]
    pub radio_irq_pin: u8,
    /// SPI slave select for the radio (0 = CE0, 1 = CE1).
    #[serde(default = "default_cs_pin")]
    pub radio_cs_pin: u8,
    /// BCM pin wired to the radio's reset line.
    #[serde(default = "default_reset_pin")]
    pub radio_reset_pin: u8,
    /// Carrier frequency in MHz; must match the field nodes.
    #[serde(default = "default_frequency")]
    pub radio_frequency: f64,
    /// 16-byte AES key as 32 hex characters; must match the field nodes.
    #[serde(default = "default_encryption_key")]
    pub encryption_key: String,
    /// Severity filter for the log file.
    #[serde(default = "default_log_level_file")]
    pub log_level_file: String,
    /// Severity filter for console output.
    #[serde(default = "default_log_level_console")]
    pub log_level_console: String,
    /// Where the file log layer writes.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// OLED geometry in pixels.
    #[serde(default = "default_display_width")]
    pub display_width: u32,
    #[serde(default = "default_display_height")]
    pub display_height: u32,
    /// Webhooks fired per node per asserted status bit.
    #[serde(default)]
    pub event_actions: EventActions,
}

fn default_db_url() -> PathBuf {
    PathBuf::from("/var/lib/telemetry-hub/telemetry.db")
}

fn default_irq_pin() -> u8 {
    24
}

fn default_cs_pin() -> u8 {
    1
}

fn default_reset_pin() -> u8 {
    25
}

fn default_frequency() -> f64 {
    433.0
}

fn default_encryption_key() -> String {
    // Bench key only; deployments must set their own secret.
    "000102030405060708090a0b0c0d0e0f".to_string()
}

fn default_log_level_file() -> String {
    "warn".to_string()
}

fn default_log_level_console() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/tmp/telemetry-hub.log")
}

fn default_display_width() -> u32 {
    128
}

fn default_display_height() -> u32 {
    64
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            db_url: default_db_url(),
            radio_irq_pin: default_irq_pin(),
            radio_cs_pin: default_cs_pin(),
            radio_reset_pin: default_reset_pin(),
            radio_frequency: default_frequency(),
            encryption_key: default_encryption_key(),
            log_level_file: default_log_level_file(),
            log_level_console: default_log_level_console(),
            log_file: default_log_file(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            event_actions: EventActions::new(),
        }
    }
}

impl GatewayConfig {
    /// Reads and parses the config file at `path`.
    pub fn load(path: &Path) -> Result<GatewayConfig> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Decodes `encryption_key` into the 16 bytes the radio wants.
    pub fn encryption_key_bytes(&self) -> Result<[u8; 16]> {
        let hex = self.encryption_key.trim();
        if hex.len() != 32 {
            bail!("encryption_key must be 32 hex characters, got {}", hex.len());
        }
        let mut key = [0u8; 16];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .context("encryption_key must be hex")?;
        }
        Ok(key)
    }
}
