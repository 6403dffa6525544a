//! RFM69HCW packet radio over SPI.
//!
//! Variable-length packet mode with hardware AES-128 payload encryption,
//! GFSK at 250 kbit/s — the modem settings the field nodes use. Only the
//! receive half of the chip is driven.

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::{debug, info};

use super::Radio;
use crate::config::GatewayConfig;

// SPI write access sets the MSB of the address byte.
const WRITE: u8 = 0x80;

mod reg {
    pub const FIFO: u8 = 0x00;
    pub const OP_MODE: u8 = 0x01;
    pub const DATA_MODUL: u8 = 0x02;
    pub const BITRATE_MSB: u8 = 0x03;
    pub const BITRATE_LSB: u8 = 0x04;
    pub const FDEV_MSB: u8 = 0x05;
    pub const FDEV_LSB: u8 = 0x06;
    pub const FRF_MSB: u8 = 0x07;
    pub const FRF_MID: u8 = 0x08;
    pub const FRF_LSB: u8 = 0x09;
    pub const VERSION: u8 = 0x10;
    pub const RX_BW: u8 = 0x19;
    pub const DIO_MAPPING1: u8 = 0x25;
    pub const IRQ_FLAGS1: u8 = 0x27;
    pub const IRQ_FLAGS2: u8 = 0x28;
    pub const RSSI_THRESH: u8 = 0x29;
    pub const PREAMBLE_MSB: u8 = 0x2C;
    pub const PREAMBLE_LSB: u8 = 0x2D;
    pub const SYNC_CONFIG: u8 = 0x2E;
    pub const SYNC_VALUE1: u8 = 0x2F;
    pub const SYNC_VALUE2: u8 = 0x30;
    pub const PACKET_CONFIG1: u8 = 0x37;
    pub const PAYLOAD_LENGTH: u8 = 0x38;
    pub const FIFO_THRESH: u8 = 0x3C;
    pub const PACKET_CONFIG2: u8 = 0x3D;
    pub const AES_KEY1: u8 = 0x3E;
    pub const TEST_DAGC: u8 = 0x6F;
}

// RegOpMode mode field, bits 4:2.
const MODE_MASK: u8 = 0b0001_1100;
const MODE_STANDBY: u8 = 0b001 << 2;
const MODE_RX: u8 = 0b100 << 2;

// RegIrqFlags1 / RegIrqFlags2.
const IRQ1_MODE_READY: u8 = 0x80;
const IRQ2_PAYLOAD_READY: u8 = 0x04;

// RegPacketConfig2.
const AES_ON: u8 = 0x01;

// Silicon revision reported by RegVersion.
const CHIP_VERSION: u8 = 0x24;

// FSTEP = FXOSC / 2^19 with the stock 32 MHz crystal.
const FREQ_STEP_HZ: f64 = 32_000_000.0 / 524_288.0;

/// RFM69HCW on the Pi's SPI0 bus.
pub struct Rfm69 {
    spi: Spi,
    reset: OutputPin,
}

impl Rfm69 {
    /// Opens the SPI bus, pulses reset and brings the radio to standby.
    ///
    /// Fails when the chip does not answer with the expected silicon
    /// version, which is what a miswired or absent module looks like.
    pub fn open(config: &GatewayConfig) -> Result<Rfm69> {
        let spi = Spi::new(
            Bus::Spi0,
            slave_select(config.radio_cs_pin)?,
            5_000_000,
            Mode::Mode0,
        )
        .context("radio SPI bus failed to open")?;
        let reset = Gpio::new()
            .context("GPIO controller failed to open")?
            .get(config.radio_reset_pin)
            .context("radio reset pin unavailable")?
            .into_output_low();

        let mut radio = Rfm69 { spi, reset };
        radio.reset_pulse();
        let version = radio.read(reg::VERSION)?;
        if version != CHIP_VERSION {
            bail!("RFM69 not detected, version register read 0x{version:02x}");
        }
        radio.configure(config)?;
        info!(
            frequency_mhz = config.radio_frequency,
            "RFM69 radio initialized successfully"
        );
        Ok(radio)
    }

    /// Installs the 16-byte AES key and switches payload encryption on.
    pub fn set_encryption_key(&mut self, key: &[u8; 16]) -> Result<()> {
        for (i, byte) in key.iter().enumerate() {
            self.write(reg::AES_KEY1 + i as u8, *byte)?;
        }
        let packet_config2 = self.read(reg::PACKET_CONFIG2)?;
        self.write(reg::PACKET_CONFIG2, packet_config2 | AES_ON)?;
        debug!("payload encryption enabled");
        Ok(())
    }

    // Reset is active high; the chip wants 100 us asserted then 5 ms to
    // come back up.
    fn reset_pulse(&mut self) {
        self.reset.set_high();
        thread::sleep(Duration::from_micros(100));
        self.reset.set_low();
        thread::sleep(Duration::from_millis(5));
    }

    fn configure(&mut self, config: &GatewayConfig) -> Result<()> {
        self.set_mode(MODE_STANDBY)?;
        // Packet mode, FSK, Gaussian shaping BT=1.0.
        self.write(reg::DATA_MODUL, 0x01)?;
        // 250 kbit/s, 250 kHz deviation, 500 kHz RX bandwidth.
        self.write(reg::BITRATE_MSB, 0x00)?;
        self.write(reg::BITRATE_LSB, 0x80)?;
        self.write(reg::FDEV_MSB, 0x10)?;
        self.write(reg::FDEV_LSB, 0x00)?;
        self.write(reg::RX_BW, 0xE0)?;
        // 4 preamble bytes, 2-byte sync word shared with the nodes.
        self.write(reg::PREAMBLE_MSB, 0x00)?;
        self.write(reg::PREAMBLE_LSB, 0x04)?;
        self.write(reg::SYNC_CONFIG, 0x88)?;
        self.write(reg::SYNC_VALUE1, 0x2D)?;
        self.write(reg::SYNC_VALUE2, 0xD4)?;
        // Variable-length packets, hardware CRC, no address filtering.
        self.write(reg::PACKET_CONFIG1, 0x90)?;
        self.write(reg::PAYLOAD_LENGTH, 66)?;
        self.write(reg::FIFO_THRESH, 0x8F)?;
        self.write(reg::RSSI_THRESH, 0xE4)?;
        self.write(reg::TEST_DAGC, 0x30)?;
        self.set_frequency(config.radio_frequency)
    }

    fn set_frequency(&mut self, mhz: f64) -> Result<()> {
        let frf = (mhz * 1_000_000.0 / FREQ_STEP_HZ) as u32;
        self.write(reg::FRF_MSB, (frf >> 16) as u8)?;
        self.write(reg::FRF_MID, (frf >> 8) as u8)?;
        self.write(reg::FRF_LSB, frf as u8)?;
        Ok(())
    }

    fn set_mode(&mut self, mode: u8) -> Result<()> {
        let op_mode = self.read(reg::OP_MODE)?;
        self.write(reg::OP_MODE, (op_mode & !MODE_MASK) | mode)?;
        for _ in 0..50 {
            if self.read(reg::IRQ_FLAGS1)? & IRQ1_MODE_READY != 0 {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(1));
        }
        bail!("RFM69 mode change timed out");
    }

    fn read(&mut self, register: u8) -> Result<u8> {
        let mut rx = [0u8; 2];
        self.spi
            .transfer(&mut rx, &[register & !WRITE, 0])
            .context("radio SPI read failed")?;
        Ok(rx[1])
    }

    fn write(&mut self, register: u8, value: u8) -> Result<()> {
        self.spi
            .write(&[register | WRITE, value])
            .context("radio SPI write failed")?;
        Ok(())
    }

    // In variable-length mode the first FIFO byte is the payload length;
    // the rest is drained with one burst read.
    fn read_fifo(&mut self) -> Result<Vec<u8>> {
        let len = self.read(reg::FIFO)? as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut rx = vec![0u8; len + 1];
        let mut tx = vec![0u8; len + 1];
        tx[0] = reg::FIFO & !WRITE;
        self.spi
            .transfer(&mut rx, &tx)
            .context("radio FIFO read failed")?;
        rx.remove(0);
        Ok(rx)
    }
}

fn slave_select(cs: u8) -> Result<SlaveSelect> {
    match cs {
        0 => Ok(SlaveSelect::Ss0),
        1 => Ok(SlaveSelect::Ss1),
        2 => Ok(SlaveSelect::Ss2),
        other => bail!("radio_cs_pin must be 0, 1 or 2, got {other}"),
    }
}

impl Radio for Rfm69 {
    fn payload_ready(&mut self) -> Result<bool> {
        Ok(self.read(reg::IRQ_FLAGS2)? & IRQ2_PAYLOAD_READY != 0)
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        // Leave RX so the FIFO is stable while it drains.
        self.set_mode(MODE_STANDBY)?;
        let payload = self.read_fifo()?;
        self.set_mode(MODE_RX)?;
        if payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    fn listen(&mut self) -> Result<()> {
        // DIO0 signals PayloadReady while in RX.
        self.write(reg::DIO_MAPPING1, 0x40)?;
        self.set_mode(MODE_RX)
    }

    fn standby(&mut self) -> Result<()> {
        self.set_mode(MODE_STANDBY)
    }
}
