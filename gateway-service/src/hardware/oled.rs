//! SSD1306 status panel over I2C.

use anyhow::{anyhow, bail, Context, Result};
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use rppal::i2c::I2c;
use ssd1306::{mode::BufferedGraphicsMode, prelude::*, I2CDisplayInterface, Ssd1306};
use tracing::info;

use crate::config::GatewayConfig;
use crate::display::{StatusPanel, LINE_PITCH};

/// I2C address of the panel.
const OLED_ADDR: u8 = 0x3D;

type Panel128x64 =
    Ssd1306<I2CInterface<I2c>, DisplaySize128x64, BufferedGraphicsMode<DisplaySize128x64>>;

struct Ssd1306Panel {
    display: Panel128x64,
}

/// Opens the panel described by the config.
///
/// Failure here is non-fatal to the gateway: the display sink runs
/// panel-less and swallows messages.
pub fn open_panel(config: &GatewayConfig) -> Result<Box<dyn StatusPanel>> {
    if (config.display_width, config.display_height) != (128, 64) {
        bail!(
            "unsupported display geometry {}x{}",
            config.display_width,
            config.display_height
        );
    }
    let i2c = I2c::new().context("I2C bus failed to initialize")?;
    let interface = I2CDisplayInterface::new_custom_address(i2c, OLED_ADDR);
    let mut display = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
        .into_buffered_graphics_mode();
    display.init().map_err(draw_err)?;
    info!("OLED display initialized successfully");
    Ok(Box::new(Ssd1306Panel { display }))
}

fn draw_err<E: core::fmt::Debug>(err: E) -> anyhow::Error {
    anyhow!("display error: {err:?}")
}

impl StatusPanel for Ssd1306Panel {
    fn render(&mut self, lines: &[String]) -> Result<()> {
        self.display.clear(BinaryColor::Off).map_err(draw_err)?;
        let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
        for (row, line) in lines.iter().enumerate() {
            let origin = Point::new(1, 1 + LINE_PITCH * row as i32);
            Text::with_baseline(line, origin, style, Baseline::Top)
                .draw(&mut self.display)
                .map_err(draw_err)?;
        }
        self.display.flush().map_err(draw_err)
    }

    fn clear(&mut self) -> Result<()> {
        self.display.clear(BinaryColor::Off).map_err(draw_err)?;
        self.display.flush().map_err(draw_err)
    }
}
