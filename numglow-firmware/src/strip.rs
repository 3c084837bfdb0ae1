//! WS2812 underglow strip binding.
//!
//! Implements the overlay library's [`LedStrip`] trait on top of the
//! ESP32 RMT driver. Driver initialization can fail (e.g. RMT channel
//! exhaustion), in which case the strip stays permanently not-ready and
//! the overlay task degrades to a do-nothing retry loop.

use esp_idf_hal::gpio::OutputPin;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::rmt::RmtChannel;
use log::{debug, warn};
use numglow_overlay_lib::{LedStrip, OverlayError, RGB8, STRIP_LEN};
use smart_leds::SmartLedsWrite;
use std::thread::sleep;
use std::time::Duration;
use ws2812_esp32_rmt_driver::Ws2812Esp32Rmt;

pub struct StripController {
    driver: Option<Ws2812Esp32Rmt<'static>>,
}

impl StripController {
    pub fn new<C: RmtChannel, P: OutputPin>(
        pin: impl Peripheral<P = P> + 'static,
        channel: impl Peripheral<P = C> + 'static,
    ) -> Self {
        debug!("Creating strip controller ({STRIP_LEN} LEDs)");
        let driver = match Ws2812Esp32Rmt::new(channel, pin) {
            Ok(driver) => Some(driver),
            Err(e) => {
                warn!("WS2812 driver init failed, strip stays not-ready: {e}");
                None
            }
        };
        Self { driver }
    }

    /// Blink the whole strip blue twice as a boot indicator.
    pub fn boot_blink(&mut self) -> Result<(), OverlayError> {
        let blue = vec![numglow_overlay_lib::OVERLAY_COLOR; STRIP_LEN];
        let off = vec![RGB8::default(); STRIP_LEN];
        let blink_duration = Duration::from_millis(150);

        for _ in 0..2 {
            self.write_frame(&blue)?;
            sleep(blink_duration);
            self.write_frame(&off)?;
            sleep(blink_duration);
        }

        Ok(())
    }
}

impl LedStrip for StripController {
    fn is_ready(&self) -> bool {
        self.driver.is_some()
    }

    fn write_frame(&mut self, frame: &[RGB8]) -> Result<(), OverlayError> {
        let Some(driver) = self.driver.as_mut() else {
            return Err(OverlayError::DeviceNotReady);
        };
        driver.write(frame.iter().copied()).map_err(|e| {
            warn!("WS2812 write failed: {e}");
            OverlayError::WriteFailure
        })
    }
}
