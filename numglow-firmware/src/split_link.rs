//! Split-link receiver task.
//!
//! The main half broadcasts its active-layer bitmask over the split
//! link UART, one byte per update (layers 0-7). This task mirrors the
//! mask into [`KeymapState`] and nudges the overlay task whenever it
//! changes, which is the event-driven activation source.

use esp_idf_hal::delay::TickType;
use esp_idf_hal::uart::UartDriver;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::keymap::KeymapState;
use crate::overlay_task::{OverlayTaskMessage, OverlayTaskSender};
use crate::watchdog::WatchdogHandle;

/// Read timeout, also the watchdog feed cadence while the link is quiet
const LINK_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after a UART error before reading again
const LINK_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// UART is intentionally moved into this task for exclusive ownership
#[allow(clippy::needless_pass_by_value)]
pub fn link_task(
    uart: UartDriver<'static>,
    keymap: &Arc<KeymapState>,
    overlay_tx: &OverlayTaskSender,
) {
    let watchdog = WatchdogHandle::register(c"split_link");
    info!("Split link task started");

    let timeout = TickType::from(LINK_READ_TIMEOUT).ticks();
    let mut buf = [0u8; 16];
    let mut last_mask: Option<u32> = None;

    loop {
        watchdog.feed();

        match uart.read(&mut buf, timeout) {
            // Timeout with nothing pending
            Ok(0) => {}
            Ok(n) => {
                // Only the most recent mask matters; stale updates in the
                // same read are superseded
                let mask = u32::from(buf[n - 1]);
                if last_mask != Some(mask) {
                    debug!("Split link: layer mask {mask:#010b}");
                    keymap.set_layer_mask(mask);
                    last_mask = Some(mask);

                    if overlay_tx.send(OverlayTaskMessage::LayerStateChanged).is_err() {
                        warn!("Overlay channel disconnected, exiting link task");
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("Split link read failed: {e}");
                std::thread::sleep(LINK_ERROR_BACKOFF);
            }
        }
    }
}
