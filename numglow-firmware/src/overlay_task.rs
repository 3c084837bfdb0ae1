//! Overlay controller task
//!
//! One serialized task owns the overlay state machine and the strip
//! device. Layer-change notifications from the split link arrive as
//! channel messages (events activation); the receive timeout doubles as
//! the polling tick (polling activation) and as the retry backoff after
//! a deferred render.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use numglow_overlay_lib::{LayerQuery, OverlayController, TickOutcome};

use crate::config::{ActivationMode, Config};
use crate::keymap::KeymapHandle;
use crate::strip::StripController;
use crate::underglow::AmbientControl;
use crate::watchdog::WatchdogHandle;

/// Timeout while idle in events mode, keeps the watchdog fed
const EVENT_IDLE_TIMEOUT_MS: u64 = 1000;

/// Messages sent to the overlay task
#[derive(Debug, Clone)]
pub enum OverlayTaskMessage {
    /// The host's active layer set changed; re-query and edge-detect
    LayerStateChanged,
}

/// Channel sender for messages to the overlay task
pub type OverlayTaskSender = Sender<OverlayTaskMessage>;

/// Run the overlay update task.
///
/// This task:
/// - Receives layer-change notifications from the split link task
/// - Polls layer state on a timer in polling mode
/// - Drives the controller's take-over / hand-back transitions
///
/// All failures are absorbed here: a not-ready strip or an unavailable
/// layer query only stretches the next tick, never escalates.
// Receiver is intentionally moved into this task for exclusive ownership
#[allow(clippy::needless_pass_by_value)]
pub fn overlay_task(
    config: &Arc<Mutex<Config>>,
    mut controller: OverlayController<StripController, AmbientControl>,
    keymap: KeymapHandle,
    rx: Receiver<OverlayTaskMessage>,
) {
    let watchdog = WatchdogHandle::register(c"overlay");

    let (activation, num_layer, active_refresh_ms, idle_poll_ms, retry_backoff_ms) = {
        let cfg = config.lock().unwrap();
        (
            cfg.activation,
            cfg.num_layer,
            cfg.active_refresh_ms,
            cfg.idle_poll_ms,
            cfg.retry_backoff_ms,
        )
    };
    info!("Overlay task started ({activation:?} activation, NUM layer {num_layer})");

    let mut retry_pending = false;
    let mut capability_logged = false;

    loop {
        watchdog.feed();

        let timeout_ms = if retry_pending {
            retry_backoff_ms
        } else {
            match activation {
                ActivationMode::Polling => {
                    // Short tick while the overlay must stay fresh,
                    // longer one while idle
                    if controller.overlay_active() {
                        active_refresh_ms
                    } else {
                        idle_poll_ms
                    }
                }
                ActivationMode::Events => EVENT_IDLE_TIMEOUT_MS,
            }
        };

        let evaluate = match rx.recv_timeout(Duration::from_millis(timeout_ms)) {
            Ok(OverlayTaskMessage::LayerStateChanged) => true,
            Err(RecvTimeoutError::Timeout) => {
                activation == ActivationMode::Polling || retry_pending
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Overlay channel disconnected, exiting task");
                break;
            }
        };
        if !evaluate {
            continue;
        }

        // Always re-query current state rather than trusting the
        // notification payload or a cached render, so toggles faster
        // than the tick interval still land on the right state.
        let outcome = match keymap.is_layer_active(num_layer) {
            Ok(active) => {
                let mut outcome = controller.report_layer_active(active);
                if activation == ActivationMode::Polling
                    && outcome == TickOutcome::Unchanged
                    && controller.overlay_active()
                {
                    // Repaint every tick while active: nothing else
                    // guarantees the overlay survives external writes
                    // between ticks
                    outcome = controller.refresh();
                }
                outcome
            }
            Err(e) => {
                if !capability_logged {
                    warn!("Layer state unavailable ({e}), will keep retrying");
                    capability_logged = true;
                }
                TickOutcome::RetryLater
            }
        };

        match outcome {
            TickOutcome::RetryLater => {
                if !retry_pending {
                    debug!("Overlay update deferred, retrying in {retry_backoff_ms}ms");
                }
                retry_pending = true;
            }
            TickOutcome::Applied | TickOutcome::Unchanged => {
                retry_pending = false;
            }
        }
    }
}
