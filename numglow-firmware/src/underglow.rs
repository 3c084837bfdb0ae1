//! Hand-off interface to the ambient underglow animator.
//!
//! The animator itself lives in the host firmware and owns the strip by
//! default; it honors a shared run flag on every frame. Suppressing it
//! while the overlay owns the strip, and restoring it afterwards, is
//! just flipping that flag.

use log::debug;
use numglow_overlay_lib::AmbientUnderglow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct AmbientControl {
    running: Arc<AtomicBool>,
}

impl AmbientControl {
    pub fn new(initially_on: bool) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(initially_on)),
        }
    }
}

impl AmbientUnderglow for AmbientControl {
    fn is_on(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn set_on(&mut self, on: bool) {
        debug!("Ambient underglow run flag -> {on}");
        self.running.store(on, Ordering::Relaxed);
    }
}
