//! Host keymap layer state.
//!
//! The peripheral half does not scan its own keymap; it learns the
//! active-layer bitmask from the main half over the split link. This
//! module holds that shared state and adapts it to the overlay
//! library's [`LayerQuery`] trait.

use numglow_overlay_lib::{LayerQuery, OverlayError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Active-layer bitmask, bit N set while layer N is active.
#[derive(Debug, Default)]
pub struct KeymapState {
    layer_mask: AtomicU32,
}

impl KeymapState {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn layer_mask(&self) -> u32 {
        self.layer_mask.load(Ordering::Relaxed)
    }

    pub fn set_layer_mask(&self, mask: u32) {
        self.layer_mask.store(mask, Ordering::Relaxed);
    }

    pub fn is_layer_active(&self, layer_id: u8) -> bool {
        layer_id < 32 && self.layer_mask() & (1 << layer_id) != 0
    }
}

/// Layer-query handle for the overlay controller.
///
/// Built as [`unavailable`](Self::unavailable) when the split link is
/// disabled: every query then reports `UnsupportedCapability` and the
/// overlay degrades to a safe no-op.
pub struct KeymapHandle {
    keymap: Option<Arc<KeymapState>>,
}

impl KeymapHandle {
    pub fn new(keymap: Arc<KeymapState>) -> Self {
        Self {
            keymap: Some(keymap),
        }
    }

    pub fn unavailable() -> Self {
        Self { keymap: None }
    }
}

impl LayerQuery for KeymapHandle {
    fn is_layer_active(&self, layer_id: u8) -> Result<bool, OverlayError> {
        self.keymap
            .as_ref()
            .map(|keymap| keymap.is_layer_active(layer_id))
            .ok_or(OverlayError::UnsupportedCapability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_mask_bits_map_to_layers() {
        let keymap = KeymapState::new_shared();
        assert!(!keymap.is_layer_active(2));

        keymap.set_layer_mask(0b101);
        assert!(keymap.is_layer_active(0));
        assert!(!keymap.is_layer_active(1));
        assert!(keymap.is_layer_active(2));
        assert!(!keymap.is_layer_active(31));
        assert!(!keymap.is_layer_active(32));
    }

    #[test]
    fn unavailable_handle_reports_unsupported() {
        let handle = KeymapHandle::unavailable();
        assert_eq!(
            handle.is_layer_active(2),
            Err(OverlayError::UnsupportedCapability)
        );
    }

    #[test]
    fn available_handle_tracks_shared_state() {
        let keymap = KeymapState::new_shared();
        let handle = KeymapHandle::new(keymap.clone());

        assert_eq!(handle.is_layer_active(2), Ok(false));
        keymap.set_layer_mask(1 << 2);
        assert_eq!(handle.is_layer_active(2), Ok(true));
    }
}
