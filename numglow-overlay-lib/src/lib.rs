//! Numpad overlay logic for Numglow
//!
//! This library provides the core logic for highlighting the numpad keys
//! on a split keyboard's underglow strip while the NUM layer is active.
//! It is hardware-agnostic and can be tested without embedded hardware:
//! the strip driver, layer-state source, and ambient underglow animator
//! are all consumed through traits.

use derive_more::{Display, Error};
use log::warn;
pub use rgb::RGB8;
use serde::{Deserialize, Serialize};

/// Number of addressable LEDs on one keyboard half's underglow chain.
///
/// Every frame handed to [`LedStrip::write_frame`] has exactly this length.
pub const STRIP_LEN: usize = 23;

/// Sentinel key position for LEDs with no known key mapping.
///
/// [`is_numpad_key`] always classifies it as background, so an unknown
/// board wiring renders an all-off overlay rather than a wrong one.
pub const KEYPOS_NONE: u8 = u8::MAX;

/// Solid highlight color for overlay pixels (pure blue).
pub const OVERLAY_COLOR: RGB8 = RGB8 { r: 0, g: 0, b: 0xFF };

/// Which half of the split keyboard this strip is mounted under.
///
/// Selects the LED-to-key-position mapping table. `Unknown` is the
/// fail-safe fallback for unrecognized wiring: every LED maps to
/// [`KEYPOS_NONE`] and the overlay renders all-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardSide {
    Left,
    Right,
    #[default]
    Unknown,
}

// One WS2812 per physical key, wired row by row per half. The values are
// the keymap positions of a 42-key split board: rows of 7 + 7 + 6 keys
// and 3 thumb keys per half, numbered left half then right half per row.
const LEFT_KEYPOS_BY_LED: [u8; STRIP_LEN] = [
    0, 1, 2, 3, 4, 5, 6, //
    14, 15, 16, 17, 18, 19, 20, //
    28, 29, 30, 31, 32, 33, //
    40, 41, 42,
];

const RIGHT_KEYPOS_BY_LED: [u8; STRIP_LEN] = [
    7, 8, 9, 10, 11, 12, 13, //
    21, 22, 23, 24, 25, 26, 27, //
    34, 35, 36, 37, 38, 39, //
    43, 44, 45,
];

const UNKNOWN_KEYPOS_BY_LED: [u8; STRIP_LEN] = [KEYPOS_NONE; STRIP_LEN];

impl BoardSide {
    /// The LED-to-key-position mapping table for this half.
    #[must_use]
    pub const fn keypos_by_led(self) -> &'static [u8; STRIP_LEN] {
        match self {
            Self::Left => &LEFT_KEYPOS_BY_LED,
            Self::Right => &RIGHT_KEYPOS_BY_LED,
            Self::Unknown => &UNKNOWN_KEYPOS_BY_LED,
        }
    }

    /// Key position driven by the LED at `led_index`.
    ///
    /// Total over `[0, STRIP_LEN)`; out-of-range indices return
    /// [`KEYPOS_NONE`].
    #[must_use]
    pub fn key_position_for_led(self, led_index: usize) -> u8 {
        self.keypos_by_led()
            .get(led_index)
            .copied()
            .unwrap_or(KEYPOS_NONE)
    }
}

/// Whether a key position belongs to the NUM layer's highlighted set.
///
/// The NUM layer puts the numpad on the left half:
/// row 0: N7 N8 N9 at positions 2 3 4,
/// row 1: N4 N5 N6 at positions 16 17 18,
/// row 2: N1 N2 N3 at positions 30 31 32,
/// thumbs: DOT N0 MINUS at positions 40 41 42.
#[must_use]
pub const fn is_numpad_key(keypos: u8) -> bool {
    matches!(keypos, 2..=4 | 16..=18 | 30..=32 | 40..=42)
}

/// What a render call should put on the strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayMode {
    /// Blue on the numpad-mapped LEDs, off everywhere else.
    Overlay,
    /// Every pixel off.
    AllOff,
}

/// Build a full frame of [`STRIP_LEN`] pixels for the given mode.
///
/// Frames are always complete: overlay writes never patch subsets of
/// pixels, so an overlay write and an ambient-animation write can never
/// interleave at finer granularity than a whole frame.
#[must_use]
pub fn compute_overlay_frame(side: BoardSide, mode: OverlayMode) -> Vec<RGB8> {
    let mapping = side.keypos_by_led();
    match mode {
        OverlayMode::Overlay => mapping
            .iter()
            .map(|&keypos| {
                if is_numpad_key(keypos) {
                    OVERLAY_COLOR
                } else {
                    RGB8::default()
                }
            })
            .collect(),
        OverlayMode::AllOff => vec![RGB8::default(); STRIP_LEN],
    }
}

/// Errors from the overlay subsystem.
///
/// None of these escalate past the overlay task: `DeviceNotReady` is
/// retried after a backoff, `WriteFailure` is logged and absorbed, and
/// `UnsupportedCapability` degrades to a periodic no-op retry.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum OverlayError {
    /// The strip device is not initialized yet. Transient; retry later.
    #[display("LED strip device is not ready")]
    DeviceNotReady,
    /// The strip device rejected the frame write.
    #[display("LED strip rejected the frame write")]
    WriteFailure,
    /// Layer state cannot be queried in this host build.
    #[display("layer state query is unavailable on this host")]
    UnsupportedCapability,
}

/// The physical underglow strip.
pub trait LedStrip {
    /// Whether the device is initialized and accepting writes.
    fn is_ready(&self) -> bool;

    /// Write a complete frame. `frame.len()` is always [`STRIP_LEN`].
    fn write_frame(&mut self, frame: &[RGB8]) -> Result<(), OverlayError>;
}

/// The host's layer-state tracking.
pub trait LayerQuery {
    /// Whether the keymap layer identified by `layer_id` is active.
    ///
    /// Returns [`OverlayError::UnsupportedCapability`] when the host
    /// build exposes no layer state at all.
    fn is_layer_active(&self, layer_id: u8) -> Result<bool, OverlayError>;
}

/// On/off control of the host's ambient underglow animator.
///
/// The animator itself is out of scope here; this is only the narrow
/// hand-off interface the controller uses to suppress it while the
/// overlay owns the strip and to restore it afterwards.
pub trait AmbientUnderglow {
    /// Whether the animator is currently running.
    fn is_on(&self) -> bool;

    /// Start or stop the animator.
    fn set_on(&mut self, on: bool);
}

/// Placeholder ambient type for hosts with no animator control.
///
/// Uninhabited: a controller built with [`OverlayController::without_ambient`]
/// can never hold a value of this type, so these methods are unreachable.
#[derive(Debug)]
pub enum NoAmbient {}

impl AmbientUnderglow for NoAmbient {
    fn is_on(&self) -> bool {
        match *self {}
    }

    fn set_on(&mut self, _on: bool) {
        match *self {}
    }
}

/// Scheduling hint returned by controller calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do; no device interaction happened.
    Unchanged,
    /// A transition or refresh took effect.
    Applied,
    /// The strip was not ready; controller state is unchanged and the
    /// caller should retry after a backoff.
    RetryLater,
}

/// The overlay state machine.
///
/// Two states: idle (ambient animator owns the strip) and overlaying
/// (overlay owns the strip). Transitions are edge-detected against the
/// last reported layer-active value, so repeated identical reports are
/// no-ops and never issue redundant device writes.
///
/// When built with an ambient handle, entering the overlay records the
/// animator's on/off state and suppresses it, and leaving restores it
/// exactly. When built without one, leaving writes an all-off frame so
/// no stale highlight pixels persist.
pub struct OverlayController<S: LedStrip, A: AmbientUnderglow> {
    strip: S,
    ambient: Option<A>,
    side: BoardSide,
    last_overlay_active: bool,
    saved_ambient_on: bool,
}

impl<S: LedStrip> OverlayController<S, NoAmbient> {
    /// Controller for hosts that expose no ambient-animator control.
    /// Deactivation clears the strip instead of handing it back.
    pub fn without_ambient(strip: S, side: BoardSide) -> Self {
        Self::new(strip, None, side)
    }
}

impl<S: LedStrip, A: AmbientUnderglow> OverlayController<S, A> {
    pub fn new(strip: S, ambient: Option<A>, side: BoardSide) -> Self {
        Self {
            strip,
            ambient,
            side,
            last_overlay_active: false,
            saved_ambient_on: false,
        }
    }

    /// Whether the overlay currently owns the strip.
    #[must_use]
    pub fn overlay_active(&self) -> bool {
        self.last_overlay_active
    }

    /// Build and write a full frame for `mode`.
    ///
    /// Verifies device readiness first and fails with
    /// [`OverlayError::DeviceNotReady`] without writing anything.
    pub fn render(&mut self, mode: OverlayMode) -> Result<(), OverlayError> {
        if !self.strip.is_ready() {
            return Err(OverlayError::DeviceNotReady);
        }
        let frame = compute_overlay_frame(self.side, mode);
        self.strip.write_frame(&frame)
    }

    /// Feed the current layer-active status into the state machine.
    ///
    /// A report equal to the last observed value is ignored. On an
    /// inactive-to-active edge the controller takes over the strip; on
    /// an active-to-inactive edge it hands back (or clears). A not-ready
    /// strip aborts the transition before any side effect, leaving the
    /// recorded state unchanged so the next report re-attempts it.
    pub fn report_layer_active(&mut self, active: bool) -> TickOutcome {
        if active == self.last_overlay_active {
            return TickOutcome::Unchanged;
        }
        if active {
            self.take_over()
        } else {
            self.hand_back()
        }
    }

    /// Re-render the overlay frame while active.
    ///
    /// Used by polling hosts, where nothing guarantees the overlay
    /// survives external writes between ticks. Does nothing while idle.
    pub fn refresh(&mut self) -> TickOutcome {
        if !self.last_overlay_active {
            return TickOutcome::Unchanged;
        }
        match self.render(OverlayMode::Overlay) {
            Ok(()) => TickOutcome::Applied,
            Err(OverlayError::DeviceNotReady) => TickOutcome::RetryLater,
            Err(e) => {
                warn!("Overlay refresh write failed: {e}");
                TickOutcome::Applied
            }
        }
    }

    fn take_over(&mut self) -> TickOutcome {
        // Readiness is checked before touching the ambient animator, so a
        // failed take-over leaves the animator (and its recorded state)
        // exactly as it was.
        if !self.strip.is_ready() {
            return TickOutcome::RetryLater;
        }
        if let Some(ambient) = self.ambient.as_mut() {
            self.saved_ambient_on = ambient.is_on();
            ambient.set_on(false);
        }
        self.last_overlay_active = true;
        if let Err(e) = self.render(OverlayMode::Overlay) {
            // Write failures belong to the driver's error domain; the
            // next refresh reconciles the strip with the recorded state.
            warn!("Overlay render failed after take-over: {e}");
        }
        TickOutcome::Applied
    }

    fn hand_back(&mut self) -> TickOutcome {
        if let Some(ambient) = self.ambient.as_mut() {
            ambient.set_on(self.saved_ambient_on);
            self.last_overlay_active = false;
            return TickOutcome::Applied;
        }
        // No animator to hand back to: clear the strip once so no stale
        // highlight pixels persist.
        if !self.strip.is_ready() {
            return TickOutcome::RetryLater;
        }
        self.last_overlay_active = false;
        if let Err(e) = self.render(OverlayMode::AllOff) {
            warn!("Overlay clear failed after hand-back: {e}");
        }
        TickOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// LED indices of the left half that sit under numpad keys.
    const LEFT_NUMPAD_LEDS: [usize; 12] = [2, 3, 4, 9, 10, 11, 16, 17, 18, 20, 21, 22];

    #[derive(Clone, Default)]
    struct MockStrip {
        ready: Rc<Cell<bool>>,
        writes: Rc<RefCell<Vec<Vec<RGB8>>>>,
    }

    impl MockStrip {
        fn ready() -> Self {
            let strip = Self::default();
            strip.ready.set(true);
            strip
        }

        fn write_count(&self) -> usize {
            self.writes.borrow().len()
        }

        fn last_write(&self) -> Vec<RGB8> {
            self.writes.borrow().last().cloned().expect("no writes")
        }
    }

    impl LedStrip for MockStrip {
        fn is_ready(&self) -> bool {
            self.ready.get()
        }

        fn write_frame(&mut self, frame: &[RGB8]) -> Result<(), OverlayError> {
            self.writes.borrow_mut().push(frame.to_vec());
            Ok(())
        }
    }

    #[derive(Clone)]
    struct MockAmbient {
        on: Rc<Cell<bool>>,
    }

    impl MockAmbient {
        fn new(on: bool) -> Self {
            Self {
                on: Rc::new(Cell::new(on)),
            }
        }
    }

    impl AmbientUnderglow for MockAmbient {
        fn is_on(&self) -> bool {
            self.on.get()
        }

        fn set_on(&mut self, on: bool) {
            self.on.set(on);
        }
    }

    fn overlay_frame_leds(frame: &[RGB8]) -> Vec<usize> {
        frame
            .iter()
            .enumerate()
            .filter(|(_, &px)| px != RGB8::default())
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn mapping_is_total_and_stable() {
        for side in [BoardSide::Left, BoardSide::Right, BoardSide::Unknown] {
            for led in 0..STRIP_LEN {
                let first = side.key_position_for_led(led);
                let second = side.key_position_for_led(led);
                assert_eq!(first, second, "{side:?} LED {led} mapping not stable");
            }
        }
        // Out of range falls back to the sentinel
        assert_eq!(BoardSide::Left.key_position_for_led(STRIP_LEN), KEYPOS_NONE);
    }

    #[test]
    fn mapping_matches_board_wiring() {
        // Spot checks against the physical wiring order
        assert_eq!(BoardSide::Left.key_position_for_led(0), 0);
        assert_eq!(BoardSide::Left.key_position_for_led(7), 14);
        assert_eq!(BoardSide::Left.key_position_for_led(14), 28);
        assert_eq!(BoardSide::Left.key_position_for_led(22), 42);
        assert_eq!(BoardSide::Right.key_position_for_led(0), 7);
        assert_eq!(BoardSide::Right.key_position_for_led(22), 45);
        for led in 0..STRIP_LEN {
            assert_eq!(BoardSide::Unknown.key_position_for_led(led), KEYPOS_NONE);
        }
    }

    #[test]
    fn numpad_membership_is_exact() {
        let expected = [2u8, 3, 4, 16, 17, 18, 30, 31, 32, 40, 41, 42];
        for keypos in expected {
            assert!(is_numpad_key(keypos), "keypos {keypos} should be numpad");
        }
        // Total over the full key-position domain: exactly 12 members
        let members = (0..=u8::MAX).filter(|&k| is_numpad_key(k)).count();
        assert_eq!(members, 12);
        assert!(!is_numpad_key(KEYPOS_NONE));
    }

    #[test]
    fn left_overlay_frame_lights_numpad_leds() {
        let frame = compute_overlay_frame(BoardSide::Left, OverlayMode::Overlay);
        assert_eq!(frame.len(), STRIP_LEN);
        assert_eq!(overlay_frame_leds(&frame), LEFT_NUMPAD_LEDS);
        for &led in &LEFT_NUMPAD_LEDS {
            assert_eq!(frame[led], OVERLAY_COLOR);
        }
    }

    #[test]
    fn right_overlay_frame_is_dark() {
        // The numpad lives entirely on the left half, so the right
        // half's overlay frame has nothing to highlight.
        let frame = compute_overlay_frame(BoardSide::Right, OverlayMode::Overlay);
        assert!(frame.iter().all(|&px| px == RGB8::default()));
    }

    #[test]
    fn unknown_wiring_fails_safe_to_all_off() {
        let frame = compute_overlay_frame(BoardSide::Unknown, OverlayMode::Overlay);
        assert_eq!(frame.len(), STRIP_LEN);
        assert!(frame.iter().all(|&px| px == RGB8::default()));
    }

    #[test]
    fn all_off_frame_is_dark() {
        let frame = compute_overlay_frame(BoardSide::Left, OverlayMode::AllOff);
        assert_eq!(frame.len(), STRIP_LEN);
        assert!(frame.iter().all(|&px| px == RGB8::default()));
    }

    #[test]
    fn activation_takes_over_strip_and_suppresses_ambient() {
        let strip = MockStrip::ready();
        let ambient = MockAmbient::new(true);
        let mut controller =
            OverlayController::new(strip.clone(), Some(ambient.clone()), BoardSide::Left);

        assert_eq!(controller.report_layer_active(true), TickOutcome::Applied);
        assert!(controller.overlay_active());
        assert!(!ambient.on.get(), "ambient animator should be suppressed");
        assert_eq!(strip.write_count(), 1);
        assert_eq!(overlay_frame_leds(&strip.last_write()), LEFT_NUMPAD_LEDS);
    }

    #[test]
    fn repeated_reports_are_idempotent() {
        let strip = MockStrip::ready();
        let mut controller = OverlayController::without_ambient(strip.clone(), BoardSide::Left);

        assert_eq!(controller.report_layer_active(false), TickOutcome::Unchanged);
        assert_eq!(strip.write_count(), 0);

        assert_eq!(controller.report_layer_active(true), TickOutcome::Applied);
        assert_eq!(controller.report_layer_active(true), TickOutcome::Unchanged);
        assert_eq!(controller.report_layer_active(true), TickOutcome::Unchanged);
        assert!(controller.overlay_active());
        assert_eq!(strip.write_count(), 1, "no redundant writes on no-op reports");
    }

    #[test]
    fn deactivation_restores_ambient_that_was_on() {
        let strip = MockStrip::ready();
        let ambient = MockAmbient::new(true);
        let mut controller =
            OverlayController::new(strip.clone(), Some(ambient.clone()), BoardSide::Left);

        controller.report_layer_active(true);
        assert!(!ambient.on.get());
        assert_eq!(controller.report_layer_active(false), TickOutcome::Applied);
        assert!(!controller.overlay_active());
        assert!(ambient.on.get(), "prior ambient state should be restored");
        // Hand-back goes through the animator, not a strip write
        assert_eq!(strip.write_count(), 1);
    }

    #[test]
    fn deactivation_keeps_ambient_that_was_off() {
        let strip = MockStrip::ready();
        let ambient = MockAmbient::new(false);
        let mut controller =
            OverlayController::new(strip.clone(), Some(ambient.clone()), BoardSide::Left);

        controller.report_layer_active(true);
        controller.report_layer_active(false);
        assert!(!ambient.on.get(), "ambient previously off must stay off");
    }

    #[test]
    fn deactivation_without_ambient_clears_strip() {
        let strip = MockStrip::ready();
        let mut controller = OverlayController::without_ambient(strip.clone(), BoardSide::Left);

        controller.report_layer_active(true);
        assert_eq!(controller.report_layer_active(false), TickOutcome::Applied);
        assert_eq!(strip.write_count(), 2);
        assert!(strip.last_write().iter().all(|&px| px == RGB8::default()));
    }

    #[test]
    fn not_ready_strip_aborts_take_over_without_side_effects() {
        let strip = MockStrip::default(); // not ready
        let ambient = MockAmbient::new(true);
        let mut controller =
            OverlayController::new(strip.clone(), Some(ambient.clone()), BoardSide::Left);

        assert_eq!(controller.report_layer_active(true), TickOutcome::RetryLater);
        assert!(!controller.overlay_active(), "recorded state must not change");
        assert!(ambient.on.get(), "ambient must not be touched on a failed take-over");
        assert_eq!(strip.write_count(), 0);

        // Device comes up; the retried report completes the transition
        strip.ready.set(true);
        assert_eq!(controller.report_layer_active(true), TickOutcome::Applied);
        assert!(controller.overlay_active());
        assert!(!ambient.on.get());
        assert_eq!(strip.write_count(), 1);
    }

    #[test]
    fn refresh_rerenders_only_while_active() {
        let strip = MockStrip::ready();
        let mut controller = OverlayController::without_ambient(strip.clone(), BoardSide::Left);

        assert_eq!(controller.refresh(), TickOutcome::Unchanged);
        assert_eq!(strip.write_count(), 0);

        controller.report_layer_active(true);
        assert_eq!(controller.refresh(), TickOutcome::Applied);
        assert_eq!(controller.refresh(), TickOutcome::Applied);
        assert_eq!(strip.write_count(), 3);
        assert_eq!(overlay_frame_leds(&strip.last_write()), LEFT_NUMPAD_LEDS);
    }

    #[test]
    fn refresh_reports_retry_when_device_drops_out() {
        let strip = MockStrip::ready();
        let mut controller = OverlayController::without_ambient(strip.clone(), BoardSide::Left);

        controller.report_layer_active(true);
        strip.ready.set(false);
        assert_eq!(controller.refresh(), TickOutcome::RetryLater);
        assert!(controller.overlay_active(), "a failed refresh must not desync state");
        strip.ready.set(true);
        assert_eq!(controller.refresh(), TickOutcome::Applied);
    }

    #[test]
    fn rapid_toggling_follows_every_edge() {
        let strip = MockStrip::ready();
        let ambient = MockAmbient::new(true);
        let mut controller =
            OverlayController::new(strip.clone(), Some(ambient.clone()), BoardSide::Left);

        for _ in 0..3 {
            assert_eq!(controller.report_layer_active(true), TickOutcome::Applied);
            assert!(!ambient.on.get());
            assert_eq!(controller.report_layer_active(false), TickOutcome::Applied);
            assert!(ambient.on.get());
        }
        // One overlay write per activation, no stale cached renders
        assert_eq!(strip.write_count(), 3);
    }
}
