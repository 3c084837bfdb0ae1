use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::prelude::*;
use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{info, warn};
use numglow_overlay_lib::OverlayController;
use std::sync::{mpsc, Arc, Mutex};

mod config;
mod keymap;
mod overlay_task;
mod split_link;
mod strip;
mod thread_util;
mod underglow;
mod watchdog;

use config::{ActivationMode, Config};
use keymap::{KeymapHandle, KeymapState};
use strip::StripController;
use underglow::AmbientControl;

fn main() -> Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Starting numglow firmware...");

    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Initialize NVS for config storage
    config::init_nvs(nvs)?;
    let config = Arc::new(Mutex::new(Config::load_or_default()));

    // Apply configured log level
    {
        let cfg = config.lock().unwrap();
        let level = cfg.log_level.as_level_filter();
        // Set for all targets (use "*" for global)
        if let Err(e) = esp_idf_svc::log::set_target_level("*", level) {
            warn!("Failed to set log level: {e}");
        } else {
            info!("Log level set to {:?}", cfg.log_level);
        }
    }

    let cfg = config.lock().unwrap().clone();
    info!(
        "Board side {:?}, NUM layer {}, LED GPIO {}, {:?} activation",
        cfg.board_side, cfg.num_layer, cfg.led_gpio, cfg.activation
    );

    // SAFETY: We trust the user-configured GPIO pin number is valid for this board
    let led_pin = unsafe { AnyIOPin::new(i32::from(cfg.led_gpio)) };
    let mut strip = StripController::new(led_pin, peripherals.rmt.channel0);
    if let Err(e) = strip.boot_blink() {
        warn!("Boot blink failed: {e}");
    }

    let keymap_state = KeymapState::new_shared();
    let (overlay_tx, overlay_rx) = mpsc::channel();

    // Split link: this half learns layer state from the main half
    let keymap_handle = if cfg.link_rx_gpio == 0 {
        warn!("Split link disabled (link_rx_gpio=0); layer state is unavailable");
        KeymapHandle::unavailable()
    } else {
        let uart_config = UartConfig::new().baudrate(Hertz(cfg.link_baud));
        // SAFETY: We trust the user-configured GPIO pin numbers are valid for this board
        let tx_pin = unsafe { AnyIOPin::new(i32::from(cfg.link_tx_gpio)) };
        let rx_pin = unsafe { AnyIOPin::new(i32::from(cfg.link_rx_gpio)) };
        let uart = UartDriver::new(
            peripherals.uart1,
            tx_pin,
            rx_pin,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &uart_config,
        )?;

        let keymap_clone = keymap_state.clone();
        let link_tx = overlay_tx.clone();
        thread_util::spawn_named(c"split_link", move || {
            split_link::link_task(uart, &keymap_clone, &link_tx);
        });
        info!(
            "Split link started (RX GPIO {}, {} baud)",
            cfg.link_rx_gpio, cfg.link_baud
        );

        KeymapHandle::new(keymap_state)
    };

    // Events builds hand the strip back to the ambient animator on
    // deactivation; polling builds clear it instead (no animator
    // interaction in that configuration).
    let ambient = match cfg.activation {
        ActivationMode::Events => Some(AmbientControl::new(true)),
        ActivationMode::Polling => None,
    };
    let controller = OverlayController::new(strip, ambient, cfg.board_side);

    // The overlay task takes ownership of the controller; everything
    // touching the strip happens on that one thread.
    let config_clone = config.clone();
    thread_util::spawn_named(c"overlay", move || {
        overlay_task::overlay_task(&config_clone, controller, keymap_handle, overlay_rx);
    });

    info!("All systems running!");

    // Main loop - keep alive. `overlay_tx` stays alive here so the task's
    // channel never disconnects even when the split link is disabled.
    loop {
        FreeRtos::delay_ms(1000);
    }
}
