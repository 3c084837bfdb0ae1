use anyhow::{anyhow, Result};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use log::{debug, info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

// Re-export the board tag so callers don't need the lib for config handling
pub use numglow_overlay_lib::BoardSide;

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

/// How the overlay task observes NUM-layer transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMode {
    /// React to layer-change notifications from the split link. The
    /// ambient animator is suppressed on take-over and restored on
    /// hand-back.
    #[default]
    Events,
    /// Poll layer state on a timer and re-render every tick while the
    /// overlay is active. No ambient animator interaction; hand-back
    /// clears the strip.
    Polling,
}

const NVS_NAMESPACE: &str = "numglow";
const NVS_CONFIG_KEY: &str = "config";

// Global NVS handle - initialized once in main
static NVS: Mutex<Option<EspNvs<NvsDefault>>> = Mutex::new(None);

pub fn init_nvs(nvs_partition: EspNvsPartition<NvsDefault>) -> Result<()> {
    debug!("Initializing NVS namespace: {NVS_NAMESPACE}");
    let nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)?;
    *NVS.lock().unwrap() = Some(nvs);
    info!("NVS initialized");
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which half of the split board this strip is mounted under.
    /// `unknown` fails safe: the overlay renders all-off.
    #[serde(default)]
    pub board_side: BoardSide,
    /// Keymap layer id of the NUM layer.
    #[serde(default = "default_num_layer")]
    pub num_layer: u8,
    #[serde(default)]
    pub activation: ActivationMode,
    /// GPIO driving the WS2812 data line.
    #[serde(default = "default_led_gpio")]
    pub led_gpio: u8,
    /// Split-link UART RX pin. 0 disables the link, leaving layer state
    /// structurally unavailable on this half.
    #[serde(default = "default_link_rx_gpio")]
    pub link_rx_gpio: u8,
    /// Split-link UART TX pin (the link is wired bidirectionally even
    /// though this half only listens).
    #[serde(default = "default_link_tx_gpio")]
    pub link_tx_gpio: u8,
    #[serde(default = "default_link_baud")]
    pub link_baud: u32,
    /// Refresh tick while the overlay is active (polling mode).
    #[serde(default = "default_active_refresh_ms")]
    pub active_refresh_ms: u64,
    /// Poll tick while idle (polling mode).
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Backoff before retrying after a not-ready render or an
    /// unavailable layer query.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub log_level: LogLevel,
}

const fn default_num_layer() -> u8 {
    2
}

const fn default_led_gpio() -> u8 {
    48
}

const fn default_link_rx_gpio() -> u8 {
    44
}

const fn default_link_tx_gpio() -> u8 {
    43
}

const fn default_link_baud() -> u32 {
    115_200
}

const fn default_active_refresh_ms() -> u64 {
    50
}

const fn default_idle_poll_ms() -> u64 {
    250
}

const fn default_retry_backoff_ms() -> u64 {
    100
}

/// Shortest allowed tick to avoid burning CPU on the render loop
pub const MIN_TICK_MS: u64 = 10;

impl Default for Config {
    fn default() -> Self {
        Self {
            board_side: BoardSide::default(),
            num_layer: default_num_layer(),
            activation: ActivationMode::default(),
            led_gpio: default_led_gpio(),
            link_rx_gpio: default_link_rx_gpio(),
            link_tx_gpio: default_link_tx_gpio(),
            link_baud: default_link_baud(),
            active_refresh_ms: default_active_refresh_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Clamp values to valid ranges and fix invalid values
    pub fn validate(&mut self) {
        if self.active_refresh_ms < MIN_TICK_MS {
            warn!(
                "Clamping active_refresh_ms from {} to {MIN_TICK_MS}",
                self.active_refresh_ms
            );
            self.active_refresh_ms = MIN_TICK_MS;
        }
        if self.idle_poll_ms < self.active_refresh_ms {
            warn!(
                "Clamping idle_poll_ms from {} to {}",
                self.idle_poll_ms, self.active_refresh_ms
            );
            self.idle_poll_ms = self.active_refresh_ms;
        }
        if self.retry_backoff_ms < MIN_TICK_MS {
            warn!(
                "Clamping retry_backoff_ms from {} to {MIN_TICK_MS}",
                self.retry_backoff_ms
            );
            self.retry_backoff_ms = MIN_TICK_MS;
        }
        if self.link_baud == 0 {
            warn!("link_baud is 0, resetting to default");
            self.link_baud = default_link_baud();
        }
    }

    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(mut config) => {
                info!("Loaded config from NVS");
                config.validate();
                config
            }
            Err(e) => {
                warn!("Failed to load config from NVS: {e}, using defaults");
                let config = Self::default();
                // Write the defaults back so the blob exists for later edits
                if let Err(e) = config.save() {
                    warn!("Failed to persist default config: {e}");
                }
                config
            }
        }
    }

    pub fn load() -> Result<Self> {
        debug!("Loading config from NVS");
        let nvs_guard = NVS.lock().unwrap();
        let nvs = nvs_guard
            .as_ref()
            .ok_or_else(|| anyhow!("NVS not initialized"))?;

        // Get the blob length first
        let len = nvs.blob_len(NVS_CONFIG_KEY)?;
        if let Some(len) = len {
            debug!("Config blob size: {len} bytes");
            let mut buf = vec![0u8; len];
            nvs.get_blob(NVS_CONFIG_KEY, &mut buf)?;
            let config: Config = serde_json::from_slice(&buf)?;
            debug!(
                "Config parsed: board_side={:?}, activation={:?}, num_layer={}",
                config.board_side, config.activation, config.num_layer
            );
            Ok(config)
        } else {
            Err(anyhow!("No config found in NVS"))
        }
    }

    pub fn save(&self) -> Result<()> {
        debug!("Saving config to NVS");
        let mut nvs_guard = NVS.lock().unwrap();
        let nvs = nvs_guard
            .as_mut()
            .ok_or_else(|| anyhow!("NVS not initialized"))?;

        let json = serde_json::to_vec(self)?;
        debug!("Config JSON size: {} bytes", json.len());
        nvs.set_blob(NVS_CONFIG_KEY, &json)?;
        info!("Config saved to NVS");
        Ok(())
    }
}
