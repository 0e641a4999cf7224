//! Configuration system with embedded defaults and XDG-compliant paths.
//!
//! Boot sequence:
//! 1. Parse the embedded `default_config.toml` (compile-time guarantee it exists).
//! 2. Resolve `~/.config/pairlink/config.toml` via the `directories` crate.
//! 3. If the user file doesn't exist, create the directory tree and write the default.
//! 4. Parse the user file (falling back to embedded defaults on any error).
//! 5. Store the resolved `Config` in a `OnceLock` for zero-cost global access.
//!
//! Only `main` and the worker call `config::get()`. The Bluetooth components
//! take the resolved section they need at construction time.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Embedded default configuration, baked into the binary at compile time.
const DEFAULT_CONFIG_STR: &str = include_str!("../default_config.toml");

/// Application-wide config singleton.
static CONFIG: OnceLock<Config> = OnceLock::new();

// ─── Public API ─────────────────────────────────────────────────────────────

/// Initialise the configuration system.  Must be called exactly once at
/// startup, **after** tracing and before any other module calls `get()`.
pub fn init() -> Result<()> {
    let config = load()?;
    CONFIG
        .set(config)
        .map_err(|_| eyre!("Config already initialised"))?;
    Ok(())
}

/// Return a static reference to the loaded configuration.
/// # Panics
/// Panics if `init()` has not been called yet.
pub fn get() -> &'static Config {
    CONFIG.get().expect("config::init() was not called")
}

// ─── Loading logic ──────────────────────────────────────────────────────────

fn load() -> Result<Config> {
    // 1. Parse compiled-in defaults, the infallible baseline.
    let defaults: RawConfig = toml::from_str(DEFAULT_CONFIG_STR)
        .wrap_err("BUG: failed to parse embedded default_config.toml")?;

    // 2. Resolve user config path.
    let user_path = config_path();
    info!("Config path: {}", user_path.display());

    // 3. Bootstrap on first run. Failing to write the default is not fatal.
    if let Err(e) = ensure_config_file(&user_path) {
        warn!("{e:#}; using built-in defaults");
        return Ok(Config::from(defaults));
    }

    // 4. Parse user file; fall back to embedded defaults on *any* error.
    let raw = match fs::read_to_string(&user_path) {
        Ok(contents) => match toml::from_str::<RawConfig>(&contents) {
            Ok(parsed) => {
                info!("Loaded user config from {}", user_path.display());
                parsed
            }
            Err(e) => {
                warn!(
                    "Parse error in {}: {e}; falling back to defaults",
                    user_path.display()
                );
                defaults
            }
        },
        Err(e) => {
            warn!(
                "Cannot read {}: {e}; falling back to defaults",
                user_path.display()
            );
            defaults
        }
    };

    Ok(Config::from(raw))
}

/// Resolve the XDG-compliant config file path.
fn config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "pairlink")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".config/pairlink/config.toml"))
}

/// Create the config directory tree and write the default file if absent.
fn ensure_config_file(path: &PathBuf) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create config dir: {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG_STR)
        .wrap_err_with(|| format!("Failed to write default config to {}", path.display()))?;
    info!("Created default config at {}", path.display());
    Ok(())
}

// ─── Raw TOML structures (serde targets) ────────────────────────────────────
//
// Each struct carries `#[serde(default)]` so that missing keys or entire
// sections gracefully fill in from the compiled defaults.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawConfig {
    general: RawGeneral,
    pairing: RawPairing,
    devices: RawDevices,
}

// ── General ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawGeneral {
    device_name: String,
    discoverable_on_startup: bool,
    refresh_interval_secs: u64,
}

impl Default for RawGeneral {
    fn default() -> Self {
        Self {
            device_name: "Pairlink Audio".into(),
            discoverable_on_startup: true,
            refresh_interval_secs: 5,
        }
    }
}

// ── Pairing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawPairing {
    timeout_secs: u64,
    auto_trust_on_accept: bool,
    default_pin: String,
    default_passkey: u32,
    auto_authorized_services: Vec<String>,
}

impl Default for RawPairing {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            auto_trust_on_accept: true,
            default_pin: "0000".into(),
            default_passkey: 0,
            auto_authorized_services: vec![
                A2DP_SOURCE.into(),
                A2DP_SINK.into(),
                AVRCP_TARGET.into(),
                AVRCP_CONTROLLER.into(),
            ],
        }
    }
}

pub const A2DP_SOURCE: &str = "0000110a-0000-1000-8000-00805f9b34fb";
pub const A2DP_SINK: &str = "0000110b-0000-1000-8000-00805f9b34fb";
pub const AVRCP_TARGET: &str = "0000110e-0000-1000-8000-00805f9b34fb";
pub const AVRCP_CONTROLLER: &str = "0000110c-0000-1000-8000-00805f9b34fb";

// ── Devices ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawDevices {
    error_display_secs: u64,
}

impl Default for RawDevices {
    fn default() -> Self {
        Self {
            error_display_secs: 5,
        }
    }
}

// ─── Resolved runtime config ────────────────────────────────────────────────
//
// These are the structs the rest of the app interacts with.  All values are
// validated, clamped, and ready to use.

/// Fully resolved, runtime-ready configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub pairing: PairingConfig,
    pub devices: DevicesConfig,
}

#[derive(Debug, Clone)]
pub struct GeneralConfig {
    pub device_name: String,
    pub discoverable_on_startup: bool,
    pub refresh_interval: Duration,
}

/// Pairing agent policy.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// How long a suspended callback waits for a decision.
    pub timeout: Duration,
    pub auto_trust_on_accept: bool,
    pub default_pin: String,
    pub default_passkey: u32,
    /// Lower-cased service UUIDs authorised without a prompt.
    pub auto_authorized_services: Vec<String>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Config::from(RawConfig::default()).pairing
    }
}

#[derive(Debug, Clone)]
pub struct DevicesConfig {
    /// How long an ERROR overlay stays visible before clearing.
    pub error_display: Duration,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Config::from(RawConfig::default()).devices
    }
}

// ─── Raw → Resolved conversion ─────────────────────────────────────────────

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        let device_name = match raw.general.device_name.trim() {
            "" => RawGeneral::default().device_name,
            name => name.to_string(),
        };
        let default_pin = match raw.pairing.default_pin.trim() {
            "" => RawPairing::default().default_pin,
            pin => pin.to_string(),
        };

        Self {
            general: GeneralConfig {
                device_name,
                discoverable_on_startup: raw.general.discoverable_on_startup,
                refresh_interval: Duration::from_secs(
                    raw.general.refresh_interval_secs.clamp(1, 300),
                ),
            },
            pairing: PairingConfig {
                // BlueZ gives up on the agent after about a minute.
                timeout: Duration::from_secs(raw.pairing.timeout_secs.clamp(5, 60)),
                auto_trust_on_accept: raw.pairing.auto_trust_on_accept,
                default_pin,
                default_passkey: raw.pairing.default_passkey.min(999_999),
                auto_authorized_services: raw
                    .pairing
                    .auto_authorized_services
                    .iter()
                    .map(|uuid| uuid.trim().to_ascii_lowercase())
                    .filter(|uuid| !uuid.is_empty())
                    .collect(),
            },
            devices: DevicesConfig {
                error_display: Duration::from_secs(raw.devices.error_display_secs.clamp(1, 120)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let raw: RawConfig = toml::from_str(DEFAULT_CONFIG_STR).unwrap();
        let config = Config::from(raw);

        assert_eq!(config.general.device_name, "Pairlink Audio");
        assert_eq!(config.pairing.timeout, Duration::from_secs(60));
        assert_eq!(config.devices.error_display, Duration::from_secs(5));
        assert_eq!(config.pairing.auto_authorized_services.len(), 4);
        assert!(config.pairing.auto_trust_on_accept);
    }

    #[test]
    fn missing_sections_fill_from_defaults() {
        let raw: RawConfig = toml::from_str("[pairing]\ntimeout_secs = 30\n").unwrap();
        let config = Config::from(raw);

        assert_eq!(config.pairing.timeout, Duration::from_secs(30));
        assert_eq!(config.pairing.default_pin, "0000");
        assert_eq!(config.general.refresh_interval, Duration::from_secs(5));
    }

    #[test]
    fn values_are_clamped_and_normalised() {
        let raw: RawConfig = toml::from_str(
            r#"
            [general]
            device_name = "  "
            refresh_interval_secs = 0

            [pairing]
            timeout_secs = 100000
            auto_authorized_services = ["0000110B-0000-1000-8000-00805F9B34FB", ""]

            [devices]
            error_display_secs = 0
            "#,
        )
        .unwrap();
        let config = Config::from(raw);

        assert_eq!(config.general.device_name, "Pairlink Audio");
        assert_eq!(config.general.refresh_interval, Duration::from_secs(1));
        assert_eq!(config.pairing.timeout, Duration::from_secs(60));
        assert_eq!(config.pairing.auto_authorized_services, vec![A2DP_SINK]);
        assert_eq!(config.devices.error_display, Duration::from_secs(1));
    }
}
