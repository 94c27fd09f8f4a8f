use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{debug, instrument};

use crate::coordinator::{DeviceInventory, LanFailurePolicy};
use crate::error::ConfigError;
use crate::hw::{Device, DiscoveryConfig, LanConfig, Region};

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_LAN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(5);

/// Settings persisted between runs in `config.json`.
///
/// Missing fields take their defaults, so a file written by `setup` only
/// needs the account, token and devices.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct Config {
    #[builder(default)]
    region: Region,
    account: Option<String>,
    token: Option<String>,
    #[builder(default)]
    devices: Vec<Device>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms")]
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    poll_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "lan_connect_timeout_ms")]
    #[builder(default = DEFAULT_LAN_TIMEOUT)]
    lan_connect_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "lan_phase_timeout_ms")]
    #[builder(default = DEFAULT_LAN_TIMEOUT)]
    lan_phase_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "discovery_window_ms")]
    #[builder(default = DEFAULT_DISCOVERY_WINDOW)]
    discovery_window: Duration,
    #[builder(default)]
    lan_failure_policy: LanFailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Reads the config at `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("no configuration file; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the config to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when serialisation or the write fails.
    #[instrument(skip(self), level = "debug")]
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let mut serialised = serde_json::to_string_pretty(self).map_err(ConfigError::Serialise)?;
        serialised.push('\n');
        fs::write(path, serialised).map_err(write_error)
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    #[must_use]
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Returns the stored cloud session token.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Looks up one configured device.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownDevice`] when `device_id` is not configured.
    pub fn device(&self, device_id: &str) -> Result<&Device, ConfigError> {
        self.devices
            .iter()
            .find(|device| device.device_id() == device_id)
            .ok_or_else(|| ConfigError::UnknownDevice {
                device_id: device_id.to_string(),
            })
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn lan_failure_policy(&self) -> LanFailurePolicy {
        self.lan_failure_policy
    }

    /// Returns the configured devices as an inventory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDevices`] when nothing is configured.
    pub fn inventory(&self) -> Result<DeviceInventory, ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        Ok(DeviceInventory::new(self.devices.iter().cloned()))
    }

    /// Builds LAN client settings from the stored timeouts.
    #[must_use]
    pub fn lan_config(&self, port: Option<u16>) -> LanConfig {
        LanConfig::builder()
            .maybe_port(port)
            .connect_timeout(self.lan_connect_timeout)
            .phase_timeout(self.lan_phase_timeout)
            .build()
    }

    /// Builds discovery settings, optionally overriding the target and window.
    #[must_use]
    pub fn discovery_config(
        &self,
        target: Option<SocketAddr>,
        window: Option<Duration>,
    ) -> DiscoveryConfig {
        DiscoveryConfig::builder()
            .maybe_target(target)
            .window(window.unwrap_or(self.discovery_window))
            .build()
    }

    /// Stores the cloud session established by `setup`.
    pub fn set_session(&mut self, region: Region, account: String, token: String) {
        self.region = region;
        self.account = Some(account);
        self.token = Some(token);
    }

    /// Replaces the configured devices.
    pub fn set_devices(&mut self, devices: Vec<Device>) {
        self.devices = devices;
    }

    /// Copies LAN addresses from `inventory` into the configured devices.
    ///
    /// Returns how many entries changed.
    pub fn update_lan_addresses(&mut self, inventory: &DeviceInventory) -> usize {
        let mut changed = 0;
        for device in &mut self.devices {
            let Some(known) = inventory.get(device.device_id()) else {
                continue;
            };
            if known.lan_ip() != device.lan_ip() {
                device.set_lan_ip(known.lan_ip());
                changed += 1;
            }
        }
        changed
    }
}

/// Resolves the config path: an explicit path wins, else the platform config dir.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] when no home directory can be found.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let project_dirs = ProjectDirs::from("com", "jebao", "jebao").ok_or(ConfigError::NoConfigDir)?;
    Ok(project_dirs.config_dir().join(CONFIG_FILE_NAME))
}
