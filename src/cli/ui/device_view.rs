use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;

use serde::Serialize;

use crate::hw::{CloudDevice, Device};
use crate::utils::format_optional;

use super::painter::Painter;
use super::table::Table;

/// A cloud-bound device and whether an attribute model covers it.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DeviceListing {
    did: String,
    product_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lan_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    online: Option<bool>,
    supported: bool,
}

impl DeviceListing {
    pub(crate) fn from_cloud(device: &CloudDevice, supported: bool) -> Self {
        Self {
            did: device.did.clone(),
            product_key: device.product_key.clone(),
            alias: device.dev_alias.clone().filter(|alias| !alias.trim().is_empty()),
            lan_ip: None,
            online: device.is_online,
            supported,
        }
    }

    pub(crate) fn with_lan_ip(mut self, lan_ip: Option<IpAddr>) -> Self {
        self.lan_ip = lan_ip;
        self
    }

    pub(crate) fn from_configured(device: &Device, supported: bool) -> Self {
        Self {
            did: device.device_id().to_string(),
            product_key: device.product_key().to_string(),
            alias: device.alias().map(str::to_string),
            lan_ip: device.lan_ip(),
            online: None,
            supported,
        }
    }
}

/// Table of device listings.
pub(crate) struct DeviceListView<'a> {
    devices: &'a [DeviceListing],
    painter: &'a Painter,
}

impl<'a> DeviceListView<'a> {
    pub(crate) fn new(devices: &'a [DeviceListing], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DeviceListView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.devices.is_empty() {
            return write!(f, "{}", self.painter.warning("No devices."));
        }
        let rows = self
            .devices
            .iter()
            .map(|device| {
                vec![
                    self.painter.value(&device.did),
                    format_optional(device.alias.as_deref()),
                    self.painter.muted(&device.product_key),
                    format_optional(device.lan_ip),
                    match device.online {
                        Some(true) => self.painter.success("online"),
                        Some(false) => self.painter.warning("offline"),
                        None => "-".to_string(),
                    },
                    if device.supported {
                        self.painter.success("yes")
                    } else {
                        self.painter.failure("no")
                    },
                ]
            })
            .collect();
        let table = Table::grid(
            ["did", "alias", "product", "lan ip", "cloud", "supported"],
            rows,
        );
        write!(f, "{table}")
    }
}

/// One discovery answer.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub(crate) struct DiscoveredDevice {
    did: String,
    ip: IpAddr,
    configured: bool,
}

impl DiscoveredDevice {
    /// Sorts discovery results and flags identifiers already in the config.
    pub(crate) fn collect(found: &HashMap<String, IpAddr>, configured: &[Device]) -> Vec<Self> {
        let mut devices: Vec<Self> = found
            .iter()
            .map(|(did, ip)| Self {
                did: did.clone(),
                ip: *ip,
                configured: configured.iter().any(|device| device.device_id() == did),
            })
            .collect();
        devices.sort_by(|left, right| left.did.cmp(&right.did));
        devices
    }
}

/// Table of discovery answers.
pub(crate) struct DiscoveryView<'a> {
    devices: &'a [DiscoveredDevice],
    painter: &'a Painter,
}

impl<'a> DiscoveryView<'a> {
    pub(crate) fn new(devices: &'a [DiscoveredDevice], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DiscoveryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.devices.is_empty() {
            return write!(f, "{}", self.painter.warning("No pumps answered."));
        }
        let rows = self
            .devices
            .iter()
            .map(|device| {
                vec![
                    self.painter.value(&device.did),
                    device.ip.to_string(),
                    if device.configured {
                        self.painter.success("yes")
                    } else {
                        self.painter.muted("no")
                    },
                ]
            })
            .collect();
        write!(f, "{}", Table::grid(["did", "ip", "configured"], rows))
    }
}
