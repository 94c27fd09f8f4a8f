use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use time::OffsetDateTime;

use super::attribute_model::{AttributeDescriptor, DataType};

/// A pump known to the client.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "did")]
    device_id: String,
    product_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lan_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
}

impl Device {
    /// Creates a device record without network location or alias.
    #[must_use]
    pub fn new(device_id: impl Into<String>, product_key: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            product_key: product_key.into(),
            lan_ip: None,
            alias: None,
        }
    }

    /// Sets the LAN address.
    #[must_use]
    pub fn with_lan_ip(mut self, lan_ip: impl Into<Option<IpAddr>>) -> Self {
        self.lan_ip = lan_ip.into();
        self
    }

    /// Sets the human alias; blank aliases are dropped.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<Option<String>>) -> Self {
        self.alias = alias.into().filter(|alias| !alias.trim().is_empty());
        self
    }

    /// Returns the cloud device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the product key selecting the attribute model.
    #[must_use]
    pub fn product_key(&self) -> &str {
        &self.product_key
    }

    /// Returns the LAN address, if known.
    #[must_use]
    pub fn lan_ip(&self) -> Option<IpAddr> {
        self.lan_ip
    }

    /// Returns the alias, if any.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Returns the alias, falling back to the device identifier.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.alias().unwrap_or(&self.device_id)
    }

    pub(crate) fn set_lan_ip(&mut self, lan_ip: Option<IpAddr>) {
        self.lan_ip = lan_ip;
    }
}

/// One decoded attribute value.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AttributeValue {
    Bool(bool),
    /// Index into the attribute's enum list; may lie outside it.
    Enum(u16),
    UInt8(u8),
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Returns the data type this value belongs to.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::Enum(_) => DataType::Enum,
            Self::UInt8(_) => DataType::Uint8,
            Self::Binary(_) => DataType::Binary,
        }
    }

    /// Renders the value for display, resolving enum labels.
    ///
    /// ```
    /// use jebao::{AttributeDescriptor, AttributeValue, BitPosition, DataType};
    ///
    /// let mode = AttributeDescriptor::new("mode", DataType::Enum, BitPosition::bits(0, 1, 7))
    ///     .with_enum_values(["auto", "manual"]);
    /// assert_eq!("manual", AttributeValue::Enum(1).render(&mode));
    /// assert_eq!("#5", AttributeValue::Enum(5).render(&mode));
    /// ```
    #[must_use]
    pub fn render(&self, descriptor: &AttributeDescriptor) -> String {
        match self {
            Self::Bool(value) => if *value { "on" } else { "off" }.to_string(),
            Self::Enum(index) => descriptor
                .enum_label(*index)
                .map_or_else(|| format!("#{index}"), str::to_string),
            Self::UInt8(value) => match descriptor.unit.as_deref() {
                Some(unit) => format!("{value} {unit}"),
                None => value.to_string(),
            },
            Self::Binary(bytes) => hex::encode(bytes),
        }
    }

    /// Converts the value into the JSON form the cloud API uses.
    ///
    /// Enum values become their label; indices without a label stay numeric.
    #[must_use]
    pub fn to_json(&self, descriptor: &AttributeDescriptor) -> serde_json::Value {
        match self {
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Enum(index) => descriptor.enum_label(*index).map_or_else(
                || serde_json::Value::from(*index),
                |label| serde_json::Value::from(label),
            ),
            Self::UInt8(value) => serde_json::Value::from(*value),
            Self::Binary(bytes) => serde_json::Value::from(hex::encode(bytes)),
        }
    }

    /// Interprets a cloud JSON value according to `descriptor`.
    ///
    /// Returns `None` when the JSON shape does not fit the data type.
    #[must_use]
    pub fn from_json(descriptor: &AttributeDescriptor, value: &serde_json::Value) -> Option<Self> {
        match descriptor.data_type {
            DataType::Bool => match value {
                serde_json::Value::Bool(flag) => Some(Self::Bool(*flag)),
                serde_json::Value::Number(number) => number.as_u64().map(|raw| Self::Bool(raw != 0)),
                _ => None,
            },
            DataType::Enum => match value {
                serde_json::Value::String(label) => descriptor
                    .enum_values
                    .iter()
                    .position(|candidate| candidate == label)
                    .and_then(|index| u16::try_from(index).ok())
                    .map(Self::Enum),
                serde_json::Value::Number(number) => number
                    .as_u64()
                    .and_then(|raw| u16::try_from(raw).ok())
                    .map(Self::Enum),
                _ => None,
            },
            DataType::Uint8 => value
                .as_u64()
                .and_then(|raw| u8::try_from(raw).ok())
                .map(Self::UInt8),
            DataType::Binary => value
                .as_str()
                .and_then(|encoded| hex::decode(encoded).ok())
                .map(Self::Binary),
        }
    }
}

/// Decoded attributes keyed by attribute name.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Whether a snapshot came from the latest poll.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    /// Last-known-good data retained after a failed poll.
    Stale,
}

/// Transport that produced a snapshot.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StatusSourceKind {
    Lan,
    Cloud,
}

/// Most recent attribute map for one device.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceStatusSnapshot {
    device_id: String,
    attributes: AttributeMap,
    source: StatusSourceKind,
    freshness: Freshness,
    updated_at: OffsetDateTime,
}

impl DeviceStatusSnapshot {
    /// Creates a fresh snapshot stamped with the current time.
    #[must_use]
    pub fn fresh(
        device_id: impl Into<String>,
        attributes: AttributeMap,
        source: StatusSourceKind,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            attributes,
            source,
            freshness: Freshness::Fresh,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns the same data flagged as last-known-good.
    #[must_use]
    pub fn into_stale(mut self) -> Self {
        self.freshness = Freshness::Stale;
        self
    }

    /// Returns the owning device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the decoded attributes.
    #[must_use]
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Returns one attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Returns which transport produced the data.
    #[must_use]
    pub fn source(&self) -> StatusSourceKind {
        self.source
    }

    /// Returns whether the data is fresh or stale.
    #[must_use]
    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// Returns whether the data is last-known-good rather than fresh.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }

    /// Returns when the data was successfully polled.
    #[must_use]
    pub fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::hw::attribute_model::BitPosition;

    fn enum_descriptor() -> AttributeDescriptor {
        AttributeDescriptor::new("Mode", DataType::Enum, BitPosition::bits(0, 1, 3))
            .with_enum_values(["Classic", "Sine", "Random"])
    }

    #[test]
    fn blank_alias_falls_back_to_device_id() {
        let device = Device::new("did-1", "pk").with_alias(Some("  ".to_string()));
        assert_eq!(None, device.alias());
        assert_eq!("did-1", device.display_name());
    }

    #[test]
    fn device_round_trips_through_config_json() {
        let device = Device::new("did-1", "pk")
            .with_lan_ip("192.168.1.20".parse::<IpAddr>().ok())
            .with_alias(Some("Reef".to_string()));
        let encoded = serde_json::to_value(&device).expect("device should serialise");
        assert_eq!(
            json!({"did": "did-1", "product_key": "pk", "lan_ip": "192.168.1.20", "alias": "Reef"}),
            encoded
        );
        let decoded: Device = serde_json::from_value(encoded).expect("device should deserialise");
        assert_eq!(device, decoded);
    }

    #[rstest]
    #[case(json!("Sine"), Some(AttributeValue::Enum(1)))]
    #[case(json!(2), Some(AttributeValue::Enum(2)))]
    #[case(json!("Unknown"), None)]
    #[case(json!(true), None)]
    fn enum_values_parse_from_cloud_json(
        #[case] value: serde_json::Value,
        #[case] expected: Option<AttributeValue>,
    ) {
        assert_eq!(expected, AttributeValue::from_json(&enum_descriptor(), &value));
    }

    #[rstest]
    #[case(DataType::Bool, json!(true), Some(AttributeValue::Bool(true)))]
    #[case(DataType::Bool, json!(0), Some(AttributeValue::Bool(false)))]
    #[case(DataType::Uint8, json!(80), Some(AttributeValue::UInt8(80)))]
    #[case(DataType::Uint8, json!(300), None)]
    #[case(DataType::Binary, json!("0a0b"), Some(AttributeValue::Binary(vec![0x0A, 0x0B])))]
    #[case(DataType::Binary, json!("zz"), None)]
    fn scalar_values_parse_from_cloud_json(
        #[case] data_type: DataType,
        #[case] value: serde_json::Value,
        #[case] expected: Option<AttributeValue>,
    ) {
        let descriptor = AttributeDescriptor::new("x", data_type, BitPosition::bytes(0, 2));
        assert_eq!(expected, AttributeValue::from_json(&descriptor, &value));
    }

    #[test]
    fn enum_values_serialise_as_labels() {
        assert_eq!(json!("Random"), AttributeValue::Enum(2).to_json(&enum_descriptor()));
        assert_eq!(json!(9), AttributeValue::Enum(9).to_json(&enum_descriptor()));
    }

    #[test]
    fn stale_snapshot_keeps_data() {
        let mut attributes = AttributeMap::new();
        attributes.insert("SwitchON".to_string(), AttributeValue::Bool(true));
        let fresh = DeviceStatusSnapshot::fresh("did-1", attributes.clone(), StatusSourceKind::Lan);
        let stale = fresh.clone().into_stale();

        assert!(!fresh.is_stale());
        assert!(stale.is_stale());
        assert_eq!(&attributes, stale.attributes());
        assert_eq!(fresh.updated_at(), stale.updated_at());
    }
}
