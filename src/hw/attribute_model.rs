use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Widest bit field the pumps pack into a status payload.
const MAX_BIT_SPAN: usize = 16;

/// Errors returned while loading or validating attribute models.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read attribute models from `{path}`")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("attribute model `{path}` is not valid JSON")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(
        "attribute `{attribute}` of product `{product_key}` starts at bit {bit_offset}; bit offsets must be below 8"
    )]
    BitOffsetOutOfRange {
        product_key: String,
        attribute: String,
        bit_offset: u8,
    },
    #[error(
        "attribute `{attribute}` of product `{product_key}` spans {span} bits; at most 16 are supported"
    )]
    BitSpanTooWide {
        product_key: String,
        attribute: String,
        span: usize,
    },
    #[error("attribute `{attribute}` of product `{product_key}` has zero length")]
    EmptyAttribute {
        product_key: String,
        attribute: String,
    },
}

/// Value type of one attribute.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Bool,
    Enum,
    Uint8,
    Binary,
}

/// How an attribute is exposed by the product.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttributeKind {
    StatusWritable,
    #[default]
    StatusReadonly,
    Alert,
    Fault,
    #[serde(other)]
    Other,
}

/// Unit in which `len` is expressed.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionUnit {
    #[default]
    Bit,
    Byte,
}

/// Location of an attribute inside the status payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct BitPosition {
    pub byte_offset: usize,
    pub bit_offset: u8,
    #[serde(rename = "len")]
    pub length: usize,
    #[serde(default)]
    pub unit: PositionUnit,
}

impl BitPosition {
    /// Creates a bit-addressed position.
    #[must_use]
    pub fn bits(byte_offset: usize, bit_offset: u8, length: usize) -> Self {
        Self {
            byte_offset,
            bit_offset,
            length,
            unit: PositionUnit::Bit,
        }
    }

    /// Creates a byte-addressed position.
    #[must_use]
    pub fn bytes(byte_offset: usize, length: usize) -> Self {
        Self {
            byte_offset,
            bit_offset: 0,
            length,
            unit: PositionUnit::Byte,
        }
    }

    /// Returns whether the field runs past the first byte it starts in.
    #[must_use]
    pub fn spans_next_byte(&self) -> bool {
        usize::from(self.bit_offset) + self.length > 8
    }
}

/// Inclusive numeric range accepted when writing a `uint8` attribute.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct WritableRange {
    pub min: i64,
    pub max: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

fn default_step() -> i64 {
    1
}

impl WritableRange {
    /// Returns whether `value` lies within the range.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Schema entry for one named attribute.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub data_type: DataType,
    #[serde(rename = "type", default)]
    pub kind: AttributeKind,
    pub position: BitPosition,
    #[serde(rename = "enum", default)]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(rename = "uint_spec", default)]
    pub writable_range: Option<WritableRange>,
}

impl AttributeDescriptor {
    /// Creates a descriptor with no enum values, unit or range.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType, position: BitPosition) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            data_type,
            kind: AttributeKind::StatusReadonly,
            position,
            enum_values: Vec::new(),
            unit: None,
            writable_range: None,
        }
    }

    /// Sets the ordered enum labels.
    #[must_use]
    pub fn with_enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the exposure kind.
    #[must_use]
    pub fn with_kind(mut self, kind: AttributeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the writable range.
    #[must_use]
    pub fn with_writable_range(mut self, range: WritableRange) -> Self {
        self.writable_range = Some(range);
        self
    }

    /// Returns the display name, falling back to the attribute name.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Returns whether the attribute can be written through the cloud.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.kind == AttributeKind::StatusWritable
    }

    /// Returns the enum label at `index`, if the schema declares one.
    #[must_use]
    pub fn enum_label(&self, index: u16) -> Option<&str> {
        self.enum_values.get(usize::from(index)).map(String::as_str)
    }

    /// Returns the number of payload bytes needed to decode this attribute.
    #[must_use]
    pub fn required_payload_len(&self) -> usize {
        let position = &self.position;
        match self.data_type {
            DataType::Bool | DataType::Enum => {
                let bits = usize::from(position.bit_offset) + position.length;
                position.byte_offset + bits.div_ceil(8)
            }
            DataType::Uint8 => position.byte_offset + 1,
            DataType::Binary => position.byte_offset + position.length,
        }
    }

    fn validate(&self, product_key: &str) -> Result<(), SchemaError> {
        let position = &self.position;
        if position.length == 0 {
            return Err(SchemaError::EmptyAttribute {
                product_key: product_key.to_string(),
                attribute: self.name.clone(),
            });
        }
        if !matches!(self.data_type, DataType::Bool | DataType::Enum) {
            return Ok(());
        }
        if position.bit_offset >= 8 {
            return Err(SchemaError::BitOffsetOutOfRange {
                product_key: product_key.to_string(),
                attribute: self.name.clone(),
                bit_offset: position.bit_offset,
            });
        }
        let span = usize::from(position.bit_offset) + position.length;
        if span > MAX_BIT_SPAN {
            return Err(SchemaError::BitSpanTooWide {
                product_key: product_key.to_string(),
                attribute: self.name.clone(),
                span,
            });
        }
        Ok(())
    }
}

/// Static per-product schema of the status payload.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AttributeModel {
    pub product_key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub attrs: Vec<AttributeDescriptor>,
}

impl AttributeModel {
    /// Creates and validates a model.
    ///
    /// # Errors
    ///
    /// Returns an error when an attribute position is invalid.
    pub fn new(
        product_key: impl Into<String>,
        attrs: Vec<AttributeDescriptor>,
    ) -> Result<Self, SchemaError> {
        let model = Self {
            product_key: product_key.into(),
            name: None,
            attrs,
        };
        model.validate()?;
        Ok(model)
    }

    /// Parses and validates a model from its JSON definition.
    ///
    /// # Errors
    ///
    /// Returns an error when the JSON is malformed or a position is invalid.
    pub fn from_json(json: &str, origin: &Path) -> Result<Self, SchemaError> {
        let model: Self = serde_json::from_str(json).map_err(|source| SchemaError::Json {
            path: origin.to_path_buf(),
            source,
        })?;
        model.validate()?;
        Ok(model)
    }

    /// Looks up one attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attrs.iter().find(|attribute| attribute.name == name)
    }

    /// Returns the smallest payload that holds every attribute.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.attrs
            .iter()
            .map(AttributeDescriptor::required_payload_len)
            .max()
            .unwrap_or(0)
    }

    /// Returns whether the first two payload bytes arrive swapped.
    ///
    /// Products whose byte-0 attribute spills into byte 1 send those two bytes
    /// in the opposite order.
    #[must_use]
    pub fn swaps_leading_bytes(&self) -> bool {
        self.attrs.iter().any(|attribute| {
            attribute.position.byte_offset == 0 && attribute.position.spans_next_byte()
        })
    }

    fn validate(&self) -> Result<(), SchemaError> {
        self.attrs
            .iter()
            .try_for_each(|attribute| attribute.validate(&self.product_key))
    }
}

/// Attribute models keyed by product key; immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct AttributeModelTable {
    models: HashMap<String, Arc<AttributeModel>>,
}

impl AttributeModelTable {
    /// Builds a table from already-validated models.
    #[must_use]
    pub fn from_models(models: impl IntoIterator<Item = AttributeModel>) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|model| (model.product_key.clone(), Arc::new(model)))
                .collect(),
        }
    }

    /// Loads every `*.json` model in `dir`.
    ///
    /// Files that fail to parse or validate are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory itself cannot be read.
    #[instrument(skip(dir), level = "debug", fields(dir = %dir.display()))]
    pub fn load_dir(dir: &Path) -> Result<Self, SchemaError> {
        let io_error = |source| SchemaError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = fs::read_dir(dir)
            .map_err(io_error)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        paths.sort();

        let mut models = HashMap::new();
        for path in paths {
            match load_file(&path) {
                Ok(model) => {
                    debug!(product_key = %model.product_key, path = %path.display(), "loaded attribute model");
                    models.insert(model.product_key.clone(), Arc::new(model));
                }
                Err(error) => {
                    warn!(error = %error, path = %path.display(), "skipping attribute model");
                }
            }
        }
        Ok(Self { models })
    }

    /// Returns the model for `product_key`.
    #[must_use]
    pub fn get(&self, product_key: &str) -> Option<Arc<AttributeModel>> {
        self.models.get(product_key).cloned()
    }

    /// Returns whether a model exists for `product_key`.
    #[must_use]
    pub fn supports(&self, product_key: &str) -> bool {
        self.models.contains_key(product_key)
    }

    /// Returns the number of loaded models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns whether no model is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn load_file(path: &Path) -> Result<AttributeModel, SchemaError> {
    let json = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    AttributeModel::from_json(&json, path)
}
