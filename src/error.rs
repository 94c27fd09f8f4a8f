use std::path::PathBuf;

use derive_more::From;
use thiserror::Error;

use crate::handlers::{AttributeCodecError, FrameCodecError};
use crate::hw::{CloudError, DataType, LanError, SchemaError};

/// Errors returned for one device's poll within an update cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("no attribute model is loaded for product `{product_key}`")]
    UnknownProduct { product_key: String },
    #[error("device `{device_id}` has no LAN address and no cloud session is available")]
    TransportSelectionFailure { device_id: String },
    #[error("LAN poll failed")]
    Lan(#[from] LanError),
    #[error("cloud poll failed")]
    Cloud(#[from] CloudError),
    #[error("LAN poll failed ({lan}) and the cloud fallback failed too")]
    LanAndCloud {
        lan: LanError,
        #[source]
        cloud: CloudError,
    },
    #[error("poll task ended abnormally")]
    Task(#[source] tokio::task::JoinError),
}

/// Errors that abort a whole update cycle.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("no device produced data ({failed} of {total} polls failed and none has earlier data)")]
    NoData { failed: usize, total: usize },
}

/// Errors returned when reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a configuration directory; pass --config")]
    NoConfigDir,
    #[error("failed to read configuration from `{path}`")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write configuration to `{path}`")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("configuration file `{path}` is not valid")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialise configuration")]
    Serialise(#[source] serde_json::Error),
    #[error("no devices are configured; run `jebao setup` first")]
    NoDevices,
    #[error("device `{device_id}` is not configured")]
    UnknownDevice { device_id: String },
}

/// Errors returned when a control request is rejected before it is sent.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no attribute model is loaded for product `{product_key}`")]
    UnknownProduct { product_key: String },
    #[error("product `{product_key}` has no attribute `{attribute}`")]
    UnknownAttribute {
        product_key: String,
        attribute: String,
    },
    #[error("attribute `{attribute}` is read-only")]
    NotWritable { attribute: String },
    #[error("`{value}` is not a valid {expected} value for `{attribute}`")]
    InvalidValue {
        attribute: String,
        value: String,
        expected: DataType,
    },
    #[error("{value} is outside {min}..={max} for `{attribute}`")]
    OutOfRange {
        attribute: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Errors that end `setup` before the config is written.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("none of the {bound} bound device(s) has a loaded attribute model")]
    NoSupportedDevices { bound: usize },
    #[error("cloud login was rejected; check the account and password and run setup again")]
    InvalidCredentials(#[source] CloudError),
    #[error("--lan-ip names {device_id}, which is not a bound device with an attribute model")]
    UnknownLanOverride { device_id: String },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level library error wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum Error {
    #[error(transparent)]
    #[from(FrameCodecError, Box<FrameCodecError>)]
    FrameCodec(Box<FrameCodecError>),
    #[error(transparent)]
    #[from(AttributeCodecError, Box<AttributeCodecError>)]
    AttributeCodec(Box<AttributeCodecError>),
    #[error(transparent)]
    #[from(SchemaError, Box<SchemaError>)]
    Schema(Box<SchemaError>),
    #[error(transparent)]
    #[from(LanError, Box<LanError>)]
    Lan(Box<LanError>),
    #[error(transparent)]
    #[from(CloudError, Box<CloudError>)]
    Cloud(Box<CloudError>),
    #[error(transparent)]
    #[from(PollError, Box<PollError>)]
    Poll(Box<PollError>),
    #[error(transparent)]
    #[from(UpdateError, Box<UpdateError>)]
    Update(Box<UpdateError>),
    #[error(transparent)]
    #[from(ConfigError, Box<ConfigError>)]
    Config(Box<ConfigError>),
    #[error(transparent)]
    #[from(ControlError, Box<ControlError>)]
    Control(Box<ControlError>),
    #[error(transparent)]
    #[from(SetupError, Box<SetupError>)]
    Setup(Box<SetupError>),
}
