mod app;
mod cli;
mod config;
mod coordinator;
mod error;
mod handlers;
mod hw;
mod protocol;
mod telemetry;
mod terminal;
mod utils;

pub use app::{AppContext, run, run_with_clients, run_with_clients_and_log_level};
pub use cli::{
    Args, Command, ControlArgs, DiscoverArgs, LogLevel, OutputFormat, PollArgs, SetupArgs,
    StatusArgs,
};
pub use config::{Config, resolve_config_path};
pub use coordinator::{
    DeviceAvailability, DeviceInventory, LanFailurePolicy, RunStopReason, RunSummary,
    StatusReport, StatusSink, UpdateCoordinator,
};
pub use error::{ConfigError, ControlError, Error, PollError, SetupError, UpdateError};
pub use handlers::{
    AttributeCodec, AttributeCodecError, Frame, FrameCodec, FrameCodecError, MAX_SEQUENCE,
    SequenceCounter,
};
pub use hw::{
    APPLICATION_ID, AttributeDescriptor, AttributeKind, AttributeMap, AttributeModel,
    AttributeModelTable, AttributeValue, BitPosition, CloudClient, CloudDevice, CloudDeviceData,
    CloudEndpoints, CloudError, CloudTransport, DataType, Device, DeviceStatusSnapshot,
    DiscoveryConfig, FakeDiscoveryResponder, FakePump, FakePumpConfig, FakePumpFault, Freshness,
    LanClient, LanConfig, LanError, LanPhase, LanTransport, LoginFailureReason, PositionUnit,
    Region, RetryAdvice, SchemaError, StatusSourceKind, WritableRange, discover,
    discovery_response, parse_device_id,
};
pub use protocol::{
    DISCOVERY_PORT, DISCOVERY_PROBE, FRAME_MARKER, LAN_PORT, LanCommand, PASSCODE_LEN,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
