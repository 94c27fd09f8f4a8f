mod attribute_model;
mod cloud_backend;
mod discovery;
mod fake_backend;
mod lan_backend;
mod model;

pub use self::attribute_model::{
    AttributeDescriptor, AttributeKind, AttributeModel, AttributeModelTable, BitPosition,
    DataType, PositionUnit, SchemaError, WritableRange,
};
pub use self::cloud_backend::{
    APPLICATION_ID, CloudClient, CloudDevice, CloudDeviceData, CloudEndpoints, CloudError,
    CloudTransport, LoginFailureReason, Region, RetryAdvice,
};
pub use self::discovery::{DiscoveryConfig, discover, parse_device_id};
pub use self::fake_backend::{
    FakeDiscoveryResponder, FakePump, FakePumpConfig, FakePumpFault, discovery_response,
};
pub use self::lan_backend::{LanClient, LanConfig, LanError, LanPhase, LanTransport};
pub use self::model::{
    AttributeMap, AttributeValue, Device, DeviceStatusSnapshot, Freshness, StatusSourceKind,
};
