mod device_view;
mod painter;
mod spinner;
mod status_view;
mod table;

pub(crate) use self::device_view::{DeviceListView, DeviceListing, DiscoveredDevice, DiscoveryView};
pub(crate) use self::painter::Painter;
pub(crate) use self::spinner::Spinner;
pub(crate) use self::status_view::{DeviceStatusLine, RunSummaryView, StatusReportView};
