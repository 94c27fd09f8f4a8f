use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::coordinator::{DeviceAvailability, RunStopReason, RunSummary, StatusReport};
use crate::hw::{AttributeModelTable, Device, DeviceStatusSnapshot, Freshness, StatusSourceKind};

use super::painter::Painter;
use super::table::Table;

/// Renders every device of a report, one attribute table per device.
pub(crate) struct StatusReportView<'a> {
    report: &'a StatusReport,
    devices: &'a [Device],
    models: &'a AttributeModelTable,
    painter: &'a Painter,
}

impl<'a> StatusReportView<'a> {
    pub(crate) fn new(
        report: &'a StatusReport,
        devices: &'a [Device],
        models: &'a AttributeModelTable,
        painter: &'a Painter,
    ) -> Self {
        Self {
            report,
            devices,
            models,
            painter,
        }
    }

    fn device_heading(&self, device: &Device) -> String {
        let name = self.painter.heading(device.display_name());
        let did = self.painter.muted(format!("({})", device.device_id()));
        match self.report.device(device.device_id()) {
            DeviceAvailability::Available(snapshot) => format!(
                "{name} {did} {} {} {}",
                self.painter.freshness(snapshot.freshness()),
                self.painter.muted(format!("via {}", snapshot.source())),
                self.painter.muted(format_timestamp(snapshot.updated_at())),
            ),
            DeviceAvailability::Unavailable(_) => {
                format!("{name} {did} {}", self.painter.failure("unavailable"))
            }
        }
    }

    fn attribute_rows(&self, device: &Device, snapshot: &DeviceStatusSnapshot) -> Vec<(String, String)> {
        let Some(model) = self.models.get(device.product_key()) else {
            return Vec::new();
        };
        model
            .attrs
            .iter()
            .filter_map(|descriptor| {
                let value = snapshot.attribute(&descriptor.name)?;
                Some((descriptor.label().to_string(), self.painter.value(value.render(descriptor))))
            })
            .collect()
    }
}

impl Display for StatusReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (index, device) in self.devices.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", self.device_heading(device))?;
            match self.report.device(device.device_id()) {
                DeviceAvailability::Available(snapshot) => {
                    let table = Table::attributes(self.painter, self.attribute_rows(device, snapshot));
                    if table.is_empty() {
                        write!(f, "\n{}", self.painter.muted("no attributes decoded"))?;
                    } else {
                        write!(f, "\n{table}")?;
                    }
                }
                DeviceAvailability::Unavailable(reason) => {
                    let reason = reason.unwrap_or("not polled");
                    write!(f, "\n{}", self.painter.muted(reason))?;
                }
            }
            if let (Some(reason), DeviceAvailability::Available(_)) = (
                self.report.failures().get(device.device_id()),
                self.report.device(device.device_id()),
            ) {
                write!(
                    f,
                    "\n{} {}",
                    self.painter.warning("last poll failed:"),
                    self.painter.muted(reason)
                )?;
            }
        }
        Ok(())
    }
}

/// One JSON line per device.
#[derive(Debug, Serialize)]
pub(crate) struct DeviceStatusLine {
    did: String,
    name: String,
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    freshness: Option<Freshness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<StatusSourceKind>,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    updated_at: Option<OffsetDateTime>,
    attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DeviceStatusLine {
    pub(crate) fn collect(
        report: &StatusReport,
        devices: &[Device],
        models: &AttributeModelTable,
    ) -> Vec<Self> {
        devices
            .iter()
            .map(|device| {
                let error = report.failures().get(device.device_id()).cloned();
                let mut line = Self {
                    did: device.device_id().to_string(),
                    name: device.display_name().to_string(),
                    available: false,
                    freshness: None,
                    source: None,
                    updated_at: None,
                    attributes: Map::new(),
                    error,
                };
                if let DeviceAvailability::Available(snapshot) = report.device(device.device_id()) {
                    line.available = true;
                    line.freshness = Some(snapshot.freshness());
                    line.source = Some(snapshot.source());
                    line.updated_at = Some(snapshot.updated_at());
                    line.attributes = json_attributes(device, snapshot, models);
                }
                line
            })
            .collect()
    }
}

fn json_attributes(
    device: &Device,
    snapshot: &DeviceStatusSnapshot,
    models: &AttributeModelTable,
) -> Map<String, Value> {
    let Some(model) = models.get(device.product_key()) else {
        return Map::new();
    };
    model
        .attrs
        .iter()
        .filter_map(|descriptor| {
            let value = snapshot.attribute(&descriptor.name)?;
            Some((descriptor.name.clone(), value.to_json(descriptor)))
        })
        .collect()
}

/// Renders the end of a polling loop.
pub(crate) struct RunSummaryView<'a> {
    summary: &'a RunSummary,
    painter: &'a Painter,
}

impl<'a> RunSummaryView<'a> {
    pub(crate) fn new(summary: &'a RunSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for RunSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = self.summary.stop_reason().to_string();
        let reason = match self.summary.stop_reason() {
            RunStopReason::ReachedLimit(_) => self.painter.success(reason),
            RunStopReason::Cancelled => self.painter.warning(reason),
        };
        write!(
            f,
            "{} {reason} {}",
            self.painter.heading("Stopped:"),
            self.painter.value(format!(
                "- {} cycle(s), {} without data",
                self.summary.cycles(),
                self.summary.failed_cycles()
            ))
        )
    }
}

fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_error| at.unix_timestamp().to_string())
}
