use std::io;

use anyhow::Result;
use clap::Args;
use tracing::instrument;

use crate::app::AppContext;
use crate::cli::ui::{DeviceStatusLine, Painter, Spinner, StatusReportView};
use crate::cli::{OutputFormat, write_json_line};
use crate::coordinator::DeviceInventory;
use crate::hw::Device;
use crate::terminal::TerminalClient;

/// Arguments for the `status` command.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Poll only this device identifier.
    #[arg(long, value_name = "DID")]
    device: Option<String>,
}

impl StatusArgs {
    #[must_use]
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

/// Selects the devices a polling command works on.
pub(crate) fn selected_inventory(
    context: &AppContext,
    device: Option<&str>,
) -> Result<DeviceInventory> {
    match device {
        Some(device_id) => {
            let device = context.config().device(device_id)?;
            Ok(DeviceInventory::new([device.clone()]))
        }
        None => Ok(context.config().inventory()?),
    }
}

/// Executes the `status` command.
#[instrument(skip(context, args, out, terminal_client), level = "info", fields(device = ?args.device))]
pub(crate) async fn run<W>(
    context: &AppContext,
    args: &StatusArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let inventory = selected_inventory(context, args.device.as_deref())?;
    let devices: Vec<Device> = inventory.devices().cloned().collect();
    let coordinator = context.coordinator(inventory)?;

    let report = Spinner::new(terminal_client.stderr_is_terminal())
        .run("Polling pumps", coordinator.refresh())
        .await?;

    match output_format {
        OutputFormat::Pretty => writeln!(
            out,
            "{}",
            StatusReportView::new(&report, &devices, context.models(), &painter)
        )?,
        OutputFormat::Json => write_json_line(
            out,
            &DeviceStatusLine::collect(&report, &devices, context.models()),
        )?,
    }
    Ok(())
}
