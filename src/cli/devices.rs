use std::io;

use anyhow::{Context, Result};
use tracing::instrument;

use crate::app::AppContext;
use crate::cli::ui::{DeviceListView, DeviceListing, Painter, Spinner};
use crate::cli::{OutputFormat, write_json_line};
use crate::terminal::TerminalClient;

/// Executes the `devices` command.
///
/// Lists every binding of the stored session, with LAN addresses filled in
/// from the config where known.
#[instrument(skip(context, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    context: &AppContext,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let cloud = context.cloud_client()?;
    let bound = Spinner::new(terminal_client.stderr_is_terminal())
        .run("Listing devices", cloud.devices())
        .await
        .context("failed to list cloud devices")?;

    let listings: Vec<DeviceListing> = bound
        .iter()
        .map(|device| {
            let supported = context.models().supports(&device.product_key);
            match context.config().device(&device.did) {
                Ok(configured) => DeviceListing::from_cloud(device, supported)
                    .with_lan_ip(configured.lan_ip()),
                Err(_not_configured) => DeviceListing::from_cloud(device, supported),
            }
        })
        .collect();

    match output_format {
        OutputFormat::Pretty => writeln!(out, "{}", DeviceListView::new(&listings, &painter))?,
        OutputFormat::Json => write_json_line(out, &listings)?,
    }
    Ok(())
}
