use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::{info, instrument};

use crate::app::AppContext;
use crate::cli::command::parse_duration;
use crate::cli::ui::{DiscoveredDevice, DiscoveryView, Painter, Spinner};
use crate::cli::{OutputFormat, write_json_line};
use crate::coordinator::DeviceInventory;
use crate::hw::discover;
use crate::terminal::TerminalClient;

/// Arguments for the `discover` command.
#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// How long to listen for answers (e.g. `3s`).
    #[arg(long, value_parser = parse_duration)]
    window: Option<Duration>,
    /// Store the addresses of configured pumps that answered.
    #[arg(long)]
    save: bool,
}

impl DiscoverArgs {
    #[must_use]
    pub fn new(window: Option<Duration>, save: bool) -> Self {
        Self { window, save }
    }
}

#[derive(Debug, Serialize)]
struct DiscoverResult<'a> {
    devices: &'a [DiscoveredDevice],
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<usize>,
}

/// Executes the `discover` command.
#[instrument(
    skip(context, args, out, terminal_client),
    level = "info",
    fields(window = ?args.window, save = args.save)
)]
pub(crate) async fn run<W>(
    context: &mut AppContext,
    args: &DiscoverArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let config = context.discovery_config(args.window);
    let found = Spinner::new(terminal_client.stderr_is_terminal())
        .run("Discovering pumps", discover(&config))
        .await;
    let devices = DiscoveredDevice::collect(&found, context.config().devices());

    let updated = if args.save {
        let mut inventory = DeviceInventory::new(context.config().devices().iter().cloned());
        inventory.apply_discovery(&found);
        let changed = context.config_mut().update_lan_addresses(&inventory);
        if changed > 0 {
            context.save_config()?;
        }
        info!(changed, "updated configured LAN addresses");
        Some(changed)
    } else {
        None
    };

    match output_format {
        OutputFormat::Pretty => {
            writeln!(out, "{}", DiscoveryView::new(&devices, &painter))?;
            if let Some(changed) = updated {
                writeln!(
                    out,
                    "Updated {} LAN address(es) in {}",
                    painter.value(changed.to_string()),
                    context.config_path().display()
                )?;
            }
        }
        OutputFormat::Json => write_json_line(
            out,
            &DiscoverResult {
                devices: &devices,
                updated,
            },
        )?,
    }
    Ok(())
}
