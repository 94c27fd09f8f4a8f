use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::app::AppContext;
use crate::cli::command::parse_duration;
use crate::cli::status::selected_inventory;
use crate::cli::ui::{DeviceStatusLine, Painter, RunSummaryView, StatusReportView};
use crate::cli::{OutputFormat, write_json_line};
use crate::hw::Device;
use crate::terminal::TerminalClient;
use crate::utils::error_chain;

/// Arguments for the `poll` command.
#[derive(Debug, Args)]
pub struct PollArgs {
    /// Time between cycles (e.g. `5s`); defaults to the configured interval.
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,
    /// Stop after this many cycles. If omitted, poll until Ctrl+C.
    #[arg(long)]
    cycles: Option<usize>,
    /// Poll only this device identifier.
    #[arg(long, value_name = "DID")]
    device: Option<String>,
}

impl PollArgs {
    #[must_use]
    pub fn new(interval: Option<Duration>, cycles: Option<usize>) -> Self {
        Self {
            interval,
            cycles,
            device: None,
        }
    }
}

/// Executes the `poll` command.
#[instrument(
    skip(context, args, out, terminal_client),
    level = "debug",
    fields(interval = ?args.interval, cycles = ?args.cycles)
)]
pub(crate) async fn run<W>(
    context: &AppContext,
    args: &PollArgs,
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
    let interval = args.interval.unwrap_or(context.config().poll_interval());

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received");
                cancel.cancel();
            }
        }
    });

    let mut write_error: Option<anyhow::Error> = None;
    let summary = coordinator
        .run(interval, args.cycles, cancel.clone(), |cycle, outcome| {
            if write_error.is_some() {
                return;
            }
            let written = match (output_format, outcome) {
                (OutputFormat::Pretty, Ok(report)) => writeln!(
                    out,
                    "{} {}\n{}\n",
                    painter.heading("Cycle"),
                    painter.value(cycle.to_string()),
                    StatusReportView::new(report, &devices, context.models(), &painter)
                )
                .map_err(anyhow::Error::from),
                (OutputFormat::Pretty, Err(error)) => writeln!(
                    out,
                    "{} {} {}\n",
                    painter.heading("Cycle"),
                    painter.value(cycle.to_string()),
                    painter.failure(error_chain(error))
                )
                .map_err(anyhow::Error::from),
                (OutputFormat::Json, Ok(report)) => write_json_line(
                    out,
                    &DeviceStatusLine::collect(report, &devices, context.models()),
                ),
                (OutputFormat::Json, Err(error)) => write_json_line(
                    out,
                    &serde_json::json!({ "cycle": cycle, "error": error_chain(error) }),
                ),
            };
            if let Err(error) = written {
                write_error = Some(error);
                cancel.cancel();
            }
        })
        .await;
    interrupt.abort();

    if let Some(error) = write_error {
        return Err(error);
    }
    if output_format == OutputFormat::Pretty {
        writeln!(out, "{}", RunSummaryView::new(&summary, &painter))?;
    }
    Ok(())
}
