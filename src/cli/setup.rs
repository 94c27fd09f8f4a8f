use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::app::AppContext;
use crate::cli::command::parse_duration;
use crate::cli::ui::{DeviceListView, DeviceListing, Painter, Spinner};
use crate::cli::{OutputFormat, write_json_line};
use crate::coordinator::DeviceInventory;
use crate::error::SetupError;
use crate::hw::{CloudClient, CloudDevice, Device, Region, RetryAdvice, discover};
use crate::terminal::TerminalClient;

/// Extra time allowed past the discovery window before giving up on it.
const DISCOVERY_GRACE: Duration = Duration::from_secs(2);

/// Arguments for the `setup` command.
#[derive(Debug, Args)]
pub struct SetupArgs {
    /// Cloud account (usually an e-mail address).
    #[arg(long, env = "JEBAO_ACCOUNT")]
    account: String,
    /// Cloud password.
    #[arg(long, env = "JEBAO_PASSWORD", hide_env_values = true)]
    password: String,
    /// Cloud region hosting the account.
    #[arg(long, default_value_t = Region::default())]
    region: Region,
    /// Skip LAN discovery; pumps are then polled through the cloud.
    #[arg(long)]
    skip_discovery: bool,
    /// How long to listen for discovery answers (e.g. `3s`).
    #[arg(long, value_parser = parse_duration)]
    window: Option<Duration>,
    /// Static LAN address for a pump, as `DID=IP`. Repeatable; wins over discovery.
    #[arg(long = "lan-ip", value_name = "DID=IP", value_parser = parse_lan_override)]
    lan_ips: Vec<(String, IpAddr)>,
}

impl SetupArgs {
    #[must_use]
    pub fn new(account: impl Into<String>, password: impl Into<String>, region: Region) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
            region,
            skip_discovery: false,
            window: None,
            lan_ips: Vec::new(),
        }
    }

    /// Skips LAN discovery.
    #[must_use]
    pub fn without_discovery(mut self) -> Self {
        self.skip_discovery = true;
        self
    }

    /// Overrides the discovery window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Pins the LAN address of one pump.
    #[must_use]
    pub fn with_lan_ip(mut self, device_id: impl Into<String>, lan_ip: IpAddr) -> Self {
        self.lan_ips.push((device_id.into(), lan_ip));
        self
    }
}

fn parse_lan_override(value: &str) -> Result<(String, IpAddr), String> {
    let (device_id, ip) = value
        .split_once('=')
        .ok_or_else(|| format!("expected DID=IP, got `{value}`"))?;
    let device_id = device_id.trim();
    if device_id.is_empty() {
        return Err(format!("missing device identifier in `{value}`"));
    }
    let ip = ip
        .trim()
        .parse::<IpAddr>()
        .map_err(|error| format!("invalid IP address in `{value}`: {error}"))?;
    Ok((device_id.to_string(), ip))
}

#[derive(Debug, Serialize)]
struct SetupResult {
    config_path: PathBuf,
    region: Region,
    devices: Vec<DeviceListing>,
    unsupported: Vec<DeviceListing>,
}

/// Executes the `setup` command.
#[instrument(
    skip(context, args, out, terminal_client),
    level = "info",
    fields(region = %args.region, skip_discovery = args.skip_discovery)
)]
pub(crate) async fn run<W>(
    context: &mut AppContext,
    args: &SetupArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let spinner = Spinner::new(terminal_client.stderr_is_terminal());
    let cloud = CloudClient::new(context.cloud_endpoints(args.region))?;

    let token = spinner
        .run("Logging in", cloud.login(&args.account, &args.password))
        .await
        .map_err(|error| {
            let advice = error.login_failure().map(|reason| reason.retry_advice());
            match advice {
                Some(RetryAdvice::ReenterCredentials) => {
                    anyhow::Error::from(SetupError::InvalidCredentials(error))
                }
                _ => anyhow::Error::from(error),
            }
        })?;
    let bound = spinner
        .run("Listing devices", cloud.devices())
        .await
        .context("failed to list bound devices")?;

    let bound_count = bound.len();
    let (supported, unsupported) = split_supported(context, bound);
    if supported.is_empty() {
        return Err(SetupError::NoSupportedDevices { bound: bound_count }.into());
    }
    for device in &unsupported {
        warn!(did = %device.did, product_key = %device.product_key, "skipping device without an attribute model");
    }

    let mut inventory = DeviceInventory::new(supported.into_iter().map(CloudDevice::into_device));
    if let Some((device_id, _ip)) = args
        .lan_ips
        .iter()
        .find(|(device_id, _ip)| inventory.get(device_id).is_none())
    {
        return Err(SetupError::UnknownLanOverride {
            device_id: device_id.clone(),
        }
        .into());
    }
    let kept = inventory.apply_discovery(&configured_addresses(context));
    debug!(kept, "carried over configured LAN addresses");

    if !args.skip_discovery {
        let config = context.discovery_config(args.window);
        let bound_window = config.window() + DISCOVERY_GRACE;
        let found = spinner
            .run("Discovering pumps", tokio::time::timeout(bound_window, discover(&config)))
            .await
            .unwrap_or_else(|_elapsed| {
                warn!(window = ?bound_window, "discovery did not finish in time");
                Default::default()
            });
        let located = inventory.apply_discovery(&found);
        info!(located, configured = inventory.len(), "matched discovered pumps");
    }
    for (device_id, lan_ip) in &args.lan_ips {
        inventory.assign_lan_ip(device_id, *lan_ip);
        info!(%device_id, %lan_ip, "using static LAN address");
    }

    let devices: Vec<Device> = inventory.devices().cloned().collect();
    let config = context.config_mut();
    config.set_session(args.region, args.account.clone(), token);
    config.set_devices(devices);
    context
        .save_config()
        .with_context(|| format!("failed to save {}", context.config_path().display()))?;

    let result = SetupResult {
        config_path: context.config_path().to_path_buf(),
        region: args.region,
        devices: context
            .config()
            .devices()
            .iter()
            .map(|device| DeviceListing::from_configured(device, true))
            .collect(),
        unsupported: unsupported
            .iter()
            .map(|device| DeviceListing::from_cloud(device, false))
            .collect(),
    };
    match output_format {
        OutputFormat::Pretty => {
            writeln!(
                out,
                "{} {} {}",
                painter.success("Logged in as"),
                painter.value(&args.account),
                painter.muted(format!("({})", args.region))
            )?;
            writeln!(out, "{}", DeviceListView::new(&result.devices, &painter))?;
            if !result.unsupported.is_empty() {
                writeln!(out, "{}", painter.warning("Skipped without an attribute model:"))?;
                writeln!(out, "{}", DeviceListView::new(&result.unsupported, &painter))?;
            }
            writeln!(
                out,
                "Saved configuration to {}",
                painter.value(result.config_path.display().to_string())
            )?;
        }
        OutputFormat::Json => write_json_line(out, &result)?,
    }
    Ok(())
}

/// LAN addresses already stored for configured devices.
fn configured_addresses(context: &AppContext) -> HashMap<String, IpAddr> {
    context
        .config()
        .devices()
        .iter()
        .filter_map(|device| {
            device
                .lan_ip()
                .map(|lan_ip| (device.device_id().to_string(), lan_ip))
        })
        .collect()
}

fn split_supported(
    context: &AppContext,
    bound: Vec<CloudDevice>,
) -> (Vec<CloudDevice>, Vec<CloudDevice>) {
    bound
        .into_iter()
        .partition(|device| context.models().supports(&device.product_key))
}
