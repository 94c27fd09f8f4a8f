use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::cli::{Command, LogLevel, OutputFormat};
use crate::config::{Config, resolve_config_path};
use crate::coordinator::{DeviceInventory, UpdateCoordinator};
use crate::error::Error;
use crate::hw::{
    AttributeModelTable, CloudClient, CloudEndpoints, CloudTransport, DiscoveryConfig, LanClient,
    Region,
};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const MODELS_DIR_NAME: &str = "models";

/// Everything a command needs: configuration, attribute models and
/// network endpoints.
///
/// Built once per invocation and passed to the command runners.
#[derive(Debug)]
pub struct AppContext {
    config_path: PathBuf,
    config: Config,
    models: Arc<AttributeModelTable>,
    cloud_endpoints: Option<CloudEndpoints>,
    lan_port: Option<u16>,
    discovery_target: Option<SocketAddr>,
}

impl AppContext {
    /// Creates a context from already-loaded parts.
    #[must_use]
    pub fn new(config_path: PathBuf, config: Config, models: AttributeModelTable) -> Self {
        Self {
            config_path,
            config,
            models: Arc::new(models),
            cloud_endpoints: None,
            lan_port: None,
            discovery_target: None,
        }
    }

    /// Loads the config file and the attribute models.
    ///
    /// Without an explicit directory, models are read from `models/` next
    /// to the config file.
    ///
    /// # Errors
    ///
    /// Returns an error when the config cannot be located or parsed, or the
    /// models directory cannot be read.
    pub fn load(config_path: Option<&Path>, models_dir: Option<&Path>) -> Result<Self, Error> {
        let config_path = resolve_config_path(config_path)?;
        let config = Config::load(&config_path)?;
        let models_dir = match models_dir {
            Some(dir) => dir.to_path_buf(),
            None => config_path
                .parent()
                .map_or_else(|| PathBuf::from(MODELS_DIR_NAME), |dir| dir.join(MODELS_DIR_NAME)),
        };
        let models = AttributeModelTable::load_dir(&models_dir)?;
        Ok(Self::new(config_path, config, models))
    }

    /// Sends cloud requests to `endpoints` instead of the configured region.
    #[must_use]
    pub fn with_cloud_endpoints(mut self, endpoints: CloudEndpoints) -> Self {
        self.cloud_endpoints = Some(endpoints);
        self
    }

    /// Connects to pumps on `port` instead of the standard LAN port.
    #[must_use]
    pub fn with_lan_port(mut self, port: u16) -> Self {
        self.lan_port = Some(port);
        self
    }

    /// Sends discovery probes to `target` instead of the broadcast address.
    #[must_use]
    pub fn with_discovery_target(mut self, target: SocketAddr) -> Self {
        self.discovery_target = Some(target);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    #[must_use]
    pub fn models(&self) -> &Arc<AttributeModelTable> {
        &self.models
    }

    pub(crate) fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub(crate) fn save_config(&self) -> Result<(), Error> {
        self.config.save(&self.config_path)?;
        Ok(())
    }

    pub(crate) fn cloud_endpoints(&self, region: Region) -> CloudEndpoints {
        self.cloud_endpoints
            .clone()
            .unwrap_or_else(|| region.endpoints())
    }

    /// Cloud client for the configured region, carrying the stored token.
    pub(crate) fn cloud_client(&self) -> Result<CloudClient, Error> {
        let client = CloudClient::new(self.cloud_endpoints(self.config.region()))?
            .with_token(self.config.token().map(str::to_string));
        Ok(client)
    }

    pub(crate) fn lan_client(&self) -> LanClient {
        LanClient::new(self.config.lan_config(self.lan_port))
    }

    pub(crate) fn discovery_config(&self, window: Option<Duration>) -> DiscoveryConfig {
        self.config.discovery_config(self.discovery_target, window)
    }

    /// Builds a coordinator over `inventory`; the cloud is used only when a
    /// token is stored.
    pub(crate) fn coordinator(&self, inventory: DeviceInventory) -> Result<UpdateCoordinator, Error> {
        let cloud = match self.config.token() {
            Some(_token) => Some(Arc::new(self.cloud_client()?) as Arc<dyn CloudTransport>),
            None => None,
        };
        Ok(UpdateCoordinator::builder()
            .inventory(Arc::new(RwLock::new(inventory)))
            .models(Arc::clone(&self.models))
            .lan(Arc::new(self.lan_client()))
            .maybe_cloud(cloud)
            .lan_failure_policy(self.config.lan_failure_policy())
            .build())
    }
}

/// Runs one command against the real terminal.
///
/// ```no_run
/// # async fn demo() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = jebao::Args::try_parse_from(["jebao", "status"])?;
/// let context = jebao::AppContext::load(args.config(), args.models())?;
/// let mut out = Vec::new();
/// jebao::run(args.into_command(), context, &mut out, jebao::OutputFormat::Pretty, None).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or
/// output writing fails.
pub async fn run<W>(
    command: Command,
    context: AppContext,
    out: &mut W,
    output_format: OutputFormat,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        context,
        out,
        &SystemTerminalClient,
        output_format,
        log_level,
    )
    .await
}

/// Runs one command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or
/// output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    context: AppContext,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, context, out, terminal_client, output_format, None)
        .await
}

/// Runs one command with an injected terminal client and log level.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or
/// output writing fails.
#[instrument(
    skip(command, context, out, terminal_client),
    level = "debug",
    fields(command = command.name())
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    mut context: AppContext,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "jebao",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Setup(args) => {
            crate::cli::setup::run(&mut context, &args, out, terminal_client, output_format).await
        }
        Command::Devices => {
            crate::cli::devices::run(&context, out, terminal_client, output_format).await
        }
        Command::Discover(args) => {
            crate::cli::discover::run(&mut context, &args, out, terminal_client, output_format)
                .await
        }
        Command::Status(args) => {
            crate::cli::status::run(&context, &args, out, terminal_client, output_format).await
        }
        Command::Poll(args) => {
            crate::cli::poll::run(&context, &args, out, terminal_client, output_format).await
        }
        Command::Control(args) => {
            crate::cli::control::run(&context, &args, out, terminal_client, output_format).await
        }
    }
}
