use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::control::ControlArgs;
use crate::cli::discover::DiscoverArgs;
use crate::cli::poll::PollArgs;
use crate::cli::setup::SetupArgs;
use crate::cli::status::StatusArgs;

/// Command-line options for the Jebao pump client.
#[derive(Debug, Parser)]
#[command(name = "jebao", about = "Monitor and control Jebao aquarium pumps.")]
pub struct Args {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true, value_name = "PATH", env = "JEBAO_CONFIG")]
    config: Option<PathBuf>,
    /// Directory of attribute model JSON files (defaults to `models/` next to the config).
    #[arg(long, global = true, value_name = "DIR", env = "JEBAO_MODELS")]
    models: Option<PathBuf>,
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use jebao::{Args, Command, StatusArgs};
    ///
    /// let devices = Args::new(Command::Devices);
    /// let status = Args::new(Command::Status(StatusArgs::new(None)));
    /// let _ = (devices, status);
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            config: None,
            models: None,
            log_level: None,
            output: None,
            command,
        }
    }

    #[must_use]
    pub fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    #[must_use]
    pub fn models(&self) -> Option<&Path> {
        self.models.as_deref()
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    #[must_use]
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in to the cloud, list bound pumps, find them on the LAN and save the config.
    Setup(SetupArgs),
    /// List the pumps bound to the stored cloud account.
    Devices,
    /// Broadcast a discovery probe and list the pumps that answer.
    Discover(DiscoverArgs),
    /// Poll every configured pump once and print its attributes.
    Status(StatusArgs),
    /// Poll configured pumps repeatedly until interrupted.
    Poll(PollArgs),
    /// Write one attribute through the cloud.
    Control(ControlArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::Devices => "devices",
            Self::Discover(_) => "discover",
            Self::Status(_) => "status",
            Self::Poll(_) => "poll",
            Self::Control(_) => "control",
        }
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables for people.
    Pretty,
    /// JSON documents for scripts.
    Json,
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = Args::try_parse_from([
            "jebao",
            "status",
            "--config",
            "/tmp/jebao.json",
            "--output",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("global flags should parse after the subcommand");

        assert_eq!(Some(Path::new("/tmp/jebao.json")), args.config());
        assert_eq!(Some(OutputFormat::Json), args.output_format());
        assert_eq!(Some(LevelFilter::DEBUG), args.log_level().map(LogLevel::as_level_filter));
        assert_matches!(args.into_command(), Command::Status(_));
    }

    #[test]
    fn subcommand_is_required() {
        let error = Args::try_parse_from(["jebao"]).expect_err("a subcommand is required");
        assert_matches!(
            error.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand | ErrorKind::MissingSubcommand
        );
    }

    #[test]
    fn unknown_output_format_is_rejected() {
        let error = Args::try_parse_from(["jebao", "--output", "yaml", "devices"])
            .expect_err("yaml is not an output format");
        assert_eq!(ErrorKind::InvalidValue, error.kind());
    }

    #[test]
    fn durations_accept_human_units() {
        assert_eq!(Ok(Duration::from_millis(1500)), parse_duration("1s 500ms"));
        assert!(parse_duration("soon").is_err());
    }
}
