use std::io;

use anyhow::Result;
use serde::Serialize;

pub(crate) mod command;
pub(crate) mod control;
pub(crate) mod devices;
pub(crate) mod discover;
pub(crate) mod poll;
pub(crate) mod setup;
pub(crate) mod status;
pub(crate) mod ui;

pub use self::command::{Args, Command, LogLevel, OutputFormat};
pub use self::control::ControlArgs;
pub use self::discover::DiscoverArgs;
pub use self::poll::PollArgs;
pub use self::setup::SetupArgs;
pub use self::status::StatusArgs;

pub(crate) fn write_json_line(out: &mut impl io::Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
