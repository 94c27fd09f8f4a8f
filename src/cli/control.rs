use std::io;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::app::AppContext;
use crate::cli::ui::{Painter, Spinner};
use crate::cli::{OutputFormat, write_json_line};
use crate::error::ControlError;
use crate::hw::{AttributeDescriptor, AttributeValue, DataType};
use crate::terminal::TerminalClient;

/// Arguments for the `control` command.
#[derive(Debug, Args)]
pub struct ControlArgs {
    /// Device identifier.
    did: String,
    /// Attribute name as declared in the product's attribute model.
    attribute: String,
    /// New value: `on`/`off` for switches, a label or index for enums,
    /// a number for `uint8` and hexadecimal bytes for binary attributes.
    value: String,
}

impl ControlArgs {
    #[must_use]
    pub fn new(
        did: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            did: did.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ControlResult<'a> {
    did: &'a str,
    attribute: &'a str,
    value: &'a Value,
}

/// Executes the `control` command.
///
/// The value is checked against the attribute model before anything is sent.
#[instrument(
    skip(context, args, out, terminal_client),
    level = "info",
    fields(did = %args.did, attribute = %args.attribute, ?output_format)
)]
pub(crate) async fn run<W>(
    context: &AppContext,
    args: &ControlArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let device = context.config().device(&args.did)?;
    let model = context
        .models()
        .get(device.product_key())
        .ok_or_else(|| ControlError::UnknownProduct {
            product_key: device.product_key().to_string(),
        })?;
    let descriptor =
        model
            .attribute(&args.attribute)
            .ok_or_else(|| ControlError::UnknownAttribute {
                product_key: model.product_key.clone(),
                attribute: args.attribute.clone(),
            })?;
    if !descriptor.is_writable() {
        return Err(ControlError::NotWritable {
            attribute: descriptor.name.clone(),
        }
        .into());
    }
    let value = parse_value(descriptor, &args.value)?;
    let wire_value = value.to_json(descriptor);

    let cloud = context.cloud_client()?;
    let attributes = Map::from_iter([(descriptor.name.clone(), wire_value.clone())]);
    Spinner::new(terminal_client.stderr_is_terminal())
        .run("Sending control", cloud.control(device.device_id(), attributes))
        .await
        .with_context(|| format!("failed to control {}", device.display_name()))?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "Set {} on {} to {}",
                descriptor.label(),
                device.display_name(),
                painter.value(value.render(descriptor))
            )?;
        }
        OutputFormat::Json => write_json_line(
            out,
            &ControlResult {
                did: device.device_id(),
                attribute: &descriptor.name,
                value: &wire_value,
            },
        )?,
    }
    Ok(())
}

/// Parses a command-line value according to the attribute's data type.
pub(crate) fn parse_value(
    descriptor: &AttributeDescriptor,
    raw: &str,
) -> Result<AttributeValue, ControlError> {
    let invalid = || ControlError::InvalidValue {
        attribute: descriptor.name.clone(),
        value: raw.to_string(),
        expected: descriptor.data_type,
    };
    let trimmed = raw.trim();
    match descriptor.data_type {
        DataType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(AttributeValue::Bool(true)),
            "off" | "false" | "0" => Ok(AttributeValue::Bool(false)),
            _ => Err(invalid()),
        },
        DataType::Enum => {
            if let Some(index) = descriptor
                .enum_values
                .iter()
                .position(|label| label.eq_ignore_ascii_case(trimmed))
            {
                return u16::try_from(index)
                    .map(AttributeValue::Enum)
                    .map_err(|_overflow| invalid());
            }
            let index: u16 = trimmed.parse().map_err(|_error| invalid())?;
            if usize::from(index) >= descriptor.enum_values.len() {
                return Err(invalid());
            }
            Ok(AttributeValue::Enum(index))
        }
        DataType::Uint8 => {
            let number: i64 = trimmed.parse().map_err(|_error| invalid())?;
            let (min, max) = descriptor
                .writable_range
                .map_or((0, i64::from(u8::MAX)), |range| (range.min, range.max));
            if !(min..=max).contains(&number) {
                return Err(ControlError::OutOfRange {
                    attribute: descriptor.name.clone(),
                    value: number,
                    min,
                    max,
                });
            }
            u8::try_from(number)
                .map(AttributeValue::UInt8)
                .map_err(|_overflow| ControlError::OutOfRange {
                    attribute: descriptor.name.clone(),
                    value: number,
                    min: 0,
                    max: i64::from(u8::MAX),
                })
        }
        DataType::Binary => hex::decode(trimmed.replace(' ', ""))
            .map(AttributeValue::Binary)
            .map_err(|_error| invalid()),
    }
}
