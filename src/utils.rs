use std::error::Error;

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    let mut rendered = String::with_capacity(bytes.len().saturating_mul(3));
    for (index, value) in bytes.iter().enumerate() {
        if index > 0 {
            rendered.push(' ');
        }
        rendered.push_str(&hex::encode_upper([*value]));
    }
    rendered
}

/// Joins an error and its sources into one line.
pub(crate) fn error_chain(error: &dyn Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Formats an optional LAN address for terminal output.
pub(crate) fn format_optional<T: ToString>(value: Option<T>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::FrameCodecError;
    use crate::hw::{LanError, LanPhase};

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[test]
    fn format_hex_formats_uppercase_pairs() {
        assert_eq!("05 00 A1 FF", format_hex(&[0x05, 0x00, 0xA1, 0xFF]));
    }

    #[test]
    fn error_chain_includes_sources() {
        let error = LanError::Protocol(FrameCodecError::VlqUnterminated);
        assert_eq!(
            "malformed frame: length prefix is not terminated",
            error_chain(&error)
        );

        let timeout = LanError::Timeout {
            phase: LanPhase::AwaitPasscode,
        };
        assert_eq!("timed out during await_passcode", error_chain(&timeout));
    }

    #[test]
    fn format_optional_handles_unknown() {
        assert_eq!("-", format_optional(None::<u8>));
        assert_eq!("7", format_optional(Some(7)));
    }
}
