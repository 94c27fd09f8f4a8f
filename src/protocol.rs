use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Marker that opens every LAN frame.
pub const FRAME_MARKER: [u8; 4] = [0x00, 0x00, 0x00, 0x03];

/// TCP port the pumps accept LAN control connections on.
pub const LAN_PORT: u16 = 12416;

/// UDP port the pumps listen on for discovery probes.
pub const DISCOVERY_PORT: u16 = 12414;

/// Fixed discovery probe broadcast to [`DISCOVERY_PORT`].
pub const DISCOVERY_PROBE: [u8; 8] = [0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x00, 0x03];

/// Offset of the device identifier inside a discovery response.
pub const DISCOVERY_DEVICE_ID_OFFSET: usize = 10;

/// Length of the device identifier field inside a discovery response.
pub const DISCOVERY_DEVICE_ID_LEN: usize = 22;

/// Shortest discovery response that carries a whole device identifier.
pub const DISCOVERY_MIN_RESPONSE_LEN: usize = DISCOVERY_DEVICE_ID_OFFSET + DISCOVERY_DEVICE_ID_LEN;

/// Length of the passcode a pump hands out during the LAN handshake.
pub const PASSCODE_LEN: usize = 10;

/// Action byte appended to a status request.
pub(crate) const ACTION_READ_STATUS: u8 = 0x02;

/// Commands used on the LAN control connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum LanCommand {
    /// Ask the device for a login passcode.
    #[strum(to_string = "passcode_request")]
    PasscodeRequest,
    /// Passcode reply carrying a length-prefixed passcode.
    #[strum(to_string = "passcode_response")]
    PasscodeResponse,
    /// Login with the passcode obtained during the handshake.
    #[strum(to_string = "login")]
    Login,
    /// Login acknowledgement whose trailing byte is the result code.
    #[strum(to_string = "login_ack")]
    LoginAck,
    /// Sequence-numbered status read.
    #[strum(to_string = "status_request")]
    StatusRequest,
    /// Reply to a status read, echoing the request sequence.
    #[strum(to_string = "status_response")]
    StatusResponse,
}

impl LanCommand {
    /// Returns the 16-bit wire code for this command.
    ///
    /// ```
    /// use jebao::LanCommand;
    ///
    /// assert_eq!(0x0093, LanCommand::StatusRequest.code());
    /// ```
    #[must_use]
    pub fn code(self) -> u16 {
        command_metadata(self).code
    }

    /// Resolves a wire code into a known command.
    ///
    /// ```
    /// use jebao::LanCommand;
    ///
    /// assert_eq!(Some(LanCommand::LoginAck), LanCommand::from_code(0x0009));
    /// assert_eq!(None, LanCommand::from_code(0x0091));
    /// ```
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        COMMANDS_BY_CODE.get(&code).copied()
    }
}

/// Descriptive metadata for one LAN command.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct CommandMetadata {
    code: u16,
    description: &'static str,
}

impl CommandMetadata {
    /// Human-readable description.
    pub(crate) fn description(self) -> &'static str {
        self.description
    }
}

static COMMANDS_BY_CODE: LazyLock<HashMap<u16, LanCommand>> = LazyLock::new(|| {
    LanCommand::iter()
        .map(|command| (metadata_for(command).code, command))
        .collect()
});

/// Returns metadata for one command.
pub(crate) fn command_metadata(command: LanCommand) -> CommandMetadata {
    metadata_for(command)
}

fn metadata_for(command: LanCommand) -> CommandMetadata {
    match command {
        LanCommand::PasscodeRequest => CommandMetadata {
            code: 0x0006,
            description: "passcode request",
        },
        LanCommand::PasscodeResponse => CommandMetadata {
            code: 0x0007,
            description: "passcode response",
        },
        LanCommand::Login => CommandMetadata {
            code: 0x0008,
            description: "login",
        },
        LanCommand::LoginAck => CommandMetadata {
            code: 0x0009,
            description: "login acknowledgement",
        },
        LanCommand::StatusRequest => CommandMetadata {
            code: 0x0093,
            description: "status request",
        },
        LanCommand::StatusResponse => CommandMetadata {
            code: 0x0094,
            description: "status response",
        },
    }
}
