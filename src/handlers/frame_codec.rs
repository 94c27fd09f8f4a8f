use thiserror::Error;

use crate::protocol::{ACTION_READ_STATUS, FRAME_MARKER, LanCommand, PASSCODE_LEN};

const FLAG_LEN: usize = 1;
const COMMAND_LEN: usize = 2;
const SEQUENCE_LEN: usize = 4;
const ACTION_LEN: usize = 1;
/// Bytes counted by the length field that precede the status attributes.
const STATUS_HEADER_LEN: usize = FLAG_LEN + COMMAND_LEN + SEQUENCE_LEN + ACTION_LEN;
/// Longest accepted length prefix; four groups cover lengths below 2^28.
const MAX_VLQ_BYTES: usize = 4;
const DEFAULT_FLAG: u8 = 0x00;

/// Errors returned by frame encoding and decoding.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameCodecError {
    /// The `00 00 00 03` marker does not occur in the buffer.
    #[error("frame marker was not found in {actual} bytes")]
    MarkerNotFound { actual: usize },
    /// The buffer ended before the length prefix terminated.
    #[error("length prefix is not terminated")]
    VlqUnterminated,
    /// The length prefix kept its continuation bit set for too many bytes.
    #[error("length prefix exceeds {max_bytes} bytes")]
    VlqTooLong { max_bytes: usize },
    /// The declared frame length cannot hold a flag and command.
    #[error("frame declares {declared} bytes, too short for flag and command")]
    FrameTooShort { declared: usize },
    /// The status payload length derived from the frame is not usable.
    #[error(
        "status payload length {payload_len} is invalid for a {available}-byte response (declared length {declared})"
    )]
    InvalidStatusPayloadLength {
        declared: usize,
        payload_len: i64,
        available: usize,
    },
    /// A passcode response did not carry a well-formed passcode.
    #[error("passcode response declares {declared} bytes and carries {actual}")]
    InvalidPasscode { declared: usize, actual: usize },
    /// A login acknowledgement had no result byte.
    #[error("login acknowledgement carried no result byte")]
    EmptyLoginAck,
}

/// One decoded LAN frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    flag: u8,
    command: u16,
    payload: Vec<u8>,
    raw: Vec<u8>,
}

impl Frame {
    /// Returns the flag byte.
    #[must_use]
    pub fn flag(&self) -> u8 {
        self.flag
    }

    /// Returns the raw 16-bit command code.
    #[must_use]
    pub fn command(&self) -> u16 {
        self.command
    }

    /// Returns the command if it is one this client knows.
    #[must_use]
    pub fn known_command(&self) -> Option<LanCommand> {
        LanCommand::from_code(self.command)
    }

    /// Returns whether the frame carries `command`.
    #[must_use]
    pub fn is(&self, command: LanCommand) -> bool {
        self.command == command.code()
    }

    /// Returns the bytes following the command field.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the frame exactly as it appeared on the wire.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Returns the sequence number of a status frame.
    ///
    /// ```
    /// use jebao::{FrameCodec, LanCommand};
    ///
    /// let bytes = FrameCodec::encode_status_request(7);
    /// let (frame, _) = FrameCodec::decode_frame(&bytes)?.expect("complete frame");
    /// assert_eq!(Some(7), frame.sequence());
    /// assert!(frame.is(LanCommand::StatusRequest));
    /// # Ok::<(), jebao::FrameCodecError>(())
    /// ```
    #[must_use]
    pub fn sequence(&self) -> Option<u32> {
        let bytes: [u8; SEQUENCE_LEN] = self.payload.get(..SEQUENCE_LEN)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

/// Encodes and decodes LAN control frames.
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes `value` as a little-endian base-128 length.
    ///
    /// ```
    /// use jebao::FrameCodec;
    ///
    /// assert_eq!(vec![0x05], FrameCodec::encode_vlq(5));
    /// assert_eq!(vec![0x82, 0x01], FrameCodec::encode_vlq(130));
    /// ```
    #[must_use]
    pub fn encode_vlq(mut value: usize) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(MAX_VLQ_BYTES);
        loop {
            let group = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                encoded.push(group);
                return encoded;
            }
            encoded.push(group | 0x80);
        }
    }

    /// Decodes a base-128 length, returning the value and the bytes consumed.
    ///
    /// Returns `None` when no terminating byte appears within the buffer (or
    /// within the four-byte limit).
    ///
    /// ```
    /// use jebao::FrameCodec;
    ///
    /// assert_eq!(Some((130, 2)), FrameCodec::decode_vlq(&[0x82, 0x01, 0xFF]));
    /// assert_eq!(None, FrameCodec::decode_vlq(&[0x82]));
    /// ```
    #[must_use]
    pub fn decode_vlq(bytes: &[u8]) -> Option<(usize, usize)> {
        let mut value = 0usize;
        for (index, byte) in bytes.iter().take(MAX_VLQ_BYTES).enumerate() {
            value |= usize::from(byte & 0x7F) << (7 * index);
            if byte & 0x80 == 0 {
                return Some((value, index + 1));
            }
        }
        None
    }

    /// Encodes one frame: marker, length, flag, command, payload.
    ///
    /// Devices only ever exchange frames whose length fits in one prefix
    /// byte, but longer payloads are encoded with a multi-byte prefix.
    ///
    /// ```
    /// use jebao::FrameCodec;
    ///
    /// let frame = FrameCodec::encode_frame(0x0006, &[]);
    /// assert_eq!(vec![0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x00, 0x06], frame);
    /// ```
    #[must_use]
    pub fn encode_frame(command: u16, payload: &[u8]) -> Vec<u8> {
        let body_len = FLAG_LEN + COMMAND_LEN + payload.len();
        let length = Self::encode_vlq(body_len);

        let mut frame = Vec::with_capacity(FRAME_MARKER.len() + length.len() + body_len);
        frame.extend_from_slice(&FRAME_MARKER);
        frame.extend_from_slice(&length);
        frame.push(DEFAULT_FLAG);
        frame.extend_from_slice(&command.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Encodes a command without payload.
    #[must_use]
    pub fn encode_command(command: LanCommand) -> Vec<u8> {
        Self::encode_frame(command.code(), &[])
    }

    /// Encodes a login carrying the length-prefixed passcode.
    #[must_use]
    pub fn encode_login(passcode: &[u8; PASSCODE_LEN]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + PASSCODE_LEN);
        payload.extend_from_slice(&(PASSCODE_LEN as u16).to_be_bytes());
        payload.extend_from_slice(passcode);
        Self::encode_frame(LanCommand::Login.code(), &payload)
    }

    /// Encodes a status read for `sequence`.
    ///
    /// ```
    /// use jebao::FrameCodec;
    ///
    /// let frame = FrameCodec::encode_status_request(2);
    /// assert_eq!(
    ///     vec![0x00, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x93, 0x00, 0x00, 0x00, 0x02, 0x02],
    ///     frame
    /// );
    /// ```
    #[must_use]
    pub fn encode_status_request(sequence: u32) -> Vec<u8> {
        let mut payload = Vec::with_capacity(SEQUENCE_LEN + ACTION_LEN);
        payload.extend_from_slice(&sequence.to_be_bytes());
        payload.push(ACTION_READ_STATUS);
        Self::encode_frame(LanCommand::StatusRequest.code(), &payload)
    }

    /// Returns the offset of the first frame marker in `buffer`.
    #[must_use]
    pub fn find_marker(buffer: &[u8]) -> Option<usize> {
        buffer
            .windows(FRAME_MARKER.len())
            .position(|window| window == FRAME_MARKER)
    }

    /// Decodes the frame at the start of `buffer`.
    ///
    /// Returns `Ok(None)` while the buffer holds only part of a frame, and the
    /// decoded frame with its total length otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error when the buffer does not start with the marker, the
    /// length prefix is over-long, or the declared length cannot hold a
    /// flag and command.
    ///
    /// ```
    /// use jebao::FrameCodec;
    ///
    /// let bytes = FrameCodec::encode_frame(0x0009, &[0x00]);
    /// let (frame, consumed) = FrameCodec::decode_frame(&bytes)?.expect("complete frame");
    /// assert_eq!(0x0009, frame.command());
    /// assert_eq!(&[0x00], frame.payload());
    /// assert_eq!(bytes.len(), consumed);
    ///
    /// assert_eq!(None, FrameCodec::decode_frame(&bytes[..6])?);
    /// # Ok::<(), jebao::FrameCodecError>(())
    /// ```
    pub fn decode_frame(buffer: &[u8]) -> Result<Option<(Frame, usize)>, FrameCodecError> {
        if buffer.len() < FRAME_MARKER.len() {
            return Ok(None);
        }
        if buffer[..FRAME_MARKER.len()] != FRAME_MARKER {
            return Err(FrameCodecError::MarkerNotFound {
                actual: buffer.len(),
            });
        }

        let after_marker = &buffer[FRAME_MARKER.len()..];
        let Some((declared, prefix_len)) = Self::decode_vlq(after_marker) else {
            if after_marker.len() >= MAX_VLQ_BYTES {
                return Err(FrameCodecError::VlqTooLong {
                    max_bytes: MAX_VLQ_BYTES,
                });
            }
            return Ok(None);
        };
        if declared < FLAG_LEN + COMMAND_LEN {
            return Err(FrameCodecError::FrameTooShort { declared });
        }

        let body_start = FRAME_MARKER.len() + prefix_len;
        let frame_len = body_start + declared;
        if buffer.len() < frame_len {
            return Ok(None);
        }

        let body = &buffer[body_start..frame_len];
        let frame = Frame {
            flag: body[0],
            command: u16::from_be_bytes([body[1], body[2]]),
            payload: body[FLAG_LEN + COMMAND_LEN..].to_vec(),
            raw: buffer[..frame_len].to_vec(),
        };
        Ok(Some((frame, frame_len)))
    }

    /// Locates a status response in `response` and returns its attribute bytes.
    ///
    /// The payload length is the declared frame length minus the flag,
    /// command, sequence and action bytes; the payload is the trailing
    /// bytes of the response.
    ///
    /// # Errors
    ///
    /// Returns an error when the marker or length prefix is missing, or the
    /// derived payload length is not positive or exceeds the response.
    ///
    /// ```
    /// use jebao::FrameCodec;
    ///
    /// let response = [0x00, 0x00, 0x00, 0x03, 0x0A, 0x00, 0x00, 0x94, 0x00, 0x00, 0x00, 0x01, 0x03, 0xAB, 0xCD];
    /// assert_eq!(&[0xAB, 0xCD], FrameCodec::extract_status_payload(&response)?);
    /// # Ok::<(), jebao::FrameCodecError>(())
    /// ```
    pub fn extract_status_payload(response: &[u8]) -> Result<&[u8], FrameCodecError> {
        let start = Self::find_marker(response).ok_or(FrameCodecError::MarkerNotFound {
            actual: response.len(),
        })?;
        let (declared, _prefix_len) =
            Self::decode_vlq(&response[start + FRAME_MARKER.len()..])
                .ok_or(FrameCodecError::VlqUnterminated)?;

        let payload_len = declared as i64 - STATUS_HEADER_LEN as i64;
        if payload_len <= 0 || payload_len as usize > response.len() {
            return Err(FrameCodecError::InvalidStatusPayloadLength {
                declared,
                payload_len,
                available: response.len(),
            });
        }

        Ok(&response[response.len() - payload_len as usize..])
    }

    /// Reads the passcode out of a passcode response.
    ///
    /// # Errors
    ///
    /// Returns an error unless the payload is a two-byte length followed by
    /// exactly that many passcode bytes, and that length is the protocol's
    /// passcode length.
    pub fn parse_passcode(frame: &Frame) -> Result<[u8; PASSCODE_LEN], FrameCodecError> {
        let payload = frame.payload();
        let (prefix, passcode) = payload.split_at_checked(2).ok_or(
            FrameCodecError::InvalidPasscode {
                declared: 0,
                actual: payload.len(),
            },
        )?;
        let declared = usize::from(u16::from_be_bytes([prefix[0], prefix[1]]));
        let invalid = FrameCodecError::InvalidPasscode {
            declared,
            actual: passcode.len(),
        };
        if declared != passcode.len() {
            return Err(invalid);
        }
        passcode.try_into().map_err(|_length| invalid)
    }

    /// Reads the result byte of a login acknowledgement; zero is success.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement carries no payload.
    pub fn parse_login_result(frame: &Frame) -> Result<u8, FrameCodecError> {
        frame
            .payload()
            .last()
            .copied()
            .ok_or(FrameCodecError::EmptyLoginAck)
    }
}
