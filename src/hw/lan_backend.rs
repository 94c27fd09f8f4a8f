use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use strum_macros::Display;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, instrument, trace};

use super::attribute_model::AttributeModel;
use super::model::{AttributeMap, DeviceStatusSnapshot, StatusSourceKind};
use crate::handlers::{
    AttributeCodec, AttributeCodecError, Frame, FrameCodec, FrameCodecError, SequenceCounter,
};
use crate::protocol::{FRAME_MARKER, LAN_PORT, LanCommand, command_metadata};
use crate::utils::format_hex;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK_LEN: usize = 512;

/// Steps of one LAN status poll, in order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LanPhase {
    Connect,
    AwaitPasscode,
    SendLogin,
    AwaitLoginAck,
    SendStatusRequest,
    AwaitStatusResponse,
}

/// Errors returned by one LAN status poll.
#[derive(Debug, Error)]
pub enum LanError {
    #[error("failed to connect to {addr}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("timed out connecting to {addr}")]
    ConnectTimeout { addr: SocketAddr },
    #[error("timed out during {phase}")]
    Timeout { phase: LanPhase },
    #[error("device closed the connection during {phase}")]
    ConnectionClosed { phase: LanPhase },
    #[error("socket error during {phase}")]
    Io {
        phase: LanPhase,
        source: std::io::Error,
    },
    #[error("malformed frame")]
    Protocol(#[from] FrameCodecError),
    #[error("device rejected the login with status {status}")]
    LoginRejected { status: u8 },
    #[error("failed to decode the status payload")]
    Codec(#[from] AttributeCodecError),
}

impl LanError {
    /// Returns whether the failure is an authentication rejection.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::LoginRejected { .. })
    }

    /// Returns the phase a timeout or connection failure occurred in.
    #[must_use]
    pub fn phase(&self) -> Option<LanPhase> {
        match self {
            Self::Connect { .. } | Self::ConnectTimeout { .. } => Some(LanPhase::Connect),
            Self::Timeout { phase } | Self::ConnectionClosed { phase } | Self::Io { phase, .. } => {
                Some(*phase)
            }
            Self::Protocol(_) | Self::LoginRejected { .. } | Self::Codec(_) => None,
        }
    }
}

/// Timeouts and port used by [`LanClient`].
#[derive(Debug, Clone, Builder)]
pub struct LanConfig {
    #[builder(default = LAN_PORT)]
    port: u16,
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    #[builder(default = DEFAULT_PHASE_TIMEOUT)]
    phase_timeout: Duration,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl LanConfig {
    /// Returns the device TCP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the bound on establishing the TCP connection.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the bound on each read phase.
    #[must_use]
    pub fn phase_timeout(&self) -> Duration {
        self.phase_timeout
    }
}

/// Polls device status over the local network.
#[async_trait]
pub trait LanTransport: Send + Sync {
    /// Runs one full handshake and status read against the device at `ip`.
    async fn poll_status(
        &self,
        device_id: &str,
        ip: IpAddr,
        model: &AttributeModel,
    ) -> Result<DeviceStatusSnapshot, LanError>;
}

/// TCP client for the pump LAN protocol.
///
/// Each device gets its own sequence counter behind a lock that is held for
/// a whole poll, so overlapping polls of one device run one after another.
#[derive(Debug, Default)]
pub struct LanClient {
    config: LanConfig,
    sequences: Mutex<HashMap<String, Arc<Mutex<SequenceCounter>>>>,
}

impl LanClient {
    /// Creates a client with explicit settings.
    #[must_use]
    pub fn new(config: LanConfig) -> Self {
        Self {
            config,
            sequences: Mutex::default(),
        }
    }

    /// Returns the client settings.
    #[must_use]
    pub fn config(&self) -> &LanConfig {
        &self.config
    }

    /// Runs one poll cycle: connect, passcode, login, status read.
    ///
    /// The connection is shut down on every exit path.
    ///
    /// # Errors
    ///
    /// Returns a distinct error per failure: connection, per-phase timeout,
    /// closed connection, malformed frame, login rejection, or payload decode.
    #[instrument(skip(self, model), level = "debug", fields(product_key = %model.product_key))]
    pub async fn poll(
        &self,
        device_id: &str,
        ip: IpAddr,
        model: &AttributeModel,
    ) -> Result<DeviceStatusSnapshot, LanError> {
        let counter = self.device_sequence(device_id).await;
        let mut sequence = counter.lock().await;

        let addr = SocketAddr::new(ip, self.config.port);
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(LanError::Connect { addr, source }),
            Err(_elapsed) => return Err(LanError::ConnectTimeout { addr }),
        };
        debug!(%addr, "connected");

        let mut session = LanSession::new(stream, self.config.phase_timeout);
        let result = session.exchange(&mut sequence, model).await;
        session.close().await;

        let attributes = result?;
        Ok(DeviceStatusSnapshot::fresh(
            device_id,
            attributes,
            StatusSourceKind::Lan,
        ))
    }

    async fn device_sequence(&self, device_id: &str) -> Arc<Mutex<SequenceCounter>> {
        let mut sequences = self.sequences.lock().await;
        Arc::clone(sequences.entry(device_id.to_string()).or_default())
    }
}

#[async_trait]
impl LanTransport for LanClient {
    async fn poll_status(
        &self,
        device_id: &str,
        ip: IpAddr,
        model: &AttributeModel,
    ) -> Result<DeviceStatusSnapshot, LanError> {
        self.poll(device_id, ip, model).await
    }
}

/// One open connection plus its receive buffer.
struct LanSession {
    stream: TcpStream,
    buffer: Vec<u8>,
    phase_timeout: Duration,
}

impl LanSession {
    fn new(stream: TcpStream, phase_timeout: Duration) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK_LEN),
            phase_timeout,
        }
    }

    async fn exchange(
        &mut self,
        sequence: &mut SequenceCounter,
        model: &AttributeModel,
    ) -> Result<AttributeMap, LanError> {
        self.send(
            LanPhase::AwaitPasscode,
            LanCommand::PasscodeRequest,
            &FrameCodec::encode_command(LanCommand::PasscodeRequest),
        )
        .await?;
        let mut passcode = None;
        self.read_until(LanPhase::AwaitPasscode, |frame| {
            if !frame.is(LanCommand::PasscodeResponse) {
                return false;
            }
            match FrameCodec::parse_passcode(frame) {
                Ok(parsed) => {
                    passcode = Some(parsed);
                    true
                }
                Err(error) => {
                    trace!(%error, "ignoring malformed passcode response");
                    false
                }
            }
        })
        .await?;
        let Some(passcode) = passcode else {
            return Err(LanError::Timeout {
                phase: LanPhase::AwaitPasscode,
            });
        };

        self.send(
            LanPhase::SendLogin,
            LanCommand::Login,
            &FrameCodec::encode_login(&passcode),
        )
        .await?;
        let ack = self
            .read_until(LanPhase::AwaitLoginAck, |frame| frame.is(LanCommand::LoginAck))
            .await?;
        let status = FrameCodec::parse_login_result(&ack)?;
        if status != 0 {
            return Err(LanError::LoginRejected { status });
        }

        let expected = sequence.next_sequence();
        self.send(
            LanPhase::SendStatusRequest,
            LanCommand::StatusRequest,
            &FrameCodec::encode_status_request(expected),
        )
        .await?;
        let response = self
            .read_until(LanPhase::AwaitStatusResponse, |frame| {
                frame.is(LanCommand::StatusResponse) && frame.sequence() == Some(expected)
            })
            .await?;

        let payload = FrameCodec::extract_status_payload(response.raw())?;
        debug!(sequence = expected, payload = %format_hex(payload), "status payload");
        Ok(AttributeCodec::decode(model, payload)?)
    }

    async fn send(
        &mut self,
        phase: LanPhase,
        command: LanCommand,
        bytes: &[u8],
    ) -> Result<(), LanError> {
        trace!(
            command = command_metadata(command).description(),
            bytes = %format_hex(bytes),
            "sending frame"
        );
        let deadline = Instant::now() + self.phase_timeout;
        match timeout_at(deadline, self.stream.write_all(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(LanError::Io { phase, source }),
            Err(_elapsed) => Err(LanError::Timeout { phase }),
        }
    }

    /// Reads frames until `accept` returns true, discarding the rest.
    async fn read_until<F>(&mut self, phase: LanPhase, mut accept: F) -> Result<Frame, LanError>
    where
        F: FnMut(&Frame) -> bool,
    {
        let deadline = Instant::now() + self.phase_timeout;
        loop {
            while let Some(frame) = self.next_buffered_frame()? {
                if accept(&frame) {
                    return Ok(frame);
                }
                trace!(
                    %phase,
                    command = format!("{:#06x}", frame.command()),
                    sequence = ?frame.sequence(),
                    "discarding unmatched frame"
                );
            }

            let mut chunk = [0u8; READ_CHUNK_LEN];
            let read = match timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(LanError::ConnectionClosed { phase }),
                Ok(Ok(read)) => read,
                Ok(Err(source)) => return Err(LanError::Io { phase, source }),
                Err(_elapsed) => return Err(LanError::Timeout { phase }),
            };
            trace!(%phase, bytes = %format_hex(&chunk[..read]), "received");
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn next_buffered_frame(&mut self) -> Result<Option<Frame>, FrameCodecError> {
        let Some(start) = FrameCodec::find_marker(&self.buffer) else {
            // A marker may be split across reads; keep a possible prefix of it.
            let discard = self.buffer.len().saturating_sub(FRAME_MARKER.len() - 1);
            self.buffer.drain(..discard);
            return Ok(None);
        };
        self.buffer.drain(..start);

        match FrameCodec::decode_frame(&self.buffer)? {
            Some((frame, consumed)) => {
                self.buffer.drain(..consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    async fn close(mut self) {
        if let Err(error) = self.stream.shutdown().await {
            trace!(%error, "connection shutdown failed");
        }
    }
}
