use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use bon::Builder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::handlers::{Frame, FrameCodec};
use crate::protocol::{
    DISCOVERY_DEVICE_ID_LEN, DISCOVERY_DEVICE_ID_OFFSET, DISCOVERY_PROBE, LanCommand,
    PASSCODE_LEN,
};

const DEFAULT_PASSCODE: [u8; PASSCODE_LEN] = *b"0123456789";
const ACTION_STATUS_REPLY: u8 = 0x03;
/// Spontaneous status report a pump pushes when its state changes.
const COMMAND_STATUS_REPORT: u16 = 0x0091;
const COMMAND_DISCOVERY_REPLY: u16 = 0x0004;

/// Misbehaviour injected into a fake pump.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum FakePumpFault {
    #[default]
    None,
    /// Never answer the passcode request.
    SilentPasscode,
    /// Drop the connection instead of acknowledging the login.
    CloseBeforeLoginAck,
    /// Never answer the status request.
    SilentStatus,
}

/// Settings for a [`FakePump`].
#[derive(Debug, Clone, Builder)]
pub struct FakePumpConfig {
    #[builder(default = DEFAULT_PASSCODE)]
    passcode: [u8; PASSCODE_LEN],
    /// Result byte sent in the login acknowledgement.
    #[builder(default)]
    login_status: u8,
    /// Attribute bytes returned in status responses.
    #[builder(default)]
    status_payload: Vec<u8>,
    /// Sends a spontaneous report and a stale-sequence response before the real one.
    #[builder(default)]
    unsolicited_before_status: bool,
    /// Writes every reply one byte at a time.
    #[builder(default)]
    byte_by_byte: bool,
    #[builder(default)]
    status_delay: Duration,
    #[builder(default)]
    fault: FakePumpFault,
}

#[derive(Debug, Default)]
struct FakePumpStats {
    connections: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    status_requests: AtomicUsize,
    last_sequence: AtomicU32,
}

/// In-process pump speaking the LAN protocol on `127.0.0.1`.
///
/// The listener stops when the value is dropped.
#[derive(Debug)]
pub struct FakePump {
    addr: SocketAddr,
    stats: Arc<FakePumpStats>,
    task: JoinHandle<()>,
}

impl FakePump {
    /// Binds an ephemeral port and starts answering connections.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener cannot be bound.
    pub async fn spawn(config: FakePumpConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let stats = Arc::new(FakePumpStats::default());
        let task = tokio::spawn(accept_loop(listener, Arc::new(config), Arc::clone(&stats)));
        debug!(%addr, "fake pump listening");
        Ok(Self { addr, stats, task })
    }

    /// Returns the bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the number of accepted connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.stats.connections.load(Ordering::SeqCst)
    }

    /// Returns the highest number of simultaneously open connections.
    #[must_use]
    pub fn max_concurrent_connections(&self) -> usize {
        self.stats.max_active.load(Ordering::SeqCst)
    }

    /// Returns the number of status requests received.
    #[must_use]
    pub fn status_requests(&self) -> usize {
        self.stats.status_requests.load(Ordering::SeqCst)
    }

    /// Returns the sequence number of the latest status request.
    #[must_use]
    pub fn last_sequence(&self) -> Option<u32> {
        Some(self.stats.last_sequence.load(Ordering::SeqCst)).filter(|sequence| *sequence != 0)
    }
}

impl Drop for FakePump {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, config: Arc<FakePumpConfig>, stats: Arc<FakePumpStats>) {
    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            return;
        };
        trace!(%peer, "fake pump accepted connection");
        tokio::spawn(serve_connection(
            stream,
            Arc::clone(&config),
            Arc::clone(&stats),
        ));
    }
}

async fn serve_connection(mut stream: TcpStream, config: Arc<FakePumpConfig>, stats: Arc<FakePumpStats>) {
    stats.connections.fetch_add(1, Ordering::SeqCst);
    let active = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
    stats.max_active.fetch_max(active, Ordering::SeqCst);

    if let Err(error) = serve_frames(&mut stream, &config, &stats).await {
        trace!(%error, "fake pump connection ended with an error");
    }

    stats.active.fetch_sub(1, Ordering::SeqCst);
}

enum Flow {
    Continue,
    Close,
}

async fn serve_frames(
    stream: &mut TcpStream,
    config: &FakePumpConfig,
    stats: &FakePumpStats,
) -> io::Result<()> {
    let mut buffer = Vec::new();
    loop {
        while let Some(start) = FrameCodec::find_marker(&buffer) {
            buffer.drain(..start);
            let Ok(Some((frame, consumed))) = FrameCodec::decode_frame(&buffer) else {
                break;
            };
            buffer.drain(..consumed);
            if let Flow::Close = respond(stream, &frame, config, stats).await? {
                return Ok(());
            }
        }

        let mut chunk = [0u8; 256];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

async fn respond(
    stream: &mut TcpStream,
    frame: &Frame,
    config: &FakePumpConfig,
    stats: &FakePumpStats,
) -> io::Result<Flow> {
    match frame.known_command() {
        Some(LanCommand::PasscodeRequest) => {
            if config.fault == FakePumpFault::SilentPasscode {
                return Ok(Flow::Continue);
            }
            let mut payload = (PASSCODE_LEN as u16).to_be_bytes().to_vec();
            payload.extend_from_slice(&config.passcode);
            let reply = FrameCodec::encode_frame(LanCommand::PasscodeResponse.code(), &payload);
            write(stream, &reply, config.byte_by_byte).await?;
        }
        Some(LanCommand::Login) => {
            if config.fault == FakePumpFault::CloseBeforeLoginAck {
                return Ok(Flow::Close);
            }
            let status = if frame.payload().get(2..) == Some(config.passcode.as_slice()) {
                config.login_status
            } else {
                1
            };
            let reply = FrameCodec::encode_frame(LanCommand::LoginAck.code(), &[status]);
            write(stream, &reply, config.byte_by_byte).await?;
        }
        Some(LanCommand::StatusRequest) => {
            let sequence = frame.sequence().unwrap_or_default();
            stats.status_requests.fetch_add(1, Ordering::SeqCst);
            stats.last_sequence.store(sequence, Ordering::SeqCst);
            if config.fault == FakePumpFault::SilentStatus {
                return Ok(Flow::Continue);
            }
            if !config.status_delay.is_zero() {
                sleep(config.status_delay).await;
            }

            let mut replies = Vec::new();
            if config.unsolicited_before_status {
                let noise = vec![0xFF; config.status_payload.len().max(1)];
                replies.extend(FrameCodec::encode_frame(
                    COMMAND_STATUS_REPORT,
                    &status_body(0, &noise),
                ));
                replies.extend(FrameCodec::encode_frame(
                    LanCommand::StatusResponse.code(),
                    &status_body(sequence.wrapping_sub(1), &noise),
                ));
            }
            replies.extend(FrameCodec::encode_frame(
                LanCommand::StatusResponse.code(),
                &status_body(sequence, &config.status_payload),
            ));
            write(stream, &replies, config.byte_by_byte).await?;
        }
        _ => trace!(command = frame.command(), "fake pump ignoring frame"),
    }
    Ok(Flow::Continue)
}

fn status_body(sequence: u32, attributes: &[u8]) -> Vec<u8> {
    let mut body = sequence.to_be_bytes().to_vec();
    body.push(ACTION_STATUS_REPLY);
    body.extend_from_slice(attributes);
    body
}

async fn write(stream: &mut TcpStream, bytes: &[u8], byte_by_byte: bool) -> io::Result<()> {
    if !byte_by_byte {
        return stream.write_all(bytes).await;
    }
    for byte in bytes {
        stream.write_all(std::slice::from_ref(byte)).await?;
        stream.flush().await?;
        tokio::task::yield_now().await;
    }
    Ok(())
}

/// Builds a discovery response datagram announcing `device_id`.
///
/// ```
/// let datagram = jebao::discovery_response("did-1");
/// assert_eq!(b"did-1", &datagram[10..15]);
/// ```
#[must_use]
pub fn discovery_response(device_id: &str) -> Vec<u8> {
    // Header plus the two-byte length prefix end exactly at the identifier offset.
    let mut datagram = FrameCodec::encode_frame(COMMAND_DISCOVERY_REPLY, &[]);
    datagram.extend_from_slice(&(DISCOVERY_DEVICE_ID_LEN as u16).to_be_bytes());
    debug_assert_eq!(DISCOVERY_DEVICE_ID_OFFSET, datagram.len());

    let mut body = Vec::new();
    let mut id_field = [0u8; DISCOVERY_DEVICE_ID_LEN];
    let id_bytes = device_id.as_bytes();
    let copied = id_bytes.len().min(DISCOVERY_DEVICE_ID_LEN);
    id_field[..copied].copy_from_slice(&id_bytes[..copied]);
    body.extend_from_slice(&id_field);
    body.extend_from_slice(&[0x00, 0x20]);
    body.extend_from_slice(&[0u8; 32]);

    datagram[4] = u8::try_from(datagram.len() - 5 + body.len()).unwrap_or(u8::MAX);
    datagram.extend_from_slice(&body);
    datagram
}

/// UDP responder that answers discovery probes with canned datagrams.
#[derive(Debug)]
pub struct FakeDiscoveryResponder {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl FakeDiscoveryResponder {
    /// Binds an ephemeral UDP port on `127.0.0.1`.
    ///
    /// Every datagram in `replies` is sent back, in order, for each probe.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket cannot be bound.
    pub async fn spawn(replies: Vec<Vec<u8>>) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = socket.local_addr()?;
        let task = tokio::spawn(async move {
            let mut probe = [0u8; 64];
            loop {
                let Ok((read, peer)) = socket.recv_from(&mut probe).await else {
                    return;
                };
                if probe[..read] != DISCOVERY_PROBE {
                    continue;
                }
                for reply in &replies {
                    if socket.send_to(reply, peer).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(Self { addr, task })
    }

    /// Returns the bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for FakeDiscoveryResponder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::protocol::DISCOVERY_MIN_RESPONSE_LEN;

    #[test]
    fn discovery_response_places_id_at_fixed_offset() {
        let datagram = discovery_response("abcdefghijklmnopqrstuv-extra");

        assert!(datagram.len() >= DISCOVERY_MIN_RESPONSE_LEN);
        assert_eq!(&[0x00, 0x00, 0x00, 0x03], &datagram[..4]);
        assert_eq!(b"abcdefghijklmnopqrstuv", &datagram[10..32]);
    }

    #[tokio::test]
    async fn fake_pump_answers_passcode_request() {
        let pump = FakePump::spawn(FakePumpConfig::builder().build())
            .await
            .expect("fake pump should bind");
        let mut stream = TcpStream::connect(pump.addr())
            .await
            .expect("fake pump should accept");

        stream
            .write_all(&FrameCodec::encode_command(LanCommand::PasscodeRequest))
            .await
            .expect("request should write");
        let mut reply = vec![0u8; 20];
        stream
            .read_exact(&mut reply)
            .await
            .expect("passcode response should arrive");

        let (frame, _) = FrameCodec::decode_frame(&reply)
            .expect("reply should decode")
            .expect("reply should be complete");
        assert_eq!(
            DEFAULT_PASSCODE,
            FrameCodec::parse_passcode(&frame).expect("passcode should parse")
        );
        assert_eq!(1, pump.connections());
    }
}
