use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bon::Builder;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, trace, warn};

use crate::protocol::{
    DISCOVERY_DEVICE_ID_LEN, DISCOVERY_DEVICE_ID_OFFSET, DISCOVERY_MIN_RESPONSE_LEN,
    DISCOVERY_PORT, DISCOVERY_PROBE,
};
use crate::utils::format_hex;

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const RECEIVE_BUFFER_LEN: usize = 1024;

/// Socket failures during discovery; logged, never returned to callers.
#[derive(Debug, Error)]
enum DiscoveryError {
    #[error("failed to bind discovery socket to {addr}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to enable broadcast on the discovery socket")]
    Broadcast(#[source] std::io::Error),
    #[error("failed to send discovery probe to {target}")]
    Send {
        target: SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to receive discovery response")]
    Receive(#[source] std::io::Error),
}

/// Settings for [`discover`].
#[derive(Debug, Clone, Builder)]
pub struct DiscoveryConfig {
    #[builder(default = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT))]
    target: SocketAddr,
    #[builder(default = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))]
    bind: SocketAddr,
    #[builder(default = DEFAULT_WINDOW)]
    window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DiscoveryConfig {
    /// Returns the address probes are sent to.
    #[must_use]
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Returns how long responses are collected for.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Broadcasts one probe and maps device identifiers to responding addresses.
///
/// Responses shorter than the identifier field are ignored. When a device
/// answers more than once the last answer wins. Socket failures end the
/// listen early and return what was collected so far; an empty map means
/// nothing answered.
#[instrument(skip(config), level = "info", fields(target = %config.target, window = ?config.window))]
pub async fn discover(config: &DiscoveryConfig) -> HashMap<String, IpAddr> {
    let mut found = HashMap::new();
    if let Err(error) = collect(config, &mut found).await {
        warn!(error = %error, found = found.len(), "discovery ended early");
    }
    debug!(found = found.len(), "discovery finished");
    found
}

async fn collect(
    config: &DiscoveryConfig,
    found: &mut HashMap<String, IpAddr>,
) -> Result<(), DiscoveryError> {
    let socket = UdpSocket::bind(config.bind)
        .await
        .map_err(|source| DiscoveryError::Bind {
            addr: config.bind,
            source,
        })?;
    socket
        .set_broadcast(true)
        .map_err(DiscoveryError::Broadcast)?;
    socket
        .send_to(&DISCOVERY_PROBE, config.target)
        .await
        .map_err(|source| DiscoveryError::Send {
            target: config.target,
            source,
        })?;
    trace!(local = ?socket.local_addr().ok(), "discovery probe sent");

    let deadline = Instant::now() + config.window;
    let mut buffer = [0u8; RECEIVE_BUFFER_LEN];
    loop {
        let (read, peer) = match timeout_at(deadline, socket.recv_from(&mut buffer)).await {
            Ok(Ok(received)) => received,
            Ok(Err(source)) => return Err(DiscoveryError::Receive(source)),
            Err(_elapsed) => return Ok(()),
        };
        let datagram = &buffer[..read];
        trace!(%peer, bytes = %format_hex(datagram), "discovery response");

        match parse_device_id(datagram) {
            Some(device_id) => {
                debug!(%device_id, ip = %peer.ip(), "device answered discovery");
                found.insert(device_id, peer.ip());
            }
            None => trace!(%peer, len = read, "ignoring short discovery response"),
        }
    }
}

/// Extracts the device identifier of a discovery response.
///
/// Undecodable bytes are dropped and surrounding whitespace or NUL padding
/// is trimmed. Returns `None` for short datagrams or blank identifiers.
///
/// ```
/// let datagram = jebao::discovery_response("did-1");
/// assert_eq!(Some("did-1".to_string()), jebao::parse_device_id(&datagram));
/// assert_eq!(None, jebao::parse_device_id(&datagram[..20]));
/// ```
#[must_use]
pub fn parse_device_id(datagram: &[u8]) -> Option<String> {
    if datagram.len() < DISCOVERY_MIN_RESPONSE_LEN {
        return None;
    }
    let field =
        &datagram[DISCOVERY_DEVICE_ID_OFFSET..DISCOVERY_DEVICE_ID_OFFSET + DISCOVERY_DEVICE_ID_LEN];
    let decoded: String = String::from_utf8_lossy(field)
        .chars()
        .filter(|character| *character != char::REPLACEMENT_CHARACTER)
        .collect();
    let trimmed = decoded.trim_matches(|character: char| character.is_whitespace() || character == '\0');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
