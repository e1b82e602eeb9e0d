use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::protocol::{DEFAULT_PORT, PROTOCOL_VERSION};

use super::{DialRequest, Dialer, Transport, TransportError, TransportEvent, TransportEvents};

const CONNECTIONLESS_HEADER: [u8; 4] = [0xFF; 4];
const RECV_BUFFER_SIZE: usize = 4096;
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 3;

/// Dials game servers over UDP, the protocol's native transport.
///
/// Opening runs the connectionless handshake (`getchallenge`, `connect`)
/// so a returned transport is already registered with the server.
#[derive(Debug, Clone)]
pub struct UdpDialer {
    handshake_timeout: Duration,
}

impl Default for UdpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS))
    }
}

impl UdpDialer {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }

    async fn handshake(
        &self,
        socket: &UdpSocket,
        request: &DialRequest<'_>,
    ) -> Result<(), TransportError> {
        send_connectionless(socket, "getchallenge\n").await?;
        let args = self.expect_reply(socket, "challenge").await?;
        let challenge: i32 = args
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| TransportError::Dial(format!("malformed challenge '{args}'")))?;

        let connect = format!(
            "connect {} {} {} \"{}\"\n",
            PROTOCOL_VERSION, request.qport, challenge, request.userinfo
        );
        send_connectionless(socket, &connect).await?;
        self.expect_reply(socket, "client_connect").await?;

        Ok(())
    }

    async fn expect_reply(
        &self,
        socket: &UdpSocket,
        command: &'static str,
    ) -> Result<String, TransportError> {
        let deadline = Instant::now() + self.handshake_timeout;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let len = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Err(TransportError::Timeout(command)),
            };

            let Some(text) = connectionless_text(&buf[..len]) else {
                continue;
            };
            let text = text.trim();
            let (name, args) = text
                .split_once(char::is_whitespace)
                .unwrap_or((text, ""));

            if name == command {
                return Ok(args.trim().to_string());
            }
            if name == "print" {
                return Err(TransportError::Dial(args.trim().to_string()));
            }
            log::debug!("Ignoring '{}' while waiting for {}", name, command);
        }
    }
}

impl Dialer for UdpDialer {
    type Transport = UdpTransport;

    async fn dial(
        &self,
        request: DialRequest<'_>,
    ) -> Result<(UdpTransport, TransportEvents), TransportError> {
        let addr = resolve(request.url).await?;
        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(addr).await?;
        self.handshake(&socket, &request).await?;

        log::debug!("UDP session open to {} (qport {})", addr, request.qport);

        let socket = Arc::new(socket);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(Arc::clone(&socket), events_tx));

        Ok((
            UdpTransport {
                socket,
                reader,
                open: true,
            },
            events_rx,
        ))
    }
}

#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
    open: bool,
}

impl UdpTransport {
    pub fn peer_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.peer_addr()?)
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.socket.try_send(data)?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open && !self.reader.is_finished()
    }

    fn close(&mut self) {
        self.open = false;
        self.reader.abort();
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(socket: Arc<UdpSocket>, events: mpsc::UnboundedSender<TransportEvent>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        match socket.recv(&mut buf).await {
            Ok(len) => {
                let packet = &buf[..len];
                if packet.starts_with(&CONNECTIONLESS_HEADER) {
                    log::debug!("Dropping connectionless packet ({} bytes)", len);
                    continue;
                }
                if events.send(TransportEvent::Message(packet.to_vec())).is_err() {
                    break;
                }
            }
            Err(err) => {
                let reason = err.to_string();
                let _ = events.send(TransportEvent::Error(reason.clone()));
                let _ = events.send(TransportEvent::Closed { reason });
                break;
            }
        }
    }
}

async fn send_connectionless(socket: &UdpSocket, text: &str) -> Result<(), TransportError> {
    let mut packet = Vec::with_capacity(CONNECTIONLESS_HEADER.len() + text.len());
    packet.extend_from_slice(&CONNECTIONLESS_HEADER);
    packet.extend_from_slice(text.as_bytes());
    socket.send(&packet).await?;
    Ok(())
}

fn connectionless_text(packet: &[u8]) -> Option<String> {
    let body = packet.strip_prefix(&CONNECTIONLESS_HEADER)?;
    Some(body.iter().map(|&b| char::from(b)).collect())
}

/// Accepts `udp://host:port`, `host:port` or a bare host.
fn target_for(url: &str) -> Result<String, TransportError> {
    let target = url.strip_prefix("udp://").unwrap_or(url).trim_end_matches('/');
    if target.is_empty() || target.contains("://") {
        return Err(TransportError::InvalidAddress(url.to_string()));
    }

    let has_port = match target.rsplit_once(':') {
        Some((host, port)) => !host.ends_with(':') && port.parse::<u16>().is_ok(),
        None => false,
    };

    if has_port {
        Ok(target.to_string())
    } else if target.contains(':') && !target.starts_with('[') {
        Ok(format!("[{}]:{}", target, DEFAULT_PORT))
    } else {
        Ok(format!("{}:{}", target, DEFAULT_PORT))
    }
}

async fn resolve(url: &str) -> Result<SocketAddr, TransportError> {
    let target = target_for(url)?;
    tokio::net::lookup_host(&target)
        .await?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(target.clone()))
}
