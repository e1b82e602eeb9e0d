mod udp;
mod ws;

use std::future::Future;
use std::io;

use tokio::sync::mpsc;

pub use udp::{UdpDialer, UdpTransport};
pub use ws::{WsDialer, WsTransport};

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(Vec<u8>),
    Closed { reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("transport is not open")]
    NotOpen,
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// What a dialer needs to open a session on behalf of a client.
#[derive(Debug, Clone, Copy)]
pub struct DialRequest<'a> {
    pub url: &'a str,
    pub qport: u16,
    pub userinfo: &'a str,
}

/// An open, message-oriented socket.
pub trait Transport: Send + 'static {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Closes the socket without producing a `Closed` event.
    fn close(&mut self);
}

/// Opens transports. A successful dial is the "socket opened" event; all
/// later traffic arrives on the returned event channel.
pub trait Dialer: Send + Sync + 'static {
    type Transport: Transport;

    fn dial(
        &self,
        request: DialRequest<'_>,
    ) -> impl Future<Output = Result<(Self::Transport, TransportEvents), TransportError>> + Send;
}

/// Picks the transport from the URL scheme: `ws://` and `wss://` go over
/// WebSocket, everything else over UDP.
#[derive(Debug, Clone, Default)]
pub struct AutoDialer {
    pub udp: UdpDialer,
    pub ws: WsDialer,
}

#[derive(Debug)]
pub enum AutoTransport {
    Udp(UdpTransport),
    Ws(WsTransport),
}

impl Transport for AutoTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Udp(transport) => transport.send(data),
            Self::Ws(transport) => transport.send(data),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Self::Udp(transport) => transport.is_open(),
            Self::Ws(transport) => transport.is_open(),
        }
    }

    fn close(&mut self) {
        match self {
            Self::Udp(transport) => transport.close(),
            Self::Ws(transport) => transport.close(),
        }
    }
}

impl Dialer for AutoDialer {
    type Transport = AutoTransport;

    async fn dial(
        &self,
        request: DialRequest<'_>,
    ) -> Result<(AutoTransport, TransportEvents), TransportError> {
        if ws::is_ws_url(request.url) {
            let (transport, events) = self.ws.dial(request).await?;
            Ok((AutoTransport::Ws(transport), events))
        } else {
            let (transport, events) = self.udp.dial(request).await?;
            Ok((AutoTransport::Udp(transport), events))
        }
    }
}
