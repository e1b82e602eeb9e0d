use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{DialRequest, Dialer, Transport, TransportError, TransportEvent, TransportEvents};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Dials servers that tunnel the game protocol through binary WebSocket
/// frames. The websocket handshake is the whole open; the server learns the
/// userinfo from the first sequenced packet.
#[derive(Debug, Clone)]
pub struct WsDialer {
    connect_timeout: Duration,
}

impl Default for WsDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }
}

impl WsDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Dialer for WsDialer {
    type Transport = WsTransport;

    async fn dial(
        &self,
        request: DialRequest<'_>,
    ) -> Result<(WsTransport, TransportEvents), TransportError> {
        if !is_ws_url(request.url) {
            return Err(TransportError::InvalidAddress(request.url.to_string()));
        }

        let connect = tokio_tungstenite::connect_async(request.url);
        let (stream, _response) = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(result) => result.map_err(|err| TransportError::Dial(err.to_string()))?,
            Err(_) => return Err(TransportError::Timeout("websocket handshake")),
        };

        log::debug!("WebSocket session open to {} (qport {})", request.url, request.qport);

        let (sink, stream) = stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(sink, outgoing_rx, Arc::clone(&open)));
        let reader = tokio::spawn(read_loop(stream, events_tx, Arc::clone(&open)));

        Ok((
            WsTransport {
                outgoing: outgoing_tx,
                open,
                reader,
                writer,
            },
            events_rx,
        ))
    }
}

/// Sends are handed to a writer task; the socket itself is owned by the
/// reader and writer halves.
#[derive(Debug)]
pub struct WsTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Transport for WsTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.outgoing
            .send(Message::Binary(data.to_vec()))
            .map_err(|_| TransportError::Closed("writer stopped".into()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.writer.is_finished()
    }

    fn close(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            // The writer exits after flushing the close frame.
            let _ = self.outgoing.send(Message::Close(None));
        }
        self.reader.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    open: Arc<AtomicBool>,
) {
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(err) = sink.send(message).await {
            log::debug!("WebSocket write failed: {}", err);
            break;
        }
        if closing {
            break;
        }
    }
    open.store(false, Ordering::SeqCst);
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                if events.send(TransportEvent::Message(data)).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Text(text))) => {
                log::debug!("Ignoring {} byte text frame", text.len());
            }
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|frame| frame.reason.to_string())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "Connection closed".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                let reason = err.to_string();
                let _ = events.send(TransportEvent::Error(reason.clone()));
                break reason;
            }
            None => break "Connection closed".to_string(),
        }
    };

    open.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed { reason });
}

pub(super) fn is_ws_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}
