#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use q2net::{
    ClientConfig, DialRequest, Dialer, MessageWriter, NetworkClient, NetworkEvent,
    ReliableChannel, Transport, TransportError, TransportEvent, TransportEvents,
};

pub const IDENTIFICATION: &[u8] = b"\x03\\name\\Player\\fov\\90\0";

/// What the next dial does.
#[derive(Debug, Clone)]
pub enum DialOutcome {
    Open,
    /// Opens with events already waiting on the socket.
    OpenWith(Vec<TransportEvent>),
    OpenAfter(Duration),
    Fail(TransportError),
}

#[derive(Debug, Clone)]
pub struct DialRecord {
    pub url: String,
    pub qport: u16,
    pub userinfo: String,
}

#[derive(Debug, Default)]
struct MockState {
    script: Mutex<VecDeque<DialOutcome>>,
    dials: Mutex<Vec<DialRecord>>,
    sockets: Mutex<Vec<MockSocket>>,
}

#[derive(Debug)]
struct MockSocket {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    open: Arc<AtomicBool>,
}

/// Scripted dialer; unscripted dials open successfully.
#[derive(Debug, Clone, Default)]
pub struct MockDialer {
    state: Arc<MockState>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, outcome: DialOutcome) -> &Self {
        self.state.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn dial_count(&self) -> usize {
        self.state.dials.lock().unwrap().len()
    }

    pub fn dials(&self) -> Vec<DialRecord> {
        self.state.dials.lock().unwrap().clone()
    }

    pub fn socket_count(&self) -> usize {
        self.state.sockets.lock().unwrap().len()
    }

    /// Packets written to socket `index`, in order.
    pub fn sent(&self, index: usize) -> Vec<Vec<u8>> {
        self.state.sockets.lock().unwrap()[index]
            .sent
            .lock()
            .unwrap()
            .clone()
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.state.sockets.lock().unwrap()[index]
            .open
            .load(Ordering::SeqCst)
    }

    /// Delivers an event on the most recently opened socket.
    pub fn push(&self, event: TransportEvent) {
        let sockets = self.state.sockets.lock().unwrap();
        sockets
            .last()
            .expect("no socket opened")
            .events
            .send(event)
            .unwrap();
    }

    fn open(&self, queued: Vec<TransportEvent>) -> (MockTransport, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in queued {
            tx.send(event).unwrap();
        }

        let sent = Arc::new(Mutex::new(Vec::new()));
        let open = Arc::new(AtomicBool::new(true));
        self.state.sockets.lock().unwrap().push(MockSocket {
            events: tx,
            sent: Arc::clone(&sent),
            open: Arc::clone(&open),
        });

        (MockTransport { sent, open }, rx)
    }
}

impl Dialer for MockDialer {
    type Transport = MockTransport;

    async fn dial(
        &self,
        request: DialRequest<'_>,
    ) -> Result<(MockTransport, TransportEvents), TransportError> {
        self.state.dials.lock().unwrap().push(DialRecord {
            url: request.url.to_string(),
            qport: request.qport,
            userinfo: request.userinfo.to_string(),
        });

        let outcome = self.state.script.lock().unwrap().pop_front();
        match outcome.unwrap_or(DialOutcome::Open) {
            DialOutcome::Open => Ok(self.open(Vec::new())),
            DialOutcome::OpenWith(events) => Ok(self.open(events)),
            DialOutcome::OpenAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.open(Vec::new()))
            }
            DialOutcome::Fail(err) => Err(err),
        }
    }
}

#[derive(Debug)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    open: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Pass-through channel: no headers, reliable data prepended to the next
/// packet, every non-empty packet accepted.
#[derive(Debug, Default)]
pub struct LoopbackChannel {
    pub qport: u16,
    pending: Vec<u8>,
}

impl ReliableChannel for LoopbackChannel {
    fn setup(&mut self, qport: u16) {
        self.qport = qport;
        self.pending.clear();
    }

    fn reset(&mut self) {
        self.pending.clear();
    }

    fn transmit(&mut self, payload: Option<&[u8]>) -> Vec<u8> {
        let mut packet = std::mem::take(&mut self.pending);
        if let Some(payload) = payload {
            packet.extend_from_slice(payload);
        }
        packet
    }

    fn process(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        (!raw.is_empty()).then(|| raw.to_vec())
    }

    fn write_reliable_byte(&mut self, value: u8) {
        self.pending.push(value);
    }

    fn write_reliable_string(&mut self, value: &str) {
        self.pending.extend_from_slice(value.as_bytes());
        self.pending.push(0);
    }
}

pub type TestClient = NetworkClient<MockDialer, LoopbackChannel>;

pub fn test_client(dialer: &MockDialer) -> TestClient {
    NetworkClient::with_channel(dialer.clone(), LoopbackChannel::default(), ClientConfig::default())
}

pub fn drain(events: &mut mpsc::UnboundedReceiver<NetworkEvent>) -> Vec<NetworkEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn content(events: Vec<NetworkEvent>) -> Vec<NetworkEvent> {
    events.into_iter().filter(NetworkEvent::is_content).collect()
}

/// Lets spawned socket readers run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn string_command(text: &str) -> Vec<u8> {
    let mut writer = MessageWriter::new();
    writer.write_u8(4).write_string(text);
    writer.into_bytes()
}

pub fn print(level: u8, text: &str) -> Vec<u8> {
    let mut writer = MessageWriter::new();
    writer.write_u8(10).write_u8(level).write_string(text);
    writer.into_bytes()
}

pub fn config_string(index: u16, value: &str) -> Vec<u8> {
    let mut writer = MessageWriter::new();
    writer.write_u8(13).write_u16(index).write_string(value);
    writer.into_bytes()
}

pub fn server_data(game_dir: &str) -> Vec<u8> {
    let mut writer = MessageWriter::new();
    writer
        .write_u8(12)
        .write_i32(34)
        .write_i32(1)
        .write_u8(0)
        .write_string(game_dir)
        .write_i16(0);
    writer.into_bytes()
}

pub fn frame(server_frame: i32) -> Vec<u8> {
    let mut writer = MessageWriter::new();
    writer.write_u8(20).write_i32(server_frame).write_i32(-1);
    writer.into_bytes()
}
