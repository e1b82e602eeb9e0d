mod config;
mod dispatch;
mod outbound;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{NetChan, ReliableChannel};
use crate::event::{EventBus, EventReceiver, NetworkEvent};
use crate::protocol::{ClientOp, MessageWriter, UserCommand};
use crate::query::{QueryError, ServerInfo, ServerQuery};
use crate::transport::{
    AutoDialer, DialRequest, Dialer, Transport, TransportError, TransportEvent, TransportEvents,
};

pub use config::ClientConfig;
pub use outbound::{OutboundMessage, OutboundQueue, SendThrottle};

pub(crate) use outbound::{disconnect_message, disconnect_packet};

const MAX_BACKOFF_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("connection failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: TransportError,
    },
    #[error("connection attempt was superseded")]
    Superseded,
}

/// Delay before retry number `attempt` (1-based): doubles from one second,
/// capped at five.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_millis((1000u64 << exponent).min(MAX_BACKOFF_MS))
}

pub(crate) struct Session<T, C> {
    state: ConnectionState,
    channel: C,
    transport: Option<T>,
    reader: Option<JoinHandle<()>>,
    /// Bumped for every opened socket so events from an old one are ignored.
    socket_id: u64,
    /// Bumped by every connect and disconnect; a pending attempt that sees a
    /// different value has been superseded.
    generation: u64,
    queue: OutboundQueue,
    throttle: SendThrottle,
    session_start: Instant,
    last_message: Instant,
}

impl<T: Transport, C: ReliableChannel> Session<T, C> {
    fn new(channel: C, config: &ClientConfig) -> Self {
        let now = Instant::now();
        Self {
            state: ConnectionState::Disconnected,
            channel,
            transport: None,
            reader: None,
            socket_id: 0,
            generation: 0,
            queue: OutboundQueue::new(config.max_queued_packets),
            throttle: SendThrottle::new(config.send_interval()),
            session_start: now,
            last_message: now,
        }
    }

    fn is_open(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.transport.as_ref().is_some_and(Transport::is_open)
    }

    /// Frames and sends `message` when the session is open. Otherwise it is
    /// parked unframed, so it picks up the sequence numbers of the session it
    /// is eventually sent on.
    fn send(&mut self, message: OutboundMessage) {
        if !self.is_open() {
            let evicted = self.queue.push(message);
            if evicted > 0 {
                log::warn!("Outbound queue full, dropped {} oldest message(s)", evicted);
            }
            return;
        }

        let packet = message.frame(&mut self.channel);
        self.transmit(&packet);
    }

    fn transmit(&mut self, packet: &[u8]) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(err) = transport.send(packet) {
            log::warn!("Failed to send packet: {}", err);
        }
    }

    fn flush_queue(&mut self) {
        if !self.is_open() {
            return;
        }

        let count = self.queue.len();
        while let Some(message) = self.queue.pop() {
            let packet = message.frame(&mut self.channel);
            self.transmit(&packet);
        }
        if count > 0 {
            log::debug!("Flushed {} queued message(s)", count);
        }
    }

    fn disconnect(&mut self, reason: &str, events: &EventBus) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        self.generation += 1;
        self.socket_id += 1;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.channel.reset();
        self.queue.clear();
        self.state = ConnectionState::Disconnected;

        log::info!("Disconnected: {}", reason);
        events.emit(NetworkEvent::Disconnected {
            reason: reason.to_string(),
        });
    }
}

/// Client side of a game server session.
///
/// Cheap to clone; clones share the same session. Connection attempts,
/// outgoing commands and incoming server messages all go through one lock so
/// the state machine never observes a half-applied transition.
pub struct NetworkClient<D: Dialer = AutoDialer, C: ReliableChannel = NetChan> {
    session: Arc<Mutex<Session<D::Transport, C>>>,
    dialer: Arc<D>,
    events: EventBus,
    config: Arc<ClientConfig>,
    qport: u16,
}

impl<D: Dialer, C: ReliableChannel> Clone for NetworkClient<D, C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            dialer: Arc::clone(&self.dialer),
            events: self.events.clone(),
            config: Arc::clone(&self.config),
            qport: self.qport,
        }
    }
}

impl NetworkClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_dialer(AutoDialer::default(), config)
    }
}

impl<D: Dialer> NetworkClient<D, NetChan> {
    pub fn with_dialer(dialer: D, config: ClientConfig) -> Self {
        Self::with_channel(dialer, NetChan::new(), config)
    }
}

impl<D: Dialer, C: ReliableChannel> NetworkClient<D, C> {
    pub fn with_channel(dialer: D, channel: C, config: ClientConfig) -> Self {
        let qport = rand::random::<u16>();
        log::debug!("Client qport {}", qport);

        Self {
            session: Arc::new(Mutex::new(Session::new(channel, &config))),
            dialer: Arc::new(dialer),
            events: EventBus::new(),
            config: Arc::new(config),
            qport,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session<D::Transport, C>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn qport(&self) -> u16 {
        self.qport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn queued_packets(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn last_message_elapsed(&self) -> Duration {
        self.lock().last_message.elapsed()
    }

    pub fn session_elapsed(&self) -> Duration {
        self.lock().session_start.elapsed()
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        let session = self.lock();
        session.state == ConnectionState::Connected && session.last_message.elapsed() > timeout
    }

    pub async fn connect(&self, url: &str) -> Result<(), ConnectError> {
        self.connect_with_retries(url, self.config.max_retries).await
    }

    /// Opens a session to `url`, retrying failed dials with exponential
    /// backoff. A later `connect` or `disconnect` cancels this attempt, which
    /// then resolves to [`ConnectError::Superseded`].
    pub async fn connect_with_retries(&self, url: &str, max_retries: u32) -> Result<(), ConnectError> {
        let generation = self.begin_attempt();
        log::info!("Connecting to {} (qport {})", url, self.qport);

        let userinfo = self.config.userinfo();
        let mut attempt = 0;

        loop {
            let request = DialRequest {
                url,
                qport: self.qport,
                userinfo: &userinfo,
            };

            match self.dialer.dial(request).await {
                Ok((transport, events)) => return self.open_session(generation, transport, events),
                Err(err) => {
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(self.fail_attempt(generation, attempt, err));
                    }
                    if !self.is_current(generation) {
                        return Err(ConnectError::Superseded);
                    }

                    let delay = backoff_delay(attempt);
                    log::warn!(
                        "Connection attempt {} to {} failed: {}, retrying in {:?}",
                        attempt,
                        url,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;

                    if !self.is_current(generation) {
                        log::debug!("Retry to {} cancelled", url);
                        return Err(ConnectError::Superseded);
                    }
                }
            }
        }
    }

    fn begin_attempt(&self) -> u64 {
        let mut session = self.lock();
        if matches!(
            session.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            session.disconnect("Reconnecting", &self.events);
        }

        session.generation += 1;
        session.state = ConnectionState::Connecting;
        session.channel.setup(self.qport);
        let now = Instant::now();
        session.session_start = now;
        session.last_message = now;
        session.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn fail_attempt(&self, generation: u64, attempts: u32, err: TransportError) -> ConnectError {
        let mut session = self.lock();
        if session.generation != generation {
            return ConnectError::Superseded;
        }

        let error = ConnectError::RetriesExhausted {
            attempts,
            source: err,
        };
        session.state = ConnectionState::Error;
        log::error!("{}", error);
        self.events.emit(NetworkEvent::Error {
            message: error.to_string(),
        });
        error
    }

    fn open_session(
        &self,
        generation: u64,
        mut transport: D::Transport,
        events: TransportEvents,
    ) -> Result<(), ConnectError> {
        let mut session = self.lock();
        if session.generation != generation {
            transport.close();
            return Err(ConnectError::Superseded);
        }

        session.socket_id += 1;
        let socket_id = session.socket_id;
        session.transport = Some(transport);
        session.state = ConnectionState::Connected;
        session.last_message = Instant::now();

        session.send(OutboundMessage::Command {
            op: ClientOp::UserInfo,
            data: Some(self.config.userinfo()),
        });
        session.flush_queue();

        session.reader = Some(tokio::spawn(pump(self.clone(), socket_id, events)));

        log::info!("Connected (qport {})", self.qport);
        self.events.emit(NetworkEvent::Connected);
        Ok(())
    }

    /// Ends the session. Does nothing when already disconnected.
    pub fn disconnect(&self, reason: &str) {
        let mut session = self.lock();
        if session.is_open() {
            session.send(disconnect_message());
        }
        session.disconnect(reason, &self.events);
    }

    /// Sends one movement command, returning `false` when it was throttled.
    pub fn send_command(&self, command: &UserCommand) -> bool {
        let mut session = self.lock();
        if !session.throttle.try_acquire(Instant::now()) {
            return false;
        }

        let mut writer = MessageWriter::with_capacity(1 + UserCommand::ENCODED_LEN);
        writer.write_u8(ClientOp::Move.into());
        command.write(&mut writer);

        session.send(OutboundMessage::Unreliable(writer.into_bytes()));
        true
    }

    pub fn send_client_command(&self, op: ClientOp, data: Option<&str>) {
        let data = data.filter(|data| !data.is_empty()).map(str::to_string);
        self.lock().send(OutboundMessage::Command { op, data });
    }

    pub fn say(&self, text: &str) {
        self.send_client_command(ClientOp::StringCmd, Some(&format!("say \"{}\"", text)));
    }

    /// Processes one raw packet as if it had arrived on the current socket.
    pub fn handle_message(&self, raw: &[u8]) {
        self.lock().receive(raw, &self.events);
    }

    fn on_socket_message(&self, socket_id: u64, raw: &[u8]) {
        let mut session = self.lock();
        if session.socket_id != socket_id {
            log::trace!("Ignoring message from stale socket");
            return;
        }
        session.receive(raw, &self.events);
    }

    fn on_socket_closed(&self, socket_id: u64, reason: String) {
        let mut session = self.lock();
        if session.socket_id != socket_id || session.state != ConnectionState::Connected {
            return;
        }

        // Dropping the handle detaches the pump that is calling us.
        session.reader.take();
        let reason = if reason.is_empty() {
            "Connection closed".to_string()
        } else {
            reason
        };
        session.disconnect(&reason, &self.events);
    }
}

impl<D: Dialer, C: ReliableChannel + Default> NetworkClient<D, C> {
    /// Runs a one-shot status query on a separate socket; the client's own
    /// session is left untouched.
    pub async fn query_server(&self, address: &str) -> Result<ServerInfo, QueryError> {
        ServerQuery::with_channel(Arc::clone(&self.dialer), C::default(), &self.config)
            .run(address)
            .await
    }

    /// Measures how long it takes to open a session to `address`.
    pub async fn ping(&self, address: &str) -> Result<Duration, TransportError> {
        let qport = rand::random::<u16>();
        let userinfo = self.config.userinfo();
        let request = DialRequest {
            url: address,
            qport,
            userinfo: &userinfo,
        };

        let started = Instant::now();
        let (mut transport, _events) = self.dialer.dial(request).await?;
        let elapsed = started.elapsed();

        let mut channel = C::default();
        channel.setup(qport);
        let farewell = disconnect_packet(&mut channel);
        if let Err(err) = transport.send(&farewell) {
            log::debug!("Ping farewell to {} failed: {}", address, err);
        }
        transport.close();

        log::debug!("Ping {}: {:?}", address, elapsed);
        Ok(elapsed)
    }
}

async fn pump<D: Dialer, C: ReliableChannel>(
    client: NetworkClient<D, C>,
    socket_id: u64,
    mut events: TransportEvents,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(raw) => client.on_socket_message(socket_id, &raw),
            TransportEvent::Error(err) => log::warn!("Socket error: {}", err),
            TransportEvent::Closed { reason } => {
                client.on_socket_closed(socket_id, reason);
                return;
            }
        }
    }
    client.on_socket_closed(socket_id, String::new());
}
