use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::channel::{NetChan, ReliableChannel};
use crate::client::{ClientConfig, disconnect_packet};
use crate::protocol::{
    CS_MAPNAME, CS_MAXCLIENTS, CS_NAME, CS_PLAYERSKINS, ClientOp, MAX_CLIENTS, ServerMessage,
    ServerMessages,
};
use crate::transport::{DialRequest, Dialer, Transport, TransportError, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub address: String,
    pub name: String,
    pub map: String,
    pub players: u32,
    pub max_players: u32,
    /// Milliseconds from dial to open socket.
    pub ping: u32,
    pub gamemode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("server closed the query: {0}")]
    Closed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    Complete,
    Disconnected,
}

/// Server details gathered from the configstrings a server sends a freshly
/// connected client.
#[derive(Debug)]
struct StatusCollector {
    info: ServerInfo,
    player_slots: HashSet<u16>,
}

impl StatusCollector {
    fn new(address: &str) -> Self {
        Self {
            info: ServerInfo {
                address: address.to_string(),
                ..Default::default()
            },
            player_slots: HashSet::new(),
        }
    }

    fn absorb(&mut self, payload: &[u8]) -> Progress {
        for dispatch in ServerMessages::new(payload) {
            match dispatch.message {
                Ok(ServerMessage::ServerData(data)) => self.info.gamemode = data.game_dir,
                Ok(ServerMessage::ConfigString { index, value }) => {
                    self.apply_config_string(index, value);
                }
                Ok(ServerMessage::Frame(_)) => return Progress::Complete,
                Ok(ServerMessage::Disconnect) => return Progress::Disconnected,
                Ok(_) => {}
                Err(err) => {
                    log::debug!("Query {}: dropping rest of payload: {}", self.info.address, err);
                    break;
                }
            }
        }
        Progress::Pending
    }

    fn apply_config_string(&mut self, index: u16, value: String) {
        match index {
            CS_NAME => self.info.name = value,
            CS_MAPNAME => self.info.map = value,
            CS_MAXCLIENTS => match value.trim().parse() {
                Ok(max) => self.info.max_players = max,
                Err(_) => log::debug!("Ignoring maxclients '{}'", value),
            },
            slot if (CS_PLAYERSKINS..CS_PLAYERSKINS + MAX_CLIENTS).contains(&slot) => {
                if value.is_empty() {
                    self.player_slots.remove(&slot);
                } else {
                    self.player_slots.insert(slot);
                }
                self.info.players = self.player_slots.len() as u32;
            }
            _ => {}
        }
    }

    /// What has been learned so far, if the server at least named itself.
    fn partial(self) -> Option<ServerInfo> {
        (!self.info.name.is_empty()).then_some(self.info)
    }
}

/// One-shot status query over a dedicated, short-lived session.
pub struct ServerQuery<D: Dialer, C: ReliableChannel = NetChan> {
    dialer: Arc<D>,
    channel: C,
    transport: Option<D::Transport>,
    qport: u16,
    userinfo: String,
    timeout: Duration,
}

impl<D: Dialer> ServerQuery<D, NetChan> {
    pub fn new(dialer: Arc<D>, config: &ClientConfig) -> Self {
        Self::with_channel(dialer, NetChan::new(), config)
    }
}

impl<D: Dialer, C: ReliableChannel> ServerQuery<D, C> {
    pub fn with_channel(dialer: Arc<D>, channel: C, config: &ClientConfig) -> Self {
        Self {
            dialer,
            channel,
            transport: None,
            qport: rand::random::<u16>(),
            userinfo: config.userinfo(),
            timeout: config.query_timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolves as soon as the first frame arrives. On timeout or an early
    /// close, whatever was gathered is returned if the server name is known.
    pub async fn run(mut self, address: &str) -> Result<ServerInfo, QueryError> {
        let mut collector = StatusCollector::new(address);
        let deadline = Instant::now() + self.timeout;

        let outcome =
            tokio::time::timeout_at(deadline, self.exchange(address, &mut collector)).await;

        let result = match outcome {
            Ok(Ok(Progress::Complete)) => Ok(collector.info),
            Ok(Ok(_)) => collector
                .partial()
                .ok_or_else(|| QueryError::Closed("server closed the connection".to_string())),
            Ok(Err(err)) => Err(err),
            Err(_) => collector.partial().ok_or(QueryError::Timeout(self.timeout)),
        };

        self.shutdown();

        match &result {
            Ok(info) => log::debug!(
                "Query {}: '{}' on {} ({}/{})",
                address,
                info.name,
                info.map,
                info.players,
                info.max_players
            ),
            Err(err) => log::debug!("Query {} failed: {}", address, err),
        }
        result
    }

    async fn exchange(
        &mut self,
        address: &str,
        collector: &mut StatusCollector,
    ) -> Result<Progress, QueryError> {
        let request = DialRequest {
            url: address,
            qport: self.qport,
            userinfo: &self.userinfo,
        };

        let started = Instant::now();
        let (transport, mut events) = self.dialer.dial(request).await?;
        collector.info.ping = started.elapsed().as_millis().min(u32::MAX as u128) as u32;

        self.channel.setup(self.qport);
        self.channel.write_reliable_byte(ClientOp::UserInfo.into());
        self.channel.write_reliable_string(&self.userinfo);
        let hello = self.channel.transmit(None);

        let transport = self.transport.insert(transport);
        transport.send(&hello)?;

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message(raw) => {
                    let Some(payload) = self.channel.process(&raw) else {
                        continue;
                    };
                    match collector.absorb(&payload) {
                        Progress::Pending => {}
                        done => return Ok(done),
                    }
                    // Acknowledge so the server keeps the reliable stream moving.
                    let ack = self.channel.transmit(None);
                    transport.send(&ack)?;
                }
                TransportEvent::Error(err) => return Err(TransportError::Io(err).into()),
                TransportEvent::Closed { reason } => {
                    log::debug!("Query {} closed: {}", address, reason);
                    return Ok(Progress::Disconnected);
                }
            }
        }
        Ok(Progress::Disconnected)
    }

    fn shutdown(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        if transport.is_open() {
            let farewell = disconnect_packet(&mut self.channel);
            if let Err(err) = transport.send(&farewell) {
                log::debug!("Query farewell failed: {}", err);
            }
        }
        transport.close();
    }
}
