pub mod channel;
pub mod client;
pub mod event;
pub mod protocol;
pub mod query;
pub mod transport;

pub use channel::{NetChan, ReliableChannel};
pub use client::{
    ClientConfig, ConnectError, ConnectionState, NetworkClient, OutboundMessage, OutboundQueue,
    SendThrottle, backoff_delay,
};
pub use event::{EntityState, EventBus, EventReceiver, NetworkEvent, PlayerState, Snapshot};
pub use protocol::{
    Buttons, ClientOp, DEFAULT_PORT, DecodeError, MessageReader, MessageWriter, PROTOCOL_VERSION,
    ServerData, ServerMessage, ServerMessages, ServerOp, UserCommand,
};
pub use query::{QueryError, ServerInfo, ServerQuery};
pub use transport::{
    AutoDialer, AutoTransport, DialRequest, Dialer, Transport, TransportError, TransportEvent,
    TransportEvents, UdpDialer, UdpTransport, WsDialer, WsTransport,
};
