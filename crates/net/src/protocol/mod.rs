mod codec;
mod messages;
mod usercmd;

pub use codec::{DecodeError, MessageReader, MessageWriter};
pub use messages::{Dispatch, FrameHeader, ServerData, ServerMessage, ServerMessages};
pub use usercmd::{Buttons, UserCommand};

pub const PROTOCOL_VERSION: i32 = 34;
pub const DEFAULT_PORT: u16 = 27910;
pub const MAX_MSGLEN: usize = 1400;
pub const DEFAULT_SEND_RATE: u32 = 60;

pub const CS_NAME: u16 = 0;
pub const CS_MAXCLIENTS: u16 = 30;
pub const CS_MAPNAME: u16 = 31;
pub const CS_PLAYERSKINS: u16 = 1312;
pub const MAX_CLIENTS: u16 = 256;

pub const PRINT_LOW: u8 = 0;
pub const PRINT_MEDIUM: u8 = 1;
pub const PRINT_HIGH: u8 = 2;
pub const PRINT_CHAT: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerOp {
    Nop = 6,
    Disconnect = 7,
    Reconnect = 8,
    Print = 10,
    StuffText = 11,
    ServerData = 12,
    ConfigString = 13,
    CenterPrint = 15,
    Frame = 20,
}

impl TryFrom<u8> for ServerOp {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            6 => Self::Nop,
            7 => Self::Disconnect,
            8 => Self::Reconnect,
            10 => Self::Print,
            11 => Self::StuffText,
            12 => Self::ServerData,
            13 => Self::ConfigString,
            15 => Self::CenterPrint,
            20 => Self::Frame,
            other => return Err(DecodeError::UnknownOpcode(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientOp {
    Move = 2,
    UserInfo = 3,
    StringCmd = 4,
}

impl From<ClientOp> for u8 {
    fn from(op: ClientOp) -> Self {
        op as u8
    }
}
