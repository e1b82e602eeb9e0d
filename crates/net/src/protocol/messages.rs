use serde::{Deserialize, Serialize};

use super::codec::{DecodeError, MessageReader};
use super::ServerOp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerData {
    pub protocol: i32,
    pub server_count: i32,
    pub attract_loop: bool,
    pub game_dir: String,
    pub player_num: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub server_frame: i32,
    pub delta_frame: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Nop,
    Disconnect,
    Reconnect,
    Print { level: u8, text: String },
    CenterPrint(String),
    StuffText(String),
    ConfigString { index: u16, value: String },
    ServerData(ServerData),
    /// `None` when the payload ended before the frame numbers.
    Frame(Option<FrameHeader>),
}

impl ServerMessage {
    fn decode(op: ServerOp, reader: &mut MessageReader<'_>) -> Result<Self, DecodeError> {
        Ok(match op {
            ServerOp::Nop => Self::Nop,
            ServerOp::Disconnect => Self::Disconnect,
            ServerOp::Reconnect => Self::Reconnect,
            ServerOp::Print => {
                let level = reader.read_u8()?;
                let text = reader.read_string()?;
                Self::Print { level, text }
            }
            ServerOp::CenterPrint => Self::CenterPrint(reader.read_string()?),
            ServerOp::StuffText => Self::StuffText(reader.read_string()?),
            ServerOp::ConfigString => {
                let index = reader.read_u16()?;
                let value = reader.read_string()?;
                Self::ConfigString { index, value }
            }
            ServerOp::ServerData => {
                let protocol = reader.read_i32()?;
                let server_count = reader.read_i32()?;
                let attract_loop = reader.read_u8()? != 0;
                let game_dir = reader.read_string()?;
                let player_num = if reader.has_bytes(2) {
                    Some(reader.read_i16()?)
                } else {
                    None
                };
                Self::ServerData(ServerData {
                    protocol,
                    server_count,
                    attract_loop,
                    game_dir,
                    player_num,
                })
            }
            ServerOp::Frame => {
                if reader.has_bytes(8) {
                    Self::Frame(Some(FrameHeader {
                        server_frame: reader.read_i32()?,
                        delta_frame: reader.read_i32()?,
                    }))
                } else {
                    Self::Frame(None)
                }
            }
        })
    }

    /// Messages after which opcode alignment can no longer be trusted.
    fn ends_payload(&self) -> bool {
        matches!(self, Self::Frame(_))
    }
}

/// One opcode read from a payload.
#[derive(Debug, Clone)]
pub struct Dispatch<'a> {
    pub opcode: u8,
    /// Bytes following the opcode, up to the end of the payload.
    pub body: &'a [u8],
    pub message: Result<ServerMessage, DecodeError>,
}

/// Walks the opcodes of a single server payload.
///
/// Iteration ends after a `frame` (its entity data is bit-packed and cannot be
/// skipped) and after the first unknown opcode or truncated field, since the
/// next opcode boundary is unknown at that point.
#[derive(Debug, Clone)]
pub struct ServerMessages<'a> {
    reader: MessageReader<'a>,
    finished: bool,
}

impl<'a> ServerMessages<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            reader: MessageReader::new(payload),
            finished: false,
        }
    }
}

impl<'a> Iterator for ServerMessages<'a> {
    type Item = Dispatch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let opcode = self.reader.read_u8().ok()?;
        let body = self.reader.rest();
        let message =
            ServerOp::try_from(opcode).and_then(|op| ServerMessage::decode(op, &mut self.reader));

        match &message {
            Ok(msg) if !msg.ends_payload() => {}
            _ => self.finished = true,
        }

        Some(Dispatch {
            opcode,
            body,
            message,
        })
    }
}
