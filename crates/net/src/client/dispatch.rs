use bytes::Bytes;

use crate::channel::ReliableChannel;
use crate::event::{EventBus, NetworkEvent, Snapshot};
use crate::protocol::{Dispatch, PROTOCOL_VERSION, ServerMessage, ServerMessages};
use crate::transport::Transport;

use super::Session;

impl<T: Transport, C: ReliableChannel> Session<T, C> {
    /// Feeds one raw packet from the server through the channel and routes
    /// the accepted payload.
    pub(super) fn receive(&mut self, raw: &[u8], events: &EventBus) {
        self.last_message = tokio::time::Instant::now();

        match self.channel.process(raw) {
            Some(payload) => self.dispatch(Bytes::from(payload), events),
            None => log::trace!("Discarded {} byte packet", raw.len()),
        }
    }

    fn dispatch(&mut self, payload: Bytes, events: &EventBus) {
        for Dispatch {
            opcode,
            body,
            message,
        } in ServerMessages::new(&payload)
        {
            events.emit(NetworkEvent::ServerCommand {
                opcode,
                body: payload.slice_ref(body),
            });

            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    log::debug!("Dropping rest of payload at opcode {}: {}", opcode, err);
                    return;
                }
            };

            match message {
                ServerMessage::Nop => {}
                ServerMessage::Reconnect => log::debug!("Server requested reconnect"),
                ServerMessage::Disconnect => {
                    self.disconnect("Server disconnected client", events);
                    return;
                }
                ServerMessage::Print { level, text } => {
                    events.emit(NetworkEvent::Print { level, text });
                }
                ServerMessage::CenterPrint(text) => events.emit(NetworkEvent::CenterPrint(text)),
                ServerMessage::StuffText(text) => events.emit(NetworkEvent::StuffText(text)),
                ServerMessage::ConfigString { index, value } => {
                    events.emit(NetworkEvent::ConfigString { index, value });
                }
                ServerMessage::ServerData(data) => {
                    if data.protocol != PROTOCOL_VERSION {
                        log::warn!(
                            "Server speaks protocol {}, expected {}",
                            data.protocol,
                            PROTOCOL_VERSION
                        );
                    }
                    log::debug!("Server data: game dir '{}'", data.game_dir);
                    events.emit(NetworkEvent::ServerData(data));
                }
                ServerMessage::Frame(Some(header)) => {
                    events.emit(NetworkEvent::Snapshot(Snapshot {
                        time: header.server_frame,
                        delta_frame: header.delta_frame,
                        ..Default::default()
                    }));
                }
                ServerMessage::Frame(None) => log::debug!("Frame without header"),
            }
        }
    }
}
