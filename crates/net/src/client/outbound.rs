use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::channel::ReliableChannel;
use crate::protocol::{ClientOp, MessageWriter};

/// Outgoing work that has not been framed by the channel yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Unreliable(Vec<u8>),
    /// Reliable client command; `data` is written as a string after `op`.
    Command { op: ClientOp, data: Option<String> },
}

impl OutboundMessage {
    /// Frames the message with the channel's current sequence state.
    pub fn frame<C: ReliableChannel>(&self, channel: &mut C) -> Vec<u8> {
        match self {
            Self::Unreliable(payload) => channel.transmit(Some(payload)),
            Self::Command { op, data } => {
                channel.write_reliable_byte((*op).into());
                if let Some(data) = data {
                    channel.write_reliable_string(data);
                }
                channel.transmit(None)
            }
        }
    }
}

/// Messages waiting for the session to open, oldest first.
#[derive(Debug)]
pub struct OutboundQueue {
    messages: VecDeque<OutboundMessage>,
    max_messages: usize,
}

impl OutboundQueue {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Returns the number of old messages evicted to make room.
    pub fn push(&mut self, message: OutboundMessage) -> usize {
        let mut evicted = 0;
        while self.messages.len() >= self.max_messages {
            self.messages.pop_front();
            evicted += 1;
        }
        self.messages.push_back(message);
        evicted
    }

    pub fn pop(&mut self) -> Option<OutboundMessage> {
        self.messages.pop_front()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Minimum spacing between movement packets.
#[derive(Debug)]
pub struct SendThrottle {
    interval: Duration,
    last_send: Option<Instant>,
}

impl SendThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_send: None,
        }
    }

    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_send {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_send = Some(now);
        true
    }
}

/// Unreliable `disconnect` string command, sent as a courtesy before a socket
/// is closed so the server frees the slot immediately.
pub(crate) fn disconnect_message() -> OutboundMessage {
    let mut writer = MessageWriter::new();
    writer
        .write_u8(ClientOp::StringCmd.into())
        .write_string("disconnect");
    OutboundMessage::Unreliable(writer.into_bytes())
}

pub(crate) fn disconnect_packet<C: ReliableChannel>(channel: &mut C) -> Vec<u8> {
    disconnect_message().frame(channel)
}
