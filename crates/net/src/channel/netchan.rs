use crate::protocol::{MAX_MSGLEN, MessageReader, MessageWriter};

use super::ReliableChannel;

const RELIABLE_BIT: u32 = 1 << 31;
const CONNECTIONLESS: u32 = u32::MAX;

/// Client side of the Quake II network channel.
///
/// Packet header: `sequence | reliable<<31`, `ack | reliable_ack<<31`, then
/// the client's qport. Only one reliable block is in flight at a time; it is
/// re-sent until the server echoes its reliable bit back.
#[derive(Debug, Clone)]
pub struct NetChan {
    qport: u16,
    outgoing_sequence: u32,
    incoming_sequence: u32,
    incoming_acknowledged: u32,
    incoming_reliable_acknowledged: bool,
    incoming_reliable_sequence: bool,
    reliable_sequence: bool,
    last_reliable_sequence: u32,
    pending_reliable: MessageWriter,
    reliable_in_flight: Vec<u8>,
    dropped: u32,
}

impl Default for NetChan {
    fn default() -> Self {
        Self::new()
    }
}

impl NetChan {
    pub fn new() -> Self {
        Self {
            qport: 0,
            outgoing_sequence: 1,
            incoming_sequence: 0,
            incoming_acknowledged: 0,
            incoming_reliable_acknowledged: false,
            incoming_reliable_sequence: false,
            reliable_sequence: false,
            last_reliable_sequence: 0,
            pending_reliable: MessageWriter::new(),
            reliable_in_flight: Vec::new(),
            dropped: 0,
        }
    }

    pub fn qport(&self) -> u16 {
        self.qport
    }

    pub fn outgoing_sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    pub fn incoming_sequence(&self) -> u32 {
        self.incoming_sequence
    }

    /// Packets skipped between the last two accepted ones.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn has_unacked_reliable(&self) -> bool {
        !self.reliable_in_flight.is_empty()
    }

    fn needs_resend(&self) -> bool {
        self.incoming_acknowledged > self.last_reliable_sequence
            && self.incoming_reliable_acknowledged != self.reliable_sequence
    }
}

impl ReliableChannel for NetChan {
    fn setup(&mut self, qport: u16) {
        *self = Self::new();
        self.qport = qport;
    }

    fn reset(&mut self) {
        let qport = self.qport;
        self.setup(qport);
    }

    fn transmit(&mut self, payload: Option<&[u8]>) -> Vec<u8> {
        let mut send_reliable = self.needs_resend();

        if self.reliable_in_flight.is_empty() && !self.pending_reliable.is_empty() {
            self.reliable_in_flight = std::mem::take(&mut self.pending_reliable).into_bytes();
            self.reliable_sequence = !self.reliable_sequence;
            send_reliable = true;
        }

        let mut w1 = self.outgoing_sequence & !RELIABLE_BIT;
        if send_reliable {
            w1 |= RELIABLE_BIT;
        }
        let mut w2 = self.incoming_sequence & !RELIABLE_BIT;
        if self.incoming_reliable_sequence {
            w2 |= RELIABLE_BIT;
        }

        self.outgoing_sequence = self.outgoing_sequence.wrapping_add(1);

        let mut packet = MessageWriter::with_capacity(MAX_MSGLEN);
        packet.write_u32(w1).write_u32(w2).write_u16(self.qport);

        if send_reliable {
            packet.write_bytes(&self.reliable_in_flight);
            self.last_reliable_sequence = self.outgoing_sequence;
        }

        if let Some(data) = payload {
            if packet.len() + data.len() <= MAX_MSGLEN {
                packet.write_bytes(data);
            } else {
                log::debug!(
                    "Dropping {} byte unreliable payload, no room in packet",
                    data.len()
                );
            }
        }

        packet.into_bytes()
    }

    fn process(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        let mut reader = MessageReader::new(raw);
        let w1 = reader.read_u32().ok()?;
        let w2 = reader.read_u32().ok()?;

        if w1 == CONNECTIONLESS {
            return None;
        }

        let reliable_message = w1 & RELIABLE_BIT != 0;
        let reliable_ack = w2 & RELIABLE_BIT != 0;
        let sequence = w1 & !RELIABLE_BIT;
        let sequence_ack = w2 & !RELIABLE_BIT;

        if sequence <= self.incoming_sequence {
            log::debug!(
                "Out of order packet {} at {}",
                sequence,
                self.incoming_sequence
            );
            return None;
        }

        self.dropped = sequence - (self.incoming_sequence + 1);

        if reliable_ack == self.reliable_sequence {
            self.reliable_in_flight.clear();
        }

        self.incoming_sequence = sequence;
        self.incoming_acknowledged = sequence_ack;
        self.incoming_reliable_acknowledged = reliable_ack;
        if reliable_message {
            self.incoming_reliable_sequence = !self.incoming_reliable_sequence;
        }

        let payload = reader.rest();
        if payload.is_empty() {
            None
        } else {
            Some(payload.to_vec())
        }
    }

    fn write_reliable_byte(&mut self, value: u8) {
        self.pending_reliable.write_u8(value);
    }

    fn write_reliable_string(&mut self, value: &str) {
        self.pending_reliable.write_string(value);
    }
}
