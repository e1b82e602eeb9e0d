mod netchan;

pub use netchan::NetChan;

/// Sequencing and retransmission layer between the transport and the message
/// codec.
///
/// Reliable writes accumulate until the next [`transmit`](Self::transmit),
/// which decides whether they ride along with that packet or wait for the
/// previous reliable block to be acknowledged.
pub trait ReliableChannel: Send + 'static {
    fn setup(&mut self, qport: u16);

    fn reset(&mut self);

    /// Frames `payload` as unreliable data; `None` produces a bare
    /// keepalive/ack packet that still carries pending reliable data.
    fn transmit(&mut self, payload: Option<&[u8]>) -> Vec<u8>;

    /// Returns the application payload of `raw` once it is accepted in
    /// sequence, `None` for stale, duplicate or malformed packets.
    fn process(&mut self, raw: &[u8]) -> Option<Vec<u8>>;

    fn write_reliable_byte(&mut self, value: u8);

    fn write_reliable_string(&mut self, value: &str);
}
