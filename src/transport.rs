//! The `Transport` contract every packet producer/consumer in this crate is
//! built against.
//!
//! Sending and receiving datagrams, resolving addresses, and every concern
//! of an actual socket are explicitly out of scope: this trait is the whole
//! of that contract, small enough that tests supply an in-memory
//! lossy/duplicating/reordering double instead of touching a real socket.

/// A best-effort, unordered, possibly-duplicating datagram transport.
///
/// Implementations are not required to be reliable in any way — that is the
/// entire reason this crate exists. They are required to never invent bytes
/// that were not handed to [`send`](Self::send).
pub trait Transport {
    /// Peer address type (a socket address, an in-memory test id, whatever
    /// the caller's transport needs).
    type Address;

    /// Sends `bytes` to `to`. Best-effort: may be dropped, duplicated, or
    /// reordered relative to other sends.
    fn send(&mut self, to: &Self::Address, bytes: &[u8]);

    /// Returns the next available inbound datagram, if any, without
    /// blocking.
    fn recv(&mut self) -> Option<(Self::Address, Vec<u8>)>;

    /// Largest packet this transport will carry. The core never produces a
    /// packet exceeding this.
    fn max_packet_size(&self) -> usize;
}
