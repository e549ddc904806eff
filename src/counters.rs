//! Per-channel observability counters.
//!
//! The session layer has no other way to build a timeout or liveness policy
//! on top of a channel without numbers to poll, so every channel exposes
//! one of these alongside its queues.

/// Saturating `u64` counters tracked by a [`ReliableChannel`](crate::reliable::ReliableChannel).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Messages successfully handed to `send_message`/`send_block` (small
    /// path).
    pub messages_sent: u64,
    /// Messages delivered to the application via `receive_message`.
    pub messages_received: u64,
    /// Inbound messages dropped for arriving before `receive_message_id`.
    pub messages_discarded_late: u64,
    /// Inbound messages that caused their whole packet to be rejected for
    /// landing beyond the receive window.
    pub messages_discarded_early: u64,
    /// Packets this channel contributed a payload to.
    pub packets_sent: u64,
    /// Packets this channel successfully parsed a payload from.
    pub packets_received: u64,
    /// Inbound packets rejected during parsing (malformed bits, check-marker
    /// mismatch, or an early message).
    pub read_packet_failures: u64,
    /// Large blocks started via `send_block`.
    pub send_large_block_count: u64,
    /// Large blocks fully reassembled on the receive side.
    pub receive_large_block_count: u64,
    /// Fragments sent (including resends).
    pub fragments_sent: u64,
    /// Fragments accepted into a reassembly buffer.
    pub fragments_received: u64,
    /// Fragments rejected (block-size mismatch, out-of-range index, or
    /// already-received duplicate).
    pub fragments_discarded: u64,
}

impl Counters {
    /// A fresh, all-zero set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes every field, as called by `ReliableChannel::reset`.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_everything() {
        let mut counters = Counters {
            messages_sent: 5,
            fragments_discarded: 2,
            ..Counters::default()
        };
        counters.reset();
        assert_eq!(Counters::default(), counters);
    }
}
