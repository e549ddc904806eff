//! The `Channel` trait and the locked-once structure describing how many
//! channels a connection has and in what order.
//!
//! `Channel` is the uniform seam [`Connection`](crate::connection::Connection) drives
//! every concrete channel implementation through (today, only
//! [`ReliableChannel`](crate::reliable::ReliableChannel)), and
//! `ChannelStructure` is the ordered, agreed-upon list of channel configs
//! both ends of a connection must instantiate identically — composition
//! itself is a wire-format contract, not something negotiated at runtime.

use crate::error::ReadPacketError;

/// Per-packet payload bytes produced by one channel, already serialized.
///
/// Opaque to [`Connection`](crate::connection::Connection): it only knows
/// how to write a presence bit followed by these bytes (and, symmetrically,
/// to read them back and hand them to [`Channel::process_payload`]).
pub type ChannelPayload = Vec<u8>;

/// The uniform seam every channel implementation is driven through.
///
/// A `Connection` never downcasts to a concrete channel type; it only calls
/// these five methods in packet-assembly and packet-parsing order.
pub trait Channel {
    /// Produces this channel's payload for the packet being assembled at
    /// `packet_sequence`, or `None` if the channel has nothing to send this
    /// tick (still a valid packet: a packet with no channel payloads at all
    /// is well-formed).
    fn get_payload(&mut self, packet_sequence: u16, now: f64) -> Option<ChannelPayload>;

    /// Parses and applies `payload`, which arrived in the packet numbered
    /// `packet_sequence`.
    ///
    /// # Errors
    ///
    /// Returns a transient [`ReadPacketError`] (`Malformed`, `EarlyMessage`,
    /// `BlockSizeMismatch`) if this payload alone should be rejected without
    /// disturbing the rest of the channel's state, or
    /// [`ReadPacketError::Protocol`] if the payload violates a channel-level
    /// invariant and the channel must be faulted until
    /// [`reset`](Self::reset).
    fn process_payload(
        &mut self,
        packet_sequence: u16,
        payload: &[u8],
    ) -> Result<(), ReadPacketError>;

    /// Notifies this channel that `packet_sequence` (one it previously
    /// returned a payload for) has been acknowledged by the peer.
    fn process_ack(&mut self, packet_sequence: u16);

    /// Clears all queued/in-flight state and counters, as if newly
    /// constructed.
    fn reset(&mut self);

    /// Whether this channel has latched a fatal
    /// [`ChannelProtocolViolation`] and needs [`reset`](Self::reset) before
    /// further use.
    fn is_faulted(&self) -> bool;
}

/// Identifies a channel's position within a [`ChannelStructure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelIndex(pub u32);

/// An ordered, locked-once list of channel descriptors.
///
/// Built once at connection setup and never mutated afterward — both ends
/// must construct one with identical channel count and config, or every
/// packet fails to parse the moment the two sides' payload framing diverges.
#[derive(Debug, Clone)]
pub struct ChannelStructure<C> {
    descriptors: Vec<C>,
}

impl<C> ChannelStructure<C> {
    /// Locks in `descriptors` as this connection's channel structure.
    ///
    /// # Panics
    ///
    /// Panics if `descriptors` is empty; a connection with zero channels has
    /// nothing to multiplex and is almost certainly a setup error.
    #[must_use]
    pub fn new(descriptors: Vec<C>) -> Self {
        assert!(!descriptors.is_empty(), "a connection needs at least one channel");
        Self { descriptors }
    }

    /// Number of channels in this structure.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.descriptors.len()
    }

    /// Iterates descriptors in channel order.
    pub fn iter(&self) -> impl Iterator<Item = &C> {
        self.descriptors.iter()
    }

    /// Descriptor at `index`, if any.
    #[must_use]
    pub fn get(&self, index: ChannelIndex) -> Option<&C> {
        self.descriptors.get(index.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_preserves_order() {
        let structure = ChannelStructure::new(vec!["reliable", "unreliable"]);
        assert_eq!(2, structure.num_channels());
        assert_eq!(Some(&"reliable"), structure.get(ChannelIndex(0)));
        assert_eq!(Some(&"unreliable"), structure.get(ChannelIndex(1)));
        assert_eq!(None, structure.get(ChannelIndex(2)));
    }

    #[test]
    #[should_panic(expected = "at least one channel")]
    fn empty_structure_panics() {
        let _: ChannelStructure<()> = ChannelStructure::new(Vec::new());
    }
}
