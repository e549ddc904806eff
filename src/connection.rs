//! [`Connection`]: owns a [`ChannelStructure`]'s channel instances, assembles
//! and parses packets, and drives connection-level ack bookkeeping.
//!
//! This is the thin layer above a channel that actually touches the wire: it
//! knows nothing about message semantics, only how to multiplex N channels'
//! opaque payloads behind one packet header and fan `ack`/`ack_bits` back
//! out to each of them.

use log::{trace, warn};

use crate::{
    ack::Acknowledge,
    bitstream::{BitReader, BitWriter},
    channel::{Channel, ChannelStructure},
    error::ReadPacketError,
    seq::PacketSeq,
    sliding_window::CursorWindow,
};

/// Counters tracked at the connection level, parallel to each channel's own
/// [`Counters`](crate::counters::Counters) but scoped to packet framing
/// rather than message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounters {
    /// Packets successfully written by [`Connection::write_packet`].
    pub packets_written: u64,
    /// Packets accepted by [`Connection::read_packet`].
    pub packets_read: u64,
    /// Inbound packets rejected as duplicates or too old for the received-
    /// packet window.
    pub packets_stale: u64,
    /// Inbound packets rejected during header or channel-payload parsing.
    pub packets_malformed: u64,
}

impl ConnectionCounters {
    /// A fresh, all-zero set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Owns every channel in a [`ChannelStructure`], multiplexing them behind a
/// single 16-bit packet sequence space.
///
/// `C` is the concrete channel type (almost always
/// [`ReliableChannel`](crate::reliable::ReliableChannel)); `Connection` only
/// ever touches it through the [`Channel`] trait.
pub struct Connection<C> {
    channels: Vec<C>,
    send_sequence: u16,
    received: CursorWindow,
    received_window_size: usize,
    counters: ConnectionCounters,
}

impl<C: Channel> Connection<C> {
    /// Builds a connection from a [`ChannelStructure`] by instantiating one
    /// channel per descriptor via `build`.
    ///
    /// `received_window_size` bounds how many packet sequences back the
    /// connection remembers for duplicate/too-old rejection and ack-bits
    /// generation; 32 is the minimum needed to fill every bit of
    /// [`Acknowledge::bits`], but a larger window tolerates longer bursts of
    /// reordering.
    pub fn new<D>(
        structure: &ChannelStructure<D>,
        received_window_size: usize,
        mut build: impl FnMut(&D) -> C,
    ) -> Self {
        let channels = structure.iter().map(&mut build).collect();
        Self {
            channels,
            send_sequence: 0,
            received: CursorWindow::new(received_window_size),
            received_window_size,
            counters: ConnectionCounters::new(),
        }
    }

    /// The channels this connection owns, in structure order.
    #[must_use]
    pub fn channels(&self) -> &[C] {
        &self.channels
    }

    /// Mutable access to a channel by index, for application code that sends
    /// or receives messages on a specific channel.
    #[must_use]
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut C> {
        self.channels.get_mut(index)
    }

    /// Observability counters accumulated since construction.
    #[must_use]
    pub fn counters(&self) -> ConnectionCounters {
        self.counters
    }

    /// Assembles one packet: a header (`sequence`, `ack`, `ack_bits`) followed
    /// by each channel's payload behind a presence bit.
    ///
    /// Always produces a packet, even if every channel had nothing to send
    /// (a zero-payload packet still carries fresh ack information).
    pub fn write_packet(&mut self, now: f64) -> Vec<u8> {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);

        let (ack, ack_bits) = self.received.ack_bits();

        let mut writer = BitWriter::new();
        writer.bits(u32::from(sequence), 16);
        writer.bits(u32::from(ack), 16);
        writer.bits(ack_bits, 32);

        for channel in &mut self.channels {
            match channel.get_payload(sequence, now) {
                Some(payload) => {
                    writer.bits(1, 1);
                    writer.align();
                    writer.bytes(&(payload.len() as u32).to_be_bytes());
                    writer.bytes(&payload);
                }
                None => writer.bits(0, 1),
            }
        }

        self.counters.packets_written += 1;
        trace!("wrote packet {sequence} (ack={ack}, ack_bits={ack_bits:032b})");
        writer.finish()
    }

    /// Parses `bytes` as a packet, applies its acks to every channel, and
    /// dispatches each present channel payload to `process_payload` in
    /// order.
    ///
    /// Rejects duplicate or too-old packets up front, before touching any
    /// channel state. On any parse error, the packet is
    /// abandoned; channels already processed earlier in this same packet
    /// keep whatever state they already applied, matching the "errors are
    /// local to a single channel's payload" policy — only that one payload's
    /// effect (and any payload after it in this packet) is rolled back by
    /// simply never being applied.
    ///
    /// # Errors
    ///
    /// Returns [`ReadPacketError::Malformed`] if the header cannot be parsed
    /// or a duplicate/stale packet is rejected, or whatever a channel's
    /// `process_payload` returns.
    pub fn read_packet(&mut self, bytes: &[u8]) -> Result<(), ReadPacketError> {
        let mut reader = BitReader::new(bytes);
        let sequence = reader.bits(16) as u16;
        let ack = reader.bits(16) as u16;
        let ack_bits = reader.bits(32);
        if reader.is_overflow() {
            self.counters.packets_malformed += 1;
            return Err(ReadPacketError::Malformed);
        }

        if !self.received.would_accept(sequence) {
            self.counters.packets_stale += 1;
            trace!("dropping duplicate or stale packet {sequence}");
            return Err(ReadPacketError::Malformed);
        }

        let acks = Acknowledge::new(PacketSeq::new(ack), ack_bits);
        for channel in &mut self.channels {
            for acked in acks.seqs() {
                channel.process_ack(acked.get());
            }
        }

        for channel in &mut self.channels {
            let has_payload = reader.bits(1) == 1;
            if !has_payload {
                continue;
            }
            reader.align();
            let len_bytes = reader.read_bytes(4);
            let len = u32::from_be_bytes(len_bytes.try_into().expect("read_bytes(4) yields 4 bytes")) as usize;
            if reader.is_overflow() || len > bytes.len() {
                self.counters.packets_malformed += 1;
                return Err(ReadPacketError::Malformed);
            }
            let payload = reader.read_bytes(len);
            if reader.is_overflow() {
                self.counters.packets_malformed += 1;
                return Err(ReadPacketError::Malformed);
            }

            if let Err(err) = channel.process_payload(sequence, &payload) {
                self.counters.packets_malformed += 1;
                warn!("packet {sequence} rejected: {err}");
                return Err(err);
            }
        }

        self.received.insert(sequence);
        self.counters.packets_read += 1;
        Ok(())
    }

    /// Resets every channel and the connection-level received-packet window,
    /// as if newly constructed. Does not reset the send sequence: a packet
    /// sequence is never reused after a reset.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        self.received = CursorWindow::new(self.received_window_size);
        self.counters = ConnectionCounters::new();
    }

    /// Whether any channel has latched a fatal protocol violation.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.channels.iter().any(Channel::is_faulted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        block::BlockMessage,
        channel::ChannelIndex,
        message::{MessageFactory, BLOCK_MESSAGE_TYPE},
        reliable::{ReliableChannel, ReliableChannelConfig},
    };

    fn factory() -> Arc<MessageFactory> {
        let mut factory = MessageFactory::new();
        factory.register(BLOCK_MESSAGE_TYPE, || Box::new(BlockMessage::default()));
        Arc::new(factory)
    }

    fn make_connection() -> Connection<ReliableChannel> {
        let structure = ChannelStructure::new(vec![ReliableChannelConfig::default()]);
        let factory = factory();
        Connection::new(&structure, 64, |config| ReliableChannel::new(config.clone(), factory.clone()).unwrap())
    }

    #[test]
    fn write_then_read_delivers_message() {
        let mut sender = make_connection();
        let mut receiver = make_connection();

        sender
            .channel_mut(ChannelIndex(0).0 as usize)
            .unwrap()
            .send_message(Arc::new(BlockMessage::new(vec![9, 9, 9])))
            .unwrap();

        let packet = sender.write_packet(0.0);
        receiver.read_packet(&packet).unwrap();

        let received = receiver.channel_mut(0).unwrap().receive_message();
        assert!(received.is_some());
    }

    #[test]
    fn duplicate_packet_is_rejected() {
        let mut receiver = make_connection();
        let mut sender = make_connection();
        let packet = sender.write_packet(0.0);

        receiver.read_packet(&packet).unwrap();
        let err = receiver.read_packet(&packet).unwrap_err();
        assert_eq!(ReadPacketError::Malformed, err);
        assert_eq!(1, receiver.counters().packets_stale);
    }

    #[test]
    fn ack_reaches_the_originating_channel() {
        let mut sender = make_connection();
        let mut receiver = make_connection();

        sender.channel_mut(0).unwrap().send_message(Arc::new(BlockMessage::default())).unwrap();
        let data_packet = sender.write_packet(0.0);
        receiver.read_packet(&data_packet).unwrap();

        // The receiver's next packet acks sequence 0; feeding it back to the
        // sender should release its send-queue slot.
        let ack_packet = receiver.write_packet(0.0);
        sender.read_packet(&ack_packet).unwrap();

        assert!(sender.channel_mut(0).unwrap().can_send_message());
    }
}
