//! Blocks: caller-owned byte arrays sent either inline (small) or fragmented
//! (large).
//!
//! A block has no serialization format of its own — only [`BlockMessage`],
//! the small-block carrier, implements [`Message`]. Large blocks never
//! become a `BlockMessage`; they are fragmented directly by
//! [`crate::reliable::ReliableChannel::send_block`] and reassembled by
//! [`crate::frag::FragmentReceiver`] into a `BlockMessage` only once
//! complete, so the application always receives blocks (small or large)
//! through the same `Message` the receive queue already knows how to deliver.

use crate::{
    bitstream::{BitMeasurer, BitReader, BitWriter},
    message::{Message, BLOCK_MESSAGE_TYPE},
};

/// Upper bound on a small block's length as encoded on the wire.
///
/// This is a fixed wire-format ceiling, not the configurable
/// `max_small_block_size` threshold that decides whether a block travels as
/// a `BlockMessage` or as large-block fragments: both ends of a connection
/// must agree on the bit width of this length field regardless of how either
/// side's `max_small_block_size` is configured.
pub const MAX_SMALL_BLOCK_WIRE_SIZE: u32 = u16::MAX as u32;

/// An owned block, either handed to [`ReliableChannel::send_block`] or
/// produced by `receive_message` once a large block finishes reassembling.
///
/// [`ReliableChannel::send_block`]: crate::reliable::ReliableChannel::send_block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMessage {
    bytes: Vec<u8>,
}

impl BlockMessage {
    /// Wraps `bytes` as a block.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The block's contents.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes this message, returning its owned bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for BlockMessage {
    fn default() -> Self {
        Self { bytes: Vec::new() }
    }
}

impl Message for BlockMessage {
    fn type_id(&self) -> u16 {
        BLOCK_MESSAGE_TYPE
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn serialize_write(&self, writer: &mut BitWriter) {
        writer.int_range(self.bytes.len() as u32, 0, MAX_SMALL_BLOCK_WIRE_SIZE);
        writer.align();
        writer.bytes(&self.bytes);
    }

    fn serialize_read(&mut self, reader: &mut BitReader<'_>) {
        let len = reader.int_range(0, MAX_SMALL_BLOCK_WIRE_SIZE);
        reader.align();
        self.bytes = reader.read_bytes(len as usize);
    }

    fn measure_size(&self, measurer: &mut BitMeasurer) {
        measurer.int_range(0, MAX_SMALL_BLOCK_WIRE_SIZE);
        measurer.align();
        measurer.bytes(self.bytes.len());
    }
}

/// Read-only progress report for an in-flight large block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTransferStatus {
    /// Message id the block occupies.
    pub block_id: u16,
    /// Total number of fragments the block splits into.
    pub num_fragments: u32,
    /// Number of those fragments acked (send side) or received (receive side)
    /// so far.
    pub num_completed_fragments: u32,
}
