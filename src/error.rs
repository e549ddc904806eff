//! Error types surfaced by this crate.
//!
//! Each failure surface named in the protocol gets its own error type, kept
//! next to the code that returns it rather than collected into one
//! kitchen-sink enum. [`ReadPacketError`] is the one callers see most often:
//! every other error it carries, save for [`ChannelProtocolViolation`], is
//! transient and local to a single inbound packet.

use derive_more::{Display, Error};

/// A channel-level or connection-level invariant was broken by the peer.
///
/// Unlike the other errors in this module, this one is fatal: it latches the
/// channel or connection into a faulted state (see `is_faulted`/`get_error`
/// accessors) until [`reset`](crate::channel::Channel::reset) is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum ChannelProtocolViolation {
    /// A fragment declared an index at or past `num_fragments`.
    #[display("fragment index {index} out of range for {num_fragments} fragments")]
    FragmentIndexOutOfRange {
        /// Fragment index the peer sent.
        index: u32,
        /// Number of fragments the block declares.
        num_fragments: u32,
    },
    /// A message declared a `type_id` outside the registered factory range.
    #[display("unknown message type id {type_id}")]
    UnknownMessageType {
        /// The offending type id.
        type_id: u16,
    },
}

/// Inbound packet or channel payload could not be accepted.
///
/// Every variant except [`ReadPacketError::Protocol`] is transient: the
/// packet is dropped, a counter is incremented, and the channel remains
/// usable. [`ReadPacketError::Protocol`] is fatal; see
/// [`ChannelProtocolViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum ReadPacketError {
    /// Deserialization ran past the end of the buffer, hit an out-of-range
    /// `int_range` value, or failed a `check` marker.
    #[display("malformed packet")]
    Malformed,
    /// An inbound message id landed beyond the receive window.
    ///
    /// The whole packet is rejected (not just the message) so that the
    /// sender's retransmit logic is not fooled by a partial ack.
    #[display("message id {id} is beyond the receive window")]
    EarlyMessage {
        /// The offending message id.
        id: u16,
    },
    /// A large-block fragment declared a `block_size` that does not match the
    /// block currently being reassembled.
    #[display("fragment declares block size {declared}, expected {expected}")]
    BlockSizeMismatch {
        /// Size the fragment declared.
        declared: u32,
        /// Size of the block already in progress.
        expected: u32,
    },
    /// A channel or connection invariant was violated; fatal.
    #[display("protocol violation: {_0}")]
    Protocol(#[error(source)] ChannelProtocolViolation),
}

/// [`crate::reliable::ReliableChannel::send_block`] could not enqueue the
/// block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum SendBlockError {
    /// The block is larger than `max_large_block_size`.
    #[display("block of {len} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Length of the rejected block.
        len: usize,
        /// Configured `max_large_block_size`.
        max: usize,
    },
    /// A large block is already being sent on this channel.
    #[display("a large block is already in flight on this channel")]
    AlreadyInFlight,
}

/// [`crate::reliable::ReliableChannel::send_message`] could not enqueue the
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum SendMessageError {
    /// The send queue has no free slot at the next message id, or a large
    /// block currently occupies it.
    #[display("no free send-queue slot; caller must wait for an ack or block completion")]
    QueueFull,
}

/// [`crate::data_block::DataBlockSender::send`] could not start a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum SendDataBlockError {
    /// The block is larger than the sender's configured maximum.
    #[display("block of {len} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Length of the rejected block.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A transfer is already in progress on this sender.
    #[display("a block transfer is already in flight")]
    AlreadyInFlight,
}

/// [`crate::data_block::DataBlockReceiver::process_fragment`] rejected an
/// inbound fragment packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum DataBlockReadError {
    /// The packet could not be parsed.
    #[display("malformed data block fragment packet")]
    Malformed,
    /// The fragment's `block_id` does not match the transfer in progress,
    /// and is not a newer transfer either (stale, already-superseded block).
    #[display("fragment for block {got} does not match in-progress block {expected}")]
    BlockIdMismatch {
        /// Block id the fragment declared.
        got: u16,
        /// Block id currently being reassembled.
        expected: u16,
    },
    /// A fragment declares a `block_size` inconsistent with the block
    /// already in progress.
    #[display("fragment declares block size {declared}, expected {expected}")]
    FragmentSizeMismatch {
        /// Size this fragment declared.
        declared: u32,
        /// Size of the block already in progress.
        expected: u32,
    },
}

/// A config struct failed cross-field validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum ConfigError {
    /// `send_queue_size` exceeded the 32768 bound required to keep
    /// wraparound-aware sequence comparisons valid.
    #[display("send_queue_size {size} exceeds the maximum of 32768")]
    SendQueueTooLarge {
        /// The offending size.
        size: usize,
    },
    /// `max_small_block_size` was not strictly less than `max_large_block_size`.
    #[display(
        "max_small_block_size ({small}) must be less than max_large_block_size ({large})"
    )]
    BlockThresholdsOverlap {
        /// Configured `max_small_block_size`.
        small: usize,
        /// Configured `max_large_block_size`.
        large: usize,
    },
}
