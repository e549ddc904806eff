//! Application messages: the `Message` trait, its shared-ownership handle,
//! and the factory that reconstructs one from a wire `type_id`.
//!
//! In the ownership-strict rewrite a message is not a refcounted object the
//! factory itself tracks: the factory only constructs empty instances, and
//! sharing is `Arc`'s strong count, visible to both the send queue and every
//! [`SentPacketEntry`](crate::reliable::SentPacketEntry) still referencing it.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use crate::{
    bitstream::{BitMeasurer, BitReader, BitWriter},
    error::ChannelProtocolViolation,
};

/// Reserved `type_id` for [`crate::block::BlockMessage`], the carrier for
/// small blocks sent inline through the normal message stream.
pub const BLOCK_MESSAGE_TYPE: u16 = 0;

/// Something that can be carried in a channel's send/receive queue.
///
/// A message knows only how to serialize and measure itself; it has no
/// opinion about sequencing, acking, or which channel it travels on — that
/// state lives in [`SendQueueEntry`](crate::reliable::SendQueueEntry) and
/// [`ReceiveQueueEntry`](crate::reliable::ReceiveQueueEntry).
pub trait Message: fmt::Debug + Send + Sync + Any {
    /// Wire `type_id` identifying which factory entry can reconstruct this
    /// message's concrete type.
    fn type_id(&self) -> u16;

    /// Upcasts to [`Any`] so a caller holding a [`SharedMessage`] can
    /// [`downcast_ref`](Any::downcast_ref) back to the concrete type its own
    /// `type_id` promises.
    fn as_any(&self) -> &dyn Any;

    /// Writes this message's body to `writer`.
    ///
    /// Overflow is not returned here: it is a sticky flag on `writer`
    /// (`writer.is_overflow()`), checked once by the caller after every
    /// message in the packet has been written, per the bit-stream's
    /// overflow-flag contract.
    fn serialize_write(&self, writer: &mut BitWriter);

    /// Reads this message's body from `reader`, overwriting any prior
    /// contents.
    ///
    /// Truncated input sets `reader.is_overflow()` rather than returning an
    /// error from this call directly; the caller checks it once after the
    /// whole message has been read.
    fn serialize_read(&mut self, reader: &mut BitReader<'_>);

    /// Counts the bits [`serialize_write`](Self::serialize_write) would
    /// produce, without allocating or copying the body.
    fn measure_size(&self, measurer: &mut BitMeasurer);
}

/// A message shared between the application and the channel that is sending
/// or has delivered it.
///
/// Cloning an `Arc<dyn Message>` is how a message stays alive in both a
/// `SendQueueEntry` and the `SentPacketEntry` of every packet it rode in,
/// until the last reference is dropped on ack.
pub type SharedMessage = Arc<dyn Message>;

/// A registered constructor for one `type_id`: builds an empty, default
/// instance ready to be filled in by [`Message::serialize_read`].
pub type MessageConstructor = fn() -> Box<dyn Message>;

/// Maps wire `type_id`s to constructors for the concrete message types a
/// connection knows how to receive.
///
/// Both ends of a connection must register identical type ids (a wire-format
/// contract): if a peer sends a `type_id` this factory has no entry for,
/// deserialization fails with
/// [`ChannelProtocolViolation::UnknownMessageType`].
#[derive(Default)]
pub struct MessageFactory {
    constructors: HashMap<u16, MessageConstructor>,
}

impl fmt::Debug for MessageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut type_ids: Vec<_> = self.constructors.keys().copied().collect();
        type_ids.sort_unstable();
        f.debug_struct("MessageFactory")
            .field("type_ids", &type_ids)
            .finish()
    }
}

impl MessageFactory {
    /// Creates an empty factory; callers register their own message types
    /// plus [`BLOCK_MESSAGE_TYPE`] for [`crate::block::BlockMessage`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` under `type_id`.
    ///
    /// Registering over an existing `type_id` replaces it; callers are
    /// expected to register each type exactly once during setup.
    pub fn register(&mut self, type_id: u16, constructor: MessageConstructor) {
        self.constructors.insert(type_id, constructor);
    }

    /// Constructs an empty instance for `type_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelProtocolViolation::UnknownMessageType`] if no
    /// constructor was registered for `type_id`.
    pub fn create(&self, type_id: u16) -> Result<Box<dyn Message>, ChannelProtocolViolation> {
        self.constructors
            .get(&type_id)
            .map(|ctor| ctor())
            .ok_or(ChannelProtocolViolation::UnknownMessageType { type_id })
    }

    /// Whether a constructor is registered for `type_id`.
    #[must_use]
    pub fn contains(&self, type_id: u16) -> bool {
        self.constructors.contains_key(&type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Ping;

    impl Message for Ping {
        fn type_id(&self) -> u16 {
            1
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn serialize_write(&self, _writer: &mut BitWriter) {}

        fn serialize_read(&mut self, _reader: &mut BitReader<'_>) {}

        fn measure_size(&self, _measurer: &mut BitMeasurer) {}
    }

    #[test]
    fn create_known_type() {
        let mut factory = MessageFactory::new();
        factory.register(1, || Box::new(Ping));
        let msg = factory.create(1).unwrap();
        assert_eq!(1, msg.type_id());
    }

    #[test]
    fn create_unknown_type_errors() {
        let factory = MessageFactory::new();
        let err = factory.create(7).unwrap_err();
        assert_eq!(ChannelProtocolViolation::UnknownMessageType { type_id: 7 }, err);
    }
}
