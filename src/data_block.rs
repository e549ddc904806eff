//! Out-of-band bulk block transfer: the same split/reassemble algorithm
//! [`ReliableChannel`](crate::reliable::ReliableChannel) uses for its
//! large-block path, but standing alone outside any channel or message id
//! space.
//!
//! Meant for one-shot bulk transfers (level data, initial game state) that
//! do not belong in the ordinary message stream. Reuses
//! [`frag::split`]/[`frag::FragmentReceiver`] rather than re-deriving
//! fragment bookkeeping, and [`TokenBucket`] for `fragments_per_second`
//! output shaping.

use log::{debug, trace};

use crate::{
    bitstream::{BitReader, BitWriter},
    block::BlockTransferStatus,
    error::{DataBlockReadError, SendDataBlockError},
    frag::{self, FragmentReceiver, ReassembleError},
    limit::TokenBucket,
};

#[derive(Debug, Clone, Copy)]
struct FragmentSendState {
    acked: bool,
}

struct SendState {
    block_id: u16,
    bytes: Vec<u8>,
    fragment_size: usize,
    fragments: Vec<FragmentSendState>,
    num_acked: u32,
    next_scan: u32,
}

impl SendState {
    fn num_fragments(&self) -> u32 {
        self.fragments.len() as u32
    }
}

/// Sends a single block, outside any channel's message stream, as a stream
/// of fixed-size fragments rate-limited to `fragments_per_second`.
///
/// Only one transfer may be in flight at a time; call
/// [`send`](Self::send) again once [`is_complete`](Self::is_complete).
pub struct DataBlockSender {
    fragment_size: usize,
    max_block_size: usize,
    bucket: TokenBucket,
    state: Option<SendState>,
}

impl DataBlockSender {
    /// Creates a sender that splits blocks into `fragment_size`-byte pieces,
    /// rejects anything over `max_block_size`, and emits at most
    /// `fragments_per_second` fragments per second of wall-clock time
    /// (starting the token bucket full as of `now`).
    #[must_use]
    pub fn new(fragment_size: usize, max_block_size: usize, fragments_per_second: f64, now: f64) -> Self {
        Self {
            fragment_size,
            max_block_size,
            bucket: TokenBucket::new(fragments_per_second, now),
            state: None,
        }
    }

    /// Starts sending `block_id`/`bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`SendDataBlockError::TooLarge`] if `bytes.len()` exceeds the
    /// configured maximum, or [`SendDataBlockError::AlreadyInFlight`] if a
    /// transfer is already in progress.
    pub fn send(&mut self, block_id: u16, bytes: Vec<u8>) -> Result<(), SendDataBlockError> {
        if bytes.len() > self.max_block_size {
            return Err(SendDataBlockError::TooLarge { len: bytes.len(), max: self.max_block_size });
        }
        if self.state.is_some() {
            return Err(SendDataBlockError::AlreadyInFlight);
        }

        let num_fragments = frag::num_fragments(bytes.len() as u32, self.fragment_size as u32).max(1);
        debug!("starting data block send: id={block_id}, size={}, fragments={num_fragments}", bytes.len());
        self.state = Some(SendState {
            block_id,
            bytes,
            fragment_size: self.fragment_size,
            fragments: vec![FragmentSendState { acked: false }; num_fragments as usize],
            num_acked: 0,
            next_scan: 0,
        });
        Ok(())
    }

    /// Whether a transfer is in progress.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.is_none()
    }

    /// Progress of the in-flight transfer, if any.
    #[must_use]
    pub fn status(&self) -> Option<BlockTransferStatus> {
        self.state.as_ref().map(|state| BlockTransferStatus {
            block_id: state.block_id,
            num_fragments: state.num_fragments(),
            num_completed_fragments: state.num_acked,
        })
    }

    /// Produces the next fragment packet to send, consuming one token from
    /// the rate limiter, or `None` if there is nothing to send right now
    /// (no transfer in progress, or the token bucket is empty).
    ///
    /// Unlike [`ReliableChannel`](crate::reliable::ReliableChannel)'s
    /// resend-rate gating, every call here either emits a fragment or
    /// returns `None`; the caller is expected to poll at whatever cadence it
    /// drives `now` forward at, since there is no separate concept of
    /// "already sent, not yet due for resend" — an unacked fragment is
    /// simply still eligible every time the bucket allows one.
    pub fn next_fragment(&mut self, now: f64) -> Option<Vec<u8>> {
        self.bucket.refill(now);
        let state = self.state.as_mut()?;
        if !self.bucket.try_consume_one() {
            return None;
        }

        let n = state.num_fragments();
        let mut chosen = None;
        for offset in 0..n {
            let id = (state.next_scan + offset) % n;
            if !state.fragments[id as usize].acked {
                chosen = Some(id);
                break;
            }
        }
        let fragment_id = chosen?;
        state.next_scan = (fragment_id + 1) % n;

        let fragments = frag::split(&state.bytes, state.fragment_size);
        let (_, data) = fragments[fragment_id as usize];
        let block_size = state.bytes.len() as u32;
        let block_id = state.block_id;

        let mut writer = BitWriter::new();
        writer.int_range(u32::from(block_id), 0, u32::from(u16::MAX));
        writer.int_range(n, 0, u32::MAX);
        writer.int_range(fragment_id, 0, n - 1);
        if fragment_id == 0 {
            writer.bits(block_size, 32);
        }
        writer.int_range(data.len() as u32, 0, self.fragment_size as u32);
        writer.align();
        writer.bytes(data);

        trace!("sending block {block_id} fragment {fragment_id}/{n}");
        Some(writer.finish())
    }

    /// Applies an inbound `(block_id, fragment_id)` ack. A mismatched
    /// `block_id` (an ack for a transfer already superseded) is silently
    /// ignored.
    pub fn ack(&mut self, block_id: u16, fragment_id: u32) {
        let Some(state) = &mut self.state else { return };
        if state.block_id != block_id {
            return;
        }
        let Some(fragment) = state.fragments.get_mut(fragment_id as usize) else { return };
        if fragment.acked {
            return;
        }
        fragment.acked = true;
        state.num_acked += 1;
        if state.num_acked == state.num_fragments() {
            debug!("data block {block_id} fully acked");
            self.state = None;
        }
    }
}

/// Reassembles a single block from fragment packets produced by a peer's
/// [`DataBlockSender`], outside any channel's message stream.
pub struct DataBlockReceiver {
    fragment_size: usize,
    state: Option<(u16, FragmentReceiver)>,
    completed: Option<(u16, Vec<u8>)>,
}

impl DataBlockReceiver {
    /// Creates a receiver expecting fragments of at most `fragment_size`
    /// bytes.
    #[must_use]
    pub fn new(fragment_size: usize) -> Self {
        Self { fragment_size, state: None, completed: None }
    }

    /// Parses and applies one fragment packet produced by
    /// [`DataBlockSender::next_fragment`].
    ///
    /// Returns the `(block_id, fragment_id)` to ack back to the sender, or
    /// `Err` if the packet could not be applied.
    ///
    /// # Errors
    ///
    /// Returns [`DataBlockReadError::Malformed`] if the packet cannot be
    /// parsed, [`DataBlockReadError::BlockIdMismatch`] if the fragment
    /// belongs to a stale transfer, or
    /// [`DataBlockReadError::FragmentSizeMismatch`] if the declared block
    /// size disagrees with the transfer in progress.
    pub fn process_fragment(&mut self, bytes: &[u8]) -> Result<(u16, u32), DataBlockReadError> {
        let mut reader = BitReader::new(bytes);
        let block_id = reader.int_range(0, u32::from(u16::MAX)) as u16;
        let num_fragments = reader.int_range(0, u32::MAX);
        if num_fragments == 0 {
            return Err(DataBlockReadError::Malformed);
        }
        let fragment_id = reader.int_range(0, num_fragments - 1);
        let declared_block_size = if fragment_id == 0 { Some(reader.bits(32)) } else { None };
        let len = reader.int_range(0, self.fragment_size as u32) as usize;
        reader.align();
        let data = reader.read_bytes(len);
        if reader.is_overflow() {
            return Err(DataBlockReadError::Malformed);
        }

        if let Some((existing_id, _)) = &self.state {
            if *existing_id != block_id {
                return Err(DataBlockReadError::BlockIdMismatch { got: block_id, expected: *existing_id });
            }
        } else {
            let Some(block_size) = declared_block_size else {
                return Err(DataBlockReadError::Malformed);
            };
            trace!("starting data block receive: id={block_id}, size={block_size}, fragments={num_fragments}");
            self.state = Some((block_id, FragmentReceiver::new(self.fragment_size, block_size, num_fragments)));
        }

        let (_, receiver) = self.state.as_mut().expect("just initialized if absent");
        let expected_block_size = receiver.block_size();
        match receiver.insert(declared_block_size.unwrap_or(expected_block_size), fragment_id, &data) {
            Ok(()) => {}
            Err(ReassembleError::BlockSizeMismatch { declared, expected }) => {
                self.state = None;
                return Err(DataBlockReadError::FragmentSizeMismatch { declared, expected });
            }
            Err(ReassembleError::IndexOutOfRange { .. }) => return Err(DataBlockReadError::Malformed),
        }

        if receiver.is_complete() {
            let (block_id, receiver) = self.state.take().expect("state present in this branch");
            debug!("data block {block_id} fully reassembled");
            self.completed = Some((block_id, receiver.into_block()));
        }

        Ok((block_id, fragment_id))
    }

    /// Takes the most recently completed block, if any, clearing it so it is
    /// only returned once.
    pub fn receive_completed(&mut self) -> Option<(u16, Vec<u8>)> {
        self.completed.take()
    }

    /// Peeks the completed block without consuming it.
    #[must_use]
    pub fn get_block(&self) -> Option<&(u16, Vec<u8>)> {
        self.completed.as_ref()
    }
}

/// Builds the explicit `(block_id, fragment_id)` ack packet a
/// [`DataBlockReceiver`] sends back for every fragment it accepts.
#[must_use]
pub fn build_ack_packet(block_id: u16, fragment_id: u32) -> Vec<u8> {
    let mut writer = BitWriter::new();
    writer.int_range(u32::from(block_id), 0, u32::from(u16::MAX));
    writer.int_range(fragment_id, 0, u32::MAX);
    writer.finish()
}

/// Parses an ack packet built by [`build_ack_packet`].
///
/// # Errors
///
/// Returns [`DataBlockReadError::Malformed`] if the packet is truncated.
pub fn parse_ack_packet(bytes: &[u8]) -> Result<(u16, u32), DataBlockReadError> {
    let mut reader = BitReader::new(bytes);
    let block_id = reader.int_range(0, u32::from(u16::MAX)) as u16;
    let fragment_id = reader.int_range(0, u32::MAX);
    if reader.is_overflow() {
        return Err(DataBlockReadError::Malformed);
    }
    Ok((block_id, fragment_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_block_too_large() {
        let mut sender = DataBlockSender::new(16, 32, 100.0, 0.0);
        let err = sender.send(0, vec![0u8; 64]).unwrap_err();
        assert_eq!(SendDataBlockError::TooLarge { len: 64, max: 32 }, err);
    }

    #[test]
    fn rejects_concurrent_send() {
        let mut sender = DataBlockSender::new(16, 1024, 100.0, 0.0);
        sender.send(0, vec![1, 2, 3]).unwrap();
        let err = sender.send(1, vec![4, 5, 6]).unwrap_err();
        assert_eq!(SendDataBlockError::AlreadyInFlight, err);
    }

    #[test]
    fn full_transfer_round_trip() {
        let mut sender = DataBlockSender::new(8, 1024, 1000.0, 0.0);
        let mut receiver = DataBlockReceiver::new(8);

        let block: Vec<u8> = (0..50u32).map(|i| i as u8).collect();
        sender.send(7, block.clone()).unwrap();

        let mut now = 0.0;
        while !sender.is_complete() {
            let Some(packet) = sender.next_fragment(now) else {
                now += 0.01;
                continue;
            };
            let (block_id, fragment_id) = receiver.process_fragment(&packet).unwrap();
            sender.ack(block_id, fragment_id);
            now += 0.001;
        }

        let (block_id, bytes) = receiver.receive_completed().expect("transfer completed");
        assert_eq!(7, block_id);
        assert_eq!(block, bytes);
        assert!(receiver.receive_completed().is_none());
    }

    #[test]
    fn token_bucket_throttles_fragment_rate() {
        let mut sender = DataBlockSender::new(4, 1024, 2.0, 0.0);
        sender.send(0, vec![0u8; 64]).unwrap();

        assert!(sender.next_fragment(0.0).is_some());
        assert!(sender.next_fragment(0.0).is_some());
        assert!(sender.next_fragment(0.0).is_none());
    }

    #[test]
    fn mismatched_block_id_is_rejected() {
        let mut sender_a = DataBlockSender::new(8, 1024, 1000.0, 0.0);
        let mut sender_b = DataBlockSender::new(8, 1024, 1000.0, 0.0);
        sender_a.send(1, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        sender_b.send(2, vec![9, 8, 7, 6, 5, 4, 3, 2, 1]).unwrap();

        let mut receiver = DataBlockReceiver::new(8);
        let first = sender_a.next_fragment(0.0).unwrap();
        receiver.process_fragment(&first).unwrap();

        let second = sender_b.next_fragment(0.0).unwrap();
        let err = receiver.process_fragment(&second).unwrap_err();
        assert_eq!(DataBlockReadError::BlockIdMismatch { got: 2, expected: 1 }, err);
    }

    #[test]
    fn ack_packet_round_trips() {
        let packet = build_ack_packet(42, 7);
        assert_eq!((42, 7), parse_ack_packet(&packet).unwrap());
    }
}
