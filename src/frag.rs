//! Reassembly state for a single large block split into fixed-size
//! fragments.
//!
//! Only one large block is ever in flight per direction per channel, so
//! there is exactly one reassembly buffer, not a map of them keyed by
//! sequence. The block size and fragment count are declared up front by the
//! first fragment seen (fragment 0 always carries `block_size`) rather than
//! discovered from a "this is the last fragment" marker, and every
//! subsequent fragment's declared size is checked against that baseline.

use bit_vec::BitVec;
use derive_more::{Display, Error};

/// A fragment declared a `block_size`/`num_fragments`/`fragment_id` that is
/// inconsistent with the block already being reassembled, or with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum ReassembleError {
    /// `fragment_id >= num_fragments`.
    #[display("fragment index {index} out of range for {num_fragments} fragments")]
    IndexOutOfRange {
        /// Offending fragment index.
        index: u32,
        /// Declared fragment count.
        num_fragments: u32,
    },
    /// This fragment declares a `block_size` different from the block
    /// currently being reassembled.
    #[display("fragment declares block size {declared}, expected {expected}")]
    BlockSizeMismatch {
        /// Size this fragment declared.
        declared: u32,
        /// Size of the block already in progress.
        expected: u32,
    },
}

/// Reassembly buffer for one large block, identified by the caller's own
/// block id (a `u16` upstream; this type is id-agnostic).
#[derive(Debug, Clone)]
pub struct FragmentReceiver {
    fragment_size: usize,
    block_size: u32,
    num_fragments: u32,
    num_received: u32,
    received: BitVec,
    buffer: Vec<u8>,
}

impl FragmentReceiver {
    /// Starts (or restarts) reassembly for a block of `block_size` bytes
    /// split into `num_fragments` fragments of at most `fragment_size` bytes
    /// each.
    #[must_use]
    pub fn new(fragment_size: usize, block_size: u32, num_fragments: u32) -> Self {
        Self {
            fragment_size,
            block_size,
            num_fragments,
            num_received: 0,
            received: BitVec::from_elem(num_fragments as usize, false),
            buffer: vec![0u8; block_size as usize],
        }
    }

    /// Declared total size of the block being reassembled.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Declared fragment count.
    #[must_use]
    pub fn num_fragments(&self) -> u32 {
        self.num_fragments
    }

    /// Number of distinct fragments received so far.
    #[must_use]
    pub fn num_received(&self) -> u32 {
        self.num_received
    }

    /// Whether every fragment has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.num_fragments != 0 && self.num_received == self.num_fragments
    }

    /// Accepts one fragment's bytes at `fragment_id`, validating it against
    /// the block parameters this receiver was started with.
    ///
    /// A fragment already received is silently ignored (duplicates are
    /// expected under a lossy, duplicating transport and are not an error).
    ///
    /// # Errors
    ///
    /// Returns [`ReassembleError`] if `fragment_id` or `block_size` is
    /// inconsistent with this reassembly's declared parameters.
    pub fn insert(
        &mut self,
        block_size: u32,
        fragment_id: u32,
        data: &[u8],
    ) -> Result<(), ReassembleError> {
        if block_size != self.block_size {
            return Err(ReassembleError::BlockSizeMismatch {
                declared: block_size,
                expected: self.block_size,
            });
        }
        if fragment_id >= self.num_fragments {
            return Err(ReassembleError::IndexOutOfRange {
                index: fragment_id,
                num_fragments: self.num_fragments,
            });
        }

        if self.received[fragment_id as usize] {
            return Ok(());
        }

        let start = fragment_id as usize * self.fragment_size;
        let end = (start + data.len()).min(self.buffer.len());
        self.buffer[start..end].copy_from_slice(&data[..end - start]);

        self.received.set(fragment_id as usize, true);
        self.num_received += 1;
        Ok(())
    }

    /// Consumes this receiver and returns the reassembled bytes.
    ///
    /// Only meaningful once [`is_complete`](Self::is_complete) is `true`;
    /// otherwise the gaps are left as zero bytes.
    #[must_use]
    pub fn into_block(self) -> Vec<u8> {
        self.buffer
    }
}

/// Splits `block` into `(fragment_id, bytes)` pairs of at most
/// `fragment_size` bytes each, in ascending order.
///
/// # Panics
///
/// Panics if `fragment_size == 0`.
#[must_use]
pub fn split(block: &[u8], fragment_size: usize) -> Vec<(u32, &[u8])> {
    assert!(fragment_size > 0);
    block
        .chunks(fragment_size)
        .enumerate()
        .map(|(i, chunk)| (i as u32, chunk))
        .collect()
}

/// Number of fragments `block_size` bytes splits into at `fragment_size`
/// bytes per fragment.
#[must_use]
pub fn num_fragments(block_size: u32, fragment_size: u32) -> u32 {
    block_size.div_ceil(fragment_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_in_order() {
        let block: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
        let fragments = split(&block, 512);
        assert_eq!(4, fragments.len());

        let mut recv = FragmentReceiver::new(512, block.len() as u32, 4);
        for (id, data) in &fragments {
            recv.insert(block.len() as u32, *id, data).unwrap();
        }
        assert!(recv.is_complete());
        assert_eq!(block, recv.into_block());
    }

    #[test]
    fn round_trip_out_of_order_with_duplicates() {
        let block: Vec<u8> = (0..2000u32).map(|i| (i * 3) as u8).collect();
        let fragments = split(&block, 512);

        let mut recv = FragmentReceiver::new(512, block.len() as u32, fragments.len() as u32);
        let order = [2, 0, 3, 0, 1, 3];
        for &idx in &order {
            let (id, data) = fragments[idx];
            recv.insert(block.len() as u32, id, data).unwrap();
        }
        assert!(recv.is_complete());
        assert_eq!(block, recv.into_block());
    }

    #[test]
    fn rejects_out_of_range_fragment() {
        let mut recv = FragmentReceiver::new(8, 16, 2);
        let err = recv.insert(16, 5, &[0; 8]).unwrap_err();
        assert_eq!(
            ReassembleError::IndexOutOfRange {
                index: 5,
                num_fragments: 2
            },
            err
        );
    }

    #[test]
    fn rejects_block_size_mismatch() {
        let mut recv = FragmentReceiver::new(8, 16, 2);
        let err = recv.insert(32, 0, &[0; 8]).unwrap_err();
        assert_eq!(
            ReassembleError::BlockSizeMismatch {
                declared: 32,
                expected: 16
            },
            err
        );
    }

    #[test]
    fn num_fragments_rounds_up() {
        assert_eq!(2, num_fragments(9, 8));
        assert_eq!(1, num_fragments(8, 8));
        assert_eq!(1026, num_fragments(1_050_000, 1024));
    }
}
