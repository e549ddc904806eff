//! Per-packet acknowledgment encoding: latest sequence plus a 32-bit history.
//!
//! This is a pure wire-value type: the sender side builds one from
//! [`CursorWindow::ack_bits`](crate::sliding_window::CursorWindow::ack_bits),
//! and the receiver side only ever reads it via [`contains`](Acknowledge::contains)
//! or iterates it via [`seqs`](Acknowledge::seqs) to drive each channel's
//! `process_ack`. Neither side mutates one in place; there is deliberately no
//! `ack()` method here; that bookkeeping lives in `CursorWindow`.

use crate::seq::PacketSeq;
use core::fmt;

/// The `ack`/`ack_bits` fields of a packet header.
///
/// `ack` is the most recent packet sequence the peer has received; it is
/// always considered received by definition and is not itself represented in
/// `bits`. Bit `i` of `bits` is set iff packet `ack - 1 - i` has also been
/// received.
///
/// ```text
///        ack: 40
///       bits: 0b0000..00001001
///                    ^   ^  ^
///                    |   |  +- seq 39 (40 - 1 - 0) has been received
///                    |   +---- seq 36 (40 - 1 - 3) has been received
///                    +-------- seq 32 (40 - 1 - 7) has NOT been received
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Acknowledge {
    /// Most recent packet sequence the peer has received.
    pub ack: PacketSeq,
    /// Bitfield of which of the 32 packets preceding `ack` were also
    /// received.
    pub bits: u32,
}

impl Acknowledge {
    /// Builds an acknowledgment value directly from wire fields.
    #[must_use]
    pub fn new(ack: PacketSeq, bits: u32) -> Self {
        Self { ack, bits }
    }

    /// Whether `seq` is marked received by this ack/ack_bits pair.
    ///
    /// ```
    /// # use reliable_channel::{ack::Acknowledge, seq::PacketSeq};
    /// let acks = Acknowledge::new(PacketSeq::new(40), 0b1001);
    /// assert!(acks.contains(PacketSeq::new(40)));
    /// assert!(acks.contains(PacketSeq::new(39)));
    /// assert!(acks.contains(PacketSeq::new(36)));
    /// assert!(!acks.contains(PacketSeq::new(38)));
    /// assert!(!acks.contains(PacketSeq::new(41)));
    /// ```
    #[must_use]
    pub fn contains(&self, seq: PacketSeq) -> bool {
        if seq == self.ack {
            return true;
        }
        // distance from `seq` forward to `ack`; positive when `seq` is older.
        let dist = seq.dist_to(self.ack);
        match u32::try_from(dist) {
            Ok(dist) if dist >= 1 => {
                let bit = dist - 1;
                bit < 32 && self.bits & (1 << bit) != 0
            }
            _ => false,
        }
    }

    /// Iterates every [`PacketSeq`] this value marks as received: `ack`
    /// itself, then each set bit, most recent first.
    ///
    /// ```
    /// # use reliable_channel::{ack::Acknowledge, seq::PacketSeq};
    /// let acks = Acknowledge::new(PacketSeq::new(40), 0b101);
    /// let seqs: Vec<_> = acks.seqs().collect();
    /// assert_eq!(
    ///     vec![PacketSeq::new(40), PacketSeq::new(39), PacketSeq::new(37)],
    ///     seqs
    /// );
    /// ```
    pub fn seqs(self) -> impl Iterator<Item = PacketSeq> {
        std::iter::once(self.ack).chain((0..u32::BITS).filter_map(move |bit| {
            let seq = self.ack - PacketSeq::new(1) - PacketSeq::new(bit as u16);
            (self.bits & (1 << bit) != 0).then_some(seq)
        }))
    }
}

impl fmt::Debug for Acknowledge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acknowledge")
            .field("ack", &self.ack)
            .field("bits", &format!("{:032b}", self.bits))
            .finish()
    }
}
