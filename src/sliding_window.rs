//! Fixed-capacity, sequence-indexed ring buffers with 16-bit wraparound
//! arithmetic.
//!
//! Two variants exist, matching the two use sites the protocol actually
//! needs:
//! - [`SlotWindow`] carries a per-entry valid flag so individual slots can be
//!   cleared out of order as acks arrive. Used for the send queue, receive
//!   queue, and sent-packets ledger.
//! - [`CursorWindow`] tracks just a `sequence`/`ack` cursor pair with no
//!   per-entry state of its own. Used for the connection-level received-packet
//!   window that [`ack_bits`](CursorWindow::ack_bits) is generated from.

use crate::seq::Seq;

/// A sequence-indexed ring of runtime-chosen capacity, each slot either empty
/// or holding a valid `T` tagged with the sequence it was inserted at.
///
/// Indexed by `sequence % capacity`. Capacity is a constructor argument
/// rather than a const generic, because [`ReliableChannelConfig`]'s queue
/// sizes (`send_queue_size`, `receive_queue_size`, `sent_packets_size`) are
/// runtime-configurable options, not compile-time constants.
///
/// Because multiple sequences map to the same slot, every slot also stores
/// the sequence it was last written with, so a stale read can be told apart
/// from a live one. An explicit head cursor lets the window reject sequences
/// that have fallen behind it.
///
/// [`ReliableChannelConfig`]: crate::reliable::ReliableChannelConfig
#[derive(Debug, Clone)]
pub struct SlotWindow<T> {
    slots: Box<[Option<(u16, T)>]>,
    /// One past the most recently inserted sequence; empty before first
    /// insert.
    head: Seq,
    len: usize,
}

impl<T> SlotWindow<T> {
    /// Creates an empty window with room for `capacity` live entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: Seq(0),
            len: 0,
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the window holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity of the window.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, sequence: u16) -> usize {
        sequence as usize % self.slots.len()
    }

    /// Whether `sequence` falls behind the window (too old to insert).
    fn is_too_old(&self, sequence: u16) -> bool {
        if self.len == 0 {
            // nothing has ever been inserted; nothing can be "too old" yet.
            return false;
        }
        Seq(sequence) < self.head - Seq(self.slots.len() as u16)
    }

    /// Inserts `value` at `sequence`, returning a mutable reference to it, or
    /// `None` if `sequence` is too old (behind `head - capacity`).
    ///
    /// Advances `head` to `max(head, sequence + 1)`.
    pub fn insert_at(&mut self, sequence: u16, value: T) -> Option<&mut T> {
        if self.is_too_old(sequence) {
            return None;
        }

        let idx = self.index(sequence);
        let was_occupied = self.slots[idx].is_some();
        self.slots[idx] = Some((sequence, value));
        if !was_occupied {
            self.len += 1;
        }

        if self.len == 1 || Seq(sequence) + Seq(1) > self.head {
            self.head = Seq(sequence) + Seq(1);
        }

        self.slots[idx].as_mut().map(|(_, v)| v)
    }

    /// Looks up the live entry at `sequence`, if any.
    #[must_use]
    pub fn find(&self, sequence: u16) -> Option<&T> {
        match &self.slots[self.index(sequence)] {
            Some((seq, value)) if *seq == sequence => Some(value),
            _ => None,
        }
    }

    /// Mutably looks up the live entry at `sequence`, if any.
    pub fn find_mut(&mut self, sequence: u16) -> Option<&mut T> {
        let idx = self.index(sequence);
        match &mut self.slots[idx] {
            Some((seq, value)) if *seq == sequence => Some(value),
            _ => None,
        }
    }

    /// Whether `sequence`'s slot is currently free (and the sequence itself
    /// is not considered too old).
    #[must_use]
    pub fn has_slot(&self, sequence: u16) -> bool {
        !self.is_too_old(sequence) && self.slots[self.index(sequence)].is_none()
    }

    /// Frees the slot at `sequence`, returning the value that was there.
    pub fn clear(&mut self, sequence: u16) -> Option<T> {
        let idx = self.index(sequence);
        match self.slots[idx].take() {
            Some((seq, value)) if seq == sequence => {
                self.len -= 1;
                Some(value)
            }
            other => {
                // a different sequence's value occupied this slot; put it back.
                self.slots[idx] = other;
                None
            }
        }
    }

    /// Iterates `(sequence, &T)` for every occupied slot, in slot-index
    /// order (not sequence order).
    pub fn iter(&self) -> impl Iterator<Item = (u16, &T)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(seq, v)| (*seq, v)))
    }

    /// Clears every entry and resets the head cursor to zero.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = Seq(0);
        self.len = 0;
    }
}

/// Receiver-side record of which packet sequences have been seen, tracked as
/// a `sequence`/`ack` cursor pair rather than per-slot state.
///
/// `sequence` is the next sequence to be assigned (or, on the receive side,
/// one past the newest sequence seen), `ack` is the oldest sequence still
/// considered live. Used for the connection-level received-packet window
/// that ack bits are generated from, where there is no per-entry payload to
/// store — just "was this sequence seen".
#[derive(Debug, Clone)]
pub struct CursorWindow {
    seen: Vec<bool>,
    /// One past the newest sequence marked seen.
    sequence: Seq,
    /// Oldest sequence still considered live (`0xFFFF` before the first ack).
    ack: Seq,
}

impl CursorWindow {
    /// Creates an empty window tracking the last `size` sequences.
    ///
    /// # Panics
    ///
    /// Panics if `size == 0`.
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size > 0);
        Self {
            seen: vec![false; size],
            sequence: Seq(0),
            ack: Seq(0xFFFF),
        }
    }

    fn index(&self, sequence: u16) -> usize {
        sequence as usize % self.seen.len()
    }

    /// Marks `sequence` as seen.
    ///
    /// Rejects (returns `false`, no state change) sequences already behind
    /// the window; callers should treat this as "too old, drop".
    pub fn insert(&mut self, sequence: u16) -> bool {
        if Seq(sequence) < self.ack {
            return false;
        }
        if Seq(sequence) >= self.sequence {
            self.sequence = Seq(sequence) + Seq(1);
            self.ack = self.sequence - Seq(self.seen.len() as u16);
        }
        let idx = self.index(sequence);
        self.seen[idx] = true;
        true
    }

    /// Whether `sequence` has been marked seen and is still within the live
    /// window.
    #[must_use]
    pub fn contains(&self, sequence: u16) -> bool {
        if Seq(sequence) < self.ack || Seq(sequence) >= self.sequence {
            return false;
        }
        self.seen[self.index(sequence)]
    }

    /// Whether `sequence` is both new (not already [`contains`](Self::contains))
    /// and not behind the window, i.e. whether [`insert`](Self::insert) would
    /// actually record it.
    ///
    /// [`Connection::read_packet`](crate::connection::Connection::read_packet)
    /// calls this before doing any other work, so a duplicate or too-old
    /// inbound packet is discarded without touching channel state.
    #[must_use]
    pub fn would_accept(&self, sequence: u16) -> bool {
        Seq(sequence) >= self.ack && !self.contains(sequence)
    }

    /// Most recent sequence marked seen (one less than the insertion
    /// cursor), or `None` if nothing has been inserted yet.
    #[must_use]
    pub fn most_recent(&self) -> Option<u16> {
        if self.sequence == Seq(0) && self.ack == Seq(0xFFFF) {
            None
        } else {
            Some((self.sequence - Seq(1)).0)
        }
    }

    /// Computes `(ack, ack_bits)`: `ack` is the most recently seen sequence,
    /// and bit `i` of `ack_bits` is set iff `ack - 1 - i` was also seen.
    #[must_use]
    pub fn ack_bits(&self) -> (u16, u32) {
        let Some(ack) = self.most_recent() else {
            return (0, 0);
        };
        let mut bits = 0u32;
        for i in 0..32u32 {
            let sequence = Seq(ack) - Seq(1) - Seq(i as u16);
            if self.contains(sequence.0) {
                bits |= 1 << i;
            }
        }
        (ack, bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_window_insert_find_clear() {
        let mut w: SlotWindow<u32> = SlotWindow::new(8);
        assert!(w.find(3).is_none());
        w.insert_at(3, 100);
        assert_eq!(Some(&100), w.find(3));
        assert!(!w.has_slot(3));

        assert_eq!(Some(100), w.clear(3));
        assert!(w.find(3).is_none());
        assert!(w.has_slot(3));
    }

    #[test]
    fn slot_window_rejects_too_old() {
        let mut w: SlotWindow<u32> = SlotWindow::new(4);
        for seq in 0..10u16 {
            w.insert_at(seq, seq as u32);
        }
        // capacity 4, head is now 10; anything < head-4=6 is too old
        assert!(w.insert_at(1, 999).is_none());
        assert!(w.find(9).is_some());
    }

    #[test]
    fn slot_window_wraparound_reuses_slots() {
        let mut w: SlotWindow<u32> = SlotWindow::new(4);
        w.insert_at(0, 10);
        w.insert_at(4, 40);
        // index 0 now holds sequence 4, so sequence 0 reads as absent
        assert!(w.find(0).is_none());
        assert_eq!(Some(&40), w.find(4));
    }

    #[test]
    fn cursor_window_ack_bits_basic() {
        let mut w = CursorWindow::new(64);
        w.insert(0);
        w.insert(1);
        w.insert(2);
        let (ack, bits) = w.ack_bits();
        assert_eq!(2, ack);
        // bit 0 = ack-1-0 = 1 (seen), bit 1 = ack-1-1 = 0 (seen)
        assert_eq!(0b11, bits & 0b11);
    }

    #[test]
    fn cursor_window_marks_gaps() {
        let mut w = CursorWindow::new(64);
        w.insert(0);
        w.insert(2);
        let (ack, bits) = w.ack_bits();
        assert_eq!(2, ack);
        // seq 1 (ack-1-0) was not seen
        assert_eq!(0, bits & 0b1);
        // seq 0 (ack-1-1) was seen
        assert_eq!(0b10, bits & 0b10);
    }

    #[test]
    fn would_accept_rejects_duplicate_and_too_old() {
        let mut w = CursorWindow::new(64);
        assert!(w.would_accept(0));
        w.insert(0);
        assert!(!w.would_accept(0));
        assert!(w.would_accept(1));
    }
}
