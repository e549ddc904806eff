//! Wraparound-aware 16-bit sequence numbers.
//!
//! A plain `u16` comparison breaks the moment a sequence wraps past
//! `u16::MAX` back to `0`. [`Seq`] and its two tagged wrappers instead compare
//! by the signed distance between two values, so `0 > 65535` holds for any
//! two sequences no more than 32768 apart.

use core::{
    cmp::Ordering,
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};

/// A 16-bit sequence number that wraps, with comparisons that account for the
/// wrap.
///
/// ```text
///     65534  65535    0      1      2
/// ... --|------|------|------|------|-- ...
/// ```
///
/// [`Ord`] treats values on this number line as forming a total order as long
/// as any two compared values are within 32768 of each other; beyond that
/// distance no particular result is guaranteed.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Seq(pub u16);

impl Seq {
    /// Signed distance from `self` to `rhs`, taking wraparound into account.
    ///
    /// ```
    /// # use reliable_channel::seq::Seq;
    /// assert_eq!(Seq(0).dist_to(Seq(5)), 5);
    /// assert_eq!(Seq(5).dist_to(Seq(0)), -5);
    /// assert_eq!(Seq(65535).dist_to(Seq(0)), 1);
    /// assert_eq!(Seq(0).dist_to(Seq(65535)), -1);
    /// ```
    #[must_use]
    pub const fn dist_to(self, rhs: Self) -> i16 {
        rhs.0.wrapping_sub(self.0) as i16
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Seq").field(&self.0).finish()
    }
}

impl Ord for Seq {
    /// `a > b` iff `(a - b) wraps to a positive i16`; see module docs.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0 as i16).wrapping_sub(other.0 as i16).cmp(&0)
    }
}

impl PartialOrd for Seq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Seq {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Seq {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Seq {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Seq {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

macro_rules! tagged_seq {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub Seq);

        impl $name {
            /// Creates a new sequence number from a raw `u16`.
            #[must_use]
            pub const fn new(n: u16) -> Self {
                Self(Seq(n))
            }

            /// The raw `u16` value.
            #[must_use]
            pub const fn get(self) -> u16 {
                self.0 .0
            }

            /// Signed distance to `rhs`; see [`Seq::dist_to`].
            #[must_use]
            pub const fn dist_to(self, rhs: Self) -> i16 {
                self.0.dist_to(rhs.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0 .0).finish()
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl From<u16> for $name {
            fn from(n: u16) -> Self {
                Self::new(n)
            }
        }
    };
}

tagged_seq!(
    PacketSeq,
    "Sequence number of a packet, used in the packet header and [`crate::ack::Acknowledge`]."
);
tagged_seq!(
    MessageSeq,
    "Sequence number of a message within a single channel's send/receive queues."
);
