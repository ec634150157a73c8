//! Sequence Number and Clock Arithmetic
//!
//! Segment sequence numbers and millisecond timestamps are 32-bit values that
//! wrap around. Ordering is decided by the sign of the wrapping difference, so
//! comparisons stay correct across the wrap boundary as long as the two values
//! are less than 2^31 apart.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Signed distance from `earlier` to `later` with wraparound
#[inline]
pub fn time_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Segment sequence number with 32-bit wraparound semantics
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct SeqNumber(u32);

impl SeqNumber {
    pub const ZERO: SeqNumber = SeqNumber(0);

    #[inline]
    pub fn new(value: u32) -> Self {
        SeqNumber(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0.wrapping_add(1))
    }

    /// Increment in place, returning the value before the increment
    #[inline]
    pub fn post_increment(&mut self) -> Self {
        let current = *self;
        self.0 = self.0.wrapping_add(1);
        current
    }

    /// Signed distance from this sequence number to `other`.
    ///
    /// Positive values mean `other` is ahead of `self`.
    #[inline]
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        time_diff(other.0, self.0)
    }

    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self.distance_to(other) >= 0
    }

    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        self.distance_to(other) < 0
    }

    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self.distance_to(other) <= 0
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SeqNumber {
    fn from(value: u32) -> Self {
        SeqNumber(value)
    }
}

impl From<SeqNumber> for u32 {
    fn from(seq: SeqNumber) -> u32 {
        seq.0
    }
}

impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNumber {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub for SeqNumber {
    type Output = i32;

    /// Signed distance `self - other`
    fn sub(self, other: SeqNumber) -> i32 {
        other.distance_to(self)
    }
}
