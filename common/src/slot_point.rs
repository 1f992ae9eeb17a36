//! Slot Point
//!
//! Monotonic slot counter that wraps around at the end of the SFN cycle
//! (1024 frames). Comparisons and differences are computed on the circle,
//! so a slot shortly after the wrap compares greater than one shortly before it.

use crate::types::SubcarrierSpacing;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of system frame numbers before wrap-around
pub const NOF_SFNS: u32 = 1024;

/// Identifier of one scheduling slot for a given numerology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    numerology: u8,
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from its absolute count within the SFN cycle
    pub fn new(scs: SubcarrierSpacing, count: u32) -> Self {
        let nof_slots = Self::nof_slots_in_cycle(scs.numerology());
        Self {
            numerology: scs.numerology(),
            count: count % nof_slots,
        }
    }

    /// Create a slot point from SFN and slot index within the frame
    pub fn from_sfn(scs: SubcarrierSpacing, sfn: u32, slot_index: u32) -> Self {
        assert!(slot_index < scs.slots_per_frame(), "Invalid slot index {}", slot_index);
        Self::new(scs, (sfn % NOF_SFNS) * scs.slots_per_frame() + slot_index)
    }

    fn nof_slots_in_cycle(numerology: u8) -> u32 {
        NOF_SFNS * 10 * (1u32 << numerology)
    }

    /// Absolute count within the SFN cycle, used to index slot-indexed rings
    pub fn to_uint(&self) -> u32 {
        self.count
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    pub fn nof_slots_per_frame(&self) -> u32 {
        10 << self.numerology
    }

    pub fn nof_slots_per_subframe(&self) -> u32 {
        1 << self.numerology
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.nof_slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u32 {
        self.count % self.nof_slots_per_frame()
    }

    /// Signed distance `self - other` on the SFN circle
    pub fn diff(&self, other: SlotPoint) -> i32 {
        assert_eq!(self.numerology, other.numerology, "Comparing slots of different numerologies");
        let n = Self::nof_slots_in_cycle(self.numerology) as i64;
        let mut d = (self.count as i64 - other.count as i64).rem_euclid(n);
        if d >= n / 2 {
            d -= n;
        }
        d as i32
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.diff(*other).cmp(&0))
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: u32) -> SlotPoint {
        let n = Self::nof_slots_in_cycle(self.numerology);
        SlotPoint {
            numerology: self.numerology,
            count: ((self.count as u64 + rhs as u64) % n as u64) as u32,
        }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, rhs: u32) -> SlotPoint {
        let n = Self::nof_slots_in_cycle(self.numerology) as i64;
        SlotPoint {
            numerology: self.numerology,
            count: (self.count as i64 - rhs as i64).rem_euclid(n) as u32,
        }
    }
}

impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    fn sub(self, rhs: SlotPoint) -> i32 {
        self.diff(rhs)
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sfn_and_slot_index() {
        let sl = SlotPoint::from_sfn(SubcarrierSpacing::Scs30, 5, 7);
        assert_eq!(sl.sfn(), 5);
        assert_eq!(sl.slot_index(), 7);
        assert_eq!(sl.to_uint(), 107);
        assert_eq!(format!("{}", sl), "5.7");
    }

    #[test]
    fn test_wrap_around_ordering() {
        let last = SlotPoint::from_sfn(SubcarrierSpacing::Scs15, 1023, 9);
        let next = last + 1;
        assert_eq!(next.to_uint(), 0);
        assert!(next > last);
        assert_eq!(next - last, 1);
        assert_eq!(last - next, -1);
        assert_eq!(next - 1u32, last);
    }

    #[test]
    fn test_add_and_compare() {
        let mut sl = SlotPoint::new(SubcarrierSpacing::Scs15, 100);
        let start = sl;
        sl += 20;
        assert!(sl > start);
        assert!(start <= start);
        assert_eq!(sl - start, 20);
    }
}
