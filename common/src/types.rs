//! Common Types for the 5G MAC Scheduler
//!
//! Defines fundamental identifiers and radio parameters shared by the scheduler,
//! its interfaces and the simulation driver.

use crate::CommonError;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of UEs handled by one DU
pub const MAX_NOF_DU_UES: usize = 1024;

/// Maximum number of cells handled by one DU
pub const MAX_NOF_DU_CELLS: usize = 16;

/// Number of radio bearer LCIDs (SRB0 up to the last DRB LCID, inclusive)
pub const MAX_NOF_RB_LCIDS: usize = 33;

/// Maximum number of logical channel groups
pub const MAX_NOF_LCGS: usize = 8;

/// Maximum number of Timing Advance Groups per UE
pub const MAX_NOF_TAGS: usize = 4;

/// Number of HARQ processes per UE and direction
pub const MAX_NOF_HARQS: usize = 16;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// DU-wide UE index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DuUeIndex(pub u16);

impl DuUeIndex {
    /// Create a new UE index. Panics when outside the DU range.
    pub fn new(value: u16) -> Self {
        assert!((value as usize) < MAX_NOF_DU_UES, "Invalid DU UE index {}", value);
        Self(value)
    }

    /// Index usable for table lookups
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DuUeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DU-wide cell index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DuCellIndex(pub u8);

impl DuCellIndex {
    /// Index usable for table lookups
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DuCellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Parse from a value in kHz
    pub fn from_khz(khz: u32) -> Result<Self, CommonError> {
        Self::from_u32(khz).ok_or(CommonError::InvalidScs(khz))
    }

    /// Numerology index (mu) as per TS 38.211
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Number of slots in one 1 ms subframe
    pub fn slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    /// Number of slots in one 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        10 * self.slots_per_subframe()
    }
}

/// Logical channel identifier of a radio bearer (0..=32)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lcid(pub u8);

impl Lcid {
    pub const SRB0: Self = Self(0);
    pub const SRB1: Self = Self(1);
    pub const SRB2: Self = Self(2);
    pub const SRB3: Self = Self(3);
    /// First LCID used by data radio bearers
    pub const MIN_DRB: Self = Self(4);
    /// Last LCID used by data radio bearers
    pub const MAX_DRB: Self = Self(32);

    /// Create a new LCID with validation
    pub fn new(value: u8) -> Result<Self, CommonError> {
        if (value as usize) < MAX_NOF_RB_LCIDS {
            Ok(Self(value))
        } else {
            Err(CommonError::InvalidLcid(value))
        }
    }

    /// Whether this LCID belongs to a signalling radio bearer
    pub fn is_srb(&self) -> bool {
        self.0 <= Self::SRB3.0
    }

    /// Whether this LCID belongs to a data radio bearer
    pub fn is_drb(&self) -> bool {
        self.0 >= Self::MIN_DRB.0 && self.0 <= Self::MAX_DRB.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Lcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical channel group identifier (0..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LcgId(pub u8);

impl LcgId {
    /// Create a new LCG-ID with validation
    pub fn new(value: u8) -> Result<Self, CommonError> {
        if (value as usize) < MAX_NOF_LCGS {
            Ok(Self(value))
        } else {
            Err(CommonError::InvalidLcgId(value))
        }
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LcgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LCID values of the DL-SCH as per TS 38.321 Table 6.2.1-1.
///
/// Values 0..=32 carry MAC SDUs of the radio bearer with the same LCID; the upper
/// range identifies MAC CEs and padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LcidDlSch(pub u8);

impl LcidDlSch {
    pub const CCCH: Self = Self(0);
    pub const MIN_RESERVED: Self = Self(33);
    pub const MAX_RESERVED: Self = Self(51);
    pub const RECOMMENDED_BIT_RATE: Self = Self(47);
    pub const SCELL_ACTIV_4_OCTET: Self = Self(57);
    pub const SCELL_ACTIV_1_OCTET: Self = Self(58);
    pub const LONG_DRX_CMD: Self = Self(59);
    pub const DRX_CMD: Self = Self(60);
    pub const TA_CMD: Self = Self(61);
    pub const UE_CON_RES_ID: Self = Self(62);
    pub const PADDING: Self = Self(63);

    /// Whether this LCID identifies a MAC SDU
    pub fn is_sdu(&self) -> bool {
        self.0 <= Lcid::MAX_DRB.0
    }

    /// Whether this LCID identifies a MAC CE
    pub fn is_ce(&self) -> bool {
        self.0 >= Self::RECOMMENDED_BIT_RATE.0
    }

    /// Whether the MAC CE uses an L-field subheader. None of the CEs handled here does.
    pub fn is_var_len_ce(&self) -> bool {
        false
    }

    /// Payload size in bytes of a fixed-size MAC CE, without subheader
    pub fn sizeof_ce(&self) -> u32 {
        match *self {
            Self::SCELL_ACTIV_4_OCTET => 4,
            Self::SCELL_ACTIV_1_OCTET => 1,
            Self::LONG_DRX_CMD | Self::DRX_CMD => 0,
            Self::TA_CMD => 1,
            Self::UE_CON_RES_ID => 6,
            _ => 0,
        }
    }

    /// Radio bearer LCID, if this value carries a MAC SDU
    pub fn to_lcid(&self) -> Option<Lcid> {
        self.is_sdu().then_some(Lcid(self.0))
    }
}

impl From<Lcid> for LcidDlSch {
    fn from(lcid: Lcid) -> Self {
        Self(lcid.0)
    }
}

/// RAN slice identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RanSliceId(pub u8);

/// Slice that carries SRB traffic and pending MAC CEs
pub const SRB_RAN_SLICE_ID: RanSliceId = RanSliceId(0);

/// Slice used for DRBs that have no explicit slice association
pub const DEFAULT_DRB_RAN_SLICE_ID: RanSliceId = RanSliceId(1);

impl fmt::Display for RanSliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timing Advance Group identifier (0..=3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagId(pub u8);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HARQ process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HarqId(pub u8);

/// PUCCH formats as per TS 38.213
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PucchFormat {
    Format0,
    Format1,
    Format2,
    Format3,
    Format4,
}

impl PucchFormat {
    /// Whether the format belongs to the short-UCI group (F0/F1)
    pub fn is_f0_f1(&self) -> bool {
        matches!(self, PucchFormat::Format0 | PucchFormat::Format1)
    }
}

impl fmt::Display for PucchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            PucchFormat::Format0 => 0,
            PucchFormat::Format1 => 1,
            PucchFormat::Format2 => 2,
            PucchFormat::Format3 => 3,
            PucchFormat::Format4 => 4,
        };
        write!(f, "F{}", n)
    }
}

/// Buffer Status Report formats as per TS 38.321 6.1.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BsrFormat {
    ShortBsr,
    ShortTruncBsr,
    LongBsr,
    LongTruncBsr,
}

impl BsrFormat {
    /// Long formats can represent large buffer sizes without saturation
    pub fn is_long(&self) -> bool {
        matches!(self, BsrFormat::LongBsr | BsrFormat::LongTruncBsr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scs_numerology() {
        assert_eq!(SubcarrierSpacing::Scs15.numerology(), 0);
        assert_eq!(SubcarrierSpacing::Scs30.slots_per_subframe(), 2);
        assert_eq!(SubcarrierSpacing::Scs120.slots_per_frame(), 80);
        assert_eq!(SubcarrierSpacing::from_khz(60).unwrap(), SubcarrierSpacing::Scs60);
        assert!(SubcarrierSpacing::from_khz(45).is_err());
    }

    #[test]
    fn test_lcid_ranges() {
        assert!(Lcid::SRB1.is_srb());
        assert!(!Lcid::SRB3.is_drb());
        assert!(Lcid::MIN_DRB.is_drb());
        assert!(Lcid::new(32).is_ok());
        assert!(Lcid::new(33).is_err());
        assert!(LcgId::new(8).is_err());
    }

    #[test]
    fn test_dl_sch_lcid_ce_sizes() {
        assert!(LcidDlSch::TA_CMD.is_ce());
        assert!(!LcidDlSch::TA_CMD.is_sdu());
        assert_eq!(LcidDlSch::TA_CMD.sizeof_ce(), 1);
        assert_eq!(LcidDlSch::UE_CON_RES_ID.sizeof_ce(), 6);
        assert_eq!(LcidDlSch::SCELL_ACTIV_4_OCTET.sizeof_ce(), 4);
        assert_eq!(LcidDlSch::from(Lcid(5)).to_lcid(), Some(Lcid(5)));
        assert_eq!(LcidDlSch::PADDING.to_lcid(), None);
    }
}
