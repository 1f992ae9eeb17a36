//! DL PDU Descriptors
//!
//! Describes the subPDUs (MAC SDUs and MAC CEs) selected for one DL transport
//! block. PDU assembly turns these into bytes on the wire.

use common::types::{LcidDlSch, TagId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Maximum number of subPDUs scheduled in one transport block
pub const MAX_LC_PER_TB: usize = 4;

/// Payload of a Timing Advance Command MAC CE (TS 38.321 6.1.3.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaCmdCePayload {
    /// Timing Advance Group the command applies to
    pub tag_id: TagId,
    /// Timing Advance Command, 0..=63 with 31 meaning no change
    pub ta_cmd: u8,
}

/// Payload carried by a pending MAC CE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacCePayload {
    TaCmd(TaCmdCePayload),
    /// CE without payload relevant to the scheduler
    Dummy(u8),
}

impl Default for MacCePayload {
    fn default() -> Self {
        MacCePayload::Dummy(0)
    }
}

/// A MAC CE that needs to be scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacCeInfo {
    /// LCID of the MAC CE
    pub ce_lcid: LcidDlSch,
    /// Payload, except for the UE Contention Resolution Identity
    pub ce_payload: MacCePayload,
}

/// One subPDU selected for a DL transport block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlMsgLcInfo {
    /// LCID of the MAC SDU or MAC CE
    pub lcid: LcidDlSch,
    /// Scheduled bytes, excluding the MAC subheader
    pub sched_bytes: u32,
    /// CE payload, when the subPDU is a MAC CE that carries one
    pub ce_payload: Option<MacCePayload>,
}

impl Default for DlMsgLcInfo {
    fn default() -> Self {
        Self {
            lcid: LcidDlSch::MIN_RESERVED,
            sched_bytes: 0,
            ce_payload: None,
        }
    }
}

/// Content of one DL transport block
#[derive(Debug, Clone, Default)]
pub struct DlMsgTbInfo {
    /// subPDUs in transmission order
    pub lc_chs_to_sched: SmallVec<[DlMsgLcInfo; MAX_LC_PER_TB]>,
}

impl DlMsgTbInfo {
    pub fn is_full(&self) -> bool {
        self.lc_chs_to_sched.len() >= MAX_LC_PER_TB
    }

    /// Push a subPDU. Returns false when the TB has no room left.
    pub fn push(&mut self, subpdu: DlMsgLcInfo) -> bool {
        if self.is_full() {
            return false;
        }
        self.lc_chs_to_sched.push(subpdu);
        true
    }

    /// Total scheduled bytes of the MAC SDUs for a given LCID
    pub fn sdu_bytes(&self, lcid: LcidDlSch) -> u32 {
        self.lc_chs_to_sched
            .iter()
            .filter(|lc| lc.lcid == lcid)
            .map(|lc| lc.sched_bytes)
            .sum()
    }
}
