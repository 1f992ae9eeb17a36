//! Indication Messages
//!
//! Feedback delivered by the PHY/MAC adapter to the scheduler UE context:
//! buffer status, BSR, power headroom, timing advance and SINR reports.

use common::slot_point::SlotPoint;
use common::types::{BsrFormat, DuCellIndex, DuUeIndex, LcgId, Lcid, Rnti, TagId};
use serde::{Deserialize, Serialize};

/// RLC buffer occupancy update for one DL logical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlBufferStateIndication {
    pub ue_index: DuUeIndex,
    pub lcid: Lcid,
    /// Bytes pending in RLC, including at least one RLC header
    pub bs: u32,
    /// Arrival time of the head-of-line SDU
    #[serde(default)]
    pub hol_toa: Option<SlotPoint>,
}

/// Buffer size reported for one LCG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BsrLcgReport {
    pub lcg_id: LcgId,
    pub nof_bytes: u32,
}

/// Decoded Buffer Status Report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UlBsrIndication {
    pub cell_index: DuCellIndex,
    pub ue_index: DuUeIndex,
    pub crnti: Rnti,
    pub bsr_fmt: BsrFormat,
    pub reported_lcgs: Vec<BsrLcgReport>,
}

/// dB interval `[start, stop]` as decoded from a quantized PHR field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInterval {
    pub start: i32,
    pub stop: i32,
}

impl DbInterval {
    pub fn new(start: i32, stop: i32) -> Self {
        assert!(start <= stop, "Invalid dB interval [{}, {}]", start, stop);
        Self { start, stop }
    }
}

/// Power headroom of one serving cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPhReport {
    pub serv_cell_id: DuCellIndex,
    /// Power headroom, in dB
    pub ph: DbInterval,
    /// UE configured maximum output power, in dBm
    pub p_cmax: Option<DbInterval>,
}

/// Decoded single-entry PHR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UlPhrIndication {
    pub cell_index: DuCellIndex,
    pub ue_index: DuUeIndex,
    pub rnti: Rnti,
    /// Slot of the PUSCH that carried the PHR
    pub slot_rx: SlotPoint,
    pub phr: CellPhReport,
}

/// N_TA update measured on an UL transmission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaUpdateIndication {
    pub cell_index: DuCellIndex,
    pub ue_index: DuUeIndex,
    pub tag_id: TagId,
    /// Measured N_TA difference, in units of Tc * 64
    pub n_ta_diff: i64,
    pub ul_sinr_db: f32,
}

/// Number of UCI bits carried by one PUCCH transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PucchUciBits {
    pub harq_ack_nof_bits: u32,
    pub sr_nof_bits: u32,
    pub csi_part1_nof_bits: u32,
    pub csi_part2_nof_bits: u32,
}

impl PucchUciBits {
    pub fn total_bits(&self) -> u32 {
        self.harq_ack_nof_bits + self.sr_nof_bits + self.csi_part1_nof_bits + self.csi_part2_nof_bits
    }
}

/// Which UCI group a PUCCH SINR report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PucchSinrKind {
    F0F1,
    F2F3F4 { has_harq: bool, has_csi: bool },
}

/// SINR measured on a PUCCH reception
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PucchSinrReport {
    pub slot_rx: SlotPoint,
    pub sinr_db: f32,
    pub kind: PucchSinrKind,
}

/// SINR measured on a PUSCH reception
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PuschSinrReport {
    pub slot_rx: SlotPoint,
    pub sinr_db: f32,
}
