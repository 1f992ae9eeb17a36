//! Scheduler UE
//!
//! Cell-independent state of a UE: its configuration, logical channels and TA
//! manager. Per-cell state lives in the cell repositories; operations that need it
//! take the UE cells as an argument, PCell first.

use crate::ue_context::logical_channel_system::UeLogicalChannelRepository;
use crate::ue_context::ta_management_system::UeTaManager;
use crate::ue_context::ue_cell::UeCell;
use common::slot_point::SlotPoint;
use common::types::{DuCellIndex, DuUeIndex, Lcid, RanSliceId, Rnti, TagId};
use interfaces::sched_config::UeConfiguration;
use smallvec::SmallVec;

/// Maximum number of serving cells of a UE
pub const MAX_NOF_UE_CELLS: usize = 4;

/// RLC AM header size assumed for every MAC SDU still in a DL HARQ
const RLC_AM_HEADER_SIZE_ESTIM: u32 = 4;

/// UL bytes requested on behalf of a UE that only signalled an SR
const SR_GRANT_BYTES: u32 = 512;

#[derive(Debug)]
pub struct Ue {
    pub ue_index: DuUeIndex,
    pub crnti: Rnti,
    cfg: UeConfiguration,
    lc_ch_mgr: UeLogicalChannelRepository,
    ta_mgr: UeTaManager,
    /// Serving cells, PCell first
    cells: SmallVec<[DuCellIndex; MAX_NOF_UE_CELLS]>,
    last_sl_tx: Option<SlotPoint>,
}

impl Ue {
    pub(crate) fn new(cfg: &UeConfiguration, lc_ch_mgr: UeLogicalChannelRepository, ta_mgr: UeTaManager) -> Self {
        Self {
            ue_index: cfg.ue_index,
            crnti: cfg.crnti,
            cfg: cfg.clone(),
            lc_ch_mgr,
            ta_mgr,
            cells: cfg.cells.iter().map(|c| c.cell_index).collect(),
            last_sl_tx: None,
        }
    }

    pub fn cfg(&self) -> &UeConfiguration {
        &self.cfg
    }

    pub fn nof_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn pcell_index(&self) -> DuCellIndex {
        self.cells[0]
    }

    pub fn cell_indexes(&self) -> &[DuCellIndex] {
        &self.cells
    }

    pub fn has_cell(&self, cell_index: DuCellIndex) -> bool {
        self.cells.contains(&cell_index)
    }

    pub fn logical_channels(&self) -> &UeLogicalChannelRepository {
        &self.lc_ch_mgr
    }

    pub fn ta_manager(&self) -> &UeTaManager {
        &self.ta_mgr
    }

    pub fn last_sl_tx(&self) -> Option<SlotPoint> {
        self.last_sl_tx
    }

    pub fn slot_indication(&mut self, sl_tx: SlotPoint) {
        self.last_sl_tx = Some(sl_tx);
    }

    /// Stop multiplexing data of any bearer. Pending RRC messages are assumed to be already delivered.
    pub fn deactivate(&mut self) {
        self.lc_ch_mgr.deactivate();
    }

    pub(crate) fn handle_reconfiguration_request(&mut self, new_cfg: &UeConfiguration) {
        self.cfg = new_cfg.clone();
        self.cells = new_cfg.cells.iter().map(|c| c.cell_index).collect();
        self.ta_mgr.update_tags(&new_cfg.tag_ids());
    }

    /// Forward an RLC buffer occupancy, minus what is already sitting in future DL HARQ newTxs.
    ///
    /// RLC reports never account for bytes of PDSCHs not yet sent to the lower layers.
    /// Every such MAC SDU is assumed to carry one RLC header, which the report does
    /// not include either.
    pub fn handle_dl_buffer_state_indication(
        &self,
        ue_cells: &[&UeCell],
        lcid: Lcid,
        bs: u32,
        hol_toa: Option<SlotPoint>,
    ) {
        let mut pending_bytes = bs;
        if let Some(last_sl) = self.last_sl_tx {
            for ue_cc in ue_cells {
                if !ue_cc.harqs().last_pdsch_slot().is_some_and(|s| s > last_sl) {
                    continue;
                }
                for (h_lcid, sched_bytes) in ue_cc.harqs().dl_newtx_sdu_allocs_after(last_sl) {
                    if h_lcid == lcid {
                        let sdu_bytes = sched_bytes - sched_bytes.min(RLC_AM_HEADER_SIZE_ESTIM);
                        pending_bytes -= pending_bytes.min(sdu_bytes);
                    }
                }
            }
        }
        self.lc_ch_mgr.handle_dl_buffer_status_indication(lcid, pending_bytes, hol_toa);
    }

    /// UL bytes to grant as newTx: last BSRs minus bytes already granted in UL HARQs
    pub fn pending_ul_newtx_bytes(&self, ue_cells: &[&UeCell]) -> u32 {
        let mut pending_bytes = self.lc_ch_mgr.ul_pending_bytes();
        for ue_cc in ue_cells {
            if pending_bytes == 0 {
                break;
            }
            pending_bytes -= pending_bytes.min(ue_cc.harqs().total_ul_bytes_waiting_ack());
        }
        if pending_bytes > 0 {
            pending_bytes
        } else if self.lc_ch_mgr.has_pending_sr() {
            SR_GRANT_BYTES
        } else {
            0
        }
    }

    /// DL bytes to grant as newTx, for one slice or for the whole UE
    pub fn pending_dl_newtx_bytes(&self, slice_id: Option<RanSliceId>) -> u32 {
        match slice_id {
            Some(slice_id) => self.lc_ch_mgr.dl_slice_pending_bytes(slice_id),
            None => self.lc_ch_mgr.dl_pending_bytes(),
        }
    }

    pub fn has_pending_sr(&self) -> bool {
        self.lc_ch_mgr.has_pending_sr()
    }

    pub fn handle_ul_n_ta_update_indication(&self, tag_id: TagId, n_ta_diff: i64, ul_sinr_db: f32) {
        self.ta_mgr.handle_ul_n_ta_update_indication(tag_id, n_ta_diff, ul_sinr_db);
    }
}
