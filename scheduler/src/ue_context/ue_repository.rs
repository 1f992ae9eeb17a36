//! UE Repository
//!
//! Owns every scheduler UE, the per-cell UE repositories, the logical channel and
//! TA management systems and the per-UE DRX controllers, and drives them all from
//! the slot tick. UE removal is two-phase: bearers stop at once, the state goes
//! away only after the UL allocation window has passed and no HARQ is in flight.

use crate::config::SchedulerExpertConfig;
use crate::support::flat_map::SmallFlatMap;
use crate::support::slot_table::SlottedIdTable;
use crate::ue_context::logical_channel_system::{LogicalChannelSystem, UeBitset};
use crate::ue_context::ta_management_system::TaManagementSystem;
use crate::ue_context::ue::{Ue, MAX_NOF_UE_CELLS};
use crate::ue_context::ue_cell::UeCell;
use crate::ue_context::ue_cell_repository::UeCellRepository;
use crate::ue_context::ue_drx_controller::UeDrxController;
use crate::SchedError;
use common::slot_point::SlotPoint;
use common::types::{DuCellIndex, DuUeIndex, RanSliceId, Rnti, MAX_NOF_DU_CELLS, MAX_NOF_DU_UES};
use interfaces::message_types::{DlBufferStateIndication, TaUpdateIndication, UlBsrIndication, UlPhrIndication};
use interfaces::sched_config::{CellConfiguration, UeConfiguration};
use smallvec::SmallVec;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Completion token of a UE removal request.
///
/// The receiver returned by [`UeRemovalEvent::new`] gets the UE index once the UE
/// state is gone, or once the event is dropped without the removal taking place.
#[derive(Debug)]
pub struct UeRemovalEvent {
    ue_index: DuUeIndex,
    notifier: Option<oneshot::Sender<DuUeIndex>>,
}

impl UeRemovalEvent {
    pub fn new(ue_index: DuUeIndex) -> (Self, oneshot::Receiver<DuUeIndex>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                ue_index,
                notifier: Some(tx),
            },
            rx,
        )
    }

    pub fn ue_index(&self) -> DuUeIndex {
        self.ue_index
    }

    /// Whether the completion has not been signalled yet
    pub fn valid(&self) -> bool {
        self.notifier.is_some()
    }

    /// Signal completion
    pub fn reset(&mut self) {
        if let Some(tx) = self.notifier.take() {
            // The requester may have stopped waiting
            let _ = tx.send(self.ue_index);
        }
    }
}

impl Drop for UeRemovalEvent {
    fn drop(&mut self) {
        self.reset();
    }
}

#[derive(Debug)]
struct PendingRemoval {
    /// First slot at which the UE may be removed. None if no slot was seen yet.
    rem_slot: Option<SlotPoint>,
    ev: UeRemovalEvent,
}

#[derive(Debug)]
pub struct UeRepository {
    expert_cfg: SchedulerExpertConfig,
    cells: SlottedIdTable<UeCellRepository>,
    lc_ch_sys: LogicalChannelSystem,
    ta_mgr_sys: TaManagementSystem,
    ue_drx_controllers: SlottedIdTable<UeDrxController>,
    ues: SlottedIdTable<Ue>,
    rnti_to_ue_index: SmallFlatMap<Rnti, DuUeIndex>,
    ues_to_rem: VecDeque<PendingRemoval>,
    last_sl_tx: Option<SlotPoint>,
}

impl UeRepository {
    pub fn new(expert_cfg: &SchedulerExpertConfig) -> Self {
        Self {
            expert_cfg: expert_cfg.clone(),
            cells: SlottedIdTable::new(MAX_NOF_DU_CELLS),
            lc_ch_sys: LogicalChannelSystem::new(),
            ta_mgr_sys: TaManagementSystem::new(&expert_cfg.ta),
            ue_drx_controllers: SlottedIdTable::new(MAX_NOF_DU_UES),
            ues: SlottedIdTable::new(MAX_NOF_DU_UES),
            rnti_to_ue_index: SmallFlatMap::new(),
            ues_to_rem: VecDeque::with_capacity(MAX_NOF_DU_UES),
            last_sl_tx: None,
        }
    }

    pub fn contains(&self, ue_index: DuUeIndex) -> bool {
        self.ues.contains(ue_index.as_usize())
    }

    pub fn len(&self) -> usize {
        self.ues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ue> {
        self.ues.values()
    }

    pub fn find(&self, ue_index: DuUeIndex) -> Option<&Ue> {
        self.ues.get(ue_index.as_usize())
    }

    pub fn find_mut(&mut self, ue_index: DuUeIndex) -> Option<&mut Ue> {
        self.ues.get_mut(ue_index.as_usize())
    }

    pub fn find_by_rnti(&self, rnti: Rnti) -> Option<&Ue> {
        let ue_index = *self.rnti_to_ue_index.get(&rnti)?;
        self.find(ue_index)
    }

    pub fn cell(&self, cell_index: DuCellIndex) -> Option<&UeCellRepository> {
        self.cells.get(cell_index.0 as usize)
    }

    pub fn cell_mut(&mut self, cell_index: DuCellIndex) -> Option<&mut UeCellRepository> {
        self.cells.get_mut(cell_index.0 as usize)
    }

    pub fn logical_channel_system(&self) -> &LogicalChannelSystem {
        &self.lc_ch_sys
    }

    pub fn ta_management_system(&self) -> &TaManagementSystem {
        &self.ta_mgr_sys
    }

    pub fn drx_controller(&self, ue_index: DuUeIndex) -> Option<&UeDrxController> {
        self.ue_drx_controllers.get(ue_index.as_usize())
    }

    pub fn drx_controller_mut(&mut self, ue_index: DuUeIndex) -> Option<&mut UeDrxController> {
        self.ue_drx_controllers.get_mut(ue_index.as_usize())
    }

    /// Cells of a UE, PCell first
    pub fn ue_cells(&self, ue_index: DuUeIndex) -> SmallVec<[&UeCell; MAX_NOF_UE_CELLS]> {
        let Some(u) = self.find(ue_index) else {
            return SmallVec::new();
        };
        u.cell_indexes()
            .iter()
            .filter_map(|c| self.cell(*c).and_then(|repo| repo.find(ue_index)))
            .collect()
    }

    pub fn ue_cell_mut(&mut self, ue_index: DuUeIndex, cell_index: DuCellIndex) -> Option<&mut UeCell> {
        self.cell_mut(cell_index)?.find_mut(ue_index)
    }

    pub fn add_cell(&mut self, cell_cfg: &CellConfiguration) -> Result<&mut UeCellRepository, SchedError> {
        let idx = cell_cfg.cell_index.0 as usize;
        if idx >= MAX_NOF_DU_CELLS {
            return Err(SchedError::UnknownCell(cell_cfg.cell_index));
        }
        if self.cells.contains(idx) {
            return Err(SchedError::DuplicateCell(cell_cfg.cell_index));
        }
        info!("cell={}: Cell added to the UE repository", cell_cfg.cell_index);
        Ok(self.cells.emplace(idx, UeCellRepository::new(cell_cfg, &self.expert_cfg)))
    }

    pub fn rem_cell(&mut self, cell_index: DuCellIndex) {
        if let Some(repo) = self.cells.erase(cell_index.0 as usize) {
            if !repo.is_empty() {
                warn!("cell={}: Removing cell with {} UEs still attached", cell_index, repo.len());
            }
        }
    }

    fn check_cells(&self, ue_cfg: &UeConfiguration) -> Result<(), SchedError> {
        ue_cfg.validate()?;
        for c in &ue_cfg.cells {
            if !self.cells.contains(c.cell_index.0 as usize) {
                return Err(SchedError::UnknownCell(c.cell_index));
            }
        }
        Ok(())
    }

    /// Create a UE with its logical channels, TA manager, DRX controller and cells
    pub fn add_ue(&mut self, ue_cfg: &UeConfiguration) -> Result<(), SchedError> {
        self.check_cells(ue_cfg)?;
        let ue_index = ue_cfg.ue_index;
        assert!(
            !self.contains(ue_index),
            "ue={}: UE with duplicate index being added to the repository",
            ue_index
        );
        assert!(
            !self.rnti_to_ue_index.contains(&ue_cfg.crnti),
            "rnti={}: UE with duplicate RNTI being added to the repository",
            ue_cfg.crnti
        );

        let pcell_cfg = ue_cfg.pcell();
        let scs = self.cells[pcell_cfg.cell_index.0 as usize].cell_cfg().scs_common;
        let lc_ch_mgr = self
            .lc_ch_sys
            .create_ue(ue_index, scs, ue_cfg.starts_in_fallback, &ue_cfg.logical_channels);
        self.ue_drx_controllers.emplace(
            ue_index.as_usize(),
            UeDrxController::new(
                scs,
                self.expert_cfg.ue.ra_con_res_timer_ms,
                ue_cfg.drx,
                lc_ch_mgr.view(),
                ue_cfg.ul_ccch_slot_rx,
            ),
        );
        let ta_mgr = self.ta_mgr_sys.add_ue(pcell_cfg.tag_id, scs, lc_ch_mgr.view());

        for (i, c) in ue_cfg.cells.iter().enumerate() {
            let ue_cc = self.cells[c.cell_index.0 as usize].add_ue(ue_cfg, i);
            ue_cc.set_fallback_state(ue_cfg.starts_in_fallback);
        }

        self.ues.emplace(ue_index.as_usize(), Ue::new(ue_cfg, lc_ch_mgr, ta_mgr));
        self.rnti_to_ue_index.insert(ue_cfg.crnti, ue_index);
        info!(
            "ue={} rnti={}: UE created with {} cell(s)",
            ue_index,
            ue_cfg.crnti,
            ue_cfg.cells.len()
        );
        Ok(())
    }

    /// Apply a new UE configuration. The UE enters fallback until [`Self::ue_config_applied`].
    pub fn reconfigure_ue(&mut self, new_cfg: &UeConfiguration) -> Result<(), SchedError> {
        let ue_index = new_cfg.ue_index;
        if !self.contains(ue_index) {
            return Err(SchedError::UnknownUe(ue_index));
        }
        self.check_cells(new_cfg)?;
        let prev_cells: SmallVec<[DuCellIndex; MAX_NOF_UE_CELLS]> =
            self.ues[ue_index.as_usize()].cell_indexes().iter().copied().collect();
        assert_eq!(
            new_cfg.pcell().cell_index,
            prev_cells[0],
            "PCell removal is not supported in UE reconfiguration"
        );

        if let Some(pcell) = self.ue_cell_mut(ue_index, prev_cells[0]) {
            pcell.set_fallback_state(true);
        }
        {
            let lc_ch_mgr = self.ues[ue_index.as_usize()].logical_channels();
            lc_ch_mgr.set_fallback_state(true);
            lc_ch_mgr.configure(&new_cfg.logical_channels);
        }
        if new_cfg.drx.is_some() {
            self.ue_drx_controllers[ue_index.as_usize()].reconfigure(new_cfg.drx);
        }

        for cell_index in prev_cells.iter().skip(1) {
            if new_cfg.cell_cfg(*cell_index).is_none() {
                self.cells[cell_index.0 as usize].rem_ue(ue_index);
            }
        }
        for (i, c) in new_cfg.cells.iter().enumerate() {
            let repo = &mut self.cells[c.cell_index.0 as usize];
            match repo.find_mut(ue_index) {
                Some(ue_cc) => {
                    ue_cc.handle_reconfiguration_request(c);
                    ue_cc.set_ue_cell_index(i);
                }
                None => {
                    repo.add_ue(new_cfg, i);
                }
            }
        }

        self.ues[ue_index.as_usize()].handle_reconfiguration_request(new_cfg);
        info!("ue={} rnti={}: UE reconfigured", ue_index, new_cfg.crnti);
        Ok(())
    }

    /// The UE applied its last configuration and leaves fallback
    pub fn ue_config_applied(&mut self, ue_index: DuUeIndex) {
        assert!(self.contains(ue_index), "ue={} : UE not found in the repository", ue_index);
        let pcell_index = self.ues[ue_index.as_usize()].pcell_index();
        if let Some(pcell) = self.ue_cell_mut(ue_index, pcell_index) {
            pcell.set_fallback_state(false);
        }
        self.ues[ue_index.as_usize()].logical_channels().set_fallback_state(false);
    }

    /// Deactivate the UE now and remove it once it is safe to do so.
    ///
    /// Until the removal slot, PDUs already placed in the resource grid may still
    /// reference the UE PUCCH resources, which a new UE must not get.
    pub fn schedule_ue_rem(&mut self, ev: UeRemovalEvent) {
        let ue_index = ev.ue_index();
        if !self.contains(ue_index) {
            warn!("ue={}: Removal requested for an unknown UE", ue_index);
            return;
        }
        self.ues[ue_index.as_usize()].deactivate();
        let cells: SmallVec<[DuCellIndex; MAX_NOF_UE_CELLS]> =
            self.ues[ue_index.as_usize()].cell_indexes().iter().copied().collect();
        for cell_index in cells {
            if let Some(ue_cc) = self.ue_cell_mut(ue_index, cell_index) {
                ue_cc.deactivate();
            }
        }
        let rem_slot = self
            .last_sl_tx
            .map(|sl| sl + self.expert_cfg.ue.max_ul_alloc_delay_slots + 1);
        info!(
            "ue={}: UE scheduled for removal at slot={}",
            ue_index,
            rem_slot.map_or_else(|| "next".to_string(), |s| s.to_string())
        );
        self.ues_to_rem.push_back(PendingRemoval { rem_slot, ev });
    }

    fn is_ue_ready_for_removal(&self, ue_index: DuUeIndex) -> bool {
        self.ue_cells(ue_index)
            .iter()
            .all(|c| !c.harqs().has_active_dl_harqs() && !c.harqs().has_active_ul_harqs())
    }

    /// Remove the UE at once, without waiting for in-flight HARQs
    fn rem_ue(&mut self, ue_index: DuUeIndex) {
        let Some(u) = self.ues.erase(ue_index.as_usize()) else {
            return;
        };
        for cell_index in u.cell_indexes() {
            if let Some(repo) = self.cells.get_mut(cell_index.0 as usize) {
                if let Some(ue_cc) = repo.find(ue_index) {
                    ue_cc.harqs().reset();
                }
                repo.rem_ue(ue_index);
            }
        }
        self.ue_drx_controllers.erase(ue_index.as_usize());
        if self.rnti_to_ue_index.remove(&u.crnti).is_none() {
            error!(
                "ue={} rnti={}: UE with provided c-rnti not found in RNTI-to-UE-index lookup table",
                ue_index, u.crnti
            );
        }
        // Dropping the UE releases its logical channels and TA context
    }

    /// Advance all UE state to `sl_tx`
    pub fn slot_indication(&mut self, sl_tx: SlotPoint) {
        self.last_sl_tx = Some(sl_tx);

        for i in 0..self.ues_to_rem.len() {
            let p = &self.ues_to_rem[i];
            if !p.ev.valid() || p.rem_slot.is_some_and(|s| s > sl_tx) {
                continue;
            }
            let ue_index = p.ev.ue_index();
            if !self.contains(ue_index) {
                error!("ue={}: Unexpected UE removal from UE repository", ue_index);
                self.ues_to_rem[i].ev.reset();
                continue;
            }
            if !self.is_ue_ready_for_removal(ue_index) {
                continue;
            }
            let crnti = self.ues[ue_index.as_usize()].crnti;
            self.rem_ue(ue_index);
            self.ues_to_rem[i].ev.reset();
            info!("ue={} rnti={}: UE has been successfully removed", ue_index, crnti);
        }
        // Completed entries behind one still waiting on HARQ are pruned once it completes
        while self.ues_to_rem.front().is_some_and(|p| !p.ev.valid()) {
            self.ues_to_rem.pop_front();
        }

        for repo in self.cells.values_mut() {
            repo.slot_indication(sl_tx);
        }
        self.lc_ch_sys.slot_indication();
        self.ta_mgr_sys.slot_indication(sl_tx);
        for drx in self.ue_drx_controllers.values_mut() {
            drx.slot_indication(sl_tx);
        }
        for u in self.ues.values_mut() {
            u.slot_indication(sl_tx);
        }
    }

    /// Remove every UE served by the cell, as PCell or SCell, and stop the cell
    pub fn handle_cell_deactivation(&mut self, cell_index: DuCellIndex) {
        let ues_in_cell: SmallVec<[DuUeIndex; 16]> = self
            .ues
            .values()
            .filter(|u| u.has_cell(cell_index))
            .map(|u| u.ue_index)
            .collect();
        for ue_index in ues_in_cell {
            debug!("ue={}: Removed due to deactivation of cell={}", ue_index, cell_index);
            self.rem_ue(ue_index);
        }

        for i in 0..self.ues_to_rem.len() {
            let ue_index = self.ues_to_rem[i].ev.ue_index();
            if self.ues_to_rem[i].ev.valid() && !self.contains(ue_index) {
                self.ues_to_rem[i].ev.reset();
            }
        }

        if let Some(repo) = self.cell_mut(cell_index) {
            repo.deactivate();
        }
    }

    pub fn get_ues_with_pending_newtx_data(&self, slice_id: RanSliceId, is_dl: bool) -> UeBitset {
        if is_dl {
            self.lc_ch_sys.get_ues_with_dl_pending_data(slice_id)
        } else {
            self.lc_ch_sys.get_ues_with_ul_pending_data(slice_id)
        }
    }

    pub fn handle_dl_buffer_state_indication(&self, ind: &DlBufferStateIndication) {
        let Some(u) = self.find(ind.ue_index) else {
            warn!("ue={}: Discarding DL buffer state. Cause: UE not found", ind.ue_index);
            return;
        };
        let ue_cells = self.ue_cells(ind.ue_index);
        u.handle_dl_buffer_state_indication(&ue_cells, ind.lcid, ind.bs, ind.hol_toa);
    }

    pub fn handle_ul_bsr_indication(&self, bsr: &UlBsrIndication) {
        match self.find(bsr.ue_index) {
            Some(u) => u.logical_channels().handle_bsr_indication(bsr),
            None => warn!("ue={}: Discarding BSR. Cause: UE not found", bsr.ue_index),
        }
    }

    pub fn handle_sr_indication(&self, ue_index: DuUeIndex) {
        if let Some(u) = self.find(ue_index) {
            u.logical_channels().handle_sr_indication();
        }
    }

    pub fn handle_ul_phr_indication(&mut self, phr: &UlPhrIndication) {
        match self.ue_cell_mut(phr.ue_index, phr.phr.serv_cell_id) {
            Some(ue_cc) => ue_cc.handle_phr(&phr.phr, phr.slot_rx),
            None => warn!(
                "ue={} cell={}: Discarding PHR. Cause: UE cell not found",
                phr.ue_index, phr.phr.serv_cell_id
            ),
        }
    }

    pub fn handle_ta_update_indication(&self, ind: &TaUpdateIndication) {
        if let Some(u) = self.find(ind.ue_index) {
            u.handle_ul_n_ta_update_indication(ind.tag_id, ind.n_ta_diff, ind.ul_sinr_db);
        }
    }

    /// UL newTx bytes of a UE, net of bytes already granted
    pub fn pending_ul_newtx_bytes(&self, ue_index: DuUeIndex) -> u32 {
        self.find(ue_index)
            .map_or(0, |u| u.pending_ul_newtx_bytes(&self.ue_cells(ue_index)))
    }
}

impl Drop for UeRepository {
    fn drop(&mut self) {
        // Pending requests complete with the repository
        for p in self.ues_to_rem.iter_mut() {
            p.ev.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{Lcid, SubcarrierSpacing, TagId, DEFAULT_DRB_RAN_SLICE_ID, SRB_RAN_SLICE_ID};
    use interfaces::dl_pdu::DlMsgTbInfo;
    use interfaces::sched_config::{LogicalChannelConfig, LogicalChannelConfigList, UeCellConfig};
    use oneshot::error::TryRecvError;

    const SCS: SubcarrierSpacing = SubcarrierSpacing::Scs30;

    fn cell_cfg(idx: u8) -> CellConfiguration {
        CellConfiguration {
            cell_index: DuCellIndex(idx),
            scs_common: SCS,
            p0_nominal_pusch_db: -76,
            nof_ul_prbs: 52,
        }
    }

    fn ue_cell_cfg(idx: u8) -> UeCellConfig {
        UeCellConfig {
            cell_index: DuCellIndex(idx),
            tag_id: TagId(0),
            pucch: None,
            pusch_pw_ctrl: None,
            nof_dl_ports: 1,
        }
    }

    fn ue_cfg(idx: u16, cells: &[u8]) -> UeConfiguration {
        UeConfiguration {
            ue_index: DuUeIndex(idx),
            crnti: Rnti(0x4601 + idx),
            cells: cells.iter().map(|c| ue_cell_cfg(*c)).collect(),
            logical_channels: LogicalChannelConfigList::new(vec![
                LogicalChannelConfig::srb(Lcid::SRB0),
                LogicalChannelConfig::srb(Lcid::SRB1),
            ]),
            drx: None,
            starts_in_fallback: false,
            ul_ccch_slot_rx: None,
        }
    }

    fn make_repo(nof_cells: u8) -> UeRepository {
        let mut repo = UeRepository::new(&SchedulerExpertConfig::default());
        for c in 0..nof_cells {
            repo.add_cell(&cell_cfg(c)).unwrap();
        }
        repo
    }

    #[test]
    fn test_add_ue_wires_all_components() {
        let mut repo = make_repo(2);
        repo.add_ue(&ue_cfg(3, &[0, 1])).unwrap();
        assert!(repo.contains(DuUeIndex(3)));
        assert_eq!(repo.find_by_rnti(Rnti(0x4604)).map(|u| u.ue_index), Some(DuUeIndex(3)));
        assert!(repo.cell(DuCellIndex(1)).unwrap().contains(DuUeIndex(3)));
        assert_eq!(repo.ue_cells(DuUeIndex(3)).len(), 2);
        assert!(repo.drx_controller(DuUeIndex(3)).is_some());
        assert_eq!(repo.ta_management_system().nof_active_ues(), 1);
        assert_eq!(repo.logical_channel_system().nof_ues(), 1);
    }

    #[test]
    fn test_add_ue_errors() {
        let mut repo = make_repo(1);
        assert_eq!(
            repo.add_ue(&ue_cfg(0, &[2])),
            Err(SchedError::UnknownCell(DuCellIndex(2)))
        );
        assert!(matches!(repo.add_ue(&ue_cfg(0, &[])), Err(SchedError::InvalidConfig(_))));
        assert!(repo.is_empty());
        assert!(matches!(repo.add_cell(&cell_cfg(0)), Err(SchedError::DuplicateCell(_))));
    }

    #[test]
    fn test_removal_waits_for_harq() {
        let mut repo = make_repo(1);
        repo.add_ue(&ue_cfg(0, &[0])).unwrap();
        let mut sl = SlotPoint::new(SCS, 0);
        repo.slot_indication(sl);

        let h_id = repo.ue_cells(DuUeIndex(0))[0]
            .harqs()
            .alloc_dl_harq(sl + 1, 4, 100, DlMsgTbInfo::default())
            .unwrap();
        let (ev, mut rx) = UeRemovalEvent::new(DuUeIndex(0));
        repo.schedule_ue_rem(ev);

        for _ in 0..20 {
            sl += 1;
            repo.slot_indication(sl);
            assert!(repo.contains(DuUeIndex(0)));
            assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        }

        repo.ue_cell_mut(DuUeIndex(0), DuCellIndex(0))
            .unwrap()
            .handle_dl_ack_info(h_id, true);
        sl += 1;
        repo.slot_indication(sl);
        assert!(!repo.contains(DuUeIndex(0)));
        assert_eq!(rx.try_recv(), Ok(DuUeIndex(0)));
        assert!(!repo.cell(DuCellIndex(0)).unwrap().contains(DuUeIndex(0)));
        assert_eq!(repo.ta_management_system().nof_active_ues(), 0);
        assert_eq!(repo.logical_channel_system().nof_ues(), 0);
        assert!(repo.drx_controller(DuUeIndex(0)).is_none());
    }

    #[test]
    fn test_blocked_removal_does_not_delay_later_ones() {
        let mut repo = make_repo(1);
        repo.add_ue(&ue_cfg(0, &[0])).unwrap();
        repo.add_ue(&ue_cfg(1, &[0])).unwrap();
        let mut sl = SlotPoint::new(SCS, 0);
        repo.slot_indication(sl);

        let h_id = repo.ue_cells(DuUeIndex(0))[0]
            .harqs()
            .alloc_dl_harq(sl + 1, 4, 100, DlMsgTbInfo::default())
            .unwrap();
        let (ev0, mut rx0) = UeRemovalEvent::new(DuUeIndex(0));
        let (ev1, mut rx1) = UeRemovalEvent::new(DuUeIndex(1));
        repo.schedule_ue_rem(ev0);
        repo.schedule_ue_rem(ev1);

        for _ in 0..9 {
            sl += 1;
            repo.slot_indication(sl);
        }
        assert!(repo.contains(DuUeIndex(0)));
        assert!(!repo.contains(DuUeIndex(1)));
        assert_eq!(rx0.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(rx1.try_recv(), Ok(DuUeIndex(1)));

        repo.ue_cell_mut(DuUeIndex(0), DuCellIndex(0))
            .unwrap()
            .handle_dl_ack_info(h_id, true);
        sl += 1;
        repo.slot_indication(sl);
        assert!(repo.is_empty());
        assert_eq!(rx0.try_recv(), Ok(DuUeIndex(0)));
    }

    #[test]
    fn test_removal_respects_ul_alloc_delay() {
        let mut repo = make_repo(1);
        repo.add_ue(&ue_cfg(0, &[0])).unwrap();
        let mut sl = SlotPoint::new(SCS, 100);
        repo.slot_indication(sl);
        let (ev, mut rx) = UeRemovalEvent::new(DuUeIndex(0));
        repo.schedule_ue_rem(ev);

        // Removal slot is 100 + 8 + 1
        for _ in 0..8 {
            sl += 1;
            repo.slot_indication(sl);
            assert!(repo.contains(DuUeIndex(0)));
        }
        sl += 1;
        repo.slot_indication(sl);
        assert!(!repo.contains(DuUeIndex(0)));
        assert_eq!(rx.try_recv(), Ok(DuUeIndex(0)));
    }

    #[test]
    fn test_deactivated_ue_has_no_pending_data() {
        let mut repo = make_repo(1);
        repo.add_ue(&ue_cfg(0, &[0])).unwrap();
        repo.find(DuUeIndex(0))
            .unwrap()
            .logical_channels()
            .set_lcid_ran_slice(Lcid::SRB1, SRB_RAN_SLICE_ID);
        repo.slot_indication(SlotPoint::new(SCS, 0));
        repo.handle_dl_buffer_state_indication(&DlBufferStateIndication {
            ue_index: DuUeIndex(0),
            lcid: Lcid::SRB1,
            bs: 100,
            hol_toa: None,
        });
        assert!(repo.get_ues_with_pending_newtx_data(SRB_RAN_SLICE_ID, true).contains(0));

        let (ev, _rx) = UeRemovalEvent::new(DuUeIndex(0));
        repo.schedule_ue_rem(ev);
        assert!(!repo.get_ues_with_pending_newtx_data(SRB_RAN_SLICE_ID, true).contains(0));
        assert!(repo.cell(DuCellIndex(0)).unwrap().find(DuUeIndex(0)).is_some_and(|c| !c.is_active()));
    }

    #[test]
    fn test_dl_buffer_state_discounts_future_harqs() {
        let mut repo = make_repo(1);
        let mut cfg = ue_cfg(0, &[0]);
        cfg.logical_channels = LogicalChannelConfigList::new(vec![
            LogicalChannelConfig::srb(Lcid::SRB1),
            LogicalChannelConfig {
                lcid: Lcid::MIN_DRB,
                priority: 2,
                lc_group: common::types::LcgId(1),
                qos: None,
            },
        ]);
        repo.add_ue(&cfg).unwrap();
        repo.find(DuUeIndex(0))
            .unwrap()
            .logical_channels()
            .set_lcid_ran_slice(Lcid::MIN_DRB, DEFAULT_DRB_RAN_SLICE_ID);
        let sl = SlotPoint::new(SCS, 0);
        repo.slot_indication(sl);

        let mut tb = DlMsgTbInfo::default();
        tb.push(interfaces::dl_pdu::DlMsgLcInfo {
            lcid: Lcid::MIN_DRB.into(),
            sched_bytes: 304,
            ce_payload: None,
        });
        repo.ue_cells(DuUeIndex(0))[0]
            .harqs()
            .alloc_dl_harq(sl + 2, 4, 310, tb)
            .unwrap();

        repo.handle_dl_buffer_state_indication(&DlBufferStateIndication {
            ue_index: DuUeIndex(0),
            lcid: Lcid::MIN_DRB,
            bs: 1000,
            hol_toa: None,
        });
        let lc = repo.find(DuUeIndex(0)).unwrap().logical_channels();
        assert_eq!(lc.pending_bytes(Lcid::MIN_DRB), 700);
        assert!(repo.get_ues_with_pending_newtx_data(DEFAULT_DRB_RAN_SLICE_ID, true).contains(0));
    }

    #[test]
    fn test_reconfigure_adds_and_removes_scells() {
        let mut repo = make_repo(3);
        repo.add_ue(&ue_cfg(0, &[0, 1])).unwrap();
        repo.reconfigure_ue(&ue_cfg(0, &[0, 2])).unwrap();

        assert!(!repo.cell(DuCellIndex(1)).unwrap().contains(DuUeIndex(0)));
        let scell = repo.cell(DuCellIndex(2)).unwrap().find(DuUeIndex(0)).unwrap();
        assert_eq!(scell.ue_cell_index(), 1);
        assert_eq!(repo.find(DuUeIndex(0)).unwrap().cell_indexes(), &[DuCellIndex(0), DuCellIndex(2)]);

        // Fallback until the UE confirms the new configuration
        let pcell = repo.cell(DuCellIndex(0)).unwrap().find(DuUeIndex(0)).unwrap();
        assert!(pcell.is_in_fallback_mode());
        assert!(repo.find(DuUeIndex(0)).unwrap().logical_channels().is_in_fallback_state());
        repo.ue_config_applied(DuUeIndex(0));
        assert!(!repo.find(DuUeIndex(0)).unwrap().logical_channels().is_in_fallback_state());

        assert_eq!(
            repo.reconfigure_ue(&ue_cfg(7, &[0])),
            Err(SchedError::UnknownUe(DuUeIndex(7)))
        );
    }

    #[test]
    #[should_panic]
    fn test_pcell_removal_panics() {
        let mut repo = make_repo(2);
        repo.add_ue(&ue_cfg(0, &[0, 1])).unwrap();
        let _ = repo.reconfigure_ue(&ue_cfg(0, &[1]));
    }

    #[test]
    fn test_cell_deactivation_removes_ues() {
        let mut repo = make_repo(2);
        repo.add_ue(&ue_cfg(0, &[0])).unwrap();
        repo.add_ue(&ue_cfg(1, &[0, 1])).unwrap();
        repo.add_ue(&ue_cfg(2, &[1])).unwrap();
        repo.slot_indication(SlotPoint::new(SCS, 0));

        let (ev, mut rx) = UeRemovalEvent::new(DuUeIndex(2));
        repo.schedule_ue_rem(ev);
        repo.handle_cell_deactivation(DuCellIndex(1));

        assert!(repo.contains(DuUeIndex(0)));
        assert!(!repo.contains(DuUeIndex(1)));
        assert!(!repo.contains(DuUeIndex(2)));
        assert!(!repo.cell(DuCellIndex(0)).unwrap().contains(DuUeIndex(1)));
        assert!(repo.cell(DuCellIndex(1)).unwrap().cell_harqs().is_stopped());
        assert_eq!(rx.try_recv(), Ok(DuUeIndex(2)));
    }

    #[test]
    fn test_unknown_ue_removal_completes_immediately() {
        let mut repo = make_repo(1);
        let (ev, mut rx) = UeRemovalEvent::new(DuUeIndex(9));
        repo.schedule_ue_rem(ev);
        assert_eq!(rx.try_recv(), Ok(DuUeIndex(9)));
    }

    #[tokio::test]
    async fn test_removal_event_awaitable() {
        let mut repo = make_repo(1);
        repo.add_ue(&ue_cfg(0, &[0])).unwrap();
        let (ev, rx) = UeRemovalEvent::new(DuUeIndex(0));
        repo.schedule_ue_rem(ev);
        // No slot seen yet, so the UE goes at the first tick
        repo.slot_indication(SlotPoint::new(SCS, 0));
        assert_eq!(rx.await, Ok(DuUeIndex(0)));
    }
}
