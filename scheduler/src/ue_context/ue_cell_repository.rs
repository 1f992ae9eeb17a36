//! UEs configured in one cell
//!
//! Owns the cell HARQ manager and, per UE, the [`UeCell`] bundling its channel
//! state, link adaptation and power controllers, so that these are always
//! created and destroyed together.

use crate::config::SchedulerExpertConfig;
use crate::support::flat_map::SmallFlatMap;
use crate::support::slot_table::SlottedIdTable;
use crate::ue_context::harq_manager::CellHarqManager;
use crate::ue_context::ue_cell::UeCell;
use common::slot_point::SlotPoint;
use common::types::{DuCellIndex, DuUeIndex, Rnti, MAX_NOF_DU_UES};
use interfaces::sched_config::{CellConfiguration, UeConfiguration};
use tracing::error;

#[derive(Debug)]
pub struct UeCellRepository {
    cell_cfg: CellConfiguration,
    expert_cfg: SchedulerExpertConfig,
    cell_harqs: CellHarqManager,
    ues: SlottedIdTable<UeCell>,
    rnti_to_ue_index: SmallFlatMap<Rnti, DuUeIndex>,
}

impl UeCellRepository {
    pub fn new(cell_cfg: &CellConfiguration, expert_cfg: &SchedulerExpertConfig) -> Self {
        let slots_per_ms = cell_cfg.scs_common.slots_per_subframe();
        let ue_cfg = &expert_cfg.ue;
        Self {
            cell_cfg: cell_cfg.clone(),
            expert_cfg: expert_cfg.clone(),
            cell_harqs: CellHarqManager::new(
                ue_cfg.max_nof_harq_retxs,
                ue_cfg.dl_harq_timeout_ms * slots_per_ms,
                ue_cfg.ul_harq_timeout_ms * slots_per_ms,
            ),
            ues: SlottedIdTable::new(MAX_NOF_DU_UES),
            rnti_to_ue_index: SmallFlatMap::new(),
        }
    }

    pub fn cell_index(&self) -> DuCellIndex {
        self.cell_cfg.cell_index
    }

    pub fn cell_cfg(&self) -> &CellConfiguration {
        &self.cell_cfg
    }

    pub fn contains(&self, ue_index: DuUeIndex) -> bool {
        self.ues.contains(ue_index.as_usize())
    }

    pub fn contains_rnti(&self, rnti: Rnti) -> bool {
        self.rnti_to_ue_index.contains(&rnti)
    }

    pub fn len(&self) -> usize {
        self.ues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UeCell> {
        self.ues.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut UeCell> {
        self.ues.values_mut()
    }

    pub fn find(&self, ue_index: DuUeIndex) -> Option<&UeCell> {
        self.ues.get(ue_index.as_usize())
    }

    pub fn find_mut(&mut self, ue_index: DuUeIndex) -> Option<&mut UeCell> {
        self.ues.get_mut(ue_index.as_usize())
    }

    pub fn find_by_rnti(&self, rnti: Rnti) -> Option<&UeCell> {
        let ue_index = *self.rnti_to_ue_index.get(&rnti)?;
        self.find(ue_index)
    }

    pub fn find_by_rnti_mut(&mut self, rnti: Rnti) -> Option<&mut UeCell> {
        let ue_index = *self.rnti_to_ue_index.get(&rnti)?;
        self.find_mut(ue_index)
    }

    pub fn cell_harqs(&self) -> &CellHarqManager {
        &self.cell_harqs
    }

    /// Process HARQ timeouts
    pub fn slot_indication(&mut self, sl_tx: SlotPoint) {
        self.cell_harqs.slot_indication(sl_tx);
    }

    /// Stop all UE activity in the cell
    pub fn deactivate(&mut self) {
        self.cell_harqs.stop();
    }

    pub(crate) fn add_ue(&mut self, ue_cfg: &UeConfiguration, ue_cell_index: usize) -> &mut UeCell {
        let ue_index = ue_cfg.ue_index;
        assert!(
            !self.contains(ue_index),
            "ue={}: UE with duplicate index being added to the cell UE repository",
            ue_index
        );
        let ue_cell_cfg = &ue_cfg.cells[ue_cell_index];
        let harqs = self.cell_harqs.add_ue(ue_index, ue_cfg.crnti);
        let ue_cc = UeCell::new(
            ue_index,
            ue_cfg.crnti,
            ue_cell_index,
            &self.cell_cfg,
            ue_cell_cfg,
            &self.expert_cfg,
            harqs,
        );
        assert!(
            self.rnti_to_ue_index.insert(ue_cfg.crnti, ue_index).is_none(),
            "rnti={}: UE with duplicate RNTI being added to the cell UE repository",
            ue_cfg.crnti
        );
        self.ues.emplace(ue_index.as_usize(), ue_cc)
    }

    pub(crate) fn rem_ue(&mut self, ue_index: DuUeIndex) {
        let Some(ue_cc) = self.ues.erase(ue_index.as_usize()) else {
            error!("ue={} : UE not found in the cell UE repository", ue_index);
            return;
        };
        if self.rnti_to_ue_index.remove(&ue_cc.rnti()).is_none() {
            error!(
                "ue={} rnti={}: UE with provided c-rnti not found in RNTI-to-UE-index lookup table",
                ue_index,
                ue_cc.rnti()
            );
        }
        // Dropping the UE cell releases its HARQ entity
    }
}
