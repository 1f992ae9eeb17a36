//! State of one UE in one of its serving cells

use crate::config::SchedulerExpertConfig;
use crate::support::pucch_power_controller::{PucchGrantParams, PucchPowerController};
use crate::support::pusch_power_controller::PuschPowerController;
use crate::ue_context::harq_manager::{HarqFeedbackOutcome, UeHarqEntity};
use crate::ue_context::ue_channel_state_manager::{CsiReport, UeChannelStateManager};
use crate::ue_context::ue_link_adaptation::UeLinkAdaptationController;
use common::slot_point::SlotPoint;
use common::types::{DuCellIndex, DuUeIndex, HarqId, Rnti};
use interfaces::message_types::{CellPhReport, PucchSinrKind, PucchSinrReport};
use interfaces::sched_config::{CellConfiguration, UeCellConfig};
use tracing::debug;

#[derive(Debug)]
pub struct UeCell {
    pub ue_index: DuUeIndex,
    pub cell_index: DuCellIndex,
    rnti: Rnti,
    /// Position of the cell in the UE configuration, 0 being the PCell
    ue_cell_index: usize,
    cfg: UeCellConfig,
    active: bool,
    in_fallback_mode: bool,
    harqs: UeHarqEntity,
    channel_state: UeChannelStateManager,
    link_adaptation: UeLinkAdaptationController,
    pusch_pc: PuschPowerController,
    pucch_pc: PucchPowerController,
}

impl UeCell {
    pub fn new(
        ue_index: DuUeIndex,
        rnti: Rnti,
        ue_cell_index: usize,
        cell_cfg: &CellConfiguration,
        ue_cell_cfg: &UeCellConfig,
        expert_cfg: &SchedulerExpertConfig,
        harqs: UeHarqEntity,
    ) -> Self {
        Self {
            ue_index,
            cell_index: cell_cfg.cell_index,
            rnti,
            ue_cell_index,
            cfg: ue_cell_cfg.clone(),
            active: true,
            in_fallback_mode: false,
            harqs,
            channel_state: UeChannelStateManager::new(expert_cfg, ue_cell_cfg.nof_dl_ports),
            link_adaptation: UeLinkAdaptationController::new(&expert_cfg.ue),
            pusch_pc: PuschPowerController::new(rnti, cell_cfg, ue_cell_cfg, &expert_cfg.power_control),
            pucch_pc: PucchPowerController::new(rnti, cell_cfg.scs_common, ue_cell_cfg, &expert_cfg.power_control),
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn ue_cell_index(&self) -> usize {
        self.ue_cell_index
    }

    pub fn is_pcell(&self) -> bool {
        self.ue_cell_index == 0
    }

    pub fn cfg(&self) -> &UeCellConfig {
        &self.cfg
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn harqs(&self) -> &UeHarqEntity {
        &self.harqs
    }

    pub fn channel_state_manager(&self) -> &UeChannelStateManager {
        &self.channel_state
    }

    pub fn link_adaptation_controller(&self) -> &UeLinkAdaptationController {
        &self.link_adaptation
    }

    pub fn pusch_power_controller(&self) -> &PuschPowerController {
        &self.pusch_pc
    }

    pub fn pucch_power_controller(&self) -> &PucchPowerController {
        &self.pucch_pc
    }

    pub fn set_ue_cell_index(&mut self, ue_cell_index: usize) {
        self.ue_cell_index = ue_cell_index;
    }

    pub fn handle_reconfiguration_request(&mut self, ue_cell_cfg: &UeCellConfig) {
        self.cfg = ue_cell_cfg.clone();
        self.pusch_pc.reconfigure(ue_cell_cfg);
        self.pucch_pc.reconfigure(ue_cell_cfg);
    }

    /// Fallback restricts the UE to common configuration and DCI formats
    pub fn set_fallback_state(&mut self, enter: bool) {
        if self.in_fallback_mode != enter {
            debug!(
                "ue={} rnti={} cell={}: {} fallback mode",
                self.ue_index,
                self.rnti,
                self.cell_index,
                if enter { "Entering" } else { "Leaving" }
            );
        }
        self.in_fallback_mode = enter;
    }

    pub fn is_in_fallback_mode(&self) -> bool {
        self.in_fallback_mode
    }

    /// Stop new transmissions and drop pending retransmissions
    pub fn deactivate(&mut self) {
        self.active = false;
        self.harqs.cancel_retxs();
    }

    pub fn handle_dl_ack_info(&mut self, h_id: HarqId, ack: bool) -> Option<HarqFeedbackOutcome> {
        let outcome = self.harqs.dl_ack_info(h_id, ack)?;
        self.link_adaptation.handle_dl_ack_info(ack);
        Some(outcome)
    }

    /// Apply a PUSCH decoding result, with the SNR measured on it if any
    pub fn handle_crc_pdu(&mut self, h_id: HarqId, crc_ok: bool, ul_sinr_db: Option<f32>) -> Option<HarqFeedbackOutcome> {
        if let Some(sinr) = ul_sinr_db {
            self.channel_state.update_pusch_snr(sinr);
        }
        let outcome = self.harqs.ul_crc_info(h_id, crc_ok)?;
        self.link_adaptation.handle_ul_crc_info(crc_ok);
        Some(outcome)
    }

    pub fn handle_csi_report(&mut self, csi: &CsiReport) -> bool {
        let valid = self.channel_state.handle_csi_report(csi);
        if !valid {
            debug!("ue={} rnti={}: Inconsistent CSI report {:?}", self.ue_index, self.rnti, csi);
        }
        valid
    }

    pub fn handle_phr(&mut self, phr: &CellPhReport, slot_rx: SlotPoint) {
        self.pusch_pc.handle_phr(phr, slot_rx);
    }

    pub fn handle_pucch_sinr(&mut self, report: &PucchSinrReport) {
        self.channel_state.update_pucch_sinr(report.kind, report.sinr_db);
        match report.kind {
            PucchSinrKind::F0F1 => self.pucch_pc.update_pucch_sinr_f0_f1(report.slot_rx, report.sinr_db),
            PucchSinrKind::F2F3F4 { has_harq, has_csi } => {
                self.pucch_pc
                    .update_pucch_sinr_f2_f3_f4(report.slot_rx, report.sinr_db, has_harq, has_csi)
            }
        }
    }

    /// Register a decided PUSCH grant for later PHR correlation
    pub fn update_pusch_pw_ctrl_state(&mut self, pusch_slot: SlotPoint, nof_prbs: u32) {
        self.pusch_pc.update_pusch_pw_ctrl_state(pusch_slot, nof_prbs);
    }

    pub fn update_pucch_pw_ctrl_state(&mut self, pucch_slot: SlotPoint, grant: &PucchGrantParams) {
        self.pucch_pc.update_pucch_pw_ctrl_state(pucch_slot, grant);
    }

    /// PRB count capped by the latest power headroom
    pub fn adapt_pusch_prbs_to_phr(&self, nof_prbs: u32) -> u32 {
        self.pusch_pc.adapt_pusch_prbs_to_phr(nof_prbs)
    }

    pub fn compute_pusch_tpc_command(&mut self, pusch_slot: SlotPoint) -> u8 {
        let avg_sinr = self.channel_state.average_pusch_sinr_db();
        self.pusch_pc.compute_tpc_command(pusch_slot, avg_sinr)
    }

    pub fn compute_pucch_tpc_command(&mut self, pucch_slot: SlotPoint) -> u8 {
        self.pucch_pc.compute_tpc_command(pucch_slot)
    }
}
