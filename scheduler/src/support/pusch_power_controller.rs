//! PUSCH Closed-Loop Power Control
//!
//! Drives the accumulated closed-loop term f(i) of TS 38.213 7.1.1 so the PUSCH
//! SINR tracks a target that depends on the estimated path loss. PHRs are matched
//! against the PUSCH they were reported on to estimate that path loss and the
//! remaining headroom, which also bounds how many PRBs the UE can be given.

use crate::config::UlPowerControlConfig;
use crate::support::pucch_info::tpc_mapping;
use crate::support::PW_CTRL_GRID_SIZE;
use common::slot_point::SlotPoint;
use common::types::Rnti;
use common::utils::{convert_db_to_power, convert_power_to_db};
use interfaces::message_types::CellPhReport;
use interfaces::sched_config::{CellConfiguration, PuschPowerControlConfig, UeCellConfig};
use tracing::info;

const DEFAULT_TPC: u8 = 1;
const MIN_PUSCH_PRBS: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
struct PuschPwCtrlData {
    slot_rx: Option<SlotPoint>,
    nof_prbs: u32,
    f_pw_control: i32,
}

#[derive(Debug, Clone, Copy)]
struct PuschPwControl {
    /// Accumulated closed-loop adjustment f(i), in dB
    f_pw_control: i32,
    latest_tpc_slot: SlotPoint,
}

/// Quantities derived from a PHR that could be matched with its PUSCH
#[derive(Debug, Clone, Copy)]
struct PhrDerived {
    /// Power headroom normalized to one PRB, in dB
    ph_normalized_db: f32,
    /// f(i) in force when the PUSCH carrying the PHR was transmitted
    f_pw_control: i32,
    path_loss_db: f32,
}

#[derive(Debug, Clone, Copy)]
struct LatestPhr {
    phr: CellPhReport,
    derived: Option<PhrDerived>,
}

/// Closed-loop PUSCH power controller of one UE in one cell
#[derive(Debug)]
pub struct PuschPowerController {
    rnti: Rnti,
    cl_pw_control_enabled: bool,
    phr_bw_adaptation_enabled: bool,
    p0_nominal_pusch: i32,
    pusch_pwr_ctrl: Option<PuschPowerControlConfig>,
    target_pusch_sinr_db: f32,
    ref_path_loss_for_target_sinr: f32,
    tpc_adjust_prohibit_time_sl: u32,
    min_f_cl_pw_control: i32,
    latest_pusch_pw_control: Option<PuschPwControl>,
    latest_phr: Option<LatestPhr>,
    /// Ring of scheduled PUSCHs indexed by slot
    grid: Vec<PuschPwCtrlData>,
}

impl PuschPowerController {
    pub fn new(
        rnti: Rnti,
        cell_cfg: &CellConfiguration,
        ue_cell_cfg: &UeCellConfig,
        expert_cfg: &UlPowerControlConfig,
    ) -> Self {
        Self {
            rnti,
            cl_pw_control_enabled: expert_cfg.enable_pusch_closed_loop_pw_control,
            phr_bw_adaptation_enabled: expert_cfg.enable_phr_bw_adaptation,
            p0_nominal_pusch: cell_cfg.p0_nominal_pusch_db,
            pusch_pwr_ctrl: ue_cell_cfg.pusch_pw_ctrl,
            target_pusch_sinr_db: expert_cfg.target_pusch_sinr_db,
            ref_path_loss_for_target_sinr: expert_cfg.path_loss_for_target_pusch_sinr_db,
            tpc_adjust_prohibit_time_sl: expert_cfg.tpc_adjust_prohibit_time_ms
                << cell_cfg.scs_common.numerology(),
            min_f_cl_pw_control: expert_cfg.pusch_cl_min_accumulated_db,
            latest_pusch_pw_control: None,
            latest_phr: None,
            grid: vec![PuschPwCtrlData::default(); PW_CTRL_GRID_SIZE],
        }
    }

    pub fn reconfigure(&mut self, ue_cell_cfg: &UeCellConfig) {
        self.pusch_pwr_ctrl = ue_cell_cfg.pusch_pw_ctrl;
    }

    /// Accumulated closed-loop adjustment, if a TPC has been computed yet
    pub fn accumulated_adjustment_db(&self) -> Option<i32> {
        self.latest_pusch_pw_control.map(|c| c.f_pw_control)
    }

    /// Path loss estimated from the latest matched PHR
    pub fn path_loss_db(&self) -> Option<f32> {
        self.latest_phr.and_then(|p| p.derived).map(|d| d.path_loss_db)
    }

    /// Lower bound of the power headroom in the latest PHR, in dB
    pub fn latest_ph_db(&self) -> Option<i32> {
        self.latest_phr.map(|p| p.phr.ph.start)
    }

    /// Register a scheduled PUSCH so a PHR it carries can be matched later
    pub fn update_pusch_pw_ctrl_state(&mut self, slot_rx: SlotPoint, nof_prbs: u32) {
        let f_pw_control = self.latest_pusch_pw_control.map_or(0, |c| c.f_pw_control);
        self.grid[grid_index(slot_rx)] = PuschPwCtrlData {
            slot_rx: Some(slot_rx),
            nof_prbs,
            f_pw_control,
        };
    }

    pub fn handle_phr(&mut self, phr: &CellPhReport, slot_rx: SlotPoint) {
        let Some(pusch_cfg) = self.pusch_pwr_ctrl else {
            return;
        };
        let grid_idx = grid_index(slot_rx);
        let entry = self.grid[grid_idx];
        if entry.slot_rx != Some(slot_rx) {
            // Before the first grant is registered a mismatch is expected
            if self.grid.iter().any(|e| e.slot_rx.is_some()) {
                info!(
                    "rnti={}: No PUSCH allocation corresponding to the PHR received at slot={} grid_idx={}. Grid slot={:?}",
                    self.rnti,
                    slot_rx,
                    grid_idx,
                    entry.slot_rx.map(|s| s.to_string())
                );
            }
            self.latest_phr = Some(LatestPhr { phr: *phr, derived: None });
            return;
        }
        let Some(p_cmax) = phr.p_cmax else {
            panic!("rnti={}: PHR without P_CMAX", self.rnti);
        };

        let prbs_db = convert_power_to_db(entry.nof_prbs as f32);
        let alpha = pusch_cfg.alpha.to_f32();
        let mut path_loss_db = 0.0;
        if self.cl_pw_control_enabled && alpha > 0.0 {
            // PH = P_CMAX - (P0 + 10log(M) + alpha * PL + f), solved for PL
            let p0 = (self.p0_nominal_pusch + pusch_cfg.p0_ue_db as i32) as f32;
            let pl = (p_cmax.start as f32
                - phr.ph.stop as f32
                - p0
                - entry.f_pw_control as f32
                - prbs_db)
                / alpha;
            path_loss_db = pl.round().max(0.0);
        }
        self.latest_phr = Some(LatestPhr {
            phr: *phr,
            derived: Some(PhrDerived {
                ph_normalized_db: phr.ph.start as f32 + prbs_db,
                f_pw_control: entry.f_pw_control,
                path_loss_db,
            }),
        });
    }

    /// Largest number of PRBs, up to `nof_prbs`, that keeps the estimated PH non-negative
    pub fn adapt_pusch_prbs_to_phr(&self, nof_prbs: u32) -> u32 {
        if !self.phr_bw_adaptation_enabled {
            return nof_prbs;
        }
        let (Some(derived), Some(latest)) = (
            self.latest_phr.and_then(|p| p.derived),
            self.latest_pusch_pw_control,
        ) else {
            return nof_prbs;
        };
        // 10log(n'_PRBs) <= PH_norm - (f at the PHR PUSCH - latest f)
        let delta_f = (derived.f_pw_control - latest.f_pw_control) as f32;
        let estimated_prbs = convert_db_to_power(derived.ph_normalized_db - delta_f).max(1.0);
        nof_prbs.min(estimated_prbs.floor() as u32)
    }

    /// TPC command for the PUSCH scheduled at `pusch_slot`
    pub fn compute_tpc_command(&mut self, pusch_slot: SlotPoint, pusch_avg_sinr_db: f32) -> u8 {
        let latest = match self.latest_pusch_pw_control {
            Some(latest) if self.cl_pw_control_enabled && self.pusch_pwr_ctrl.is_some() => latest,
            _ => {
                self.latest_pusch_pw_control = Some(PuschPwControl {
                    f_pw_control: 0,
                    latest_tpc_slot: pusch_slot,
                });
                return DEFAULT_TPC;
            }
        };
        if pusch_slot <= latest.latest_tpc_slot + self.tpc_adjust_prohibit_time_sl {
            return DEFAULT_TPC;
        }
        let (Some(derived), Some(pusch_cfg)) =
            (self.latest_phr.and_then(|p| p.derived), self.pusch_pwr_ctrl)
        else {
            return DEFAULT_TPC;
        };

        // Partial path-loss compensation lowers the target of far UEs
        let fractional_pl_comp = (1.0 - pusch_cfg.alpha.to_f32())
            * (self.ref_path_loss_for_target_sinr - derived.path_loss_db);
        let sinr_to_target_diff = self.target_pusch_sinr_db + fractional_pl_comp - pusch_avg_sinr_db;
        // Headroom margin against a single-PRB grant, taken in linear units of one PRB
        let max_delta_db = derived.ph_normalized_db - convert_db_to_power(MIN_PUSCH_PRBS);

        let mut tpc = if sinr_to_target_diff > 2.5 && max_delta_db > 3.0 {
            3
        } else if sinr_to_target_diff > 0.5 && max_delta_db > 1.0 {
            2
        } else if sinr_to_target_diff > -0.5 && max_delta_db >= 0.0 {
            1
        } else {
            0
        };
        if tpc == 0 && latest.f_pw_control <= self.min_f_cl_pw_control {
            tpc = DEFAULT_TPC;
        }

        self.latest_pusch_pw_control = Some(PuschPwControl {
            f_pw_control: latest.f_pw_control + tpc_mapping(tpc),
            latest_tpc_slot: pusch_slot,
        });
        tpc
    }
}

fn grid_index(slot: SlotPoint) -> usize {
    slot.to_uint() as usize % PW_CTRL_GRID_SIZE
}
