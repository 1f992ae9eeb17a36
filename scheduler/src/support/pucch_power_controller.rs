//! PUCCH Closed-Loop Power Control
//!
//! Keeps the PUCCH SINR of one UE close to the per-format targets. Each scheduled
//! PUCCH is recorded with its delta_TF bias; when the SINR report for that slot
//! arrives the bias is removed before the sample enters the per-format average,
//! so payload and format effects known to the gNB do not drive TPC decisions.

use crate::config::UlPowerControlConfig;
use crate::support::pucch_info::{
    get_pucch_format2_e_total, get_pucch_format3_4_nof_dmrs_symbols, get_pucch_format3_e_total,
    get_pucch_format4_e_total, get_uci_nof_crc_bits, tpc_mapping, FORMAT2_NOF_DATA_SC,
    NOF_SUBCARRIERS_PER_RB,
};
use crate::support::PW_CTRL_GRID_SIZE;
use common::slot_point::SlotPoint;
use common::types::{PucchFormat, Rnti, SubcarrierSpacing};
use common::utils::{convert_power_to_db, ExpAverageFastStart};
use interfaces::message_types::PucchUciBits;
use interfaces::sched_config::{PucchPowerControlConfig, UeCellConfig};
use smallvec::SmallVec;
use std::fmt::Write;
use tracing::info;

/// Maximum number of PUCCH grants of one UE in one slot
pub const MAX_SCHED_PUCCH_GRANTS_PER_UE: usize = 4;

/// TPC command that leaves the closed-loop adjustment unchanged
const DEFAULT_TPC: u8 = 1;

/// Largest UCI payload sent without CRC
const MAX_UCI_PAYLOAD_NO_CRC: u32 = 11;

/// Parameters of a scheduled PUCCH transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PucchGrantParams {
    pub format: PucchFormat,
    pub nof_prbs: u32,
    pub nof_symbols: u32,
    pub uci_bits: PucchUciBits,
    pub intraslot_freq_hopping: bool,
    pub pi_2_bpsk: bool,
    pub additional_dmrs: bool,
}

#[derive(Debug, Clone, Copy)]
struct PucchPwCtrlData {
    slot_rx: SlotPoint,
    nof_prbs: u32,
    format: PucchFormat,
    uci_bits: PucchUciBits,
    delta_tf: f32,
}

#[derive(Debug, Clone, Copy)]
struct PucchPwControl {
    /// Accumulated closed-loop adjustment g(i), in dB
    g_cl_pw_control: i32,
    latest_tpc_slot: SlotPoint,
}

fn compute_delta_tf_format_2_3_4(nof_uci_bits: u32, payload_plus_crc_bits: u32, n_re: u32) -> f32 {
    let bpre = payload_plus_crc_bits as f32 / n_re as f32;
    if nof_uci_bits <= MAX_UCI_PAYLOAD_NO_CRC {
        convert_power_to_db(6.0 * bpre)
    } else {
        convert_power_to_db(2f32.powf(2.4 * bpre) - 1.0)
    }
}

/// delta_TF term of TS 38.213 7.2.1 for a PUCCH grant
pub fn compute_delta_tf(grant: &PucchGrantParams) -> f32 {
    let nof_symb = grant.nof_symbols;
    let nof_prbs = grant.nof_prbs;
    match grant.format {
        PucchFormat::Format0 => convert_power_to_db(2.0 / nof_symb as f32),
        PucchFormat::Format1 => {
            // An SR-only F1 is BPSK, same as one HARQ-ACK bit
            let bits = if grant.uci_bits.harq_ack_nof_bits != 0 {
                grant.uci_bits.harq_ack_nof_bits
            } else {
                1
            };
            convert_power_to_db(14.0 / nof_symb as f32) + convert_power_to_db(bits as f32)
        }
        PucchFormat::Format2 => {
            let nof_uci_bits = grant.uci_bits.total_bits();
            let e_uci = get_pucch_format2_e_total(nof_prbs, nof_symb);
            let payload_plus_crc = nof_uci_bits + get_uci_nof_crc_bits(nof_uci_bits, e_uci);
            let n_re = nof_prbs * nof_symb * FORMAT2_NOF_DATA_SC;
            compute_delta_tf_format_2_3_4(nof_uci_bits, payload_plus_crc, n_re)
        }
        PucchFormat::Format3 | PucchFormat::Format4 => {
            let nof_uci_bits = grant.uci_bits.total_bits();
            let e_uci = if grant.format == PucchFormat::Format3 {
                get_pucch_format3_e_total(nof_prbs, nof_symb, grant.pi_2_bpsk)
            } else {
                get_pucch_format4_e_total(nof_prbs, nof_symb, grant.pi_2_bpsk)
            };
            let payload_plus_crc = nof_uci_bits + get_uci_nof_crc_bits(nof_uci_bits, e_uci);
            let dmrs = get_pucch_format3_4_nof_dmrs_symbols(
                nof_symb,
                grant.intraslot_freq_hopping,
                grant.additional_dmrs,
            );
            let n_re = nof_prbs * (nof_symb - dmrs) * NOF_SUBCARRIERS_PER_RB;
            compute_delta_tf_format_2_3_4(nof_uci_bits, payload_plus_crc, n_re)
        }
    }
}

/// Closed-loop PUCCH power controller of one UE in one cell
#[derive(Debug)]
pub struct PucchPowerController {
    rnti: Rnti,
    cl_pw_control_enabled: bool,
    pucch_f0_sinr_target_db: f32,
    pucch_f2_sinr_target_db: f32,
    pucch_f3_sinr_target_db: f32,
    tpc_adjust_prohibit_time_sl: u32,
    /// Bounds `[min, max]` of the accumulated adjustment, in dB
    g_cl_pw_control_bounds: (i32, i32),
    format_set_0: Option<PucchFormat>,
    format_set_1: Option<PucchFormat>,
    pucch_pwr_ctrl: Option<PucchPowerControlConfig>,
    latest_pucch_pw_control: Option<PucchPwControl>,
    pucch_f0_f1_sinr_db: ExpAverageFastStart<f32>,
    pucch_f2_f3_f4_sinr_db: ExpAverageFastStart<f32>,
    /// Ring of scheduled PUCCHs indexed by slot
    grid: Vec<SmallVec<[PucchPwCtrlData; MAX_SCHED_PUCCH_GRANTS_PER_UE]>>,
}

impl PucchPowerController {
    pub fn new(
        rnti: Rnti,
        ul_scs: SubcarrierSpacing,
        ue_cell_cfg: &UeCellConfig,
        expert_cfg: &UlPowerControlConfig,
    ) -> Self {
        let mut ctrl = Self {
            rnti,
            cl_pw_control_enabled: expert_cfg.enable_pucch_closed_loop_pw_control,
            pucch_f0_sinr_target_db: expert_cfg.pucch_f0_sinr_target_db,
            pucch_f2_sinr_target_db: expert_cfg.pucch_f2_sinr_target_db,
            pucch_f3_sinr_target_db: expert_cfg.pucch_f3_sinr_target_db,
            tpc_adjust_prohibit_time_sl: expert_cfg.tpc_adjust_prohibit_time_ms << ul_scs.numerology(),
            g_cl_pw_control_bounds: (
                expert_cfg.pucch_cl_min_accumulated_db,
                expert_cfg.pucch_cl_max_accumulated_db,
            ),
            format_set_0: None,
            format_set_1: None,
            pucch_pwr_ctrl: None,
            latest_pucch_pw_control: None,
            pucch_f0_f1_sinr_db: ExpAverageFastStart::new(expert_cfg.pucch_pw_ctrl_sinr_alpha_ema),
            pucch_f2_f3_f4_sinr_db: ExpAverageFastStart::new(expert_cfg.pucch_pw_ctrl_sinr_alpha_ema),
            grid: vec![SmallVec::new(); PW_CTRL_GRID_SIZE],
        };
        ctrl.reconfigure(ue_cell_cfg);
        ctrl
    }

    /// Pick up the PUCCH resource formats and the power control block of a new UE cell configuration
    pub fn reconfigure(&mut self, ue_cell_cfg: &UeCellConfig) {
        if let Some(pucch) = &ue_cell_cfg.pucch {
            self.format_set_0 = Some(pucch.format_set_0);
            self.format_set_1 = Some(pucch.format_set_1);
            if pucch.pw_control.is_some() {
                self.pucch_pwr_ctrl = pucch.pw_control;
            }
        }
    }

    /// Accumulated closed-loop adjustment, if a TPC has been computed yet
    pub fn accumulated_adjustment_db(&self) -> Option<i32> {
        self.latest_pucch_pw_control.map(|c| c.g_cl_pw_control)
    }

    /// Register a scheduled PUCCH so its SINR report can be matched later
    pub fn update_pucch_pw_ctrl_state(&mut self, slot: SlotPoint, grant: &PucchGrantParams) {
        if !self.cl_pw_control_enabled {
            return;
        }
        let grid_idx = grid_index(slot);
        let entries = &mut self.grid[grid_idx];
        // Entries of an older slot are leftovers from a previous wrap of the ring
        if entries.iter().any(|p| p.slot_rx != slot) {
            entries.clear();
        }
        if entries.len() >= MAX_SCHED_PUCCH_GRANTS_PER_UE {
            info!(
                "rnti={}: PUCCH power control grid is full at slot={} grid_idx={}. Dropping PUCCH power control data",
                self.rnti, slot, grid_idx
            );
            return;
        }
        entries.push(PucchPwCtrlData {
            slot_rx: slot,
            nof_prbs: grant.nof_prbs,
            format: grant.format,
            uci_bits: grant.uci_bits,
            delta_tf: compute_delta_tf(grant),
        });
    }

    pub fn update_pucch_sinr_f0_f1(&mut self, slot_rx: SlotPoint, sinr_db: f32) {
        if !self.cl_pw_control_enabled {
            return;
        }
        // With HARQ-ACK and SR there can be two F1 entries, both with the same delta_TF
        let entry = self.grid[grid_index(slot_rx)]
            .iter()
            .find(|p| p.slot_rx == slot_rx && p.format.is_f0_f1())
            .copied();
        match entry {
            Some(pucch) => self.pucch_f0_f1_sinr_db.push(sinr_db - pucch.delta_tf),
            None => self.log_missing_entry("F0/1", slot_rx),
        }
    }

    pub fn update_pucch_sinr_f2_f3_f4(
        &mut self,
        slot_rx: SlotPoint,
        sinr_db: f32,
        has_harq_bits: bool,
        has_csi_bits: bool,
    ) {
        if !self.cl_pw_control_enabled {
            return;
        }
        let entry = self.grid[grid_index(slot_rx)]
            .iter()
            .find(|p| {
                p.slot_rx == slot_rx
                    && !p.format.is_f0_f1()
                    && has_harq_bits == (p.uci_bits.harq_ack_nof_bits > 0)
                    && has_csi_bits == (p.uci_bits.csi_part1_nof_bits > 0)
            })
            .copied();
        match entry {
            Some(pucch) => self.pucch_f2_f3_f4_sinr_db.push(sinr_db - pucch.delta_tf),
            None => self.log_missing_entry("F2/3/4", slot_rx),
        }
    }

    /// TPC command for the PUCCH scheduled at `pucch_slot`.
    ///
    /// Only F0, F2 and F3 SINRs drive the loop. F1 and F4 rely on cyclic shifts or
    /// OCC, so transmit power changes barely show up in their SINR.
    pub fn compute_tpc_command(&mut self, pucch_slot: SlotPoint) -> u8 {
        if !self.cl_pw_control_enabled || self.pucch_pwr_ctrl.is_none() {
            return DEFAULT_TPC;
        }
        let Some(latest) = self.latest_pucch_pw_control else {
            self.latest_pucch_pw_control = Some(PucchPwControl {
                g_cl_pw_control: 0,
                latest_tpc_slot: pucch_slot,
            });
            return DEFAULT_TPC;
        };
        if pucch_slot <= latest.latest_tpc_slot + self.tpc_adjust_prohibit_time_sl {
            return DEFAULT_TPC;
        }
        let (Some(set_0), Some(set_1)) = (self.format_set_0, self.format_set_1) else {
            return DEFAULT_TPC;
        };
        if set_0 == PucchFormat::Format1 && set_1 == PucchFormat::Format4 {
            return DEFAULT_TPC;
        }

        let f2_f3_target = if set_1 == PucchFormat::Format2 {
            self.pucch_f2_sinr_target_db
        } else {
            self.pucch_f3_sinr_target_db
        };
        let sinr_to_target_f2_f3_diff = f2_f3_target - self.pucch_f2_f3_f4_sinr_db.average();

        let mut tpc = DEFAULT_TPC;
        if set_0 == PucchFormat::Format0 {
            let sinr_to_target_f0_diff =
                self.pucch_f0_sinr_target_db - self.pucch_f0_f1_sinr_db.average();
            // With F0 and F2/F3 the larger deficit wins so neither SINR ends below its target
            tpc = if set_1 == PucchFormat::Format4 {
                self.get_tpc(latest.g_cl_pw_control, sinr_to_target_f0_diff)
            } else {
                self.get_tpc(
                    latest.g_cl_pw_control,
                    sinr_to_target_f0_diff.max(sinr_to_target_f2_f3_diff),
                )
            };
        }
        if set_0 == PucchFormat::Format1
            && matches!(set_1, PucchFormat::Format2 | PucchFormat::Format3)
        {
            tpc = self.get_tpc(latest.g_cl_pw_control, sinr_to_target_f2_f3_diff);
        }

        self.latest_pucch_pw_control = Some(PucchPwControl {
            g_cl_pw_control: latest.g_cl_pw_control + tpc_mapping(tpc),
            latest_tpc_slot: pucch_slot,
        });
        tpc
    }

    /// Map a SINR deficit to a TPC command, keeping g(i) within its bounds
    fn get_tpc(&self, g_cl_pw_control: i32, sinr_to_target_diff: f32) -> u8 {
        let max_increment = self.g_cl_pw_control_bounds.1 - g_cl_pw_control;
        let max_decrement = g_cl_pw_control - self.g_cl_pw_control_bounds.0;
        if sinr_to_target_diff > 2.5 && max_increment >= 3 {
            3
        } else if sinr_to_target_diff > 0.5 && max_increment >= 1 {
            2
        } else if sinr_to_target_diff <= -0.5 && max_decrement >= 1 {
            0
        } else {
            1
        }
    }

    fn log_missing_entry(&self, format_group: &str, slot_rx: SlotPoint) {
        let mut contents = String::new();
        for p in self.grid.iter().flatten() {
            let sep = if contents.is_empty() { "" } else { ", " };
            let _ = write!(
                contents,
                "{}[slot_rx={} grid_idx={} {} prbs={} bits={}]",
                sep,
                p.slot_rx,
                grid_index(p.slot_rx),
                p.format,
                p.nof_prbs,
                p.uci_bits.total_bits()
            );
        }
        // Expected during RRC setup/reconfiguration, before grants are registered
        info!(
            "rnti={}: Power control data for PUCCH {} not found for slot={} grid_idx={}. Grid contains=[{}]",
            self.rnti,
            format_group,
            slot_rx,
            grid_index(slot_rx),
            contents
        );
    }
}

fn grid_index(slot: SlotPoint) -> usize {
    slot.to_uint() as usize % PW_CTRL_GRID_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::DuCellIndex;
    use common::types::TagId;
    use interfaces::sched_config::PucchConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const TDD_PATTERN_LENGTH: u32 = 10;

    fn ue_cell_cfg(set_0: PucchFormat, set_1: PucchFormat) -> UeCellConfig {
        UeCellConfig {
            cell_index: DuCellIndex(0),
            tag_id: TagId(0),
            pucch: Some(PucchConfig {
                format_set_0: set_0,
                format_set_1: set_1,
                pw_control: Some(PucchPowerControlConfig {
                    p0_pucch_db: 0,
                    two_pucch_pc_adjustment_states: false,
                }),
            }),
            pusch_pw_ctrl: None,
            nof_dl_ports: 1,
        }
    }

    fn make_controller(target_f0: f32, target_f2_f3: f32, set_0: PucchFormat, set_1: PucchFormat) -> PucchPowerController {
        let expert = UlPowerControlConfig {
            pucch_f0_sinr_target_db: target_f0,
            pucch_f2_sinr_target_db: target_f2_f3,
            pucch_f3_sinr_target_db: target_f2_f3,
            ..Default::default()
        };
        PucchPowerController::new(
            Rnti(0x4601),
            SubcarrierSpacing::Scs30,
            &ue_cell_cfg(set_0, set_1),
            &expert,
        )
    }

    fn generate_pucch(rng: &mut StdRng, set_0: PucchFormat, set_1: PucchFormat) -> PucchGrantParams {
        let format = if rng.gen_bool(0.5) { set_0 } else { set_1 };
        let mut uci_bits = PucchUciBits::default();
        let (nof_prbs, nof_symbols) = match format {
            PucchFormat::Format0 => {
                uci_bits.harq_ack_nof_bits = rng.gen_range(1..=2);
                (1, 2)
            }
            PucchFormat::Format1 => {
                uci_bits.harq_ack_nof_bits = rng.gen_range(1..=2);
                (1, 14)
            }
            _ => {
                uci_bits.harq_ack_nof_bits = rng.gen_range(1..=7);
                uci_bits.csi_part1_nof_bits = if rng.gen_bool(0.25) { 11 } else { 0 };
                uci_bits.sr_nof_bits = if rng.gen_bool(0.25) { 1 } else { 0 };
                (rng.gen_range(1..=4), 2)
            }
        };
        PucchGrantParams {
            format,
            nof_prbs,
            nof_symbols,
            uci_bits,
            intraslot_freq_hopping: false,
            pi_2_bpsk: false,
            additional_dmrs: false,
        }
    }

    /// Gaussian sample via Box-Muller
    fn normal(rng: &mut StdRng, std_dev: f32) -> f32 {
        let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = rng.gen();
        std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
    }

    /// TDD pattern of 8 DL and 2 UL slots. A PUCCH is scheduled with probability 0.5 in
    /// each UL slot and its SINR is reported in the following DL slots. Returns the slot
    /// count at which the averaged reported SINR reached the target.
    fn run_until_convergence(
        seed: u64,
        initial_sinr: f32,
        target_f0: f32,
        target_f2_f3: f32,
        set_0: PucchFormat,
        set_1: PucchFormat,
        max_slots: u32,
    ) -> Option<u32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ctrl = make_controller(target_f0, target_f2_f3, set_0, set_1);
        let mut sl = SlotPoint::new(SubcarrierSpacing::Scs30, 0);
        let mut pending: [Option<(SlotPoint, PucchGrantParams)>; 2] = [None, None];
        let mut avg_f0 = ExpAverageFastStart::<f32>::new(0.5);
        let mut avg_f2_f3 = ExpAverageFastStart::<f32>::new(0.5);
        let mut g_cl_pw_control = 0.0f32;

        for sl_cnt in 0..max_slots {
            let tdd_idx = sl.to_uint() % TDD_PATTERN_LENGTH;
            if tdd_idx <= 7 {
                for entry in pending.iter_mut() {
                    let Some((slot_rx, pucch)) = entry.take() else {
                        continue;
                    };
                    let noise = normal(&mut rng, 0.5);
                    let reported = initial_sinr + compute_delta_tf(&pucch) + noise + g_cl_pw_control;
                    if pucch.format.is_f0_f1() {
                        avg_f0.push(initial_sinr + noise + g_cl_pw_control);
                        ctrl.update_pucch_sinr_f0_f1(slot_rx, reported);
                    } else {
                        avg_f2_f3.push(initial_sinr + noise + g_cl_pw_control);
                        ctrl.update_pucch_sinr_f2_f3_f4(
                            slot_rx,
                            reported,
                            pucch.uci_bits.harq_ack_nof_bits != 0,
                            pucch.uci_bits.csi_part1_nof_bits != 0,
                        );
                    }
                }
            } else if rng.gen_bool(0.5) {
                let pucch = generate_pucch(&mut rng, set_0, set_1);
                let tpc = ctrl.compute_tpc_command(sl);
                g_cl_pw_control += tpc_mapping(tpc) as f32;
                ctrl.update_pucch_pw_ctrl_state(sl, &pucch);
                pending[(tdd_idx - 8) as usize] = Some((sl, pucch));
            }

            if sl_cnt > 160 {
                let f0 = avg_f0.average();
                let f2 = avg_f2_f3.average();
                let near = |v: f32, t: f32| v < t + 0.5 && v > t - 0.5;
                let converged = match (set_0, set_1) {
                    (PucchFormat::Format0, PucchFormat::Format4) => near(f0, target_f0),
                    (PucchFormat::Format1, _) => near(f2, target_f2_f3),
                    _ => {
                        (near(f0, target_f0) && f2 >= target_f2_f3 - 0.5)
                            || (near(f2, target_f2_f3) && f0 >= target_f0 - 0.5)
                    }
                };
                if converged {
                    return Some(sl_cnt);
                }
            }
            sl += 1;
        }
        None
    }

    #[test]
    fn test_sinr_converges_for_format_combinations() {
        let params = [
            (0.0, -2.0, PucchFormat::Format1, PucchFormat::Format2),
            (0.0, 5.0, PucchFormat::Format1, PucchFormat::Format2),
            (0.0, 8.0, PucchFormat::Format1, PucchFormat::Format2),
            (0.0, 10.0, PucchFormat::Format1, PucchFormat::Format2),
            (-2.0, 5.0, PucchFormat::Format0, PucchFormat::Format2),
            (5.0, -2.0, PucchFormat::Format0, PucchFormat::Format2),
            (5.0, 8.0, PucchFormat::Format0, PucchFormat::Format2),
            (8.0, 5.0, PucchFormat::Format0, PucchFormat::Format2),
            (0.0, 8.0, PucchFormat::Format0, PucchFormat::Format2),
            (8.0, 0.0, PucchFormat::Format0, PucchFormat::Format2),
            (8.0, 10.0, PucchFormat::Format0, PucchFormat::Format2),
            (10.0, 8.0, PucchFormat::Format0, PucchFormat::Format2),
        ];
        for (i, (t0, t23, set_0, set_1)) in params.into_iter().enumerate() {
            let res = run_until_convergence(i as u64, 2.0, t0, t23, set_0, set_1, 2000);
            assert!(
                res.is_some(),
                "SINR didn't converge with F0/1 target={}dB F2/3/4 target={}dB sets={}/{}",
                t0,
                t23,
                set_0,
                set_1
            );
        }
    }

    #[test]
    fn test_f2_sinr_recovers_from_15db_deficit() {
        let target = 5.0;
        let res = run_until_convergence(
            7,
            target - 15.0,
            0.0,
            target,
            PucchFormat::Format1,
            PucchFormat::Format2,
            3000,
        );
        assert!(res.is_some(), "PUCCH F2 SINR didn't reach [4.5, 5.5] dB");
    }

    #[test]
    fn test_first_tpc_is_hold_and_prohibit_period_applies() {
        let mut ctrl = make_controller(10.0, 10.0, PucchFormat::Format1, PucchFormat::Format2);
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 100);
        assert_eq!(ctrl.compute_tpc_command(sl), DEFAULT_TPC);
        assert_eq!(ctrl.accumulated_adjustment_db(), Some(0));
        // 10 ms at 30 kHz is 20 slots
        assert_eq!(ctrl.compute_tpc_command(sl + 20), DEFAULT_TPC);
        // Average SINR still 0 dB, 10 dB below target
        assert_eq!(ctrl.compute_tpc_command(sl + 21), 3);
        assert_eq!(ctrl.accumulated_adjustment_db(), Some(3));
    }

    #[test]
    fn test_prohibit_period_with_f0_and_f2() {
        let mut ctrl = make_controller(10.0, 10.0, PucchFormat::Format0, PucchFormat::Format2);
        let f0 = PucchGrantParams {
            format: PucchFormat::Format0,
            nof_prbs: 1,
            nof_symbols: 2,
            uci_bits: PucchUciBits {
                harq_ack_nof_bits: 1,
                ..Default::default()
            },
            intraslot_freq_hopping: false,
            pi_2_bpsk: false,
            additional_dmrs: false,
        };
        let f2 = PucchGrantParams {
            format: PucchFormat::Format2,
            uci_bits: PucchUciBits {
                harq_ack_nof_bits: 4,
                ..Default::default()
            },
            ..f0
        };
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 100);
        let report_low_sinr = |ctrl: &mut PucchPowerController, slot: SlotPoint| {
            ctrl.update_pucch_pw_ctrl_state(slot, &f0);
            ctrl.update_pucch_pw_ctrl_state(slot, &f2);
            ctrl.update_pucch_sinr_f0_f1(slot, -10.0);
            ctrl.update_pucch_sinr_f2_f3_f4(slot, -10.0, true, false);
        };

        report_low_sinr(&mut ctrl, sl);
        assert_eq!(ctrl.compute_tpc_command(sl), DEFAULT_TPC);
        // Both SINRs far below target, but still inside the 20-slot prohibit window
        report_low_sinr(&mut ctrl, sl + 5);
        assert_eq!(ctrl.compute_tpc_command(sl + 10), DEFAULT_TPC);
        assert_eq!(ctrl.compute_tpc_command(sl + 20), DEFAULT_TPC);
        assert_eq!(ctrl.accumulated_adjustment_db(), Some(0));

        assert_eq!(ctrl.compute_tpc_command(sl + 21), 3);
        report_low_sinr(&mut ctrl, sl + 25);
        assert_eq!(ctrl.compute_tpc_command(sl + 30), DEFAULT_TPC);
        assert_eq!(ctrl.accumulated_adjustment_db(), Some(3));
    }

    #[test]
    fn test_unmatched_sinr_report_is_ignored() {
        let mut ctrl = make_controller(10.0, 10.0, PucchFormat::Format1, PucchFormat::Format2);
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 8);
        let grant = PucchGrantParams {
            format: PucchFormat::Format2,
            nof_prbs: 1,
            nof_symbols: 2,
            uci_bits: PucchUciBits {
                harq_ack_nof_bits: 2,
                ..Default::default()
            },
            intraslot_freq_hopping: false,
            pi_2_bpsk: false,
            additional_dmrs: false,
        };
        ctrl.update_pucch_pw_ctrl_state(sl, &grant);
        // CSI flag does not match the registered grant
        ctrl.update_pucch_sinr_f2_f3_f4(sl, 20.0, true, true);
        // Slot one ring length later maps to the same grid entry
        ctrl.update_pucch_sinr_f2_f3_f4(sl + PW_CTRL_GRID_SIZE as u32, 20.0, true, false);
        assert_eq!(ctrl.pucch_f2_f3_f4_sinr_db.average(), 0.0);
        ctrl.update_pucch_sinr_f2_f3_f4(sl, 20.0, true, false);
        let expected = 20.0 - compute_delta_tf(&grant);
        assert!((ctrl.pucch_f2_f3_f4_sinr_db.average() - expected).abs() < 1e-4);
    }

    #[test]
    fn test_grid_full_drops_extra_grants() {
        let mut ctrl = make_controller(10.0, 10.0, PucchFormat::Format0, PucchFormat::Format2);
        let sl = SlotPoint::new(SubcarrierSpacing::Scs30, 3);
        let grant = PucchGrantParams {
            format: PucchFormat::Format0,
            nof_prbs: 1,
            nof_symbols: 2,
            uci_bits: PucchUciBits::default(),
            intraslot_freq_hopping: false,
            pi_2_bpsk: false,
            additional_dmrs: false,
        };
        for _ in 0..MAX_SCHED_PUCCH_GRANTS_PER_UE + 2 {
            ctrl.update_pucch_pw_ctrl_state(sl, &grant);
        }
        assert_eq!(ctrl.grid[grid_index(sl)].len(), MAX_SCHED_PUCCH_GRANTS_PER_UE);
    }
}
