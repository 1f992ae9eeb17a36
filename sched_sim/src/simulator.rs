//! Slot-driven simulation of a DU around the scheduler UE context
//!
//! Every slot the simulator ticks the UE repository, delivers the UL feedback due
//! in that slot, generates traffic and hands out one DL and one UL grant in
//! round-robin order. The grant policy is deliberately trivial. It exists to
//! drive the buffer, HARQ, TA and power control state through realistic cycles.

use crate::config::{ChannelConfig, ScenarioConfig, TrafficConfig};
use crate::metrics::SlotMetrics;
use anyhow::Result;
use common::slot_point::SlotPoint;
use common::types::{
    BsrFormat, DuCellIndex, DuUeIndex, HarqId, LcgId, Lcid, PucchFormat, Rnti, SubcarrierSpacing, TagId,
    DEFAULT_DRB_RAN_SLICE_ID, SRB_RAN_SLICE_ID,
};
use interfaces::dl_pdu::{DlMsgTbInfo, MacCePayload};
use interfaces::message_types::{
    BsrLcgReport, CellPhReport, DbInterval, DlBufferStateIndication, PucchSinrKind, PucchSinrReport, PucchUciBits,
    TaUpdateIndication, UlBsrIndication, UlPhrIndication,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scheduler::support::pucch_power_controller::PucchGrantParams;
use scheduler::ue_context::harq_manager::HarqFeedbackOutcome;
use scheduler::ue_context::logical_channel_system::build_dl_transport_block_info;
use scheduler::ue_context::ue_channel_state_manager::CsiReport;
use scheduler::{UeRemovalEvent, UeRepository};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, info};

/// PDSCH to HARQ-ACK delay
const K1: u32 = 4;
/// PDCCH to PUSCH delay
const K2: u32 = 4;
const UL_BYTES_PER_PRB: u32 = 20;
const CSI_REPORT_PERIOD_SLOTS: u32 = 40;
const PHR_PERIOD_SLOTS: u32 = 80;
const P_CMAX_DBM: i32 = 23;

/// Closed-loop correction of a TPC command with accumulation (TS 38.213 Table 7.1.1-1)
fn tpc_delta_db(tpc: u8) -> i32 {
    match tpc {
        0 => -1,
        1 => 0,
        2 => 1,
        _ => 3,
    }
}

/// Rough TBS over the whole carrier for an effective CQI
fn dl_tbs_bytes(effective_cqi: f32) -> u32 {
    32 + (effective_cqi * 60.0) as u32
}

fn f1_harq_grant() -> PucchGrantParams {
    PucchGrantParams {
        format: PucchFormat::Format1,
        nof_prbs: 1,
        nof_symbols: 14,
        uci_bits: PucchUciBits {
            harq_ack_nof_bits: 1,
            ..Default::default()
        },
        intraslot_freq_hopping: false,
        pi_2_bpsk: false,
        additional_dmrs: false,
    }
}

#[derive(Debug)]
struct SimUe {
    ue_index: DuUeIndex,
    crnti: Rnti,
    pcell: DuCellIndex,
    tag_id: TagId,
    dl_lcid: Lcid,
    ul_lcg: LcgId,
    traffic: TrafficConfig,
    channel: ChannelConfig,
    /// Accumulated closed-loop corrections applied by the UE, in dB
    pusch_cl_db: i32,
    pucch_cl_db: i32,
    /// Current UL timing error, in Tc units
    n_ta_error: i64,
    dl_rlc_bytes: u32,
    ul_buffer_bytes: u32,
    dl_feedback: VecDeque<(SlotPoint, HarqId)>,
    ul_crcs: VecDeque<(SlotPoint, HarqId)>,
    remove_at_slot: Option<u32>,
    removal: Option<oneshot::Receiver<DuUeIndex>>,
}

struct DlGrant {
    h_id: HarqId,
    retx: bool,
    tb_info: DlMsgTbInfo,
}

pub struct Simulator {
    repo: UeRepository,
    ues: Vec<SimUe>,
    scs: SubcarrierSpacing,
    nof_ul_prbs: u32,
    rng: StdRng,
    slot: SlotPoint,
    slot_index: u32,
    rr_dl: usize,
    rr_ul: usize,
}

impl Simulator {
    pub fn new(cfg: &ScenarioConfig, seed: u64) -> Result<Self> {
        let mut repo = UeRepository::new(&cfg.expert);
        for cell in &cfg.cells {
            repo.add_cell(cell)?;
        }
        let scs = cfg.cells[0].scs_common;
        let nof_ul_prbs = cfg.cells[0].nof_ul_prbs;

        let mut ues = Vec::with_capacity(cfg.ues.len());
        for ue in &cfg.ues {
            repo.add_ue(&ue.config)?;
            let ue_index = ue.config.ue_index;
            let lcs = &ue.config.logical_channels;
            if let Some(u) = repo.find(ue_index) {
                // Slice association is normally done by the slice scheduler
                for lc in lcs.iter() {
                    let slice = if lc.lcid.is_srb() { SRB_RAN_SLICE_ID } else { DEFAULT_DRB_RAN_SLICE_ID };
                    u.logical_channels().set_lcid_ran_slice(lc.lcid, slice);
                    u.logical_channels().set_lcg_ran_slice(lc.lc_group, slice);
                }
            }
            // RRC setup is not simulated
            repo.ue_config_applied(ue_index);

            let data_lc = lcs
                .iter()
                .filter(|lc| lc.lcid != Lcid::SRB0)
                .max_by_key(|lc| lc.lcid);
            ues.push(SimUe {
                ue_index,
                crnti: ue.config.crnti,
                pcell: ue.config.pcell().cell_index,
                tag_id: ue.config.pcell().tag_id,
                dl_lcid: data_lc.map_or(Lcid::SRB1, |lc| lc.lcid),
                ul_lcg: data_lc.map_or(LcgId(0), |lc| lc.lc_group),
                traffic: ue.traffic.clone(),
                channel: ue.channel.clone(),
                pusch_cl_db: 0,
                pucch_cl_db: 0,
                n_ta_error: ue.channel.initial_n_ta_error,
                dl_rlc_bytes: 0,
                ul_buffer_bytes: 0,
                dl_feedback: VecDeque::new(),
                ul_crcs: VecDeque::new(),
                remove_at_slot: ue.remove_at_slot,
                removal: None,
            });
        }
        info!("Simulator ready with {} cell(s) and {} UE(s)", cfg.cells.len(), ues.len());

        Ok(Self {
            repo,
            ues,
            scs,
            nof_ul_prbs,
            rng: StdRng::seed_from_u64(seed),
            slot: SlotPoint::new(scs, 0),
            slot_index: 0,
            rr_dl: 0,
            rr_ul: 0,
        })
    }

    pub fn nof_ues(&self) -> usize {
        self.repo.len()
    }

    pub fn repository(&self) -> &UeRepository {
        &self.repo
    }

    /// Current UL timing error of a UE, in Tc units
    pub fn n_ta_error(&self, ue_index: DuUeIndex) -> Option<i64> {
        self.ues.iter().find(|u| u.ue_index == ue_index).map(|u| u.n_ta_error)
    }

    /// Run one slot and report what happened in it
    pub fn run_slot(&mut self) -> SlotMetrics {
        let sl = self.slot;
        let mut m = SlotMetrics {
            slot_count: self.slot_index,
            ..Default::default()
        };

        self.repo.slot_indication(sl);
        self.process_removals(&mut m);

        let mut sinr_sum = 0.0;
        let mut sinr_count = 0;
        for i in 0..self.ues.len() {
            let u = &mut self.ues[i];
            u.n_ta_error += u.channel.n_ta_drift_per_slot;
            self.process_dl_feedback(i, sl, &mut m);
            if let Some(sinr) = self.process_ul_feedback(i, sl, &mut m) {
                sinr_sum += sinr;
                sinr_count += 1;
            }
            if self.ues[i].removal.is_none() {
                self.generate_traffic(i, sl);
            }
        }
        if sinr_count > 0 {
            m.pusch_sinr_db = Some(sinr_sum / sinr_count as f32);
        }

        self.schedule_dl(sl, &mut m);
        self.schedule_ul(sl, &mut m);

        m.nof_ues = self.repo.len();
        self.slot += 1;
        self.slot_index += 1;
        m
    }

    fn process_removals(&mut self, m: &mut SlotMetrics) {
        for u in self.ues.iter_mut() {
            if u.removal.is_none() && u.remove_at_slot == Some(self.slot_index) {
                let (ev, rx) = UeRemovalEvent::new(u.ue_index);
                self.repo.schedule_ue_rem(ev);
                u.removal = Some(rx);
            }
        }
        let before = self.ues.len();
        self.ues.retain_mut(|u| match u.removal.as_mut().map(|rx| rx.try_recv()) {
            Some(Ok(_)) | Some(Err(TryRecvError::Closed)) => {
                info!("ue={} rnti={}: Removal completed", u.ue_index, u.crnti);
                false
            }
            _ => true,
        });
        m.ues_removed = (before - self.ues.len()) as u32;
    }

    fn sinr_noise(&mut self, amplitude: f32) -> f32 {
        if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..amplitude)
        } else {
            0.0
        }
    }

    fn process_dl_feedback(&mut self, i: usize, sl: SlotPoint, m: &mut SlotMetrics) {
        while let Some(&(ack_slot, h_id)) = self.ues[i].dl_feedback.front() {
            if ack_slot > sl {
                break;
            }
            self.ues[i].dl_feedback.pop_front();
            let (dl_bler, noise_amplitude) = (self.ues[i].channel.dl_bler, self.ues[i].channel.sinr_noise_db);
            let ack = self.rng.gen::<f64>() >= dl_bler;
            let noise = self.sinr_noise(noise_amplitude);
            let u = &self.ues[i];
            let pucch_sinr = u.channel.pucch_sinr_db + u.pucch_cl_db as f32 + noise;
            let Some(ue_cc) = self.repo.ue_cell_mut(u.ue_index, u.pcell) else {
                continue;
            };
            ue_cc.handle_pucch_sinr(&PucchSinrReport {
                slot_rx: ack_slot,
                sinr_db: pucch_sinr,
                kind: PucchSinrKind::F0F1,
            });
            match ue_cc.handle_dl_ack_info(h_id, ack) {
                Some(HarqFeedbackOutcome::Acked { .. }) => m.dl_acks += 1,
                Some(HarqFeedbackOutcome::Nacked) | Some(HarqFeedbackOutcome::MaxRetxsReached) => m.dl_nacks += 1,
                None => {}
            }
        }
    }

    /// Deliver the CRCs due in this slot. Returns the mean PUSCH SINR, if any PUSCH was received.
    fn process_ul_feedback(&mut self, i: usize, sl: SlotPoint, m: &mut SlotMetrics) -> Option<f32> {
        let mut sinr_sum = 0.0;
        let mut count = 0;
        while let Some(&(pusch_slot, h_id)) = self.ues[i].ul_crcs.front() {
            if pusch_slot > sl {
                break;
            }
            self.ues[i].ul_crcs.pop_front();
            let noise_amplitude = self.ues[i].channel.sinr_noise_db;
            let noise = self.sinr_noise(noise_amplitude);
            let sinr = self.ues[i].channel.pusch_sinr_db + self.ues[i].pusch_cl_db as f32 + noise;
            let crc_ok = self.rng.gen::<f32>() >= if sinr >= 0.0 { 0.05 } else { 0.5 };
            sinr_sum += sinr;
            count += 1;

            let u = &self.ues[i];
            let (ue_index, pcell) = (u.ue_index, u.pcell);
            let Some(ue_cc) = self.repo.ue_cell_mut(ue_index, pcell) else {
                continue;
            };
            match ue_cc.handle_crc_pdu(h_id, crc_ok, Some(sinr)) {
                Some(HarqFeedbackOutcome::Acked { .. }) => m.ul_crc_ok += 1,
                Some(_) => m.ul_crc_ko += 1,
                None => {}
            }
            self.repo.handle_ta_update_indication(&TaUpdateIndication {
                cell_index: pcell,
                ue_index,
                tag_id: u.tag_id,
                n_ta_diff: u.n_ta_error,
                ul_sinr_db: sinr,
            });
            if crc_ok {
                // The PUSCH carried a BSR, and periodically a PHR
                self.send_bsr(i);
                if self.slot_index % PHR_PERIOD_SLOTS < K2 {
                    self.send_phr(i, pusch_slot);
                }
            }
        }
        (count > 0).then(|| sinr_sum / count as f32)
    }

    fn send_bsr(&self, i: usize) {
        let u = &self.ues[i];
        self.repo.handle_ul_bsr_indication(&UlBsrIndication {
            cell_index: u.pcell,
            ue_index: u.ue_index,
            crnti: u.crnti,
            bsr_fmt: BsrFormat::ShortBsr,
            reported_lcgs: vec![BsrLcgReport {
                lcg_id: u.ul_lcg,
                nof_bytes: u.ul_buffer_bytes,
            }],
        });
    }

    fn send_phr(&mut self, i: usize, pusch_slot: SlotPoint) {
        let u = &self.ues[i];
        let ph = u.channel.power_headroom_db - u.pusch_cl_db;
        self.repo.handle_ul_phr_indication(&UlPhrIndication {
            cell_index: u.pcell,
            ue_index: u.ue_index,
            rnti: u.crnti,
            slot_rx: pusch_slot,
            phr: CellPhReport {
                serv_cell_id: u.pcell,
                ph: DbInterval::new(ph, ph + 1),
                p_cmax: Some(DbInterval::new(P_CMAX_DBM - 1, P_CMAX_DBM)),
            },
        });
    }

    fn generate_traffic(&mut self, i: usize, sl: SlotPoint) {
        let slot_index = self.slot_index;
        let u = &mut self.ues[i];
        let (ue_index, pcell, cqi) = (u.ue_index, u.pcell, u.channel.dl_cqi);

        if slot_index % u.traffic.dl_period_slots == 0 {
            u.dl_rlc_bytes = u.dl_rlc_bytes.saturating_add(u.traffic.dl_bytes_per_period);
            self.repo.handle_dl_buffer_state_indication(&DlBufferStateIndication {
                ue_index,
                lcid: u.dl_lcid,
                bs: u.dl_rlc_bytes,
                hol_toa: Some(sl),
            });
        }
        if slot_index % u.traffic.ul_period_slots == 0 {
            let was_empty = u.ul_buffer_bytes == 0;
            u.ul_buffer_bytes = u.ul_buffer_bytes.saturating_add(u.traffic.ul_bytes_per_period);
            // A UE without UL grant asks for one with an SR
            if was_empty {
                self.repo.handle_sr_indication(ue_index);
            }
        }
        if slot_index % CSI_REPORT_PERIOD_SLOTS == 0 {
            if let Some(ue_cc) = self.repo.ue_cell_mut(ue_index, pcell) {
                ue_cc.handle_csi_report(&CsiReport {
                    wideband_cqi: Some(cqi),
                    ri: Some(1),
                });
            }
        }
    }

    fn is_schedulable(&self, u: &SimUe, sl: SlotPoint) -> bool {
        u.removal.is_none()
            && self
                .repo
                .drx_controller(u.ue_index)
                .is_some_and(|drx| drx.is_pdcch_enabled(sl))
            && self
                .repo
                .cell(u.pcell)
                .and_then(|c| c.find(u.ue_index))
                .is_some_and(|ue_cc| ue_cc.is_active())
    }

    fn try_dl_grant(&self, u: &SimUe, sl: SlotPoint) -> Option<DlGrant> {
        let ue_cc = self.repo.cell(u.pcell)?.find(u.ue_index)?;
        let harqs = ue_cc.harqs();
        if let Some(h_id) = harqs.find_pending_dl_retx() {
            harqs.new_dl_retx(h_id, sl, K1);
            return Some(DlGrant {
                h_id,
                retx: true,
                tb_info: harqs.dl_harq(h_id).tb_info,
            });
        }
        if harqs.nof_empty_dl_harqs() == 0 {
            return None;
        }
        let lc = self.repo.find(u.ue_index)?.logical_channels();
        let tbs = dl_tbs_bytes(
            ue_cc
                .link_adaptation_controller()
                .effective_cqi(ue_cc.channel_state_manager().wideband_cqi()),
        );
        let mut tb_info = DlMsgTbInfo::default();
        let mut sched_bytes = build_dl_transport_block_info(&mut tb_info, lc, tbs, SRB_RAN_SLICE_ID);
        if !tb_info.is_full() {
            sched_bytes += build_dl_transport_block_info(&mut tb_info, lc, tbs - sched_bytes, DEFAULT_DRB_RAN_SLICE_ID);
        }
        if sched_bytes == 0 {
            return None;
        }
        let h_id = harqs.alloc_dl_harq(sl, K1, tbs, tb_info.clone())?;
        Some(DlGrant {
            h_id,
            retx: false,
            tb_info,
        })
    }

    fn schedule_dl(&mut self, sl: SlotPoint, m: &mut SlotMetrics) {
        let n = self.ues.len();
        let dl_srb = self.repo.get_ues_with_pending_newtx_data(SRB_RAN_SLICE_ID, true);
        let dl_drb = self.repo.get_ues_with_pending_newtx_data(DEFAULT_DRB_RAN_SLICE_ID, true);
        for k in 0..n {
            let i = (self.rr_dl + k) % n;
            let u = &self.ues[i];
            let idx = u.ue_index.as_usize();
            let has_retx = self
                .repo
                .cell(u.pcell)
                .and_then(|c| c.find(u.ue_index))
                .is_some_and(|ue_cc| ue_cc.harqs().find_pending_dl_retx().is_some());
            if !(has_retx || dl_srb.contains(idx) || dl_drb.contains(idx)) || !self.is_schedulable(u, sl) {
                continue;
            }
            let Some(grant) = self.try_dl_grant(u, sl) else {
                continue;
            };
            self.apply_dl_grant(i, sl, grant, m);
            self.rr_dl = i + 1;
            return;
        }
    }

    fn apply_dl_grant(&mut self, i: usize, sl: SlotPoint, grant: DlGrant, m: &mut SlotMetrics) {
        let slots_per_ms = self.scs.slots_per_subframe() as i64;
        let u = &mut self.ues[i];
        let ack_slot = sl + K1;
        u.dl_feedback.push_back((ack_slot, grant.h_id));
        if grant.retx {
            m.dl_retxs += 1;
        } else {
            for subpdu in &grant.tb_info.lc_chs_to_sched {
                if subpdu.lcid.is_sdu() {
                    u.dl_rlc_bytes -= u.dl_rlc_bytes.min(subpdu.sched_bytes);
                    m.dl_newtx_bytes += subpdu.sched_bytes;
                }
                if let Some(MacCePayload::TaCmd(ta)) = subpdu.ce_payload {
                    let correction = (ta.ta_cmd as i64 - 31) * 1024 / slots_per_ms;
                    debug!(
                        "ue={}: Applying TA_CMD={} n_ta_error={} correction={}",
                        u.ue_index, ta.ta_cmd, u.n_ta_error, correction
                    );
                    u.n_ta_error -= correction;
                    m.ta_cmds += 1;
                }
            }
            if let Some(drx) = self.repo.drx_controller_mut(u.ue_index) {
                drx.on_new_dl_pdcch_alloc(sl);
            }
        }

        if let Some(ue_cc) = self.repo.ue_cell_mut(u.ue_index, u.pcell) {
            ue_cc.update_pucch_pw_ctrl_state(ack_slot, &f1_harq_grant());
            let tpc = ue_cc.compute_pucch_tpc_command(ack_slot);
            u.pucch_cl_db += tpc_delta_db(tpc);
            if tpc > 1 {
                m.pucch_tpc_up += 1;
            }
        }
    }

    fn schedule_ul(&mut self, sl: SlotPoint, m: &mut SlotMetrics) {
        let n = self.ues.len();
        let ul_srb = self.repo.get_ues_with_pending_newtx_data(SRB_RAN_SLICE_ID, false);
        let ul_drb = self.repo.get_ues_with_pending_newtx_data(DEFAULT_DRB_RAN_SLICE_ID, false);
        let pusch_slot = sl + K2;
        for k in 0..n {
            let i = (self.rr_ul + k) % n;
            let u = &self.ues[i];
            if !self.is_schedulable(u, sl) {
                continue;
            }
            let (ue_index, pcell) = (u.ue_index, u.pcell);
            let Some(ue_cc) = self.repo.cell(pcell).and_then(|c| c.find(ue_index)) else {
                continue;
            };

            let (h_id, tbs, nof_prbs) = if let Some(h_id) = ue_cc.harqs().find_pending_ul_retx() {
                ue_cc.harqs().new_ul_retx(h_id, pusch_slot);
                let tbs = ue_cc.harqs().ul_harq(h_id).tbs_bytes;
                (h_id, tbs, tbs.div_ceil(UL_BYTES_PER_PRB))
            } else {
                let idx = ue_index.as_usize();
                if !(ul_srb.contains(idx) || ul_drb.contains(idx)) {
                    continue;
                }
                let pending = self.repo.pending_ul_newtx_bytes(ue_index);
                if pending == 0 {
                    continue;
                }
                let wanted_prbs = pending.div_ceil(UL_BYTES_PER_PRB).min(self.nof_ul_prbs);
                let nof_prbs = ue_cc.adapt_pusch_prbs_to_phr(wanted_prbs).max(1);
                let tbs = nof_prbs * UL_BYTES_PER_PRB;
                let Some(h_id) = ue_cc.harqs().alloc_ul_harq(pusch_slot, tbs) else {
                    continue;
                };
                if let Some(ue) = self.repo.find(ue_index) {
                    ue.logical_channels().handle_ul_grant(tbs);
                }
                let u = &mut self.ues[i];
                u.ul_buffer_bytes -= u.ul_buffer_bytes.min(tbs);
                m.ul_newtx_bytes += tbs;
                if let Some(drx) = self.repo.drx_controller_mut(ue_index) {
                    drx.on_new_ul_pdcch_alloc(sl);
                }
                (h_id, tbs, nof_prbs)
            };
            debug!("ue={}: UL grant h_id={} tbs={} prbs={}", ue_index, h_id.0, tbs, nof_prbs);

            if let Some(ue_cc) = self.repo.ue_cell_mut(ue_index, pcell) {
                ue_cc.update_pusch_pw_ctrl_state(pusch_slot, nof_prbs);
                let tpc = ue_cc.compute_pusch_tpc_command(pusch_slot);
                self.ues[i].pusch_cl_db += tpc_delta_db(tpc);
                if tpc > 1 {
                    m.pusch_tpc_up += 1;
                }
            }
            self.ues[i].ul_crcs.push_back((pusch_slot, h_id));
            self.rr_ul = i + 1;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
cells:
  - cell_index: 0
    scs_common: Scs30
ues:
  - config:
      ue_index: 0
      crnti: 17921
      starts_in_fallback: false
      cells:
        - cell_index: 0
          pusch_pw_ctrl: {p0_ue_db: 0, alpha: Alpha1}
      logical_channels:
        - {lcid: 1, lc_group: 0}
        - {lcid: 4, lc_group: 1, priority: 3}
    channel:
      initial_n_ta_error: 4096
      sinr_noise_db: 0.5
    remove_at_slot: 1500
  - config:
      ue_index: 1
      crnti: 17922
      starts_in_fallback: false
      cells:
        - cell_index: 0
      logical_channels:
        - {lcid: 1, lc_group: 0}
        - {lcid: 4, lc_group: 1}
"#;

    fn run(sim: &mut Simulator, nof_slots: u32) -> Vec<SlotMetrics> {
        (0..nof_slots).map(|_| sim.run_slot()).collect()
    }

    #[test]
    fn test_traffic_flows_and_ue_is_removed() {
        let cfg = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        let mut sim = Simulator::new(&cfg, 7).unwrap();
        assert_eq!(sim.nof_ues(), 2);

        let metrics = run(&mut sim, 2000);
        let dl_bytes: u32 = metrics.iter().map(|m| m.dl_newtx_bytes).sum();
        let ul_bytes: u32 = metrics.iter().map(|m| m.ul_newtx_bytes).sum();
        let removed: u32 = metrics.iter().map(|m| m.ues_removed).sum();
        assert!(dl_bytes > 0);
        assert!(ul_bytes > 0);
        assert_eq!(removed, 1);
        assert_eq!(sim.nof_ues(), 1);
        assert!(!sim.repository().contains(DuUeIndex(0)));
        assert!(sim.repository().contains(DuUeIndex(1)));
    }

    #[test]
    fn test_ta_commands_correct_timing_error() {
        let cfg = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        let mut sim = Simulator::new(&cfg, 11).unwrap();
        let metrics = run(&mut sim, 1000);
        assert!(metrics.iter().map(|m| m.ta_cmds).sum::<u32>() >= 1);
        assert!(sim.n_ta_error(DuUeIndex(0)).unwrap().abs() < 4096);
    }

    #[test]
    fn test_tpc_delta_table() {
        assert_eq!(
            [0, 1, 2, 3].map(tpc_delta_db),
            [-1, 0, 1, 3]
        );
    }
}
