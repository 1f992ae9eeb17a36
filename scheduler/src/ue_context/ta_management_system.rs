//! Timing Advance Management
//!
//! Collects N_TA update reports per (UE, TAG), rejects low-SINR and outlier samples,
//! and emits a TA_CMD MAC CE once a measurement window closes with an offset above
//! the configured threshold. Windows are closed by a time wheel, so the slot tick
//! only touches the UEs whose window ends in that slot.

use crate::config::TaControlConfig;
use crate::support::slot_table::{RowId, SlotTable};
use crate::ue_context::logical_channel_system::UeLogicalChannelView;
use common::slot_point::SlotPoint;
use common::types::{LcidDlSch, SubcarrierSpacing, TagId, MAX_NOF_DU_UES, MAX_NOF_TAGS};
use common::utils::ExpAverageFastStart;
use interfaces::dl_pdu::{MacCeInfo, MacCePayload, TaCmdCePayload};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Decay factor of the long-running N_TA averages used for outlier detection
const N_TA_DIFF_AVG_DECAY: f64 = 0.01;

/// TA command meaning "no change" (TS 38.213 4.2)
const TA_CMD_OFFSET_ZERO: i32 = 31;

/// Outlier detection kicks in after this many samples
const MIN_SAMPLES_FOR_OUTLIER_DETECTION: u32 = 10;

/// Extra wheel positions beyond the measurement period, so that a window end never aliases the current position
const WHEEL_SIZE_MARGIN: u32 = 4;

#[derive(Debug)]
struct TagMeasurement {
    tag_id: TagId,
    /// Never reset by a window close
    n_ta_diff_averager: ExpAverageFastStart<f64>,
    n_ta_diff_sq_averager: ExpAverageFastStart<f64>,
    count_until_outlier_detection: u32,
    /// Wheel time at which the post-command forbid period started
    forbid_period_start: Option<u64>,
    window_count_samples: u32,
    window_sum_samples: i64,
    last_t_a: i32,
}

impl TagMeasurement {
    fn new(tag_id: TagId) -> Self {
        Self {
            tag_id,
            n_ta_diff_averager: ExpAverageFastStart::new(N_TA_DIFF_AVG_DECAY),
            n_ta_diff_sq_averager: ExpAverageFastStart::new(N_TA_DIFF_AVG_DECAY),
            count_until_outlier_detection: 0,
            forbid_period_start: None,
            window_count_samples: 0,
            window_sum_samples: 0,
            last_t_a: TA_CMD_OFFSET_ZERO,
        }
    }

    fn avg_n_ta_difference(&self) -> i64 {
        if self.window_count_samples > 0 {
            self.window_sum_samples / self.window_count_samples as i64
        } else {
            TA_CMD_OFFSET_ZERO as i64
        }
    }
}

#[derive(Debug, Default)]
struct WheelListNode {
    /// Wheel time at which the UE measurement window closes
    wheel_meas_pos: Option<u64>,
    meas_start_time: Option<u64>,
    next: Option<RowId>,
}

#[derive(Debug)]
struct UeTaContext {
    ul_scs: SubcarrierSpacing,
    lc_ch_mgr: UeLogicalChannelView,
    n_ta_reports: SmallVec<[TagMeasurement; MAX_NOF_TAGS]>,
    node: WheelListNode,
}

/// z-score test against long-running mean and mean of squares
fn is_outlier(sample: f64, mean: f64, sq_mean: f64, thres: f64) -> bool {
    // Rounding can make the variance slightly negative
    let var = (sq_mean - mean * mean).max(0.0);
    let std_dev = var.sqrt();
    if std_dev == 0.0 {
        return false;
    }
    (sample - mean).abs() > thres * std_dev
}

#[derive(Debug)]
struct TaInner {
    cfg: TaControlConfig,
    ues: SlotTable<UeTaContext>,
    /// Head of the list of UEs whose window closes at each wheel position
    time_wheel: Vec<Option<RowId>>,
    next_wheel_index: u64,
}

impl TaInner {
    fn enabled(&self) -> bool {
        self.cfg.ta_cmd_offset_threshold >= 0
    }

    fn wheel_pos(&self, time: u64) -> usize {
        (time % self.time_wheel.len() as u64) as usize
    }

    /// New TA command (TS 38.213 4.2), in 0..=63 once clamped
    fn compute_new_t_a(&self, n_ta_diff: i64, ul_scs: SubcarrierSpacing) -> i32 {
        let ta_offset = TA_CMD_OFFSET_ZERO as f32 - self.cfg.ta_target;
        ((n_ta_diff * ul_scs.slots_per_subframe() as i64) as f32 / (16 * 64) as f32 + ta_offset).round() as i32
    }

    fn update_tags(&mut self, ue_rid: RowId, tag_ids: &[TagId]) {
        assert!(tag_ids.len() <= MAX_NOF_TAGS, "Too many TAGs: {}", tag_ids.len());
        let u = &mut self.ues[ue_rid];
        u.n_ta_reports.clear();
        u.n_ta_reports.extend(tag_ids.iter().map(|t| TagMeasurement::new(*t)));
    }

    fn rem_ue(&mut self, ue_rid: RowId) {
        if let Some(pos) = self.ues[ue_rid].node.wheel_meas_pos {
            let pos = self.wheel_pos(pos);
            let next = self.ues[ue_rid].node.next;
            let mut prev: Option<RowId> = None;
            let mut node = self.time_wheel[pos];
            while let Some(rid) = node {
                if rid == ue_rid {
                    match prev {
                        None => self.time_wheel[pos] = next,
                        Some(p) => self.ues[p].node.next = next,
                    }
                    break;
                }
                prev = Some(rid);
                node = self.ues[rid].node.next;
            }
            assert!(node.is_some(), "UE not found in time wheel");
        }
        self.ues.remove(ue_rid);
    }

    fn slot_indication(&mut self, sl_tx: SlotPoint) {
        if !self.enabled() {
            return;
        }
        let pos = self.wheel_pos(self.next_wheel_index);
        let head = self.time_wheel[pos].take();
        self.next_wheel_index += 1;

        let mut ue_rid = head;
        while let Some(rid) = ue_rid {
            self.handle_ue_ta_cmds(rid, sl_tx);
            let node = &mut self.ues[rid].node;
            ue_rid = node.next;
            *node = WheelListNode::default();
        }
    }

    fn handle_ue_ta_cmds(&mut self, ue_rid: RowId, sl_tx: SlotPoint) {
        let threshold = self.cfg.ta_cmd_offset_threshold;
        let now = self.next_wheel_index;
        let u = &mut self.ues[ue_rid];
        for ta_meas in u.n_ta_reports.iter_mut() {
            if ta_meas.window_count_samples == 0 {
                continue;
            }
            // The offset may have dropped below the threshold after the UE entered the wheel
            let ta_cmd_sent = (ta_meas.last_t_a - TA_CMD_OFFSET_ZERO).abs() >= threshold;
            if ta_cmd_sent {
                let ta_cmd = ta_meas.last_t_a.clamp(0, 63) as u8;
                debug!(
                    "ue={} slot={}: TA_CMD={} tag={}",
                    u.lc_ch_mgr.ue_index(),
                    sl_tx,
                    ta_cmd,
                    ta_meas.tag_id
                );
                u.lc_ch_mgr.handle_mac_ce_indication(MacCeInfo {
                    ce_lcid: LcidDlSch::TA_CMD,
                    ce_payload: MacCePayload::TaCmd(TaCmdCePayload {
                        tag_id: ta_meas.tag_id,
                        ta_cmd,
                    }),
                });
            }
            ta_meas.window_count_samples = 0;
            ta_meas.window_sum_samples = 0;
            ta_meas.last_t_a = TA_CMD_OFFSET_ZERO;
            ta_meas.forbid_period_start = ta_cmd_sent.then_some(now);
        }
    }

    fn handle_ul_n_ta_update_indication(&mut self, ue_rid: RowId, tag_id: TagId, n_ta_diff: i64, ul_sinr: f32) {
        if ul_sinr <= self.cfg.ta_update_measurement_ul_sinr_threshold_db {
            return;
        }
        let now = self.next_wheel_index;
        let (prohibit_period, z_thres, threshold, period) = (
            self.cfg.ta_measurement_prohibit_period_slots as u64,
            self.cfg.ta_outlier_z_threshold,
            self.cfg.ta_cmd_offset_threshold,
            self.cfg.ta_measurement_period_slots as u64,
        );

        let ul_scs = self.ues[ue_rid].ul_scs;
        let Some(tag_idx) = self.ues[ue_rid].n_ta_reports.iter().position(|m| m.tag_id == tag_id) else {
            warn!(
                "ue={}: Discarding TA report. Cause: TAG Id {} is not configured",
                self.ues[ue_rid].lc_ch_mgr.ue_index(),
                tag_id
            );
            return;
        };
        let tag_meas = &mut self.ues[ue_rid].n_ta_reports[tag_idx];

        if let Some(start) = tag_meas.forbid_period_start {
            if now - start < prohibit_period {
                return;
            }
            tag_meas.forbid_period_start = None;
        }

        if z_thres > 0.0 {
            let sample = n_ta_diff as f64;
            tag_meas.n_ta_diff_averager.push(sample);
            tag_meas.n_ta_diff_sq_averager.push(sample * sample);
            if tag_meas.count_until_outlier_detection < MIN_SAMPLES_FOR_OUTLIER_DETECTION {
                tag_meas.count_until_outlier_detection += 1;
            } else if is_outlier(
                sample,
                tag_meas.n_ta_diff_averager.average(),
                tag_meas.n_ta_diff_sq_averager.average(),
                z_thres as f64,
            ) {
                trace!("TA report n_ta_diff={} discarded as outlier", n_ta_diff);
                return;
            }
        }

        tag_meas.window_sum_samples += n_ta_diff;
        tag_meas.window_count_samples += 1;
        let avg = tag_meas.avg_n_ta_difference();
        let last_t_a = self.compute_new_t_a(avg, ul_scs);
        let u = &mut self.ues[ue_rid];
        u.n_ta_reports[tag_idx].last_t_a = last_t_a;

        if u.node.wheel_meas_pos.is_some() {
            return;
        }
        // Window starts at the slot already ticked
        let meas_start_time = *u.node.meas_start_time.get_or_insert(now.wrapping_sub(1));

        if (last_t_a - TA_CMD_OFFSET_ZERO).abs() >= threshold {
            let offset = meas_start_time.wrapping_add(period);
            u.node.wheel_meas_pos = Some(offset);
            let pos = self.wheel_pos(offset);
            self.ues[ue_rid].node.next = self.time_wheel[pos];
            self.time_wheel[pos] = Some(ue_rid);
        }
    }
}

/// Owner of the TA state of all UEs of the DU
#[derive(Debug, Clone)]
pub struct TaManagementSystem {
    inner: Rc<RefCell<TaInner>>,
}

impl TaManagementSystem {
    pub fn new(ta_cfg: &TaControlConfig) -> Self {
        let enabled = ta_cfg.ta_cmd_offset_threshold >= 0;
        if enabled {
            assert!(ta_cfg.ta_measurement_period_slots > 0, "Invalid measurement period");
        }
        let wheel_size = if enabled {
            (ta_cfg.ta_measurement_period_slots + WHEEL_SIZE_MARGIN) as usize
        } else {
            0
        };
        Self {
            inner: Rc::new(RefCell::new(TaInner {
                cfg: ta_cfg.clone(),
                ues: SlotTable::with_capacity(if enabled { MAX_NOF_DU_UES } else { 0 }),
                time_wheel: vec![None; wheel_size],
                next_wheel_index: 0,
            })),
        }
    }

    /// Register a UE with its PCell TAG. The handle is inactive when TA management is disabled.
    pub fn add_ue(
        &self,
        pcell_tag_id: TagId,
        ul_scs: SubcarrierSpacing,
        lc_ch_mgr: UeLogicalChannelView,
    ) -> UeTaManager {
        let mut inner = self.inner.borrow_mut();
        if !inner.enabled() {
            return UeTaManager {
                parent: Some(self.inner.clone()),
                ue_rid: None,
            };
        }
        let ue_rid = inner.ues.insert(UeTaContext {
            ul_scs,
            lc_ch_mgr,
            n_ta_reports: SmallVec::new(),
            node: WheelListNode::default(),
        });
        inner.update_tags(ue_rid, &[pcell_tag_id]);
        UeTaManager {
            parent: Some(self.inner.clone()),
            ue_rid: Some(ue_rid),
        }
    }

    /// Close the measurement windows ending in this slot
    pub fn slot_indication(&self, sl_tx: SlotPoint) {
        self.inner.borrow_mut().slot_indication(sl_tx);
    }

    pub fn nof_active_ues(&self) -> usize {
        self.inner.borrow().ues.len()
    }
}

/// Handle to the TA context of one UE. Dropping it removes the UE from the TA system.
#[derive(Debug)]
pub struct UeTaManager {
    parent: Option<Rc<RefCell<TaInner>>>,
    ue_rid: Option<RowId>,
}

impl UeTaManager {
    pub fn active(&self) -> bool {
        self.parent.is_some() && self.ue_rid.is_some()
    }

    /// Disable TA management for the UE
    pub fn reset(&mut self) {
        if let (Some(parent), Some(ue_rid)) = (&self.parent, self.ue_rid) {
            parent.borrow_mut().rem_ue(ue_rid);
            self.parent = None;
            self.ue_rid = None;
        }
    }

    fn parent(&self) -> &Rc<RefCell<TaInner>> {
        match &self.parent {
            Some(p) => p,
            None => panic!("TA manager is not in valid state"),
        }
    }

    /// Replace the configured TAGs. Collected measurements are dropped.
    pub fn update_tags(&self, tag_ids: &[TagId]) {
        let parent = self.parent();
        if let Some(ue_rid) = self.ue_rid {
            parent.borrow_mut().update_tags(ue_rid, tag_ids);
        }
    }

    pub fn handle_ul_n_ta_update_indication(&self, tag_id: TagId, n_ta_diff: i64, ul_sinr: f32) {
        let parent = self.parent();
        if let Some(ue_rid) = self.ue_rid {
            parent
                .borrow_mut()
                .handle_ul_n_ta_update_indication(ue_rid, tag_id, n_ta_diff, ul_sinr);
        }
    }
}

impl Drop for UeTaManager {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ue_context::logical_channel_system::{LogicalChannelSystem, UeLogicalChannelRepository};
    use common::types::{DuUeIndex, Lcid};
    use interfaces::dl_pdu::DlMsgLcInfo;
    use interfaces::sched_config::{LogicalChannelConfig, LogicalChannelConfigList};

    const SCS: SubcarrierSpacing = SubcarrierSpacing::Scs30;

    /// N_TA difference that maps to `ta_cmd` with a zero target
    fn n_ta_diff_for(ta_cmd: i32) -> i64 {
        ((ta_cmd - TA_CMD_OFFSET_ZERO) as i64 * 16 * 64) / SCS.slots_per_subframe() as i64
    }

    fn create_lc_ue(lc_sys: &LogicalChannelSystem, idx: u16) -> UeLogicalChannelRepository {
        let cfgs = LogicalChannelConfigList::new(vec![LogicalChannelConfig::srb(Lcid::SRB1)]);
        lc_sys.create_ue(DuUeIndex(idx), SCS, false, &cfgs)
    }

    /// Pop all pending TA commands of a UE
    fn pop_ta_cmds(lc_ue: &UeLogicalChannelRepository) -> Vec<u8> {
        let mut cmds = Vec::new();
        while lc_ue.has_pending_ces() {
            let mut subpdu = DlMsgLcInfo::default();
            assert!(lc_ue.allocate_mac_ce(&mut subpdu, 100) > 0);
            if let Some(MacCePayload::TaCmd(p)) = subpdu.ce_payload {
                cmds.push(p.ta_cmd);
            }
        }
        cmds
    }

    #[test]
    fn test_ta_cmd_sent_once_per_window_and_prohibit_period() {
        let cfg = TaControlConfig::default();
        let lc_sys = LogicalChannelSystem::new();
        let lc_ue = create_lc_ue(&lc_sys, 0);
        let ta_sys = TaManagementSystem::new(&cfg);
        let ta_ue = ta_sys.add_ue(TagId(0), SCS, lc_ue.view());
        assert!(ta_ue.active());

        let mut sl = SlotPoint::new(SCS, 0);
        let mut cmd_slots = Vec::new();
        for k in 0..200 {
            ta_ue.handle_ul_n_ta_update_indication(TagId(0), n_ta_diff_for(33), 10.0);
            ta_sys.slot_indication(sl);
            for cmd in pop_ta_cmds(&lc_ue) {
                assert_eq!(cmd, 33);
                cmd_slots.push(k);
            }
            sl += 1;
        }
        // Window of 80 slots, then 20 slots of prohibit before the next window opens
        assert_eq!(cmd_slots, vec![79, 179]);
    }

    #[test]
    fn test_low_sinr_and_unknown_tag_reports_are_discarded() {
        let cfg = TaControlConfig::default();
        let lc_sys = LogicalChannelSystem::new();
        let lc_ue = create_lc_ue(&lc_sys, 0);
        let ta_sys = TaManagementSystem::new(&cfg);
        let ta_ue = ta_sys.add_ue(TagId(0), SCS, lc_ue.view());

        let sl = SlotPoint::new(SCS, 0);
        for _ in 0..100 {
            ta_ue.handle_ul_n_ta_update_indication(TagId(0), n_ta_diff_for(40), 0.0);
            ta_ue.handle_ul_n_ta_update_indication(TagId(1), n_ta_diff_for(40), 10.0);
            ta_sys.slot_indication(sl);
        }
        assert!(pop_ta_cmds(&lc_ue).is_empty());

        // A second TAG becomes usable once configured
        ta_ue.update_tags(&[TagId(0), TagId(1)]);
        for _ in 0..100 {
            ta_ue.handle_ul_n_ta_update_indication(TagId(1), n_ta_diff_for(29), 10.0);
            ta_sys.slot_indication(sl);
        }
        assert_eq!(pop_ta_cmds(&lc_ue), vec![29]);
    }

    #[test]
    fn test_offset_below_threshold_sends_nothing() {
        let cfg = TaControlConfig {
            ta_cmd_offset_threshold: 3,
            ..Default::default()
        };
        let lc_sys = LogicalChannelSystem::new();
        let lc_ue = create_lc_ue(&lc_sys, 0);
        let ta_sys = TaManagementSystem::new(&cfg);
        let ta_ue = ta_sys.add_ue(TagId(0), SCS, lc_ue.view());

        let sl = SlotPoint::new(SCS, 0);
        for _ in 0..200 {
            ta_ue.handle_ul_n_ta_update_indication(TagId(0), n_ta_diff_for(33), 10.0);
            ta_sys.slot_indication(sl);
        }
        assert!(pop_ta_cmds(&lc_ue).is_empty());
    }

    #[test]
    fn test_outlier_is_rejected() {
        let cfg = TaControlConfig::default();
        let lc_sys = LogicalChannelSystem::new();
        let lc_ue = create_lc_ue(&lc_sys, 0);
        let ta_sys = TaManagementSystem::new(&cfg);
        let ta_ue = ta_sys.add_ue(TagId(0), SCS, lc_ue.view());

        for i in 0..15 {
            let n_ta_diff = if i % 2 == 0 { 1000 } else { 1048 };
            ta_ue.handle_ul_n_ta_update_indication(TagId(0), n_ta_diff, 10.0);
        }
        ta_ue.handle_ul_n_ta_update_indication(TagId(0), 50_000, 10.0);

        let sl = SlotPoint::new(SCS, 0);
        for _ in 0..cfg.ta_measurement_period_slots {
            ta_sys.slot_indication(sl);
        }
        // Accepting the 50000 sample would have produced a command around 39
        assert_eq!(pop_ta_cmds(&lc_ue), vec![33]);
    }

    #[test]
    fn test_removed_ue_leaves_the_wheel() {
        let cfg = TaControlConfig::default();
        let lc_sys = LogicalChannelSystem::new();
        let lc_ue0 = create_lc_ue(&lc_sys, 0);
        let lc_ue1 = create_lc_ue(&lc_sys, 1);
        let ta_sys = TaManagementSystem::new(&cfg);
        let mut ta_ue0 = ta_sys.add_ue(TagId(0), SCS, lc_ue0.view());
        let ta_ue1 = ta_sys.add_ue(TagId(0), SCS, lc_ue1.view());
        assert_eq!(ta_sys.nof_active_ues(), 2);

        // Both UEs share the same wheel bucket
        ta_ue0.handle_ul_n_ta_update_indication(TagId(0), n_ta_diff_for(35), 10.0);
        ta_ue1.handle_ul_n_ta_update_indication(TagId(0), n_ta_diff_for(27), 10.0);
        ta_ue0.reset();
        assert!(!ta_ue0.active());
        assert_eq!(ta_sys.nof_active_ues(), 1);

        let sl = SlotPoint::new(SCS, 0);
        for _ in 0..cfg.ta_measurement_period_slots {
            ta_sys.slot_indication(sl);
        }
        assert!(pop_ta_cmds(&lc_ue0).is_empty());
        assert_eq!(pop_ta_cmds(&lc_ue1), vec![27]);

        drop(ta_ue1);
        assert_eq!(ta_sys.nof_active_ues(), 0);
    }

    #[test]
    fn test_disabled_ta_management() {
        let cfg = TaControlConfig {
            ta_cmd_offset_threshold: -1,
            ..Default::default()
        };
        let lc_sys = LogicalChannelSystem::new();
        let lc_ue = create_lc_ue(&lc_sys, 0);
        let ta_sys = TaManagementSystem::new(&cfg);
        let ta_ue = ta_sys.add_ue(TagId(0), SCS, lc_ue.view());
        assert!(!ta_ue.active());
        assert_eq!(ta_sys.nof_active_ues(), 0);

        let sl = SlotPoint::new(SCS, 0);
        for _ in 0..200 {
            ta_ue.handle_ul_n_ta_update_indication(TagId(0), n_ta_diff_for(40), 10.0);
            ta_sys.slot_indication(sl);
        }
        assert!(pop_ta_cmds(&lc_ue).is_empty());
    }
}
