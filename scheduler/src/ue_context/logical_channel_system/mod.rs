//! Logical Channel System
//!
//! Tracks DL buffer occupancy per (UE, LCID) and UL buffer occupancy per (UE, LCG)
//! for every UE of the DU, and hands out MAC SDUs and MAC CEs within a byte budget.
//!
//! All per-bearer state lives in dense tables owned by one [`LogicalChannelSystem`].
//! Each UE gets an owning [`UeLogicalChannelRepository`] handle; dropping the handle
//! removes the UE and all its bearers. Per-slice bitmaps of UEs with pending data
//! are kept up to date incrementally: every buffer change updates the UE slice byte
//! counter, and only a zero crossing of that counter touches the bitmap.

mod repository;
mod tb_builder;
#[cfg(test)]
mod tests;

pub use repository::{UeLogicalChannelRepository, UeLogicalChannelView};
pub use tb_builder::{
    allocate_mac_ces, allocate_mac_sdus, allocate_ue_con_res_id_mac_ce,
    build_dl_fallback_transport_block_info, build_dl_transport_block_info,
};

use crate::support::flat_map::SmallFlatMap;
use crate::support::mac_pdu_format::{
    get_mac_sdu_required_bytes, get_mac_sdu_size, FIXED_SIZED_MAC_CE_SUBHEADER_SIZE,
    MAC_SDU_SUBHEADER_LENGTH_THRES, MIN_MAC_SDU_SUBHEADER_SIZE,
};
use crate::support::slot_table::{RowId, SlotTable};
use common::slot_point::SlotPoint;
use common::types::{
    DuUeIndex, LcgId, Lcid, LcidDlSch, RanSliceId, SubcarrierSpacing, MAX_NOF_DU_UES,
    MAX_NOF_LCGS, MAX_NOF_RB_LCIDS, SRB_RAN_SLICE_ID,
};
use common::utils::{BoundedBitset, ExpAverageFastStart};
use interfaces::dl_pdu::{DlMsgLcInfo, MacCeInfo};
use interfaces::message_types::UlBsrIndication;
use interfaces::sched_config::{
    LogicalChannelConfig, LogicalChannelConfigList, MAX_ARP_PRIO_LEVEL, MAX_QOS_PRIO_LEVEL,
};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// Bitset of DU UE indexes
pub type UeBitset = BoundedBitset<MAX_NOF_DU_UES>;

/// Cap applied to buffer statuses to keep byte arithmetic from overflowing
const MAX_BUFFER_STATUS: u32 = 1 << 24;

/// Largest value a short (truncated) BSR can represent (TS 38.321 Table 6.1.3.1-1)
const MAX_SHORT_BSR: u32 = 150_000;

const MAX_PENDING_CE_BYTES: u32 = 1 << 14;

/// Room left for the RLC segmentation header of a partially served SDU
const RLC_SEGMENTATION_OVERHEAD: u32 = 3;

/// UL upper layer header estimate per non-empty LCG
const RLC_HEADER_SIZE_ESTIMATE: u32 = 3;

/// Leftover bytes below this are folded into the current SDU
const MIN_LEFTOVER_BYTES: u32 = 5;

/// Space needed for a MAC SDU carrying `payload` bytes, RLC header estimate and MAC subheader included
fn get_mac_sdu_with_subhdr_and_rlc_hdr_estim(lcid: Lcid, payload: u32) -> u32 {
    let rlc_ovh = if lcid != Lcid::SRB0 && payload > 0 {
        RLC_SEGMENTATION_OVERHEAD
    } else {
        0
    };
    get_mac_sdu_required_bytes(payload + rlc_ovh)
}

/// BSRs exclude RLC and MAC headers (TS 38.321 6.1.3.1)
fn add_upper_layer_header_bytes(lcg: LcgId, payload: u32) -> u32 {
    if payload == 0 || lcg.0 == 0 {
        payload
    } else {
        payload + RLC_HEADER_SIZE_ESTIMATE
    }
}

/// Lower value means higher priority
fn get_lc_prio(cfg: &LogicalChannelConfig) -> u16 {
    if cfg.lcid.is_srb() {
        if cfg.lcid <= Lcid::SRB1 {
            0
        } else {
            1
        }
    } else {
        match &cfg.qos {
            Some(qos) => qos.priority_level * qos.arp_priority,
            None => MAX_QOS_PRIO_LEVEL * MAX_ARP_PRIO_LEVEL,
        }
    }
}

#[derive(Debug)]
struct LcQosContext {
    /// DL bytes scheduled for this LC in the current slot
    last_sched_bytes: u32,
    avg_bytes_per_slot: ExpAverageFastStart<f32>,
}

#[derive(Debug)]
struct LcgQosContext {
    /// UL bytes scheduled for this LCG in the current slot
    last_sched_bytes: u32,
    /// UL bytes scheduled since the last BSR
    sched_bytes_accum: u32,
    avg_bytes_per_slot: ExpAverageFastStart<f32>,
}

#[derive(Debug)]
struct DlChannelRow {
    buf_st: u32,
    slice_id: Option<RanSliceId>,
    qos_row: Option<RowId>,
    /// Head-of-line time of arrival
    hol_toa: Option<SlotPoint>,
}

#[derive(Debug)]
struct UlLcgRow {
    buf_st: u32,
    slice_id: Option<RanSliceId>,
    qos_row: Option<RowId>,
}

/// Maps (UE, LCID) and (UE, LCG-ID) pairs to their table rows
#[derive(Debug)]
struct LogicalChannelMapper {
    ue_lcid_to_dl_row: Vec<Option<RowId>>,
    ue_lcg_to_ul_row: Vec<Option<RowId>>,
    qos_channels: SlotTable<LcQosContext>,
    qos_lcgs: SlotTable<LcgQosContext>,
    dl_fields: SlotTable<DlChannelRow>,
    ul_fields: SlotTable<UlLcgRow>,
}

fn lc_index(ue_index: DuUeIndex, lcid: Lcid) -> usize {
    ue_index.as_usize() * MAX_NOF_RB_LCIDS + lcid.as_usize()
}

fn lcg_index(ue_index: DuUeIndex, lcg: LcgId) -> usize {
    ue_index.as_usize() * MAX_NOF_LCGS + lcg.as_usize()
}

impl LogicalChannelMapper {
    fn new() -> Self {
        // Two QoS-tracked DRBs per UE are pre-reserved
        const PRERESERVED_NOF_DRBS_PER_UE: usize = 2;
        Self {
            ue_lcid_to_dl_row: vec![None; MAX_NOF_RB_LCIDS * MAX_NOF_DU_UES],
            ue_lcg_to_ul_row: vec![None; MAX_NOF_LCGS * MAX_NOF_DU_UES],
            qos_channels: SlotTable::with_capacity(PRERESERVED_NOF_DRBS_PER_UE * MAX_NOF_DU_UES),
            qos_lcgs: SlotTable::with_capacity(PRERESERVED_NOF_DRBS_PER_UE * MAX_NOF_DU_UES),
            dl_fields: SlotTable::with_capacity(4 * MAX_NOF_DU_UES),
            ul_fields: SlotTable::with_capacity(2 * MAX_NOF_DU_UES),
        }
    }

    fn slot_indication(&mut self) {
        for (_, qos) in self.qos_channels.iter_mut() {
            qos.avg_bytes_per_slot.push(qos.last_sched_bytes as f32);
            qos.last_sched_bytes = 0;
        }
        for (_, qos) in self.qos_lcgs.iter_mut() {
            qos.avg_bytes_per_slot.push(qos.last_sched_bytes as f32);
            qos.last_sched_bytes = 0;
        }
    }

    fn find_lc(&self, ue_index: DuUeIndex, lcid: Lcid) -> Option<RowId> {
        self.ue_lcid_to_dl_row[lc_index(ue_index, lcid)]
    }

    fn find_lcg(&self, ue_index: DuUeIndex, lcg: LcgId) -> Option<RowId> {
        self.ue_lcg_to_ul_row[lcg_index(ue_index, lcg)]
    }

    /// Create the LC and LCG rows of a bearer if missing and refresh their QoS tracking
    fn addmod_lc_and_lcg(
        &mut self,
        ue_index: DuUeIndex,
        lc_cfg: &LogicalChannelConfig,
        slots_per_msec: u32,
    ) -> (RowId, RowId) {
        let lc_rid = match self.find_lc(ue_index, lc_cfg.lcid) {
            Some(rid) => rid,
            None => {
                let rid = self.dl_fields.insert(DlChannelRow {
                    buf_st: 0,
                    slice_id: None,
                    qos_row: None,
                    hol_toa: None,
                });
                self.ue_lcid_to_dl_row[lc_index(ue_index, lc_cfg.lcid)] = Some(rid);
                rid
            }
        };
        let lcg_rid = match self.find_lcg(ue_index, lc_cfg.lc_group) {
            Some(rid) => rid,
            None => {
                let rid = self.ul_fields.insert(UlLcgRow {
                    buf_st: 0,
                    slice_id: None,
                    qos_row: None,
                });
                self.ue_lcg_to_ul_row[lcg_index(ue_index, lc_cfg.lc_group)] = Some(rid);
                rid
            }
        };

        let gbr_window_ms = lc_cfg
            .qos
            .as_ref()
            .filter(|q| q.gbr_qos_info.is_some())
            .map(|q| q.average_window_ms);
        let dl_qrow = self.dl_fields[lc_rid].qos_row;
        let ul_qrow = self.ul_fields[lcg_rid].qos_row;
        match gbr_window_ms {
            Some(window_ms) => {
                let alpha = 1.0 / (window_ms * slots_per_msec) as f32;
                match dl_qrow {
                    Some(q) => self.qos_channels[q].avg_bytes_per_slot.set_alpha(alpha),
                    None => {
                        let q = self.qos_channels.insert(LcQosContext {
                            last_sched_bytes: 0,
                            avg_bytes_per_slot: ExpAverageFastStart::new(alpha),
                        });
                        self.dl_fields[lc_rid].qos_row = Some(q);
                    }
                }
                match ul_qrow {
                    Some(q) => self.qos_lcgs[q].avg_bytes_per_slot.set_alpha(alpha),
                    None => {
                        let q = self.qos_lcgs.insert(LcgQosContext {
                            last_sched_bytes: 0,
                            sched_bytes_accum: 0,
                            avg_bytes_per_slot: ExpAverageFastStart::new(alpha),
                        });
                        self.ul_fields[lcg_rid].qos_row = Some(q);
                    }
                }
            }
            None => {
                if let Some(q) = self.dl_fields[lc_rid].qos_row.take() {
                    self.qos_channels.remove(q);
                }
                if let Some(q) = self.ul_fields[lcg_rid].qos_row.take() {
                    self.qos_lcgs.remove(q);
                }
            }
        }
        (lc_rid, lcg_rid)
    }

    fn rem_lc(&mut self, ue_index: DuUeIndex, lcid: Lcid) {
        let Some(rid) = self.ue_lcid_to_dl_row[lc_index(ue_index, lcid)].take() else {
            panic!("Invalid UE LCID deregistration ue={} lcid={}", ue_index, lcid);
        };
        let row = self.dl_fields.remove(rid);
        if let Some(q) = row.qos_row {
            self.qos_channels.remove(q);
        }
    }

    fn rem_lcg(&mut self, ue_index: DuUeIndex, lcg: LcgId) {
        let Some(rid) = self.ue_lcg_to_ul_row[lcg_index(ue_index, lcg)].take() else {
            panic!("Invalid UE LCG-ID deregistration ue={} lcg={}", ue_index, lcg);
        };
        let row = self.ul_fields.remove(rid);
        if let Some(q) = row.qos_row {
            self.qos_lcgs.remove(q);
        }
    }

    fn avg_dl_bits_per_slot(&self, lc_rid: RowId) -> f64 {
        self.dl_fields[lc_rid]
            .qos_row
            .map_or(0.0, |q| self.qos_channels[q].avg_bytes_per_slot.average() as f64 * 8.0)
    }

    fn avg_ul_bits_per_slot(&self, lcg_rid: RowId) -> f64 {
        self.ul_fields[lcg_rid]
            .qos_row
            .map_or(0.0, |q| self.qos_lcgs[q].avg_bytes_per_slot.average() as f64 * 8.0)
    }

    /// DL pending bytes of a channel, MAC subheader included. The DL buffer status
    /// already covers at least one RLC header.
    fn dl_pending_bytes(&self, lc_rid: RowId) -> u32 {
        get_mac_sdu_required_bytes(self.dl_fields[lc_rid].buf_st)
    }

    fn ul_pending_bytes(&self, lcg: LcgId, lcg_rid: RowId) -> u32 {
        get_mac_sdu_required_bytes(add_upper_layer_header_bytes(lcg, self.ul_fields[lcg_rid].buf_st))
    }
}

/// UEs with pending newTx data of one RAN slice
#[derive(Debug)]
struct RanSliceContext {
    pending_dl_ues: UeBitset,
    pending_ul_ues: UeBitset,
}

/// Pending MAC CE, linked into the list of its UE
#[derive(Debug)]
struct MacCeNode {
    info: MacCeInfo,
    next: Option<RowId>,
}

#[derive(Debug)]
struct UeRow {
    ue_index: DuUeIndex,
    slots_per_msec: u32,
    channel_configs: LogicalChannelConfigList,
    /// No DRB transmission while set
    fallback_state: bool,
    pending_con_res_id: bool,
    /// Sum of pending CE bytes, ConRes CE excluded
    pending_ce_bytes: u32,
    /// Pending DL bytes per slice, CEs excluded
    dl_slice_bytes: SmallFlatMap<RanSliceId, u32>,
    /// Pending UL bytes per slice, SR excluded
    ul_slice_bytes: SmallFlatMap<RanSliceId, u32>,
    /// Head of the pending CE list
    pending_ces: Option<RowId>,
    /// Configured LCIDs, highest priority first
    sorted_channels: Vec<Lcid>,
    channels: SmallFlatMap<Lcid, RowId>,
    lcgs: SmallFlatMap<LcgId, RowId>,
}

/// Shared state behind [`LogicalChannelSystem`] and its UE handles
#[derive(Debug)]
pub(crate) struct LcSystemInner {
    configured_ues: UeBitset,
    ues_with_pending_ces: UeBitset,
    ues_with_pending_sr: UeBitset,
    lc_mapper: LogicalChannelMapper,
    slices: SmallFlatMap<RanSliceId, RanSliceContext>,
    pending_ces: SlotTable<MacCeNode>,
    ues: SlotTable<UeRow>,
}

/// Differentially update the DL slice counter of a UE after a buffer status change
fn on_single_channel_buf_st_update(
    u: &mut UeRow,
    slices: &mut SmallFlatMap<RanSliceId, RanSliceContext>,
    slice_id: Option<RanSliceId>,
    new_buf_st: u32,
    prev_buf_st: u32,
) {
    let Some(slice_id) = slice_id else {
        return;
    };
    // Slices are disabled in fallback
    if u.fallback_state {
        return;
    }
    let Some(slice_pending_bytes) = u.dl_slice_bytes.get_mut(&slice_id) else {
        panic!("ue={}: slice {} not registered", u.ue_index, slice_id);
    };
    let prev_incl_subhdr = get_mac_sdu_required_bytes(prev_buf_st);
    let new_incl_subhdr = get_mac_sdu_required_bytes(new_buf_st);
    assert!(
        *slice_pending_bytes + new_incl_subhdr >= prev_incl_subhdr,
        "Invalid slice pending bytes"
    );
    let prev_slice_pending_bytes = *slice_pending_bytes;
    *slice_pending_bytes = *slice_pending_bytes + new_incl_subhdr - prev_incl_subhdr;
    if (prev_slice_pending_bytes > 0) != (*slice_pending_bytes > 0) {
        let has_data = *slice_pending_bytes > 0;
        if let Some(slice) = slices.get_mut(&slice_id) {
            slice.pending_dl_ues.set_to(u.ue_index.as_usize(), has_data);
        }
    }
}

/// Differentially update the UL slice counter of a UE after a BSR
fn on_single_lcg_buf_st_update(
    u: &mut UeRow,
    slices: &mut SmallFlatMap<RanSliceId, RanSliceContext>,
    lcg: LcgId,
    slice_id: Option<RanSliceId>,
    new_buf_st: u32,
    prev_buf_st: u32,
) {
    let Some(slice_id) = slice_id else {
        return;
    };
    if u.fallback_state {
        return;
    }
    let Some(slice_pending_bytes) = u.ul_slice_bytes.get_mut(&slice_id) else {
        panic!("ue={}: slice {} not registered", u.ue_index, slice_id);
    };
    let prev_incl_subhdr = get_mac_sdu_required_bytes(add_upper_layer_header_bytes(lcg, prev_buf_st));
    let new_incl_subhdr = get_mac_sdu_required_bytes(add_upper_layer_header_bytes(lcg, new_buf_st));
    assert!(
        *slice_pending_bytes + new_incl_subhdr >= prev_incl_subhdr,
        "Invalid slice pending bytes"
    );
    let prev_slice_pending_bytes = *slice_pending_bytes;
    *slice_pending_bytes = *slice_pending_bytes + new_incl_subhdr - prev_incl_subhdr;
    if (prev_slice_pending_bytes > 0) != (*slice_pending_bytes > 0) {
        let has_data = *slice_pending_bytes > 0;
        if let Some(slice) = slices.get_mut(&slice_id) {
            slice.pending_ul_ues.set_to(u.ue_index.as_usize(), has_data);
        }
    }
}

impl LcSystemInner {
    fn new() -> Self {
        Self {
            configured_ues: UeBitset::new(0),
            ues_with_pending_ces: UeBitset::new(0),
            ues_with_pending_sr: UeBitset::new(0),
            lc_mapper: LogicalChannelMapper::new(),
            slices: SmallFlatMap::new(),
            pending_ces: SlotTable::with_capacity(MAX_NOF_DU_UES),
            ues: SlotTable::with_capacity(MAX_NOF_DU_UES),
        }
    }

    fn resize_ue_bitsets(&mut self, new_size: usize) {
        self.configured_ues.resize(new_size);
        self.ues_with_pending_ces.resize(new_size);
        self.ues_with_pending_sr.resize(new_size);
        for (_, slice) in self.slices.iter_mut() {
            slice.pending_dl_ues.resize(new_size);
            slice.pending_ul_ues.resize(new_size);
        }
    }

    fn create_ue(
        &mut self,
        ue_index: DuUeIndex,
        scs: SubcarrierSpacing,
        starts_in_fallback: bool,
        cfgs: &LogicalChannelConfigList,
    ) -> RowId {
        assert!(
            !self.configured_ues.contains(ue_index.as_usize()),
            "Duplicate UE index {}",
            ue_index
        );
        let ue_rid = self.ues.insert(UeRow {
            ue_index,
            slots_per_msec: scs.slots_per_subframe(),
            channel_configs: LogicalChannelConfigList::default(),
            fallback_state: starts_in_fallback,
            pending_con_res_id: false,
            pending_ce_bytes: 0,
            dl_slice_bytes: SmallFlatMap::new(),
            ul_slice_bytes: SmallFlatMap::new(),
            pending_ces: None,
            sorted_channels: Vec::with_capacity(MAX_NOF_RB_LCIDS),
            channels: SmallFlatMap::new(),
            lcgs: SmallFlatMap::new(),
        });
        if self.configured_ues.size() <= ue_index.as_usize() {
            self.resize_ue_bitsets(ue_index.as_usize() + 1);
        }
        self.configured_ues.set(ue_index.as_usize());

        self.configure(ue_rid, cfgs);
        ue_rid
    }

    fn remove_ue(&mut self, ue_rid: RowId) {
        let Some(ue_index) = self.ues.get(ue_rid).map(|u| u.ue_index) else {
            panic!("Trying to remove non-existing UE");
        };
        assert!(
            self.configured_ues.contains(ue_index.as_usize()),
            "ue={}: UE not configured",
            ue_index
        );

        // Detaches slices and pending CEs and drops all bearers
        self.deactivate(ue_rid);
        self.ues.remove(ue_rid);

        // Strip trailing unused UE positions from the bitsets
        self.configured_ues.reset(ue_index.as_usize());
        let new_size = self.configured_ues.find_highest().map_or(0, |h| h + 1);
        if self.configured_ues.size() != new_size {
            self.resize_ue_bitsets(new_size);
        }
    }

    fn configure(&mut self, ue_rid: RowId, cfgs: &LogicalChannelConfigList) {
        let old_cfgs = std::mem::replace(&mut self.ues[ue_rid].channel_configs, cfgs.clone());
        let ue_index = self.ues[ue_rid].ue_index;

        for old_lc in old_cfgs.iter() {
            if !cfgs.contains(old_lc.lcid) && self.ues[ue_rid].channels.contains(&old_lc.lcid) {
                self.deregister_lc_ran_slice(ue_rid, old_lc.lcid);
                self.ues[ue_rid].channels.remove(&old_lc.lcid);
                self.lc_mapper.rem_lc(ue_index, old_lc.lcid);
            }
            if !cfgs.contains_lcg(old_lc.lc_group) && self.ues[ue_rid].lcgs.contains(&old_lc.lc_group) {
                self.deregister_lcg_ran_slice(ue_rid, old_lc.lc_group);
                self.ues[ue_rid].lcgs.remove(&old_lc.lc_group);
                self.lc_mapper.rem_lcg(ue_index, old_lc.lc_group);
            }
        }

        let slots_per_msec = self.ues[ue_rid].slots_per_msec;
        for new_cfg in cfgs.iter() {
            let (lc_rid, lcg_rid) = self.lc_mapper.addmod_lc_and_lcg(ue_index, new_cfg, slots_per_msec);
            let u = &mut self.ues[ue_rid];
            if !u.channels.contains(&new_cfg.lcid) {
                u.channels.insert(new_cfg.lcid, lc_rid);
            }
            if !u.lcgs.contains(&new_cfg.lc_group) {
                u.lcgs.insert(new_cfg.lc_group, lcg_rid);
            }
        }

        // Stable sort keeps configuration order among equal priorities
        let u = &mut self.ues[ue_rid];
        u.sorted_channels.clear();
        u.sorted_channels.extend(cfgs.iter().map(|c| c.lcid));
        u.sorted_channels
            .sort_by_key(|lcid| cfgs.get(*lcid).map_or(u16::MAX, get_lc_prio));
    }

    fn deactivate(&mut self, ue_rid: RowId) {
        let u = &mut self.ues[ue_rid];
        let ue_index = u.ue_index;
        u.pending_con_res_id = false;
        let mut ce_rid = u.pending_ces.take();
        while let Some(rid) = ce_rid {
            ce_rid = self.pending_ces.remove(rid).next;
        }
        u.pending_ce_bytes = 0;
        self.ues_with_pending_ces.reset(ue_index.as_usize());
        self.ues_with_pending_sr.reset(ue_index.as_usize());

        self.configure(ue_rid, &LogicalChannelConfigList::default());
    }

    fn set_fallback_state(&mut self, ue_rid: RowId, enter_fallback: bool) {
        let u = &mut self.ues[ue_rid];
        if u.fallback_state == enter_fallback {
            return;
        }
        let ue_index = u.ue_index.as_usize();
        if enter_fallback {
            // Fallback only serves SRB0/SRB1, so slices stop reporting this UE
            for (slice_id, bytes) in u.dl_slice_bytes.iter_mut() {
                if *bytes > 0 {
                    *bytes = 0;
                    if let Some(slice) = self.slices.get_mut(&slice_id) {
                        slice.pending_dl_ues.reset(ue_index);
                    }
                }
            }
            self.ues_with_pending_ces.reset(ue_index);
            for (slice_id, bytes) in u.ul_slice_bytes.iter_mut() {
                if *bytes > 0 {
                    *bytes = 0;
                    if let Some(slice) = self.slices.get_mut(&slice_id) {
                        slice.pending_ul_ues.reset(ue_index);
                    }
                }
            }
            u.fallback_state = true;
        } else {
            u.fallback_state = false;
            let channels: SmallFlatMap<Lcid, RowId> = u.channels.clone();
            for (_, lc_rid) in channels.iter() {
                let row = &self.lc_mapper.dl_fields[*lc_rid];
                on_single_channel_buf_st_update(
                    &mut self.ues[ue_rid],
                    &mut self.slices,
                    row.slice_id,
                    row.buf_st,
                    0,
                );
            }
            if self.ues[ue_rid].pending_ces.is_some() {
                self.ues_with_pending_ces.set(ue_index);
            }
            let lcgs: SmallFlatMap<LcgId, RowId> = self.ues[ue_rid].lcgs.clone();
            for (lcg, lcg_rid) in lcgs.iter() {
                let row = &self.lc_mapper.ul_fields[*lcg_rid];
                on_single_lcg_buf_st_update(
                    &mut self.ues[ue_rid],
                    &mut self.slices,
                    lcg,
                    row.slice_id,
                    row.buf_st,
                    0,
                );
            }
        }
    }

    fn ensure_slice(&mut self, slice_id: RanSliceId) {
        if !self.slices.contains(&slice_id) {
            let size = self.configured_ues.size();
            self.slices.insert(
                slice_id,
                RanSliceContext {
                    pending_dl_ues: UeBitset::new(size),
                    pending_ul_ues: UeBitset::new(size),
                },
            );
        }
    }

    fn set_lcid_ran_slice(&mut self, ue_rid: RowId, lcid: Lcid, slice_id: RanSliceId) {
        let Some(&lc_rid) = self.ues[ue_rid].channels.get(&lcid) else {
            panic!("ue={}: LCID {} not configured", self.ues[ue_rid].ue_index, lcid);
        };
        if self.lc_mapper.dl_fields[lc_rid].slice_id == Some(slice_id) {
            return;
        }
        self.deregister_lc_ran_slice(ue_rid, lcid);

        if !self.ues[ue_rid].dl_slice_bytes.contains(&slice_id) {
            self.ensure_slice(slice_id);
            self.ues[ue_rid].dl_slice_bytes.insert(slice_id, 0);
        }
        self.lc_mapper.dl_fields[lc_rid].slice_id = Some(slice_id);
        let buf_st = self.lc_mapper.dl_fields[lc_rid].buf_st;
        on_single_channel_buf_st_update(&mut self.ues[ue_rid], &mut self.slices, Some(slice_id), buf_st, 0);
    }

    fn set_lcg_ran_slice(&mut self, ue_rid: RowId, lcg: LcgId, slice_id: RanSliceId) {
        let Some(&lcg_rid) = self.ues[ue_rid].lcgs.get(&lcg) else {
            panic!("ue={}: LCG-ID {} not configured", self.ues[ue_rid].ue_index, lcg);
        };
        if self.lc_mapper.ul_fields[lcg_rid].slice_id == Some(slice_id) {
            return;
        }
        self.deregister_lcg_ran_slice(ue_rid, lcg);

        if !self.ues[ue_rid].ul_slice_bytes.contains(&slice_id) {
            self.ensure_slice(slice_id);
            self.ues[ue_rid].ul_slice_bytes.insert(slice_id, 0);
        }
        self.lc_mapper.ul_fields[lcg_rid].slice_id = Some(slice_id);
        let buf_st = self.lc_mapper.ul_fields[lcg_rid].buf_st;
        on_single_lcg_buf_st_update(&mut self.ues[ue_rid], &mut self.slices, lcg, Some(slice_id), buf_st, 0);
    }

    fn deregister_lc_ran_slice(&mut self, ue_rid: RowId, lcid: Lcid) {
        let Some(&lc_rid) = self.ues[ue_rid].channels.get(&lcid) else {
            return;
        };
        let row = &self.lc_mapper.dl_fields[lc_rid];
        let (prev_slice_id, buf_st) = (row.slice_id, row.buf_st);
        on_single_channel_buf_st_update(&mut self.ues[ue_rid], &mut self.slices, prev_slice_id, 0, buf_st);

        let Some(prev_slice_id) = prev_slice_id else {
            return;
        };
        self.lc_mapper.dl_fields[lc_rid].slice_id = None;
        let dl_fields = &self.lc_mapper.dl_fields;
        let u = &mut self.ues[ue_rid];
        // Last LC of this UE in the slice
        if u.channels.values().all(|rid| dl_fields[*rid].slice_id != Some(prev_slice_id)) {
            u.dl_slice_bytes.remove(&prev_slice_id);
        }
    }

    fn deregister_lcg_ran_slice(&mut self, ue_rid: RowId, lcg: LcgId) {
        let Some(&lcg_rid) = self.ues[ue_rid].lcgs.get(&lcg) else {
            return;
        };
        let row = &self.lc_mapper.ul_fields[lcg_rid];
        let (prev_slice_id, buf_st) = (row.slice_id, row.buf_st);
        on_single_lcg_buf_st_update(&mut self.ues[ue_rid], &mut self.slices, lcg, prev_slice_id, 0, buf_st);

        let Some(prev_slice_id) = prev_slice_id else {
            return;
        };
        self.lc_mapper.ul_fields[lcg_rid].slice_id = None;
        let ul_fields = &self.lc_mapper.ul_fields;
        let u = &mut self.ues[ue_rid];
        if u.lcgs.values().all(|rid| ul_fields[*rid].slice_id != Some(prev_slice_id)) {
            u.ul_slice_bytes.remove(&prev_slice_id);
        }
    }

    fn handle_dl_buffer_status_indication(
        &mut self,
        ue_rid: RowId,
        lcid: Lcid,
        buffer_status: u32,
        hol_toa: Option<SlotPoint>,
    ) {
        assert!(lcid.as_usize() < MAX_NOF_RB_LCIDS, "Max LCID value 32 exceeded");
        // The LCID may have been removed meanwhile
        let Some(&lc_rid) = self.ues[ue_rid].channels.get(&lcid) else {
            return;
        };
        let row = &mut self.lc_mapper.dl_fields[lc_rid];
        let prev_buf_st = row.buf_st;
        row.buf_st = buffer_status.min(MAX_BUFFER_STATUS);
        row.hol_toa = hol_toa;
        let (slice_id, new_buf_st) = (row.slice_id, row.buf_st);
        on_single_channel_buf_st_update(&mut self.ues[ue_rid], &mut self.slices, slice_id, new_buf_st, prev_buf_st);
    }

    fn handle_mac_ce_indication(&mut self, ue_rid: RowId, ce: &MacCeInfo) {
        let u = &mut self.ues[ue_rid];
        // ConRes CE always goes first and is tracked as a flag
        if ce.ce_lcid == LcidDlSch::UE_CON_RES_ID {
            u.pending_con_res_id = true;
            return;
        }
        let mut tail = None;
        let mut it = u.pending_ces;
        while let Some(rid) = it {
            let node = &mut self.pending_ces[rid];
            if ce.ce_lcid == LcidDlSch::TA_CMD && node.info.ce_lcid == LcidDlSch::TA_CMD {
                // Fixed size CE, pending bytes unchanged
                node.info.ce_payload = ce.ce_payload;
                return;
            }
            tail = Some(rid);
            it = node.next;
        }
        let ce_rid = self.pending_ces.insert(MacCeNode { info: *ce, next: None });
        match tail {
            Some(tail) => self.pending_ces[tail].next = Some(ce_rid),
            None => u.pending_ces = Some(ce_rid),
        }

        let ce_bytes = if ce.ce_lcid.is_var_len_ce() {
            get_mac_sdu_required_bytes(ce.ce_lcid.sizeof_ce())
        } else {
            FIXED_SIZED_MAC_CE_SUBHEADER_SIZE + ce.ce_lcid.sizeof_ce()
        };
        let new_ce_bytes = u.pending_ce_bytes + ce_bytes;
        assert!(
            new_ce_bytes <= MAX_PENDING_CE_BYTES,
            "ue={}: Exceeded maximum pending CE bytes per UE",
            u.ue_index
        );
        u.pending_ce_bytes = new_ce_bytes;
        self.ues_with_pending_ces.set(u.ue_index.as_usize());
    }

    fn handle_bsr_indication(&mut self, ue_rid: RowId, bsr: &UlBsrIndication) {
        for report in &bsr.reported_lcgs {
            let Some(&lcg_rid) = self.ues[ue_rid].lcgs.get(&report.lcg_id) else {
                debug!(
                    "ue={}: BSR for unconfigured lcg={} ignored",
                    self.ues[ue_rid].ue_index, report.lcg_id
                );
                continue;
            };
            let row = &mut self.lc_mapper.ul_fields[lcg_rid];
            // A saturated short BSR does not tell how far above MAX_SHORT_BSR the buffer is
            if bsr.bsr_fmt.is_long() || report.nof_bytes <= MAX_SHORT_BSR || row.buf_st <= MAX_SHORT_BSR {
                let prev_buf_st = row.buf_st;
                row.buf_st = report.nof_bytes.min(MAX_BUFFER_STATUS);
                let (slice_id, new_buf_st, qos_row) = (row.slice_id, row.buf_st, row.qos_row);
                if let Some(q) = qos_row {
                    self.lc_mapper.qos_lcgs[q].sched_bytes_accum = 0;
                }
                on_single_lcg_buf_st_update(
                    &mut self.ues[ue_rid],
                    &mut self.slices,
                    report.lcg_id,
                    slice_id,
                    new_buf_st,
                    prev_buf_st,
                );
            }
        }
    }

    fn get_max_prio_lcid(&self, ue_rid: RowId) -> Option<Lcid> {
        let u = &self.ues[ue_rid];
        u.sorted_channels.iter().copied().find(|lcid| {
            u.channels
                .get(lcid)
                .is_some_and(|rid| self.lc_mapper.dl_fields[*rid].buf_st > 0)
        })
    }

    fn allocate_mac_sdu_for(
        &mut self,
        ue_rid: RowId,
        subpdu: &mut DlMsgLcInfo,
        lcid: Lcid,
        rem_bytes: u32,
    ) -> u32 {
        assert!(lcid.as_usize() < MAX_NOF_RB_LCIDS, "Max LCID value 32 exceeded");
        let min_bytes_needed = get_mac_sdu_with_subhdr_and_rlc_hdr_estim(lcid, 1);
        if rem_bytes < min_bytes_needed {
            return 0;
        }
        let Some(&lc_rid) = self.ues[ue_rid].channels.get(&lcid) else {
            return 0;
        };
        let lch_bytes_and_subhdr = self.lc_mapper.dl_pending_bytes(lc_rid);
        if lch_bytes_and_subhdr == 0 {
            return 0;
        }
        // Leave room for the RLC header however small the pending data
        let lch_bytes_and_subhdr = lch_bytes_and_subhdr.max(min_bytes_needed);

        let mut alloc_bytes = rem_bytes.min(lch_bytes_and_subhdr);
        let leftover_bytes = rem_bytes - alloc_bytes;
        if leftover_bytes > 0 && leftover_bytes <= MIN_LEFTOVER_BYTES {
            alloc_bytes += leftover_bytes;
        }
        // 258 bytes cannot be split into a valid SDU and subheader
        if alloc_bytes == MAC_SDU_SUBHEADER_LENGTH_THRES + MIN_MAC_SDU_SUBHEADER_SIZE {
            alloc_bytes -= 1;
        }
        let sdu_size = get_mac_sdu_size(alloc_bytes);

        let row = &mut self.lc_mapper.dl_fields[lc_rid];
        let prev_buf_st = row.buf_st;
        let last_sched_bytes = sdu_size.min(prev_buf_st);
        let mut new_buf_st = prev_buf_st - last_sched_bytes;
        if lcid != Lcid::SRB0 && new_buf_st > 0 {
            // Segmented SDU. Only matters until the next RLC buffer occupancy update.
            new_buf_st += RLC_SEGMENTATION_OVERHEAD;
        }
        row.buf_st = new_buf_st;
        let (slice_id, qos_row) = (row.slice_id, row.qos_row);
        on_single_channel_buf_st_update(&mut self.ues[ue_rid], &mut self.slices, slice_id, new_buf_st, prev_buf_st);
        if let Some(q) = qos_row {
            self.lc_mapper.qos_channels[q].last_sched_bytes += last_sched_bytes;
        }

        subpdu.lcid = LcidDlSch::from(lcid);
        subpdu.sched_bytes = sdu_size;
        alloc_bytes
    }

    fn allocate_mac_sdu(
        &mut self,
        ue_rid: RowId,
        subpdu: &mut DlMsgLcInfo,
        rem_bytes: u32,
        lcid: Option<Lcid>,
    ) -> u32 {
        subpdu.lcid = LcidDlSch::MIN_RESERVED;
        subpdu.sched_bytes = 0;
        let Some(lcid) = lcid.or_else(|| self.get_max_prio_lcid(ue_rid)) else {
            return 0;
        };
        self.allocate_mac_sdu_for(ue_rid, subpdu, lcid, rem_bytes)
    }

    fn allocate_mac_ce(&mut self, ue_rid: RowId, subpdu: &mut DlMsgLcInfo, rem_bytes: u32) -> u32 {
        subpdu.lcid = LcidDlSch::MIN_RESERVED;
        subpdu.sched_bytes = 0;

        let alloc_bytes = self.allocate_ue_con_res_id_mac_ce(ue_rid, subpdu, rem_bytes);
        if alloc_bytes > 0 {
            return alloc_bytes;
        }

        let u = &mut self.ues[ue_rid];
        let Some(ce_rid) = u.pending_ces else {
            return 0;
        };
        let node = &self.pending_ces[ce_rid];
        let lcid = node.info.ce_lcid;
        let ce_size = lcid.sizeof_ce();
        let alloc_bytes = if lcid.is_var_len_ce() {
            get_mac_sdu_required_bytes(ce_size)
        } else {
            ce_size + FIXED_SIZED_MAC_CE_SUBHEADER_SIZE
        };
        if rem_bytes < alloc_bytes {
            return 0;
        }

        subpdu.lcid = lcid;
        subpdu.sched_bytes = ce_size;
        subpdu.ce_payload = Some(node.info.ce_payload);

        u.pending_ces = node.next;
        u.pending_ce_bytes -= alloc_bytes;
        self.pending_ces.remove(ce_rid);
        if u.pending_ces.is_none() {
            self.ues_with_pending_ces.reset(u.ue_index.as_usize());
        }
        alloc_bytes
    }

    fn allocate_ue_con_res_id_mac_ce(&mut self, ue_rid: RowId, subpdu: &mut DlMsgLcInfo, rem_bytes: u32) -> u32 {
        let u = &mut self.ues[ue_rid];
        if !u.pending_con_res_id {
            return 0;
        }
        subpdu.lcid = LcidDlSch::MIN_RESERVED;
        subpdu.sched_bytes = 0;

        let ce_size = LcidDlSch::UE_CON_RES_ID.sizeof_ce();
        let alloc_bytes = ce_size + FIXED_SIZED_MAC_CE_SUBHEADER_SIZE;
        if rem_bytes < alloc_bytes {
            return 0;
        }
        u.pending_con_res_id = false;
        subpdu.lcid = LcidDlSch::UE_CON_RES_ID;
        subpdu.sched_bytes = ce_size;
        alloc_bytes
    }

    fn handle_ul_grant(&mut self, ue_rid: RowId, mut grant_size: u32) {
        let u = &self.ues[ue_rid];
        self.ues_with_pending_sr.reset(u.ue_index.as_usize());

        // Attribute granted bytes to QoS-tracked LCGs in LCG order
        for (_, lcg_rid) in u.lcgs.iter() {
            if grant_size == 0 {
                break;
            }
            let row = &self.lc_mapper.ul_fields[*lcg_rid];
            let Some(q) = row.qos_row else {
                continue;
            };
            let buf_st = row.buf_st;
            let qos = &mut self.lc_mapper.qos_lcgs[q];
            if buf_st == 0 || buf_st <= qos.sched_bytes_accum {
                continue;
            }
            let bytes_sched = (buf_st - qos.sched_bytes_accum).min(grant_size);
            qos.last_sched_bytes += bytes_sched;
            qos.sched_bytes_accum += bytes_sched;
            grant_size -= bytes_sched;
        }
    }
}

/// Owner of the logical channel state of all UEs of the DU
#[derive(Debug, Clone)]
pub struct LogicalChannelSystem {
    inner: Rc<RefCell<LcSystemInner>>,
}

impl Default for LogicalChannelSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicalChannelSystem {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(LcSystemInner::new())),
        }
    }

    /// Push the bytes scheduled in the last slot into the bit rate averages
    pub fn slot_indication(&self) {
        self.inner.borrow_mut().lc_mapper.slot_indication();
    }

    /// Register a UE. Panics if the UE index is already in use.
    pub fn create_ue(
        &self,
        ue_index: DuUeIndex,
        slot_ind_scs: SubcarrierSpacing,
        starts_in_fallback: bool,
        log_channels_configs: &LogicalChannelConfigList,
    ) -> UeLogicalChannelRepository {
        let ue_rid = self.inner.borrow_mut().create_ue(
            ue_index,
            slot_ind_scs,
            starts_in_fallback,
            log_channels_configs,
        );
        UeLogicalChannelRepository::new(self.inner.clone(), ue_index, ue_rid)
    }

    pub fn nof_ues(&self) -> usize {
        self.inner.borrow().ues.len()
    }

    pub fn nof_logical_channels(&self) -> usize {
        self.inner.borrow().ues.iter().map(|(_, u)| u.channels.len()).sum()
    }

    /// UEs that may have DL newTx data for a slice. The SRB slice also reports UEs with pending CEs.
    pub fn get_ues_with_dl_pending_data(&self, slice_id: RanSliceId) -> UeBitset {
        let inner = self.inner.borrow();
        let Some(slice) = inner.slices.get(&slice_id) else {
            return UeBitset::default();
        };
        if slice_id != SRB_RAN_SLICE_ID {
            return slice.pending_dl_ues.clone();
        }
        &slice.pending_dl_ues | &inner.ues_with_pending_ces
    }

    /// UEs with UL newTx data for a slice, from their BSRs. The SRB slice also reports UEs with pending SR.
    pub fn get_ues_with_ul_pending_data(&self, slice_id: RanSliceId) -> UeBitset {
        let inner = self.inner.borrow();
        let Some(slice) = inner.slices.get(&slice_id) else {
            return UeBitset::default();
        };
        if slice_id != SRB_RAN_SLICE_ID {
            return slice.pending_ul_ues.clone();
        }
        &slice.pending_ul_ues | &inner.ues_with_pending_sr
    }
}
