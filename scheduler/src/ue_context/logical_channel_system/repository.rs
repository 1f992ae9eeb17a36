//! Per-UE handles into the Logical Channel System

use super::*;
use smallvec::SmallVec;
use tracing::trace;

/// Owning handle to the logical channels of one UE.
///
/// Dropping the handle (or calling [`reset`](Self::reset)) removes the UE from the
/// [`LogicalChannelSystem`]. Any other call on a reset handle panics.
#[derive(Debug)]
pub struct UeLogicalChannelRepository {
    parent: Option<Rc<RefCell<LcSystemInner>>>,
    ue_index: DuUeIndex,
    ue_rid: RowId,
}

/// Non-owning access to a UE logical channel context.
///
/// Used by collaborators that enqueue MAC CEs or check SR state (TA management,
/// DRX) without keeping the UE alive. Calls on a removed UE are ignored.
#[derive(Debug, Clone)]
pub struct UeLogicalChannelView {
    parent: Rc<RefCell<LcSystemInner>>,
    ue_index: DuUeIndex,
    ue_rid: RowId,
}

impl UeLogicalChannelView {
    pub fn ue_index(&self) -> DuUeIndex {
        self.ue_index
    }

    pub fn handle_mac_ce_indication(&self, ce: MacCeInfo) {
        let mut inner = self.parent.borrow_mut();
        if !inner.ues.contains(self.ue_rid) {
            trace!("ue={}: MAC CE dropped, UE no longer exists", self.ue_index);
            return;
        }
        inner.handle_mac_ce_indication(self.ue_rid, &ce);
    }

    pub fn has_pending_sr(&self) -> bool {
        let inner = self.parent.borrow();
        inner.ues.contains(self.ue_rid) && inner.ues_with_pending_sr.contains(self.ue_index.as_usize())
    }
}

impl UeLogicalChannelRepository {
    pub(super) fn new(parent: Rc<RefCell<LcSystemInner>>, ue_index: DuUeIndex, ue_rid: RowId) -> Self {
        Self {
            parent: Some(parent),
            ue_index,
            ue_rid,
        }
    }

    fn inner(&self) -> std::cell::Ref<'_, LcSystemInner> {
        match &self.parent {
            Some(p) => p.borrow(),
            None => panic!("ue={}: access to reset logical channel repository", self.ue_index),
        }
    }

    fn inner_mut(&self) -> std::cell::RefMut<'_, LcSystemInner> {
        match &self.parent {
            Some(p) => p.borrow_mut(),
            None => panic!("ue={}: access to reset logical channel repository", self.ue_index),
        }
    }

    pub fn ue_index(&self) -> DuUeIndex {
        self.ue_index
    }

    pub fn valid(&self) -> bool {
        self.parent.is_some()
    }

    /// Remove the UE from the Logical Channel System
    pub fn reset(&mut self) {
        if let Some(parent) = self.parent.take() {
            parent.borrow_mut().remove_ue(self.ue_rid);
        }
    }

    /// Non-owning view for CE producers and SR consumers
    pub fn view(&self) -> UeLogicalChannelView {
        match &self.parent {
            Some(p) => UeLogicalChannelView {
                parent: p.clone(),
                ue_index: self.ue_index,
                ue_rid: self.ue_rid,
            },
            None => panic!("ue={}: access to reset logical channel repository", self.ue_index),
        }
    }

    /// Current bearer configuration
    pub fn cfg(&self) -> LogicalChannelConfigList {
        self.inner().ues[self.ue_rid].channel_configs.clone()
    }

    /// Apply a new bearer configuration
    pub fn configure(&self, log_channels_configs: &LogicalChannelConfigList) {
        self.inner_mut().configure(self.ue_rid, log_channels_configs);
    }

    /// Drop all bearers and pending CEs. No more data is multiplexed for this UE.
    pub fn deactivate(&self) {
        self.inner_mut().deactivate(self.ue_rid);
    }

    /// In fallback only ConRes CE, SRB0 and SRB1 are served
    pub fn set_fallback_state(&self, enter_fallback: bool) {
        self.inner_mut().set_fallback_state(self.ue_rid, enter_fallback);
    }

    pub fn is_in_fallback_state(&self) -> bool {
        self.inner().ues[self.ue_rid].fallback_state
    }

    pub fn set_lcid_ran_slice(&self, lcid: Lcid, slice_id: RanSliceId) {
        self.inner_mut().set_lcid_ran_slice(self.ue_rid, lcid, slice_id);
    }

    pub fn set_lcg_ran_slice(&self, lcg: LcgId, slice_id: RanSliceId) {
        self.inner_mut().set_lcg_ran_slice(self.ue_rid, lcg, slice_id);
    }

    pub fn reset_lcid_ran_slice(&self, lcid: Lcid) {
        self.inner_mut().deregister_lc_ran_slice(self.ue_rid, lcid);
    }

    pub fn reset_lcg_ran_slice(&self, lcg: LcgId) {
        self.inner_mut().deregister_lcg_ran_slice(self.ue_rid, lcg);
    }

    /// Whether any DL bearer of the UE belongs to the slice
    pub fn has_slice(&self, slice_id: RanSliceId) -> bool {
        self.inner().ues[self.ue_rid].dl_slice_bytes.contains(&slice_id)
    }

    pub fn get_slice_id(&self, lcid: Lcid) -> Option<RanSliceId> {
        let inner = self.inner();
        let rid = *inner.ues[self.ue_rid].channels.get(&lcid)?;
        inner.lc_mapper.dl_fields[rid].slice_id
    }

    pub fn get_lcg_slice_id(&self, lcg: LcgId) -> Option<RanSliceId> {
        let inner = self.inner();
        let rid = *inner.ues[self.ue_rid].lcgs.get(&lcg)?;
        inner.lc_mapper.ul_fields[rid].slice_id
    }

    pub fn is_configured(&self, lcid: Lcid) -> bool {
        self.inner().ues[self.ue_rid].channels.contains(&lcid)
    }

    pub fn is_lcg_configured(&self, lcg: LcgId) -> bool {
        self.inner().ues[self.ue_rid].lcgs.contains(&lcg)
    }

    /// Whether any DL data or CE is pending for newTx
    pub fn has_dl_pending_bytes(&self) -> bool {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        let lc_has_data = |lcid: Lcid| {
            u.channels
                .get(&lcid)
                .is_some_and(|rid| inner.lc_mapper.dl_fields[*rid].buf_st > 0)
        };
        if u.fallback_state {
            return u.pending_con_res_id || lc_has_data(Lcid::SRB0) || lc_has_data(Lcid::SRB1);
        }
        // SRB0 is only served in fallback
        u.pending_ces.is_some()
            || u.channels
                .iter()
                .any(|(lcid, rid)| lcid != Lcid::SRB0 && inner.lc_mapper.dl_fields[*rid].buf_st > 0)
    }

    /// Whether any UL data is pending for newTx, per the last BSRs
    pub fn has_ul_pending_bytes(&self) -> bool {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        let lcg_has_data = |rid: &RowId| inner.lc_mapper.ul_fields[*rid].buf_st > 0;
        if u.fallback_state {
            return u.lcgs.get(&LcgId(0)).is_some_and(lcg_has_data);
        }
        let has_data = u.lcgs.values().any(lcg_has_data);
        has_data
    }

    /// Whether the slice has DL data for this UE. The SRB slice also reports pending CEs when no other slice has data.
    pub fn has_pending_dl_bytes(&self, slice_id: RanSliceId) -> bool {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        if u.dl_slice_bytes.get(&slice_id).is_some_and(|b| *b > 0) {
            return true;
        }
        slice_id == SRB_RAN_SLICE_ID
            && inner.ues_with_pending_ces.contains(self.ue_index.as_usize())
            && u.dl_slice_bytes.values().all(|b| *b == 0)
    }

    pub fn has_pending_ul_bytes(&self, slice_id: RanSliceId) -> bool {
        self.inner().ues[self.ue_rid]
            .ul_slice_bytes
            .get(&slice_id)
            .is_some_and(|b| *b > 0)
    }

    pub fn has_pending_bytes(&self, lcid: Lcid) -> bool {
        self.pending_bytes(lcid) > 0
    }

    pub fn has_pending_lcg_bytes(&self, lcg: LcgId) -> bool {
        self.pending_lcg_bytes(lcg) > 0
    }

    pub fn is_con_res_id_pending(&self) -> bool {
        self.inner().ues[self.ue_rid].pending_con_res_id
    }

    /// Whether any MAC CE, ConRes included, is pending
    pub fn has_pending_ces(&self) -> bool {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        u.pending_con_res_id || u.pending_ces.is_some()
    }

    /// Pending DL bytes of all CEs and channels, MAC subheaders included
    pub fn total_dl_pending_bytes(&self) -> u32 {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        pending_ce_bytes_of(u)
            + u.channels
                .values()
                .map(|rid| inner.lc_mapper.dl_pending_bytes(*rid))
                .sum::<u32>()
    }

    /// Pending DL bytes that can be served in the current state
    pub fn dl_pending_bytes(&self) -> u32 {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        let lc_bytes = |lcid: Lcid| {
            u.channels
                .get(&lcid)
                .map_or(0, |rid| inner.lc_mapper.dl_pending_bytes(*rid))
        };
        if u.fallback_state {
            return pending_con_res_ce_bytes_of(u) + lc_bytes(Lcid::SRB0) + lc_bytes(Lcid::SRB1);
        }
        pending_ce_bytes_of(u)
            + u.channels
                .iter()
                .filter(|(lcid, _)| *lcid != Lcid::SRB0)
                .map(|(_, rid)| inner.lc_mapper.dl_pending_bytes(*rid))
                .sum::<u32>()
    }

    /// Pending UL bytes that can be served in the current state
    pub fn ul_pending_bytes(&self) -> u32 {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        if u.fallback_state {
            return u
                .lcgs
                .get(&LcgId(0))
                .map_or(0, |rid| inner.lc_mapper.ul_pending_bytes(LcgId(0), *rid));
        }
        u.lcgs
            .iter()
            .map(|(lcg, rid)| inner.lc_mapper.ul_pending_bytes(lcg, *rid))
            .sum()
    }

    /// Pending DL bytes of a slice. CEs ride along with the first slice that has data,
    /// or with the SRB slice when no slice has data.
    pub fn dl_slice_pending_bytes(&self, slice_id: RanSliceId) -> u32 {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        if u.fallback_state {
            return 0;
        }
        let Some(&slice_bytes) = u.dl_slice_bytes.get(&slice_id) else {
            return 0;
        };
        if slice_bytes > 0 {
            return slice_bytes + pending_ce_bytes_of(u);
        }
        if slice_id == SRB_RAN_SLICE_ID && u.dl_slice_bytes.values().all(|b| *b == 0) {
            return pending_ce_bytes_of(u);
        }
        0
    }

    pub fn ul_slice_pending_bytes(&self, slice_id: RanSliceId) -> u32 {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        if u.fallback_state {
            return 0;
        }
        u.ul_slice_bytes.get(&slice_id).copied().unwrap_or(0)
    }

    /// Pending CE bytes, ConRes CE included
    pub fn pending_ce_bytes(&self) -> u32 {
        pending_ce_bytes_of(&self.inner().ues[self.ue_rid])
    }

    pub fn pending_con_res_ce_bytes(&self) -> u32 {
        pending_con_res_ce_bytes_of(&self.inner().ues[self.ue_rid])
    }

    /// DL pending bytes of a channel, MAC subheader included
    pub fn pending_bytes(&self, lcid: Lcid) -> u32 {
        let inner = self.inner();
        inner.ues[self.ue_rid]
            .channels
            .get(&lcid)
            .map_or(0, |rid| inner.lc_mapper.dl_pending_bytes(*rid))
    }

    /// UL pending bytes of an LCG, header estimates included
    pub fn pending_lcg_bytes(&self, lcg: LcgId) -> u32 {
        let inner = self.inner();
        inner.ues[self.ue_rid]
            .lcgs
            .get(&lcg)
            .map_or(0, |rid| inner.lc_mapper.ul_pending_bytes(lcg, *rid))
    }

    /// Average DL bit rate of a GBR channel, in bps. 0 when not QoS-tracked.
    pub fn average_dl_bit_rate(&self, lcid: Lcid) -> f64 {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        u.channels.get(&lcid).map_or(0.0, |rid| {
            inner.lc_mapper.avg_dl_bits_per_slot(*rid) * u.slots_per_msec as f64 * 1000.0
        })
    }

    /// Average UL bit rate of a GBR LCG, in bps. 0 when not QoS-tracked.
    pub fn average_ul_bit_rate(&self, lcg: LcgId) -> f64 {
        let inner = self.inner();
        let u = &inner.ues[self.ue_rid];
        u.lcgs.get(&lcg).map_or(0.0, |rid| {
            inner.lc_mapper.avg_ul_bits_per_slot(*rid) * u.slots_per_msec as f64 * 1000.0
        })
    }

    /// Arrival time of the oldest pending SDU of a channel
    pub fn hol_toa(&self, lcid: Lcid) -> Option<SlotPoint> {
        let inner = self.inner();
        let rid = *inner.ues[self.ue_rid].channels.get(&lcid)?;
        inner.lc_mapper.dl_fields[rid].hol_toa
    }

    /// Configured LCIDs, highest priority first
    pub fn get_prioritized_logical_channels(&self) -> SmallVec<[Lcid; 8]> {
        self.inner().ues[self.ue_rid].sorted_channels.iter().copied().collect()
    }

    pub fn handle_dl_buffer_status_indication(&self, lcid: Lcid, buffer_status: u32, hol_toa: Option<SlotPoint>) {
        self.inner_mut()
            .handle_dl_buffer_status_indication(self.ue_rid, lcid, buffer_status, hol_toa);
    }

    pub fn handle_mac_ce_indication(&self, ce: MacCeInfo) {
        self.inner_mut().handle_mac_ce_indication(self.ue_rid, &ce);
    }

    pub fn handle_bsr_indication(&self, bsr: &UlBsrIndication) {
        self.inner_mut().handle_bsr_indication(self.ue_rid, bsr);
    }

    pub fn handle_sr_indication(&self) {
        self.inner_mut().ues_with_pending_sr.set(self.ue_index.as_usize());
    }

    pub fn reset_sr_indication(&self) {
        self.inner_mut().ues_with_pending_sr.reset(self.ue_index.as_usize());
    }

    pub fn has_pending_sr(&self) -> bool {
        self.inner().ues_with_pending_sr.contains(self.ue_index.as_usize())
    }

    /// Allocate a MAC SDU of `lcid`, or of the highest priority channel with data when `None`.
    /// Returns the allocated bytes, MAC subheader included, or 0 if nothing fits.
    pub fn allocate_mac_sdu(&self, subpdu: &mut DlMsgLcInfo, rem_bytes: u32, lcid: Option<Lcid>) -> u32 {
        self.inner_mut().allocate_mac_sdu(self.ue_rid, subpdu, rem_bytes, lcid)
    }

    /// Allocate the next pending MAC CE, ConRes CE first
    pub fn allocate_mac_ce(&self, subpdu: &mut DlMsgLcInfo, rem_bytes: u32) -> u32 {
        self.inner_mut().allocate_mac_ce(self.ue_rid, subpdu, rem_bytes)
    }

    pub fn allocate_ue_con_res_id_mac_ce(&self, subpdu: &mut DlMsgLcInfo, rem_bytes: u32) -> u32 {
        self.inner_mut().allocate_ue_con_res_id_mac_ce(self.ue_rid, subpdu, rem_bytes)
    }

    /// Register a UL grant of `grant_size` bytes. Clears the pending SR.
    pub fn handle_ul_grant(&self, grant_size: u32) {
        self.inner_mut().handle_ul_grant(self.ue_rid, grant_size);
    }
}

impl Drop for UeLogicalChannelRepository {
    fn drop(&mut self) {
        self.reset();
    }
}

fn pending_con_res_ce_bytes_of(u: &UeRow) -> u32 {
    if u.pending_con_res_id {
        FIXED_SIZED_MAC_CE_SUBHEADER_SIZE + LcidDlSch::UE_CON_RES_ID.sizeof_ce()
    } else {
        0
    }
}

fn pending_ce_bytes_of(u: &UeRow) -> u32 {
    pending_con_res_ce_bytes_of(u) + u.pending_ce_bytes
}
