//! DL Transport Block Content Selection
//!
//! Fill a [`DlMsgTbInfo`] with MAC CEs and MAC SDUs of a UE within a TB size.

use super::repository::UeLogicalChannelRepository;
use common::types::{Lcid, RanSliceId};
use interfaces::dl_pdu::{DlMsgLcInfo, DlMsgTbInfo};

/// Smallest remainder worth another MAC SDU
const MIN_SDU_ALLOC_BYTES: u32 = 5;

/// Allocate MAC SDUs of `lcid` (or by priority when `None`) until the TB is full or nothing fits.
/// Returns the allocated bytes, subheaders included.
pub fn allocate_mac_sdus(
    tb_info: &mut DlMsgTbInfo,
    lch_mng: &UeLogicalChannelRepository,
    total_tbs: u32,
    lcid: Option<Lcid>,
) -> u32 {
    let mut rem_tbs = total_tbs;
    while rem_tbs >= MIN_SDU_ALLOC_BYTES && !tb_info.is_full() {
        let mut subpdu = DlMsgLcInfo::default();
        let alloc_bytes = lch_mng.allocate_mac_sdu(&mut subpdu, rem_tbs, lcid);
        if alloc_bytes == 0 {
            break;
        }
        tb_info.push(subpdu);
        rem_tbs -= alloc_bytes;
    }
    total_tbs - rem_tbs
}

/// Allocate pending MAC CEs until the TB is full or the next CE does not fit
pub fn allocate_mac_ces(tb_info: &mut DlMsgTbInfo, lch_mng: &UeLogicalChannelRepository, total_tbs: u32) -> u32 {
    let mut rem_tbs = total_tbs;
    while lch_mng.has_pending_ces() && !tb_info.is_full() {
        let mut subpdu = DlMsgLcInfo::default();
        let alloc_bytes = lch_mng.allocate_mac_ce(&mut subpdu, rem_tbs);
        if alloc_bytes == 0 {
            break;
        }
        tb_info.push(subpdu);
        rem_tbs -= alloc_bytes;
    }
    total_tbs - rem_tbs
}

pub fn allocate_ue_con_res_id_mac_ce(
    tb_info: &mut DlMsgTbInfo,
    lch_mng: &UeLogicalChannelRepository,
    total_tbs: u32,
) -> u32 {
    if tb_info.is_full() {
        return 0;
    }
    let mut subpdu = DlMsgLcInfo::default();
    let alloc_bytes = lch_mng.allocate_ue_con_res_id_mac_ce(&mut subpdu, total_tbs);
    if alloc_bytes > 0 {
        tb_info.push(subpdu);
    }
    alloc_bytes
}

/// TB content for a UE in fallback: ConRes CE, then SRB0 if it fits whole, else SRB1
pub fn build_dl_fallback_transport_block_info(
    tb_info: &mut DlMsgTbInfo,
    lch_mng: &UeLogicalChannelRepository,
    tb_size_bytes: u32,
) -> u32 {
    let mut total_subpdu_bytes = allocate_ue_con_res_id_mac_ce(tb_info, lch_mng, tb_size_bytes);

    // SRB0 SDUs cannot be segmented
    let srb0_pending = lch_mng.pending_bytes(Lcid::SRB0);
    let lcid = if srb0_pending > 0 && tb_size_bytes - total_subpdu_bytes >= srb0_pending {
        Lcid::SRB0
    } else {
        Lcid::SRB1
    };
    total_subpdu_bytes += allocate_mac_sdus(tb_info, lch_mng, tb_size_bytes - total_subpdu_bytes, Some(lcid));
    total_subpdu_bytes
}

/// TB content for a slice: pending CEs, then the slice channels by priority
pub fn build_dl_transport_block_info(
    tb_info: &mut DlMsgTbInfo,
    lch_mng: &UeLogicalChannelRepository,
    tb_size_bytes: u32,
    slice_id: RanSliceId,
) -> u32 {
    let mut total_subpdu_bytes = allocate_mac_ces(tb_info, lch_mng, tb_size_bytes);
    for lcid in lch_mng.get_prioritized_logical_channels() {
        if lch_mng.get_slice_id(lcid) != Some(slice_id) {
            continue;
        }
        total_subpdu_bytes += allocate_mac_sdus(tb_info, lch_mng, tb_size_bytes - total_subpdu_bytes, Some(lcid));
        if tb_info.is_full() {
            break;
        }
    }
    total_subpdu_bytes
}
