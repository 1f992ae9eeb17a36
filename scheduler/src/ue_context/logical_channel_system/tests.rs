use super::*;
use common::types::{BsrFormat, DuCellIndex, Rnti, TagId, DEFAULT_DRB_RAN_SLICE_ID};
use interfaces::dl_pdu::{DlMsgTbInfo, MacCePayload, TaCmdCePayload};
use interfaces::message_types::BsrLcgReport;
use interfaces::sched_config::{GbrQosInfo, LcQosConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn drb(lcid: u8, lcg: u8, qos: Option<(u16, u16)>) -> LogicalChannelConfig {
    LogicalChannelConfig {
        lcid: Lcid(lcid),
        priority: 1,
        lc_group: LcgId(lcg),
        qos: qos.map(|(priority_level, arp_priority)| LcQosConfig {
            priority_level,
            arp_priority,
            average_window_ms: 2000,
            gbr_qos_info: None,
        }),
    }
}

fn gbr_drb(lcid: u8, lcg: u8, average_window_ms: u32) -> LogicalChannelConfig {
    LogicalChannelConfig {
        lcid: Lcid(lcid),
        priority: 1,
        lc_group: LcgId(lcg),
        qos: Some(LcQosConfig {
            priority_level: 2,
            arp_priority: 1,
            average_window_ms,
            gbr_qos_info: Some(GbrQosInfo {
                gbr_dl: 1_000_000,
                gbr_ul: 1_000_000,
                mbr_dl: 2_000_000,
                mbr_ul: 2_000_000,
            }),
        }),
    }
}

fn srb_cfgs() -> Vec<LogicalChannelConfig> {
    vec![
        LogicalChannelConfig::srb(Lcid::SRB0),
        LogicalChannelConfig::srb(Lcid::SRB1),
    ]
}

fn cfg_list(cfgs: Vec<LogicalChannelConfig>) -> LogicalChannelConfigList {
    LogicalChannelConfigList::new(cfgs)
}

fn bsr(fmt: BsrFormat, lcg: u8, nof_bytes: u32) -> UlBsrIndication {
    UlBsrIndication {
        cell_index: DuCellIndex(0),
        ue_index: DuUeIndex(0),
        crnti: Rnti(0x4601),
        bsr_fmt: fmt,
        reported_lcgs: vec![BsrLcgReport {
            lcg_id: LcgId(lcg),
            nof_bytes,
        }],
    }
}

fn ta_cmd_ce(ta_cmd: u8) -> MacCeInfo {
    MacCeInfo {
        ce_lcid: LcidDlSch::TA_CMD,
        ce_payload: MacCePayload::TaCmd(TaCmdCePayload {
            tag_id: TagId(0),
            ta_cmd,
        }),
    }
}

fn con_res_ce() -> MacCeInfo {
    MacCeInfo {
        ce_lcid: LcidDlSch::UE_CON_RES_ID,
        ce_payload: MacCePayload::default(),
    }
}

fn contains_ue(bitset: &UeBitset, ue: &UeLogicalChannelRepository) -> bool {
    bitset.contains(ue.ue_index().as_usize())
}

#[test]
fn test_srb1_partial_allocation_keeps_rlc_overhead() {
    let lc_sys = LogicalChannelSystem::new();
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(srb_cfgs()));
    ue.handle_dl_buffer_status_indication(Lcid::SRB1, 100, None);
    assert_eq!(ue.pending_bytes(Lcid::SRB1), 102);

    let mut subpdu = DlMsgLcInfo::default();
    let alloc = ue.allocate_mac_sdu(&mut subpdu, 50, Some(Lcid::SRB1));
    assert_eq!(alloc, 50);
    assert_eq!(subpdu.lcid, LcidDlSch::from(Lcid::SRB1));
    assert_eq!(subpdu.sched_bytes, 48);
    // 100 - 48 bytes left, plus the header of the remaining RLC segment
    assert_eq!(ue.pending_bytes(Lcid::SRB1), 55 + 2);
}

#[test]
fn test_allocation_with_insufficient_budget_is_noop() {
    let lc_sys = LogicalChannelSystem::new();
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(srb_cfgs()));
    ue.handle_dl_buffer_status_indication(Lcid::SRB1, 100, None);

    let mut subpdu = DlMsgLcInfo::default();
    assert_eq!(ue.allocate_mac_sdu(&mut subpdu, 5, Some(Lcid::SRB1)), 0);
    assert_eq!(subpdu.sched_bytes, 0);
    assert_eq!(ue.pending_bytes(Lcid::SRB1), 102);
    // Unconfigured channel
    assert_eq!(ue.allocate_mac_sdu(&mut subpdu, 500, Some(Lcid(7))), 0);
}

#[test]
fn test_leftover_absorption_and_258_byte_rule() {
    let lc_sys = LogicalChannelSystem::new();
    let mut cfgs = srb_cfgs();
    cfgs.push(drb(4, 1, None));
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(cfgs));

    ue.handle_dl_buffer_status_indication(Lcid::SRB1, 20, None);
    let mut subpdu = DlMsgLcInfo::default();
    // 22 bytes needed, 3 left over get folded in
    assert_eq!(ue.allocate_mac_sdu(&mut subpdu, 25, Some(Lcid::SRB1)), 25);
    assert_eq!(subpdu.sched_bytes, 23);
    assert!(!ue.has_pending_bytes(Lcid::SRB1));

    ue.handle_dl_buffer_status_indication(Lcid(4), 1000, None);
    assert_eq!(ue.allocate_mac_sdu(&mut subpdu, 258, Some(Lcid(4))), 257);
    assert_eq!(subpdu.sched_bytes, 255);
    assert_eq!(ue.pending_bytes(Lcid(4)), get_mac_sdu_required_bytes(1000 - 255 + 3));
}

#[test]
fn test_channels_are_served_by_priority() {
    let lc_sys = LogicalChannelSystem::new();
    let cfgs = vec![
        drb(4, 1, Some((9, 8))),
        drb(6, 2, None),
        LogicalChannelConfig::srb(Lcid::SRB1),
        drb(7, 2, None),
        drb(5, 1, Some((5, 1))),
    ];
    let ue = lc_sys.create_ue(DuUeIndex(3), SubcarrierSpacing::Scs15, false, &cfg_list(cfgs));
    assert_eq!(
        ue.get_prioritized_logical_channels().as_slice(),
        &[Lcid::SRB1, Lcid(5), Lcid(4), Lcid(6), Lcid(7)]
    );

    ue.handle_dl_buffer_status_indication(Lcid(7), 10, None);
    ue.handle_dl_buffer_status_indication(Lcid(4), 10, None);
    ue.handle_dl_buffer_status_indication(Lcid::SRB1, 10, None);

    let mut served = Vec::new();
    loop {
        let mut subpdu = DlMsgLcInfo::default();
        if ue.allocate_mac_sdu(&mut subpdu, 1000, None) == 0 {
            break;
        }
        assert_eq!(subpdu.sched_bytes, 10);
        served.push(subpdu.lcid);
    }
    assert_eq!(served, vec![LcidDlSch(1), LcidDlSch(4), LcidDlSch(7)]);
    assert!(!ue.has_dl_pending_bytes());
}

#[test]
fn test_slice_counters_follow_buffer_and_slice_changes() {
    let lc_sys = LogicalChannelSystem::new();
    let cfgs = vec![
        LogicalChannelConfig::srb(Lcid::SRB1),
        drb(4, 1, None),
        drb(5, 1, None),
    ];
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(cfgs));
    ue.set_lcid_ran_slice(Lcid::SRB1, SRB_RAN_SLICE_ID);
    ue.set_lcid_ran_slice(Lcid(4), RanSliceId(2));
    ue.set_lcid_ran_slice(Lcid(5), RanSliceId(2));

    ue.handle_dl_buffer_status_indication(Lcid(4), 100, None);
    ue.handle_dl_buffer_status_indication(Lcid(5), 300, None);
    assert_eq!(ue.dl_slice_pending_bytes(RanSliceId(2)), 102 + 303);
    assert!(ue.has_pending_dl_bytes(RanSliceId(2)));
    assert!(contains_ue(&lc_sys.get_ues_with_dl_pending_data(RanSliceId(2)), &ue));
    assert!(!contains_ue(&lc_sys.get_ues_with_dl_pending_data(SRB_RAN_SLICE_ID), &ue));

    ue.reset_lcid_ran_slice(Lcid(5));
    assert_eq!(ue.get_slice_id(Lcid(5)), None);
    assert_eq!(ue.dl_slice_pending_bytes(RanSliceId(2)), 102);

    // Moving the last channel out of a slice detaches the UE from it
    ue.set_lcid_ran_slice(Lcid(4), RanSliceId(3));
    assert!(!ue.has_slice(RanSliceId(2)));
    assert!(!contains_ue(&lc_sys.get_ues_with_dl_pending_data(RanSliceId(2)), &ue));
    assert!(contains_ue(&lc_sys.get_ues_with_dl_pending_data(RanSliceId(3)), &ue));
    assert_eq!(ue.dl_slice_pending_bytes(RanSliceId(3)), 102);

    ue.handle_dl_buffer_status_indication(Lcid(4), 0, None);
    assert!(!contains_ue(&lc_sys.get_ues_with_dl_pending_data(RanSliceId(3)), &ue));
    assert!(ue.has_slice(RanSliceId(3)));

    ue.set_lcg_ran_slice(LcgId(1), RanSliceId(2));
    ue.handle_bsr_indication(&bsr(BsrFormat::ShortBsr, 1, 1000));
    assert_eq!(ue.ul_slice_pending_bytes(RanSliceId(2)), get_mac_sdu_required_bytes(1003));
    assert!(ue.has_pending_ul_bytes(RanSliceId(2)));
    assert!(contains_ue(&lc_sys.get_ues_with_ul_pending_data(RanSliceId(2)), &ue));
    assert_eq!(ue.get_lcg_slice_id(LcgId(1)), Some(RanSliceId(2)));
}

#[test]
fn test_slice_counters_match_channel_sums_under_random_updates() {
    let lc_sys = LogicalChannelSystem::new();
    let mut cfgs = srb_cfgs();
    cfgs.extend([drb(4, 1, None), drb(5, 1, None), drb(6, 2, Some((3, 2)))]);
    let ue = lc_sys.create_ue(DuUeIndex(5), SubcarrierSpacing::Scs30, false, &cfg_list(cfgs));
    let drbs = [Lcid(4), Lcid(5), Lcid(6)];
    let slices = [RanSliceId(1), RanSliceId(2)];
    for lcid in drbs {
        ue.set_lcid_ran_slice(lcid, slices[0]);
    }

    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..2000 {
        let lcid = drbs[rng.gen_range(0..drbs.len())];
        match rng.gen_range(0..4) {
            0 => ue.handle_dl_buffer_status_indication(lcid, rng.gen_range(0..5000), None),
            1 => {
                let mut subpdu = DlMsgLcInfo::default();
                ue.allocate_mac_sdu(&mut subpdu, rng.gen_range(0..600), Some(lcid));
            }
            2 => ue.set_lcid_ran_slice(lcid, slices[rng.gen_range(0..slices.len())]),
            _ => ue.reset_lcid_ran_slice(lcid),
        }

        for slice in slices {
            let expected: u32 = drbs
                .iter()
                .filter(|l| ue.get_slice_id(**l) == Some(slice))
                .map(|l| ue.pending_bytes(*l))
                .sum();
            assert_eq!(ue.dl_slice_pending_bytes(slice), expected);
            assert_eq!(
                contains_ue(&lc_sys.get_ues_with_dl_pending_data(slice), &ue),
                expected > 0
            );
        }
    }
}

#[test]
fn test_fallback_hides_drbs_from_slices() {
    let lc_sys = LogicalChannelSystem::new();
    let mut cfgs = srb_cfgs();
    cfgs.push(drb(4, 1, None));
    let ue = lc_sys.create_ue(DuUeIndex(1), SubcarrierSpacing::Scs30, true, &cfg_list(cfgs));
    ue.set_lcid_ran_slice(Lcid(4), DEFAULT_DRB_RAN_SLICE_ID);

    ue.handle_dl_buffer_status_indication(Lcid(4), 500, None);
    assert!(ue.is_in_fallback_state());
    assert_eq!(ue.dl_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID), 0);
    assert!(!contains_ue(&lc_sys.get_ues_with_dl_pending_data(DEFAULT_DRB_RAN_SLICE_ID), &ue));
    assert!(!ue.has_dl_pending_bytes());

    ue.handle_dl_buffer_status_indication(Lcid::SRB1, 20, None);
    assert!(ue.has_dl_pending_bytes());
    assert_eq!(ue.dl_pending_bytes(), 22);
    assert_eq!(ue.total_dl_pending_bytes(), 22 + 503);

    ue.set_fallback_state(false);
    assert_eq!(ue.dl_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID), 503);
    assert!(contains_ue(&lc_sys.get_ues_with_dl_pending_data(DEFAULT_DRB_RAN_SLICE_ID), &ue));
    assert_eq!(ue.dl_pending_bytes(), 22 + 503);

    ue.set_fallback_state(true);
    assert_eq!(ue.dl_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID), 0);
    assert!(!contains_ue(&lc_sys.get_ues_with_dl_pending_data(DEFAULT_DRB_RAN_SLICE_ID), &ue));
}

#[test]
fn test_saturated_short_bsr_does_not_override_large_status() {
    let lc_sys = LogicalChannelSystem::new();
    let cfgs = vec![LogicalChannelConfig::srb(Lcid::SRB1), drb(4, 1, None)];
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(cfgs));

    ue.handle_bsr_indication(&bsr(BsrFormat::LongBsr, 1, 200_000));
    assert_eq!(ue.pending_lcg_bytes(LcgId(1)), get_mac_sdu_required_bytes(200_003));

    // Short BSR at its maximum cannot tell 300000 from 200000
    ue.handle_bsr_indication(&bsr(BsrFormat::ShortTruncBsr, 1, 300_000));
    assert_eq!(ue.pending_lcg_bytes(LcgId(1)), get_mac_sdu_required_bytes(200_003));

    ue.handle_bsr_indication(&bsr(BsrFormat::ShortBsr, 1, 1000));
    assert_eq!(ue.pending_lcg_bytes(LcgId(1)), get_mac_sdu_required_bytes(1003));

    ue.handle_bsr_indication(&bsr(BsrFormat::LongBsr, 1, u32::MAX));
    assert_eq!(ue.pending_lcg_bytes(LcgId(1)), get_mac_sdu_required_bytes((1 << 24) + 3));

    // LCG 0 carries no RLC header estimate. Unconfigured LCGs are ignored.
    ue.handle_bsr_indication(&bsr(BsrFormat::ShortBsr, 0, 10));
    assert_eq!(ue.pending_lcg_bytes(LcgId(0)), 12);
    ue.handle_bsr_indication(&bsr(BsrFormat::ShortBsr, 5, 10));
    assert!(!ue.is_lcg_configured(LcgId(5)));
    assert!(ue.has_ul_pending_bytes());
}

#[test]
fn test_ta_cmd_ces_collapse_and_con_res_goes_first() {
    let lc_sys = LogicalChannelSystem::new();
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(srb_cfgs()));
    let view = ue.view();

    view.handle_mac_ce_indication(ta_cmd_ce(33));
    view.handle_mac_ce_indication(ta_cmd_ce(35));
    assert_eq!(ue.pending_ce_bytes(), 2);
    ue.handle_mac_ce_indication(con_res_ce());
    assert!(ue.is_con_res_id_pending());
    assert_eq!(ue.pending_con_res_ce_bytes(), 7);
    assert_eq!(ue.pending_ce_bytes(), 9);

    let mut subpdu = DlMsgLcInfo::default();
    assert_eq!(ue.allocate_mac_ce(&mut subpdu, 100), 7);
    assert_eq!(subpdu.lcid, LcidDlSch::UE_CON_RES_ID);
    assert_eq!(subpdu.sched_bytes, 6);

    assert_eq!(ue.allocate_mac_ce(&mut subpdu, 1), 0);
    assert_eq!(ue.allocate_mac_ce(&mut subpdu, 100), 2);
    assert_eq!(subpdu.lcid, LcidDlSch::TA_CMD);
    assert_eq!(
        subpdu.ce_payload,
        Some(MacCePayload::TaCmd(TaCmdCePayload {
            tag_id: TagId(0),
            ta_cmd: 35
        }))
    );
    assert!(!ue.has_pending_ces());
    assert_eq!(ue.pending_ce_bytes(), 0);
}

#[test]
fn test_reconfiguration_keeps_or_drops_bearers() {
    let lc_sys = LogicalChannelSystem::new();
    let mut cfgs = srb_cfgs();
    cfgs.push(drb(4, 1, Some((9, 1))));
    let cfgs = cfg_list(cfgs);
    let ue = lc_sys.create_ue(DuUeIndex(2), SubcarrierSpacing::Scs30, false, &cfgs);
    ue.set_lcid_ran_slice(Lcid(4), DEFAULT_DRB_RAN_SLICE_ID);
    ue.handle_dl_buffer_status_indication(Lcid(4), 100, None);
    assert_eq!(lc_sys.nof_logical_channels(), 3);

    ue.configure(&cfgs);
    assert_eq!(ue.cfg(), cfgs);
    assert_eq!(lc_sys.nof_logical_channels(), 3);
    assert_eq!(ue.pending_bytes(Lcid(4)), 102);
    assert_eq!(ue.get_slice_id(Lcid(4)), Some(DEFAULT_DRB_RAN_SLICE_ID));
    assert_eq!(ue.dl_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID), 102);

    ue.configure(&cfg_list(srb_cfgs()));
    assert!(!ue.is_configured(Lcid(4)));
    assert!(!ue.is_lcg_configured(LcgId(1)));
    assert!(!ue.has_slice(DEFAULT_DRB_RAN_SLICE_ID));
    assert!(!contains_ue(&lc_sys.get_ues_with_dl_pending_data(DEFAULT_DRB_RAN_SLICE_ID), &ue));
    assert_eq!(lc_sys.nof_logical_channels(), 2);

    // Re-added bearer starts empty
    ue.configure(&cfgs);
    assert_eq!(ue.pending_bytes(Lcid(4)), 0);
    assert_eq!(ue.get_slice_id(Lcid(4)), None);
}

type RowHandles = (Vec<(Lcid, RowId)>, Vec<(LcgId, RowId)>);

fn row_handles(lc_sys: &LogicalChannelSystem, ue_index: DuUeIndex) -> RowHandles {
    let inner = lc_sys.inner.borrow();
    let (_, u) = inner
        .ues
        .iter()
        .find(|(_, u)| u.ue_index == ue_index)
        .expect("UE not found");
    (
        u.channels.iter().map(|(lcid, rid)| (lcid, *rid)).collect(),
        u.lcgs.iter().map(|(lcg, rid)| (lcg, *rid)).collect(),
    )
}

#[test]
fn test_reconfiguration_with_same_list_keeps_rows() {
    let lc_sys = LogicalChannelSystem::new();
    let mut cfgs = srb_cfgs();
    cfgs.push(drb(4, 1, Some((9, 1))));
    cfgs.push(drb(5, 2, None));
    let cfgs = cfg_list(cfgs);
    let ue = lc_sys.create_ue(DuUeIndex(1), SubcarrierSpacing::Scs30, false, &cfgs);
    ue.set_lcid_ran_slice(Lcid(4), DEFAULT_DRB_RAN_SLICE_ID);
    ue.set_lcg_ran_slice(LcgId(1), DEFAULT_DRB_RAN_SLICE_ID);
    ue.handle_dl_buffer_status_indication(Lcid(4), 100, None);
    ue.handle_bsr_indication(&bsr(BsrFormat::LongBsr, 1, 500));
    let view = ue.view();
    let handles = row_handles(&lc_sys, DuUeIndex(1));
    let prio = ue.get_prioritized_logical_channels();
    let ul_bytes = ue.ul_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID);
    assert!(ul_bytes > 0);

    for _ in 0..2 {
        ue.configure(&cfgs);
        assert_eq!(row_handles(&lc_sys, DuUeIndex(1)), handles);
        assert_eq!(ue.get_prioritized_logical_channels(), prio);
        assert_eq!(ue.pending_bytes(Lcid(4)), 102);
        assert_eq!(ue.get_slice_id(Lcid(4)), Some(DEFAULT_DRB_RAN_SLICE_ID));
        assert_eq!(ue.get_lcg_slice_id(LcgId(1)), Some(DEFAULT_DRB_RAN_SLICE_ID));
        assert_eq!(ue.dl_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID), 102);
        assert_eq!(ue.ul_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID), ul_bytes);
    }

    // A view taken before the reconfiguration still reaches the same UE
    view.handle_mac_ce_indication(ta_cmd_ce(33));
    assert!(ue.has_pending_ces());
    assert_eq!(ue.pending_ce_bytes(), 2);
}

#[test]
fn test_ce_only_ue_is_pending_in_srb_slice() {
    let lc_sys = LogicalChannelSystem::new();
    let mut cfgs = srb_cfgs();
    cfgs.push(drb(4, 1, None));
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(cfgs));
    ue.set_lcid_ran_slice(Lcid::SRB1, SRB_RAN_SLICE_ID);
    ue.set_lcid_ran_slice(Lcid(4), DEFAULT_DRB_RAN_SLICE_ID);
    assert!(!ue.has_pending_dl_bytes(SRB_RAN_SLICE_ID));

    ue.handle_mac_ce_indication(ta_cmd_ce(30));
    assert!(ue.has_dl_pending_bytes());
    assert!(ue.has_pending_dl_bytes(SRB_RAN_SLICE_ID));
    assert!(!ue.has_pending_dl_bytes(DEFAULT_DRB_RAN_SLICE_ID));
    assert_eq!(ue.dl_slice_pending_bytes(SRB_RAN_SLICE_ID), 2);
    assert_eq!(ue.dl_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID), 0);
    assert!(contains_ue(&lc_sys.get_ues_with_dl_pending_data(SRB_RAN_SLICE_ID), &ue));
    assert!(!contains_ue(&lc_sys.get_ues_with_dl_pending_data(DEFAULT_DRB_RAN_SLICE_ID), &ue));

    // Once a slice has data the CE travels with it instead
    ue.handle_dl_buffer_status_indication(Lcid(4), 100, None);
    assert!(!ue.has_pending_dl_bytes(SRB_RAN_SLICE_ID));
    assert_eq!(ue.dl_slice_pending_bytes(SRB_RAN_SLICE_ID), 0);
    assert_eq!(ue.dl_slice_pending_bytes(DEFAULT_DRB_RAN_SLICE_ID), 102 + 2);
}

#[test]
fn test_transport_block_builders() {
    let lc_sys = LogicalChannelSystem::new();
    let mut cfgs = srb_cfgs();
    cfgs.push(drb(4, 1, None));
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(cfgs));
    ue.set_lcid_ran_slice(Lcid::SRB1, SRB_RAN_SLICE_ID);
    ue.set_lcid_ran_slice(Lcid(4), DEFAULT_DRB_RAN_SLICE_ID);
    ue.handle_mac_ce_indication(ta_cmd_ce(30));
    ue.handle_dl_buffer_status_indication(Lcid::SRB1, 10, None);
    ue.handle_dl_buffer_status_indication(Lcid(4), 1000, None);

    let mut tb = DlMsgTbInfo::default();
    assert_eq!(build_dl_transport_block_info(&mut tb, &ue, 100, SRB_RAN_SLICE_ID), 2 + 12);
    assert_eq!(tb.lc_chs_to_sched.len(), 2);
    assert_eq!(tb.lc_chs_to_sched[0].lcid, LcidDlSch::TA_CMD);
    assert_eq!(tb.sdu_bytes(LcidDlSch(1)), 10);
    assert_eq!(ue.pending_bytes(Lcid(4)), 1003);

    let mut tb = DlMsgTbInfo::default();
    assert_eq!(build_dl_transport_block_info(&mut tb, &ue, 200, DEFAULT_DRB_RAN_SLICE_ID), 200);
    assert_eq!(tb.sdu_bytes(LcidDlSch(4)), 198);
    assert_eq!(ue.pending_bytes(Lcid(4)), get_mac_sdu_required_bytes(1000 - 198 + 3));

    // Four subPDUs at most
    let mut tb = DlMsgTbInfo::default();
    let mut total = 0;
    for _ in 0..6 {
        ue.handle_dl_buffer_status_indication(Lcid(4), 10, None);
        total += allocate_mac_sdus(&mut tb, &ue, 100, Some(Lcid(4)));
    }
    assert!(tb.is_full());
    assert_eq!(total, 4 * 12);
}

#[test]
fn test_fallback_transport_block_only_takes_srb0_when_it_fits() {
    let lc_sys = LogicalChannelSystem::new();
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, true, &cfg_list(srb_cfgs()));
    ue.handle_mac_ce_indication(con_res_ce());
    ue.handle_dl_buffer_status_indication(Lcid::SRB0, 50, None);
    ue.handle_dl_buffer_status_indication(Lcid::SRB1, 30, None);
    assert_eq!(ue.dl_pending_bytes(), 7 + 52 + 32);

    // ConRes (7) + SRB0 (52) fit, the spare byte gets absorbed
    let mut tb = DlMsgTbInfo::default();
    assert_eq!(build_dl_fallback_transport_block_info(&mut tb, &ue, 60), 60);
    assert_eq!(tb.lc_chs_to_sched[0].lcid, LcidDlSch::UE_CON_RES_ID);
    assert_eq!(tb.lc_chs_to_sched[1].lcid, LcidDlSch::CCCH);
    assert!(!ue.has_pending_bytes(Lcid::SRB0));

    ue.handle_mac_ce_indication(con_res_ce());
    ue.handle_dl_buffer_status_indication(Lcid::SRB0, 50, None);
    let mut tb = DlMsgTbInfo::default();
    assert_eq!(build_dl_fallback_transport_block_info(&mut tb, &ue, 40), 40);
    assert_eq!(tb.lc_chs_to_sched[1].lcid, LcidDlSch(1));
    assert_eq!(ue.pending_bytes(Lcid::SRB0), 52);
    assert!(!ue.has_pending_bytes(Lcid::SRB1));
}

#[test]
fn test_gbr_bit_rate_tracking() {
    let lc_sys = LogicalChannelSystem::new();
    let cfgs = vec![
        LogicalChannelConfig::srb(Lcid::SRB1),
        gbr_drb(4, 1, 10),
        drb(5, 2, Some((9, 1))),
    ];
    let ue = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs15, false, &cfg_list(cfgs));

    for _ in 0..20 {
        ue.handle_dl_buffer_status_indication(Lcid(4), 10_000, None);
        let mut subpdu = DlMsgLcInfo::default();
        assert_eq!(ue.allocate_mac_sdu(&mut subpdu, 102, Some(Lcid(4))), 102);
        lc_sys.slot_indication();
    }
    assert!((ue.average_dl_bit_rate(Lcid(4)) - 800_000.0).abs() < 1.0);
    assert_eq!(ue.average_dl_bit_rate(Lcid(5)), 0.0);

    ue.set_lcid_ran_slice(Lcid::SRB1, SRB_RAN_SLICE_ID);
    ue.handle_sr_indication();
    assert!(ue.has_pending_sr());
    assert!(contains_ue(&lc_sys.get_ues_with_ul_pending_data(SRB_RAN_SLICE_ID), &ue));

    ue.handle_bsr_indication(&bsr(BsrFormat::LongBsr, 1, 1000));
    ue.handle_ul_grant(300);
    assert!(!ue.has_pending_sr());
    lc_sys.slot_indication();
    assert!((ue.average_ul_bit_rate(LcgId(1)) - 2_400_000.0).abs() < 1.0);

    // Only the 700 bytes not yet granted since the BSR count
    ue.handle_ul_grant(5000);
    lc_sys.slot_indication();
    assert!((ue.average_ul_bit_rate(LcgId(1)) - 4_000_000.0).abs() < 1.0);
}

#[test]
fn test_ue_removal_frees_index() {
    let lc_sys = LogicalChannelSystem::new();
    let ue0 = lc_sys.create_ue(DuUeIndex(0), SubcarrierSpacing::Scs30, false, &cfg_list(srb_cfgs()));
    let mut ue7 = lc_sys.create_ue(DuUeIndex(7), SubcarrierSpacing::Scs30, false, &cfg_list(srb_cfgs()));
    ue7.set_lcid_ran_slice(Lcid::SRB1, SRB_RAN_SLICE_ID);
    ue7.handle_dl_buffer_status_indication(Lcid::SRB1, 10, None);
    let view = ue7.view();
    assert_eq!(lc_sys.nof_ues(), 2);
    assert_eq!(lc_sys.get_ues_with_dl_pending_data(SRB_RAN_SLICE_ID).size(), 8);

    ue7.reset();
    assert!(!ue7.valid());
    assert_eq!(lc_sys.nof_ues(), 1);
    assert_eq!(lc_sys.nof_logical_channels(), 2);
    assert!(lc_sys.get_ues_with_dl_pending_data(SRB_RAN_SLICE_ID).none());
    assert_eq!(lc_sys.get_ues_with_dl_pending_data(SRB_RAN_SLICE_ID).size(), 1);
    // Stale views are ignored
    view.handle_mac_ce_indication(ta_cmd_ce(31));
    assert!(!view.has_pending_sr());

    drop(ue0);
    assert_eq!(lc_sys.nof_ues(), 0);
    let ue7 = lc_sys.create_ue(DuUeIndex(7), SubcarrierSpacing::Scs30, false, &cfg_list(srb_cfgs()));
    assert!(!ue7.has_dl_pending_bytes());
}

#[test]
#[should_panic]
fn test_duplicate_ue_index_panics() {
    let lc_sys = LogicalChannelSystem::new();
    let _ue = lc_sys.create_ue(DuUeIndex(4), SubcarrierSpacing::Scs30, false, &cfg_list(srb_cfgs()));
    let _dup = lc_sys.create_ue(DuUeIndex(4), SubcarrierSpacing::Scs30, false, &cfg_list(srb_cfgs()));
}
