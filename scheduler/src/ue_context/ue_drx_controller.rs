//! UE DRX Controller
//!
//! Decides in which slots the UE monitors the PDCCH under a long-cycle DRX
//! configuration (TS 38.321 5.7). Outside the on-duration the UE is still
//! reachable while the contention resolution timer or the inactivity timer runs,
//! or while it has an SR pending.

use crate::ue_context::logical_channel_system::UeLogicalChannelView;
use common::slot_point::SlotPoint;
use common::types::SubcarrierSpacing;
use interfaces::sched_config::DrxConfig;
use tracing::debug;

#[derive(Debug)]
pub struct UeDrxController {
    ul_scs: SubcarrierSpacing,
    con_res_timer_slots: u32,
    drx_cfg: Option<DrxConfig>,
    lc_view: UeLogicalChannelView,
    /// End of the running ra-ContentionResolutionTimer
    con_res_end: Option<SlotPoint>,
    /// End of the running drx-InactivityTimer
    inactivity_end: Option<SlotPoint>,
    last_sl: Option<SlotPoint>,
}

impl UeDrxController {
    pub fn new(
        ul_scs: SubcarrierSpacing,
        ra_con_res_timer_ms: u32,
        drx_cfg: Option<DrxConfig>,
        lc_view: UeLogicalChannelView,
        ul_ccch_slot_rx: Option<SlotPoint>,
    ) -> Self {
        let con_res_timer_slots = ra_con_res_timer_ms * ul_scs.slots_per_subframe();
        Self {
            ul_scs,
            con_res_timer_slots,
            drx_cfg,
            lc_view,
            con_res_end: ul_ccch_slot_rx.map(|s| s + con_res_timer_slots),
            inactivity_end: None,
            last_sl: None,
        }
    }

    pub fn reconfigure(&mut self, drx_cfg: Option<DrxConfig>) {
        self.drx_cfg = drx_cfg;
        if self.drx_cfg.is_none() {
            self.inactivity_end = None;
        }
    }

    pub fn drx_cfg(&self) -> Option<&DrxConfig> {
        self.drx_cfg.as_ref()
    }

    /// Expire the timers that ended before this slot
    pub fn slot_indication(&mut self, dl_slot: SlotPoint) {
        self.last_sl = Some(dl_slot);
        if self.con_res_end.is_some_and(|end| end <= dl_slot) {
            self.con_res_end = None;
        }
        if self.inactivity_end.is_some_and(|end| end <= dl_slot) {
            self.inactivity_end = None;
        }
    }

    /// Whether a PDCCH can be sent to the UE in `dl_slot`
    pub fn is_pdcch_enabled(&self, dl_slot: SlotPoint) -> bool {
        let Some(drx) = &self.drx_cfg else {
            return true;
        };
        if self.con_res_end.is_some_and(|end| dl_slot < end) {
            return true;
        }
        if self.inactivity_end.is_some_and(|end| dl_slot < end) {
            return true;
        }
        if self.lc_view.has_pending_sr() {
            return true;
        }
        self.is_on_duration(drx, dl_slot)
    }

    fn is_on_duration(&self, drx: &DrxConfig, dl_slot: SlotPoint) -> bool {
        let ms = dl_slot.to_uint() / self.ul_scs.slots_per_subframe();
        let cycle = drx.long_cycle_ms;
        (ms + cycle - drx.long_start_offset_ms % cycle) % cycle < drx.on_duration_timer_ms
    }

    fn restart_inactivity_timer(&mut self, pdcch_slot: SlotPoint) {
        if let Some(drx) = &self.drx_cfg {
            let end = pdcch_slot + drx.inactivity_timer_ms * self.ul_scs.slots_per_subframe();
            self.inactivity_end = Some(end);
        }
    }

    /// A PDCCH for a DL newTx was allocated
    pub fn on_new_dl_pdcch_alloc(&mut self, pdcch_slot: SlotPoint) {
        self.restart_inactivity_timer(pdcch_slot);
    }

    /// A PDCCH for a UL newTx was allocated
    pub fn on_new_ul_pdcch_alloc(&mut self, pdcch_slot: SlotPoint) {
        self.restart_inactivity_timer(pdcch_slot);
    }

    /// Msg4 was sent, restart the contention resolution timer
    pub fn on_con_res_start(&mut self) {
        if let Some(sl) = self.last_sl {
            debug!("ue={}: ra-ContentionResolutionTimer started at slot={}", self.lc_view.ue_index(), sl);
            self.con_res_end = Some(sl + self.con_res_timer_slots);
        }
    }
}
