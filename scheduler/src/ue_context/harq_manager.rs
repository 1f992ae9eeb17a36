//! Cell HARQ Manager
//!
//! Per cell, holds the DL and UL HARQ processes of every UE. UEs reach their own
//! processes through a [`UeHarqEntity`] handle, which releases them when dropped.

use crate::support::slot_table::SlottedIdTable;
use common::slot_point::SlotPoint;
use common::types::{DuUeIndex, HarqId, Lcid, Rnti, MAX_NOF_DU_UES, MAX_NOF_HARQS};
use interfaces::dl_pdu::DlMsgTbInfo;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

/// State of a single HARQ process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HarqState {
    /// Free for a new transmission
    #[default]
    Empty,
    /// Transmitted, awaiting ACK/NACK or CRC
    WaitingAck,
    /// NACKed, awaiting a retransmission grant
    PendingRetx,
}

/// Result of applying HARQ feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqFeedbackOutcome {
    Acked { tbs_bytes: u32 },
    Nacked,
    /// NACK with no retransmissions left. The process was released.
    MaxRetxsReached,
}

#[derive(Debug, Clone, Default)]
pub struct DlHarqProcess {
    pub state: HarqState,
    pub pdsch_slot: Option<SlotPoint>,
    pub ack_slot: Option<SlotPoint>,
    pub nof_retxs: u32,
    pub tbs_bytes: u32,
    /// MAC PDU content of the initial transmission
    pub tb_info: DlMsgTbInfo,
    /// Slot after which the process is released if nothing happened to it
    timeout_slot: Option<SlotPoint>,
}

impl DlHarqProcess {
    pub fn is_waiting_ack(&self) -> bool {
        self.state == HarqState::WaitingAck
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UlHarqProcess {
    pub state: HarqState,
    pub pusch_slot: Option<SlotPoint>,
    pub nof_retxs: u32,
    pub tbs_bytes: u32,
    timeout_slot: Option<SlotPoint>,
}

#[derive(Debug)]
struct UeHarqs {
    rnti: Rnti,
    dl: Vec<DlHarqProcess>,
    ul: Vec<UlHarqProcess>,
    last_pdsch_slot: Option<SlotPoint>,
}

impl UeHarqs {
    fn new(rnti: Rnti, nof_harqs: usize) -> Self {
        Self {
            rnti,
            dl: vec![DlHarqProcess::default(); nof_harqs],
            ul: vec![UlHarqProcess::default(); nof_harqs],
            last_pdsch_slot: None,
        }
    }

    fn reset(&mut self) {
        self.dl.iter_mut().for_each(|h| *h = DlHarqProcess::default());
        self.ul.iter_mut().for_each(|h| *h = UlHarqProcess::default());
    }
}

#[derive(Debug)]
struct CellHarqInner {
    nof_harqs: usize,
    max_nof_retxs: u32,
    dl_timeout_slots: u32,
    ul_timeout_slots: u32,
    ues: SlottedIdTable<UeHarqs>,
    stopped: bool,
    /// Counters of processes released by timeout
    nof_dl_timeouts: u64,
    nof_ul_timeouts: u64,
}

impl CellHarqInner {
    fn ue(&self, ue_index: DuUeIndex) -> &UeHarqs {
        &self.ues[ue_index.as_usize()]
    }

    fn ue_mut(&mut self, ue_index: DuUeIndex) -> &mut UeHarqs {
        &mut self.ues[ue_index.as_usize()]
    }

    fn slot_indication(&mut self, sl_tx: SlotPoint) {
        let (mut dl_timeouts, mut ul_timeouts) = (0, 0);
        for (ue_idx, u) in self.ues.iter_mut() {
            for (id, h) in u.dl.iter_mut().enumerate() {
                if h.state != HarqState::Empty && h.timeout_slot.is_some_and(|t| t <= sl_tx) {
                    debug!(
                        "ue={} rnti={} h_id={}: DL HARQ timed out in state {:?}",
                        ue_idx, u.rnti, id, h.state
                    );
                    *h = DlHarqProcess::default();
                    dl_timeouts += 1;
                }
            }
            for (id, h) in u.ul.iter_mut().enumerate() {
                if h.state != HarqState::Empty && h.timeout_slot.is_some_and(|t| t <= sl_tx) {
                    debug!(
                        "ue={} rnti={} h_id={}: UL HARQ timed out in state {:?}",
                        ue_idx, u.rnti, id, h.state
                    );
                    *h = UlHarqProcess::default();
                    ul_timeouts += 1;
                }
            }
        }
        self.nof_dl_timeouts += dl_timeouts;
        self.nof_ul_timeouts += ul_timeouts;
    }
}

/// HARQ processes of all UEs of one cell
#[derive(Debug, Clone)]
pub struct CellHarqManager {
    inner: Rc<RefCell<CellHarqInner>>,
}

impl CellHarqManager {
    pub fn new(max_nof_retxs: u32, dl_timeout_slots: u32, ul_timeout_slots: u32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CellHarqInner {
                nof_harqs: MAX_NOF_HARQS,
                max_nof_retxs,
                dl_timeout_slots,
                ul_timeout_slots,
                ues: SlottedIdTable::new(MAX_NOF_DU_UES),
                stopped: false,
                nof_dl_timeouts: 0,
                nof_ul_timeouts: 0,
            })),
        }
    }

    /// Create the HARQ entity of a UE
    pub fn add_ue(&self, ue_index: DuUeIndex, rnti: Rnti) -> UeHarqEntity {
        let mut inner = self.inner.borrow_mut();
        assert!(
            !inner.ues.contains(ue_index.as_usize()),
            "ue={}: Duplicate UE in cell HARQ manager",
            ue_index
        );
        let nof_harqs = inner.nof_harqs;
        inner.ues.emplace(ue_index.as_usize(), UeHarqs::new(rnti, nof_harqs));
        UeHarqEntity {
            parent: Some(self.inner.clone()),
            ue_index,
        }
    }

    /// Release processes that waited too long for feedback or a retransmission
    pub fn slot_indication(&self, sl_tx: SlotPoint) {
        self.inner.borrow_mut().slot_indication(sl_tx);
    }

    /// Release every process and refuse new allocations
    pub fn stop(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.stopped = true;
        inner.ues.values_mut().for_each(UeHarqs::reset);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.borrow().stopped
    }

    pub fn nof_ues(&self) -> usize {
        self.inner.borrow().ues.len()
    }

    /// Number of DL and UL processes released by timeout so far
    pub fn nof_timeouts(&self) -> (u64, u64) {
        let inner = self.inner.borrow();
        (inner.nof_dl_timeouts, inner.nof_ul_timeouts)
    }
}

/// HARQ processes of one UE in one cell
#[derive(Debug)]
pub struct UeHarqEntity {
    parent: Option<Rc<RefCell<CellHarqInner>>>,
    ue_index: DuUeIndex,
}

impl UeHarqEntity {
    fn parent(&self) -> &Rc<RefCell<CellHarqInner>> {
        match &self.parent {
            Some(p) => p,
            None => panic!("ue={}: Using a released HARQ entity", self.ue_index),
        }
    }

    pub fn ue_index(&self) -> DuUeIndex {
        self.ue_index
    }

    pub fn nof_dl_harqs(&self) -> usize {
        self.parent().borrow().nof_harqs
    }

    pub fn nof_ul_harqs(&self) -> usize {
        self.parent().borrow().nof_harqs
    }

    pub fn nof_empty_dl_harqs(&self) -> usize {
        let inner = self.parent().borrow();
        inner.ue(self.ue_index).dl.iter().filter(|h| h.state == HarqState::Empty).count()
    }

    pub fn has_active_dl_harqs(&self) -> bool {
        let inner = self.parent().borrow();
        inner.ue(self.ue_index).dl.iter().any(|h| h.state != HarqState::Empty)
    }

    pub fn has_active_ul_harqs(&self) -> bool {
        let inner = self.parent().borrow();
        inner.ue(self.ue_index).ul.iter().any(|h| h.state != HarqState::Empty)
    }

    pub fn dl_harq(&self, h_id: HarqId) -> DlHarqProcess {
        self.parent().borrow().ue(self.ue_index).dl[h_id.0 as usize].clone()
    }

    pub fn ul_harq(&self, h_id: HarqId) -> UlHarqProcess {
        self.parent().borrow().ue(self.ue_index).ul[h_id.0 as usize]
    }

    /// Slot of the latest PDSCH newTx or reTx
    pub fn last_pdsch_slot(&self) -> Option<SlotPoint> {
        self.parent().borrow().ue(self.ue_index).last_pdsch_slot
    }

    /// Bytes of UL newTxs and reTxs not yet decoded
    pub fn total_ul_bytes_waiting_ack(&self) -> u32 {
        let inner = self.parent().borrow();
        inner
            .ue(self.ue_index)
            .ul
            .iter()
            .filter(|h| h.state != HarqState::Empty)
            .map(|h| h.tbs_bytes)
            .sum()
    }

    /// MAC SDU allocations of DL newTxs waiting for ACK whose PDSCH is later than `after`
    pub fn dl_newtx_sdu_allocs_after(&self, after: SlotPoint) -> SmallVec<[(Lcid, u32); MAX_NOF_HARQS]> {
        let inner = self.parent().borrow();
        let mut allocs = SmallVec::new();
        for h in inner.ue(self.ue_index).dl.iter() {
            if !h.is_waiting_ack() || h.nof_retxs != 0 || !h.pdsch_slot.is_some_and(|s| s > after) {
                continue;
            }
            for lc in h.tb_info.lc_chs_to_sched.iter() {
                if let Some(lcid) = lc.lcid.to_lcid() {
                    allocs.push((lcid, lc.sched_bytes));
                }
            }
        }
        allocs
    }

    pub fn find_pending_dl_retx(&self) -> Option<HarqId> {
        let inner = self.parent().borrow();
        inner
            .ue(self.ue_index)
            .dl
            .iter()
            .position(|h| h.state == HarqState::PendingRetx)
            .map(|i| HarqId(i as u8))
    }

    pub fn find_pending_ul_retx(&self) -> Option<HarqId> {
        let inner = self.parent().borrow();
        inner
            .ue(self.ue_index)
            .ul
            .iter()
            .position(|h| h.state == HarqState::PendingRetx)
            .map(|i| HarqId(i as u8))
    }

    /// Reserve an empty DL process for a newTx. None if all are busy or the cell is stopped.
    pub fn alloc_dl_harq(
        &self,
        pdsch_slot: SlotPoint,
        k1: u32,
        tbs_bytes: u32,
        tb_info: DlMsgTbInfo,
    ) -> Option<HarqId> {
        let mut inner = self.parent().borrow_mut();
        if inner.stopped {
            return None;
        }
        let timeout = inner.dl_timeout_slots;
        let u = inner.ue_mut(self.ue_index);
        let id = u.dl.iter().position(|h| h.state == HarqState::Empty)?;
        let ack_slot = pdsch_slot + k1;
        u.dl[id] = DlHarqProcess {
            state: HarqState::WaitingAck,
            pdsch_slot: Some(pdsch_slot),
            ack_slot: Some(ack_slot),
            nof_retxs: 0,
            tbs_bytes,
            tb_info,
            timeout_slot: Some(ack_slot + timeout),
        };
        u.last_pdsch_slot = Some(pdsch_slot);
        Some(HarqId(id as u8))
    }

    /// Schedule a retransmission of a NACKed DL process
    pub fn new_dl_retx(&self, h_id: HarqId, pdsch_slot: SlotPoint, k1: u32) {
        let mut inner = self.parent().borrow_mut();
        let timeout = inner.dl_timeout_slots;
        let u = inner.ue_mut(self.ue_index);
        let h = &mut u.dl[h_id.0 as usize];
        assert_eq!(h.state, HarqState::PendingRetx, "DL HARQ {} is not pending a reTx", h_id.0);
        let ack_slot = pdsch_slot + k1;
        h.state = HarqState::WaitingAck;
        h.pdsch_slot = Some(pdsch_slot);
        h.ack_slot = Some(ack_slot);
        h.nof_retxs += 1;
        h.timeout_slot = Some(ack_slot + timeout);
        u.last_pdsch_slot = Some(pdsch_slot);
    }

    /// Apply a HARQ-ACK bit. Feedback for a process not waiting for it is ignored.
    pub fn dl_ack_info(&self, h_id: HarqId, ack: bool) -> Option<HarqFeedbackOutcome> {
        let mut inner = self.parent().borrow_mut();
        let (max_retxs, timeout) = (inner.max_nof_retxs, inner.dl_timeout_slots);
        let rnti = inner.ue(self.ue_index).rnti;
        let h = &mut inner.ue_mut(self.ue_index).dl[h_id.0 as usize];
        if !h.is_waiting_ack() {
            warn!(
                "ue={} rnti={} h_id={}: Discarding HARQ-ACK. Cause: DL HARQ is not waiting for feedback",
                self.ue_index, rnti, h_id.0
            );
            return None;
        }
        Some(if ack {
            let tbs_bytes = h.tbs_bytes;
            *h = DlHarqProcess::default();
            HarqFeedbackOutcome::Acked { tbs_bytes }
        } else if h.nof_retxs < max_retxs {
            h.state = HarqState::PendingRetx;
            h.timeout_slot = h.ack_slot.map(|s| s + timeout);
            HarqFeedbackOutcome::Nacked
        } else {
            *h = DlHarqProcess::default();
            HarqFeedbackOutcome::MaxRetxsReached
        })
    }

    pub fn alloc_ul_harq(&self, pusch_slot: SlotPoint, tbs_bytes: u32) -> Option<HarqId> {
        let mut inner = self.parent().borrow_mut();
        if inner.stopped {
            return None;
        }
        let timeout = inner.ul_timeout_slots;
        let u = inner.ue_mut(self.ue_index);
        let id = u.ul.iter().position(|h| h.state == HarqState::Empty)?;
        u.ul[id] = UlHarqProcess {
            state: HarqState::WaitingAck,
            pusch_slot: Some(pusch_slot),
            nof_retxs: 0,
            tbs_bytes,
            timeout_slot: Some(pusch_slot + timeout),
        };
        Some(HarqId(id as u8))
    }

    pub fn new_ul_retx(&self, h_id: HarqId, pusch_slot: SlotPoint) {
        let mut inner = self.parent().borrow_mut();
        let timeout = inner.ul_timeout_slots;
        let h = &mut inner.ue_mut(self.ue_index).ul[h_id.0 as usize];
        assert_eq!(h.state, HarqState::PendingRetx, "UL HARQ {} is not pending a reTx", h_id.0);
        h.state = HarqState::WaitingAck;
        h.pusch_slot = Some(pusch_slot);
        h.nof_retxs += 1;
        h.timeout_slot = Some(pusch_slot + timeout);
    }

    /// Apply a PUSCH CRC result
    pub fn ul_crc_info(&self, h_id: HarqId, crc_ok: bool) -> Option<HarqFeedbackOutcome> {
        let mut inner = self.parent().borrow_mut();
        let (max_retxs, timeout) = (inner.max_nof_retxs, inner.ul_timeout_slots);
        let rnti = inner.ue(self.ue_index).rnti;
        let h = &mut inner.ue_mut(self.ue_index).ul[h_id.0 as usize];
        if h.state != HarqState::WaitingAck {
            warn!(
                "ue={} rnti={} h_id={}: Discarding CRC. Cause: UL HARQ is not waiting for it",
                self.ue_index, rnti, h_id.0
            );
            return None;
        }
        Some(if crc_ok {
            let tbs_bytes = h.tbs_bytes;
            *h = UlHarqProcess::default();
            HarqFeedbackOutcome::Acked { tbs_bytes }
        } else if h.nof_retxs < max_retxs {
            h.state = HarqState::PendingRetx;
            h.timeout_slot = h.pusch_slot.map(|s| s + timeout);
            HarqFeedbackOutcome::Nacked
        } else {
            *h = UlHarqProcess::default();
            HarqFeedbackOutcome::MaxRetxsReached
        })
    }

    /// Drop pending retransmissions. Processes waiting for feedback are left to complete.
    pub fn cancel_retxs(&self) {
        let mut inner = self.parent().borrow_mut();
        let u = inner.ue_mut(self.ue_index);
        for h in u.dl.iter_mut().filter(|h| h.state == HarqState::PendingRetx) {
            *h = DlHarqProcess::default();
        }
        for h in u.ul.iter_mut().filter(|h| h.state == HarqState::PendingRetx) {
            *h = UlHarqProcess::default();
        }
    }

    /// Release every process of the UE
    pub fn reset(&self) {
        self.parent().borrow_mut().ue_mut(self.ue_index).reset();
    }
}

impl Drop for UeHarqEntity {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.take() {
            parent.borrow_mut().ues.erase(self.ue_index.as_usize());
        }
    }
}
