//! Metrics collection off the slot loop
//!
//! The slot loop sends one [`SlotMetrics`] per slot over an mpsc channel. A
//! separate task aggregates them, logs a report every period and returns the
//! totals once the channel closes.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// What happened in one slot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotMetrics {
    pub slot_count: u32,
    pub nof_ues: usize,
    pub dl_newtx_bytes: u32,
    pub dl_retxs: u32,
    pub dl_acks: u32,
    pub dl_nacks: u32,
    pub ul_newtx_bytes: u32,
    pub ul_crc_ok: u32,
    pub ul_crc_ko: u32,
    pub ta_cmds: u32,
    pub pusch_tpc_up: u32,
    pub pucch_tpc_up: u32,
    pub ues_removed: u32,
    /// Mean PUSCH SINR reported in the slot, if any PUSCH was received
    pub pusch_sinr_db: Option<f32>,
}

/// Totals over a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsSummary {
    pub nof_slots: u64,
    pub dl_newtx_bytes: u64,
    pub dl_retxs: u64,
    pub dl_acks: u64,
    pub dl_nacks: u64,
    pub ul_newtx_bytes: u64,
    pub ul_crc_ok: u64,
    pub ul_crc_ko: u64,
    pub ta_cmds: u64,
    pub ues_removed: u64,
    pub last_pusch_sinr_db: Option<f32>,
}

impl MetricsSummary {
    fn add(&mut self, m: &SlotMetrics) {
        self.nof_slots += 1;
        self.dl_newtx_bytes += m.dl_newtx_bytes as u64;
        self.dl_retxs += m.dl_retxs as u64;
        self.dl_acks += m.dl_acks as u64;
        self.dl_nacks += m.dl_nacks as u64;
        self.ul_newtx_bytes += m.ul_newtx_bytes as u64;
        self.ul_crc_ok += m.ul_crc_ok as u64;
        self.ul_crc_ko += m.ul_crc_ko as u64;
        self.ta_cmds += m.ta_cmds as u64;
        self.ues_removed += m.ues_removed as u64;
        if m.pusch_sinr_db.is_some() {
            self.last_pusch_sinr_db = m.pusch_sinr_db;
        }
    }

    pub fn dl_bler(&self) -> f64 {
        let total = self.dl_acks + self.dl_nacks;
        if total == 0 {
            return 0.0;
        }
        self.dl_nacks as f64 / total as f64
    }
}

/// Spawn the aggregation task
pub fn spawn_metrics_task(
    mut rx: mpsc::Receiver<SlotMetrics>,
    report_period_slots: u32,
) -> JoinHandle<MetricsSummary> {
    tokio::spawn(async move {
        let mut total = MetricsSummary::default();
        let mut period = MetricsSummary::default();
        let mut nof_ues = 0;
        while let Some(m) = rx.recv().await {
            total.add(&m);
            period.add(&m);
            nof_ues = m.nof_ues;
            if period.nof_slots >= report_period_slots as u64 {
                info!(
                    "slot={} ues={}: dl={}B ack={} nack={} retx={} ul={}B crc_ok={} crc_ko={} ta_cmds={} pusch_sinr={:?}",
                    m.slot_count,
                    nof_ues,
                    period.dl_newtx_bytes,
                    period.dl_acks,
                    period.dl_nacks,
                    period.dl_retxs,
                    period.ul_newtx_bytes,
                    period.ul_crc_ok,
                    period.ul_crc_ko,
                    period.ta_cmds,
                    period.last_pusch_sinr_db
                );
                period = MetricsSummary::default();
            }
        }
        info!(
            "Run complete: {} slots, {} UEs left, dl={}B (BLER {:.3}) ul={}B ta_cmds={} removed={}",
            total.nof_slots,
            nof_ues,
            total.dl_newtx_bytes,
            total.dl_bler(),
            total.ul_newtx_bytes,
            total.ta_cmds,
            total.ues_removed
        );
        total
    })
}
