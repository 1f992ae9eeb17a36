//! Channel state of one UE in one cell: latest CSI, PUSCH SNR and PUCCH SINR estimates.

use crate::config::SchedulerExpertConfig;
use common::utils::ExpAverageFastStart;
use interfaces::message_types::PucchSinrKind;

/// Highest CQI index of the CQI tables of TS 38.214
pub const MAX_CQI: u8 = 15;

/// CSI fields used by the scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsiReport {
    pub wideband_cqi: Option<u8>,
    pub ri: Option<u8>,
}

#[derive(Debug, Clone)]
struct SinrTracker {
    last_db: Option<f32>,
    avg_db: ExpAverageFastStart<f32>,
}

impl SinrTracker {
    fn new(alpha: f32) -> Self {
        Self {
            last_db: None,
            avg_db: ExpAverageFastStart::new(alpha),
        }
    }

    fn push(&mut self, sinr_db: f32) {
        self.last_db = Some(sinr_db);
        self.avg_db.push(sinr_db);
    }

    fn average(&self) -> Option<f32> {
        self.last_db.map(|_| self.avg_db.average())
    }
}

#[derive(Debug, Clone)]
pub struct UeChannelStateManager {
    nof_dl_ports: u8,
    wideband_cqi: u8,
    recommended_dl_layers: u8,
    latest_csi_report: Option<CsiReport>,
    initial_ul_sinr_db: f32,
    pusch: SinrTracker,
    pucch_f0_f1: SinrTracker,
    pucch_f2_f3_f4: SinrTracker,
}

impl UeChannelStateManager {
    pub fn new(expert_cfg: &SchedulerExpertConfig, nof_dl_ports: u8) -> Self {
        let pc = &expert_cfg.power_control;
        Self {
            nof_dl_ports,
            wideband_cqi: expert_cfg.ue.initial_cqi,
            recommended_dl_layers: 1,
            latest_csi_report: None,
            initial_ul_sinr_db: pc.initial_ul_sinr_db,
            pusch: SinrTracker::new(pc.pusch_sinr_alpha_ema),
            pucch_f0_f1: SinrTracker::new(pc.pucch_pw_ctrl_sinr_alpha_ema),
            pucch_f2_f3_f4: SinrTracker::new(pc.pucch_pw_ctrl_sinr_alpha_ema),
        }
    }

    /// Apply a CSI report. Returns false if it is inconsistent with the configured DL ports.
    pub fn handle_csi_report(&mut self, csi: &CsiReport) -> bool {
        self.latest_csi_report = Some(*csi);
        if let Some(cqi) = csi.wideband_cqi {
            self.wideband_cqi = cqi.min(MAX_CQI);
        }
        if let Some(ri) = csi.ri {
            if ri == 0 || ri > self.nof_dl_ports {
                return false;
            }
            self.recommended_dl_layers = ri;
        }
        true
    }

    pub fn latest_csi_report(&self) -> Option<&CsiReport> {
        self.latest_csi_report.as_ref()
    }

    pub fn wideband_cqi(&self) -> u8 {
        self.wideband_cqi
    }

    pub fn nof_dl_layers(&self) -> u8 {
        self.recommended_dl_layers
    }

    pub fn update_pusch_snr(&mut self, snr_db: f32) {
        self.pusch.push(snr_db);
    }

    /// Latest PUSCH SNR, or the configured initial value before any report
    pub fn pusch_snr(&self) -> f32 {
        self.pusch.last_db.unwrap_or(self.initial_ul_sinr_db)
    }

    pub fn average_pusch_sinr_db(&self) -> f32 {
        self.pusch.average().unwrap_or(self.initial_ul_sinr_db)
    }

    pub fn update_pucch_sinr(&mut self, kind: PucchSinrKind, sinr_db: f32) {
        match kind {
            PucchSinrKind::F0F1 => self.pucch_f0_f1.push(sinr_db),
            PucchSinrKind::F2F3F4 { .. } => self.pucch_f2_f3_f4.push(sinr_db),
        }
    }

    pub fn pucch_f0_f1_sinr_db(&self) -> Option<f32> {
        self.pucch_f0_f1.last_db
    }

    pub fn average_pucch_f0_f1_sinr_db(&self) -> Option<f32> {
        self.pucch_f0_f1.average()
    }

    pub fn pucch_f2_f3_f4_sinr_db(&self) -> Option<f32> {
        self.pucch_f2_f3_f4.last_db
    }

    pub fn average_pucch_f2_f3_f4_sinr_db(&self) -> Option<f32> {
        self.pucch_f2_f3_f4.average()
    }
}
