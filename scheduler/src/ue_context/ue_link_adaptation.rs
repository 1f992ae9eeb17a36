//! Outer-Loop Link Adaptation
//!
//! Offsets applied on top of the reported DL CQI and the estimated UL SNR, driven by
//! HARQ outcomes so that the observed BLER converges to a target. Each ACK moves
//! the offset up by `step * bler / (1 - bler)` and each NACK moves it down by
//! `step`, which balances out exactly at the target BLER.

use crate::config::UeExpertConfig;
use crate::ue_context::ue_channel_state_manager::MAX_CQI;

#[derive(Debug, Clone)]
struct OllaState {
    step_up: f32,
    step_down: f32,
    max_offset: f32,
    offset: f32,
}

impl OllaState {
    fn new(target_bler: f32, inc_step: f32, max_offset: f32) -> Option<Self> {
        if inc_step <= 0.0 || target_bler <= 0.0 || target_bler >= 1.0 {
            return None;
        }
        Some(Self {
            step_up: inc_step * target_bler / (1.0 - target_bler),
            step_down: inc_step,
            max_offset,
            offset: 0.0,
        })
    }

    fn update(&mut self, ack: bool) {
        let delta = if ack { self.step_up } else { -self.step_down };
        self.offset = (self.offset + delta).clamp(-self.max_offset, self.max_offset);
    }
}

/// OLLA controllers of one UE in one cell. A disabled direction keeps a zero offset.
#[derive(Debug, Clone)]
pub struct UeLinkAdaptationController {
    dl_olla: Option<OllaState>,
    ul_olla: Option<OllaState>,
}

impl UeLinkAdaptationController {
    pub fn new(cfg: &UeExpertConfig) -> Self {
        Self {
            dl_olla: OllaState::new(cfg.olla_dl_target_bler, cfg.olla_cqi_inc_step, cfg.olla_max_cqi_offset),
            ul_olla: OllaState::new(cfg.olla_ul_target_bler, cfg.olla_ul_snr_inc_step, cfg.olla_max_ul_snr_offset),
        }
    }

    pub fn handle_dl_ack_info(&mut self, ack: bool) {
        if let Some(olla) = &mut self.dl_olla {
            olla.update(ack);
        }
    }

    pub fn handle_ul_crc_info(&mut self, crc_ok: bool) {
        if let Some(olla) = &mut self.ul_olla {
            olla.update(crc_ok);
        }
    }

    pub fn dl_cqi_offset(&self) -> f32 {
        self.dl_olla.as_ref().map_or(0.0, |o| o.offset)
    }

    pub fn ul_snr_offset_db(&self) -> f32 {
        self.ul_olla.as_ref().map_or(0.0, |o| o.offset)
    }

    /// Reported CQI corrected by the DL offset, within the CQI range
    pub fn effective_cqi(&self, wideband_cqi: u8) -> f32 {
        (wideband_cqi as f32 + self.dl_cqi_offset()).clamp(0.0, MAX_CQI as f32)
    }

    pub fn effective_ul_snr_db(&self, pusch_snr_db: f32) -> f32 {
        pusch_snr_db + self.ul_snr_offset_db()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_stable_at_target_bler() {
        let cfg = UeExpertConfig {
            olla_cqi_inc_step: 0.1,
            olla_dl_target_bler: 0.1,
            ..Default::default()
        };
        let mut la = UeLinkAdaptationController::new(&cfg);
        for _ in 0..10 {
            for _ in 0..9 {
                la.handle_dl_ack_info(true);
            }
            la.handle_dl_ack_info(false);
        }
        assert!(la.dl_cqi_offset().abs() < 1e-4);
    }

    #[test]
    fn test_offset_bounded() {
        let cfg = UeExpertConfig {
            olla_ul_snr_inc_step: 0.5,
            olla_max_ul_snr_offset: 3.0,
            ..Default::default()
        };
        let mut la = UeLinkAdaptationController::new(&cfg);
        for _ in 0..100 {
            la.handle_ul_crc_info(false);
        }
        assert_eq!(la.ul_snr_offset_db(), -3.0);
        assert_eq!(la.effective_ul_snr_db(10.0), 7.0);
    }

    #[test]
    fn test_effective_cqi_clamped() {
        let cfg = UeExpertConfig {
            olla_cqi_inc_step: 1.0,
            olla_max_cqi_offset: 4.0,
            ..Default::default()
        };
        let mut la = UeLinkAdaptationController::new(&cfg);
        for _ in 0..10 {
            la.handle_dl_ack_info(false);
        }
        assert_eq!(la.effective_cqi(2), 0.0);
        assert_eq!(la.effective_cqi(10), 6.0);
    }

    #[test]
    fn test_disabled_olla() {
        let cfg = UeExpertConfig {
            olla_cqi_inc_step: 0.0,
            ..Default::default()
        };
        let mut la = UeLinkAdaptationController::new(&cfg);
        la.handle_dl_ack_info(false);
        assert_eq!(la.dl_cqi_offset(), 0.0);
    }
}
