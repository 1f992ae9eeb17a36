//! Scheduler Expert Configuration
//!
//! Tuning parameters of the UE context algorithms. Every field has a default, so
//! a YAML/JSON document only needs to name the values it overrides.

use crate::SchedError;
use serde::{Deserialize, Serialize};

/// Expert configuration of the scheduler UE context
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SchedulerExpertConfig {
    /// Timing advance control
    #[serde(default)]
    pub ta: TaControlConfig,
    /// UL closed-loop power control
    #[serde(default)]
    pub power_control: UlPowerControlConfig,
    /// UE lifecycle, HARQ and link adaptation
    #[serde(default)]
    pub ue: UeExpertConfig,
}

impl SchedulerExpertConfig {
    /// Check values that the algorithms cannot work with
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.ta.ta_measurement_period_slots == 0 {
            return Err(SchedError::InvalidConfig(
                "TA measurement period must be greater than 0".to_string(),
            ));
        }
        if self.ta.ta_outlier_z_threshold < 0.0 {
            return Err(SchedError::InvalidConfig(format!(
                "TA outlier z-threshold {} is negative",
                self.ta.ta_outlier_z_threshold
            )));
        }
        let pc = &self.power_control;
        for (name, alpha) in [
            ("pusch_sinr_alpha_ema", pc.pusch_sinr_alpha_ema),
            ("pucch_pw_ctrl_sinr_alpha_ema", pc.pucch_pw_ctrl_sinr_alpha_ema),
        ] {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(SchedError::InvalidConfig(format!(
                    "{} must be in (0, 1), got {}",
                    name, alpha
                )));
            }
        }
        if pc.pucch_cl_min_accumulated_db > 0 || pc.pucch_cl_max_accumulated_db < 0 {
            return Err(SchedError::InvalidConfig(format!(
                "PUCCH closed-loop bounds [{}, {}] must contain 0",
                pc.pucch_cl_min_accumulated_db, pc.pucch_cl_max_accumulated_db
            )));
        }
        if pc.pusch_cl_min_accumulated_db > 0 {
            return Err(SchedError::InvalidConfig(format!(
                "PUSCH closed-loop floor {} must not be positive",
                pc.pusch_cl_min_accumulated_db
            )));
        }
        let ue = &self.ue;
        for (name, bler) in [
            ("olla_dl_target_bler", ue.olla_dl_target_bler),
            ("olla_ul_target_bler", ue.olla_ul_target_bler),
        ] {
            if !(bler > 0.0 && bler < 1.0) {
                return Err(SchedError::InvalidConfig(format!(
                    "{} must be in (0, 1), got {}",
                    name, bler
                )));
            }
        }
        if ue.dl_harq_timeout_ms == 0 || ue.ul_harq_timeout_ms == 0 {
            return Err(SchedError::InvalidConfig(
                "HARQ timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timing advance control parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaControlConfig {
    /// Minimum |TA command - 31| that triggers a TA command. Negative disables TA management.
    #[serde(default = "default_ta_cmd_offset_threshold")]
    pub ta_cmd_offset_threshold: i32,
    /// Length of a measurement window, in slots
    #[serde(default = "default_ta_measurement_period")]
    pub ta_measurement_period_slots: u32,
    /// Slots after a TA command during which new N_TA reports are ignored
    #[serde(default = "default_ta_prohibit_period")]
    pub ta_measurement_prohibit_period_slots: u32,
    /// Reports with UL SINR at or below this value are discarded
    #[serde(default)]
    pub ta_update_measurement_ul_sinr_threshold_db: f32,
    /// Target timing offset, in units of TA command steps
    #[serde(default)]
    pub ta_target: f32,
    /// z-score beyond which a report is an outlier. 0 disables outlier rejection.
    #[serde(default = "default_ta_outlier_z_threshold")]
    pub ta_outlier_z_threshold: f32,
}

fn default_ta_cmd_offset_threshold() -> i32 {
    1
}

fn default_ta_measurement_period() -> u32 {
    80
}

fn default_ta_prohibit_period() -> u32 {
    20
}

fn default_ta_outlier_z_threshold() -> f32 {
    3.0
}

impl Default for TaControlConfig {
    fn default() -> Self {
        Self {
            ta_cmd_offset_threshold: default_ta_cmd_offset_threshold(),
            ta_measurement_period_slots: default_ta_measurement_period(),
            ta_measurement_prohibit_period_slots: default_ta_prohibit_period(),
            ta_update_measurement_ul_sinr_threshold_db: 0.0,
            ta_target: 0.0,
            ta_outlier_z_threshold: default_ta_outlier_z_threshold(),
        }
    }
}

/// UL power control parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UlPowerControlConfig {
    #[serde(default = "default_true")]
    pub enable_pusch_closed_loop_pw_control: bool,
    #[serde(default = "default_true")]
    pub enable_pucch_closed_loop_pw_control: bool,
    /// Shrink PUSCH grants so the next PHR stays non-negative
    #[serde(default)]
    pub enable_phr_bw_adaptation: bool,
    #[serde(default = "default_target_pusch_sinr")]
    pub target_pusch_sinr_db: f32,
    /// Path loss at which the PUSCH SINR target applies unchanged
    #[serde(default = "default_path_loss_for_target_sinr")]
    pub path_loss_for_target_pusch_sinr_db: f32,
    #[serde(default = "default_alpha_ema")]
    pub pusch_sinr_alpha_ema: f32,
    /// Minimum spacing between two TPC adjustments, in ms
    #[serde(default = "default_tpc_prohibit_time")]
    pub tpc_adjust_prohibit_time_ms: u32,
    #[serde(default = "default_pucch_f0_sinr_target")]
    pub pucch_f0_sinr_target_db: f32,
    #[serde(default = "default_pucch_f2_sinr_target")]
    pub pucch_f2_sinr_target_db: f32,
    #[serde(default)]
    pub pucch_f3_sinr_target_db: f32,
    #[serde(default = "default_alpha_ema")]
    pub pucch_pw_ctrl_sinr_alpha_ema: f32,
    /// Bounds of the accumulated PUCCH closed-loop adjustment, in dB
    #[serde(default = "default_cl_min_accumulated")]
    pub pucch_cl_min_accumulated_db: i32,
    #[serde(default = "default_cl_max_accumulated")]
    pub pucch_cl_max_accumulated_db: i32,
    /// Floor of the accumulated PUSCH closed-loop adjustment, in dB
    #[serde(default = "default_cl_min_accumulated")]
    pub pusch_cl_min_accumulated_db: i32,
    /// PUSCH SNR assumed before the first measurement
    #[serde(default = "default_initial_ul_sinr")]
    pub initial_ul_sinr_db: f32,
}

fn default_true() -> bool {
    true
}

fn default_target_pusch_sinr() -> f32 {
    10.0
}

fn default_path_loss_for_target_sinr() -> f32 {
    70.0
}

fn default_alpha_ema() -> f32 {
    0.2
}

fn default_tpc_prohibit_time() -> u32 {
    10
}

fn default_pucch_f0_sinr_target() -> f32 {
    10.0
}

fn default_pucch_f2_sinr_target() -> f32 {
    6.0
}

fn default_cl_min_accumulated() -> i32 {
    -30
}

fn default_cl_max_accumulated() -> i32 {
    30
}

fn default_initial_ul_sinr() -> f32 {
    5.0
}

impl Default for UlPowerControlConfig {
    fn default() -> Self {
        Self {
            enable_pusch_closed_loop_pw_control: true,
            enable_pucch_closed_loop_pw_control: true,
            enable_phr_bw_adaptation: false,
            target_pusch_sinr_db: default_target_pusch_sinr(),
            path_loss_for_target_pusch_sinr_db: default_path_loss_for_target_sinr(),
            pusch_sinr_alpha_ema: default_alpha_ema(),
            tpc_adjust_prohibit_time_ms: default_tpc_prohibit_time(),
            pucch_f0_sinr_target_db: default_pucch_f0_sinr_target(),
            pucch_f2_sinr_target_db: default_pucch_f2_sinr_target(),
            pucch_f3_sinr_target_db: 0.0,
            pucch_pw_ctrl_sinr_alpha_ema: default_alpha_ema(),
            pucch_cl_min_accumulated_db: default_cl_min_accumulated(),
            pucch_cl_max_accumulated_db: default_cl_max_accumulated(),
            pusch_cl_min_accumulated_db: default_cl_min_accumulated(),
            initial_ul_sinr_db: default_initial_ul_sinr(),
        }
    }
}

/// UE lifecycle, HARQ and link adaptation parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UeExpertConfig {
    /// Largest distance between the slot a UL grant is decided and its PUSCH/PUCCH slot
    #[serde(default = "default_max_ul_alloc_delay")]
    pub max_ul_alloc_delay_slots: u32,
    /// Milliseconds a DL HARQ may wait for feedback or a retransmission before it is released
    #[serde(default = "default_harq_timeout")]
    pub dl_harq_timeout_ms: u32,
    #[serde(default = "default_harq_timeout")]
    pub ul_harq_timeout_ms: u32,
    /// Maximum number of HARQ retransmissions
    #[serde(default = "default_max_nof_harq_retxs")]
    pub max_nof_harq_retxs: u32,
    /// ra-ContentionResolutionTimer, in ms
    #[serde(default = "default_ra_con_res_timer")]
    pub ra_con_res_timer_ms: u32,
    /// Wideband CQI assumed before the first CSI report
    #[serde(default = "default_initial_cqi")]
    pub initial_cqi: u8,
    #[serde(default = "default_olla_cqi_inc_step")]
    pub olla_cqi_inc_step: f32,
    #[serde(default = "default_olla_max_cqi_offset")]
    pub olla_max_cqi_offset: f32,
    #[serde(default = "default_olla_ul_snr_inc_step")]
    pub olla_ul_snr_inc_step: f32,
    #[serde(default = "default_olla_max_ul_snr_offset")]
    pub olla_max_ul_snr_offset: f32,
    #[serde(default = "default_olla_target_bler")]
    pub olla_dl_target_bler: f32,
    #[serde(default = "default_olla_target_bler")]
    pub olla_ul_target_bler: f32,
}

fn default_max_ul_alloc_delay() -> u32 {
    8
}

fn default_harq_timeout() -> u32 {
    40
}

fn default_max_nof_harq_retxs() -> u32 {
    4
}

fn default_ra_con_res_timer() -> u32 {
    64
}

fn default_initial_cqi() -> u8 {
    3
}

fn default_olla_cqi_inc_step() -> f32 {
    0.001
}

fn default_olla_max_cqi_offset() -> f32 {
    4.0
}

fn default_olla_ul_snr_inc_step() -> f32 {
    0.001
}

fn default_olla_max_ul_snr_offset() -> f32 {
    5.0
}

fn default_olla_target_bler() -> f32 {
    0.01
}

impl Default for UeExpertConfig {
    fn default() -> Self {
        Self {
            max_ul_alloc_delay_slots: default_max_ul_alloc_delay(),
            dl_harq_timeout_ms: default_harq_timeout(),
            ul_harq_timeout_ms: default_harq_timeout(),
            max_nof_harq_retxs: default_max_nof_harq_retxs(),
            ra_con_res_timer_ms: default_ra_con_res_timer(),
            initial_cqi: default_initial_cqi(),
            olla_cqi_inc_step: default_olla_cqi_inc_step(),
            olla_max_cqi_offset: default_olla_max_cqi_offset(),
            olla_ul_snr_inc_step: default_olla_ul_snr_inc_step(),
            olla_max_ul_snr_offset: default_olla_max_ul_snr_offset(),
            olla_dl_target_bler: default_olla_target_bler(),
            olla_ul_target_bler: default_olla_target_bler(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = SchedulerExpertConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.ta.ta_measurement_period_slots, 80);
        assert_eq!(cfg.power_control.tpc_adjust_prohibit_time_ms, 10);
    }

    #[test]
    fn test_partial_yaml_takes_defaults() {
        let yaml = "ta:\n  ta_cmd_offset_threshold: -1\npower_control:\n  target_pusch_sinr_db: 12.5\n";
        let cfg: SchedulerExpertConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.ta.ta_cmd_offset_threshold, -1);
        assert_eq!(cfg.ta.ta_measurement_prohibit_period_slots, 20);
        assert_eq!(cfg.power_control.target_pusch_sinr_db, 12.5);
        assert!(cfg.power_control.enable_pucch_closed_loop_pw_control);
        assert_eq!(cfg.ue, UeExpertConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_ta_period() {
        let mut cfg = SchedulerExpertConfig::default();
        cfg.ta.ta_measurement_period_slots = 0;
        assert!(matches!(cfg.validate(), Err(SchedError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_pucch_bounds() {
        let mut cfg = SchedulerExpertConfig::default();
        cfg.power_control.pucch_cl_min_accumulated_db = 2;
        assert!(cfg.validate().is_err());
    }
}
