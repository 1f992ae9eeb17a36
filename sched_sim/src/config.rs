//! YAML scenario of the scheduler simulator
//!
//! A scenario names the expert configuration, the cells and the UEs to create,
//! plus the traffic and radio conditions of every UE. Omitted fields take defaults.

use anyhow::{Context, Result};
use interfaces::sched_config::{CellConfiguration, UeConfiguration};
use scheduler::SchedulerExpertConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub expert: SchedulerExpertConfig,
    pub cells: Vec<CellConfiguration>,
    #[serde(default)]
    pub ues: Vec<SimUeConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// One simulated UE
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimUeConfig {
    pub config: UeConfiguration,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Slot count at which the UE removal is requested
    #[serde(default)]
    pub remove_at_slot: Option<u32>,
}

/// Periodic traffic sources of a UE
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
    #[serde(default = "default_dl_period")]
    pub dl_period_slots: u32,
    #[serde(default = "default_dl_bytes")]
    pub dl_bytes_per_period: u32,
    #[serde(default = "default_ul_period")]
    pub ul_period_slots: u32,
    #[serde(default = "default_ul_bytes")]
    pub ul_bytes_per_period: u32,
}

fn default_dl_period() -> u32 {
    10
}

fn default_dl_bytes() -> u32 {
    1500
}

fn default_ul_period() -> u32 {
    20
}

fn default_ul_bytes() -> u32 {
    600
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            dl_period_slots: default_dl_period(),
            dl_bytes_per_period: default_dl_bytes(),
            ul_period_slots: default_ul_period(),
            ul_bytes_per_period: default_ul_bytes(),
        }
    }
}

/// Radio conditions of a UE. Closed-loop power corrections are applied on top.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// PUSCH SINR with no closed-loop correction, in dB
    #[serde(default = "default_pusch_sinr")]
    pub pusch_sinr_db: f32,
    /// PUCCH SINR with no closed-loop correction, in dB
    #[serde(default = "default_pucch_sinr")]
    pub pucch_sinr_db: f32,
    /// Uniform measurement noise amplitude, in dB
    #[serde(default = "default_sinr_noise")]
    pub sinr_noise_db: f32,
    /// Initial UL timing error, in Tc units
    #[serde(default)]
    pub initial_n_ta_error: i64,
    /// UL timing drift per slot, in Tc units
    #[serde(default)]
    pub n_ta_drift_per_slot: i64,
    /// Wideband CQI reported in CSI
    #[serde(default = "default_dl_cqi")]
    pub dl_cqi: u8,
    /// Probability that a DL transport block is NACKed
    #[serde(default = "default_dl_bler")]
    pub dl_bler: f64,
    /// UE power headroom with no closed-loop correction, in dB
    #[serde(default = "default_ph")]
    pub power_headroom_db: i32,
}

fn default_pusch_sinr() -> f32 {
    5.0
}

fn default_pucch_sinr() -> f32 {
    5.0
}

fn default_sinr_noise() -> f32 {
    1.0
}

fn default_dl_cqi() -> u8 {
    12
}

fn default_dl_bler() -> f64 {
    0.05
}

fn default_ph() -> i32 {
    20
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            pusch_sinr_db: default_pusch_sinr(),
            pucch_sinr_db: default_pucch_sinr(),
            sinr_noise_db: default_sinr_noise(),
            initial_n_ta_error: 0,
            n_ta_drift_per_slot: 0,
            dl_cqi: default_dl_cqi(),
            dl_bler: default_dl_bler(),
            power_headroom_db: default_ph(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Slots between two aggregated metric reports
    #[serde(default = "default_report_period")]
    pub report_period_slots: u32,
}

fn default_report_period() -> u32 {
    1000
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_period_slots: default_report_period(),
        }
    }
}

impl ScenarioConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let cfg: ScenarioConfig = serde_yaml::from_str(content).context("Failed to parse scenario YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        self.expert.validate()?;
        if self.cells.is_empty() {
            anyhow::bail!("Scenario has no cells");
        }
        for ue in &self.ues {
            ue.config.validate()?;
            if ue.traffic.dl_period_slots == 0 || ue.traffic.ul_period_slots == 0 {
                anyhow::bail!("ue={}: traffic periods must be greater than 0", ue.config.ue_index);
            }
            if ue.channel.dl_cqi > 15 {
                anyhow::bail!("ue={}: CQI {} out of range", ue.config.ue_index, ue.channel.dl_cqi);
            }
            if !(0.0..1.0).contains(&ue.channel.dl_bler) {
                anyhow::bail!("ue={}: DL BLER {} out of [0, 1)", ue.config.ue_index, ue.channel.dl_bler);
            }
        }
        if self.metrics.report_period_slots == 0 {
            anyhow::bail!("Metrics report period must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{DuUeIndex, SubcarrierSpacing};

    const SCENARIO: &str = r#"
expert:
  ta:
    ta_measurement_period_slots: 40
cells:
  - cell_index: 0
    scs_common: Scs30
ues:
  - config:
      ue_index: 3
      crnti: 17921
      cells:
        - cell_index: 0
    channel:
      initial_n_ta_error: 2048
    remove_at_slot: 500
"#;

    #[test]
    fn test_parse_scenario_with_defaults() {
        let cfg = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        assert_eq!(cfg.expert.ta.ta_measurement_period_slots, 40);
        assert_eq!(cfg.expert.ta.ta_measurement_prohibit_period_slots, 20);
        assert_eq!(cfg.cells[0].scs_common, SubcarrierSpacing::Scs30);
        assert_eq!(cfg.cells[0].nof_ul_prbs, 52);

        let ue = &cfg.ues[0];
        assert_eq!(ue.config.ue_index, DuUeIndex(3));
        assert!(ue.config.starts_in_fallback);
        assert_eq!(ue.channel.initial_n_ta_error, 2048);
        assert_eq!(ue.traffic.dl_period_slots, 10);
        assert_eq!(ue.remove_at_slot, Some(500));
        assert_eq!(cfg.metrics.report_period_slots, 1000);
    }

    #[test]
    fn test_rejects_invalid_scenarios() {
        assert!(ScenarioConfig::from_yaml("cells: []").is_err());
        assert!(ScenarioConfig::from_yaml("cells: [{cell_index: 0, scs_common: Scs45}]").is_err());
        let bad_expert = "expert: {ta: {ta_measurement_period_slots: 0}}\ncells: [{cell_index: 0, scs_common: Scs15}]";
        assert!(ScenarioConfig::from_yaml(bad_expert).is_err());
    }
}
