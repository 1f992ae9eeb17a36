//! Scheduler Configuration Messages
//!
//! UE, bearer and cell configuration as delivered by the DU manager. Values are
//! assumed to be validated upstream; `validate` only catches structural mistakes
//! that would otherwise trip scheduler assertions.

use crate::InterfaceError;
use common::slot_point::SlotPoint;
use common::types::{
    DuCellIndex, DuUeIndex, LcgId, Lcid, PucchFormat, Rnti, SubcarrierSpacing, TagId, MAX_NOF_TAGS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Highest (least urgent) 5QI priority level
pub const MAX_QOS_PRIO_LEVEL: u16 = 127;

/// Highest (least urgent) ARP priority level
pub const MAX_ARP_PRIO_LEVEL: u16 = 15;

/// Guaranteed and maximum bit rates of a GBR bearer, in bps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GbrQosInfo {
    pub gbr_dl: u64,
    pub gbr_ul: u64,
    pub mbr_dl: u64,
    pub mbr_ul: u64,
}

/// QoS parameters attached to a logical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcQosConfig {
    /// 5QI priority level (1..=127, lower is more urgent)
    pub priority_level: u16,
    /// ARP priority level (1..=15, lower is more urgent)
    pub arp_priority: u16,
    /// Averaging window used for bit rate estimation
    #[serde(default = "default_average_window_ms")]
    pub average_window_ms: u32,
    /// Present for GBR bearers only
    #[serde(default)]
    pub gbr_qos_info: Option<GbrQosInfo>,
}

fn default_average_window_ms() -> u32 {
    2000
}

/// Logical channel configuration (TS 38.331 LogicalChannelConfig)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalChannelConfig {
    pub lcid: Lcid,
    /// Logical channel priority (1..=16)
    #[serde(default = "default_lc_priority")]
    pub priority: u8,
    pub lc_group: LcgId,
    #[serde(default)]
    pub qos: Option<LcQosConfig>,
}

fn default_lc_priority() -> u8 {
    1
}

impl LogicalChannelConfig {
    /// SRB configuration with LCG 0 and no QoS
    pub fn srb(lcid: Lcid) -> Self {
        Self {
            lcid,
            priority: 1,
            lc_group: LcgId(0),
            qos: None,
        }
    }
}

/// Ordered list of logical channel configurations of one UE
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalChannelConfigList(pub Vec<LogicalChannelConfig>);

impl LogicalChannelConfigList {
    pub fn new(cfgs: Vec<LogicalChannelConfig>) -> Self {
        Self(cfgs)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogicalChannelConfig> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, lcid: Lcid) -> Option<&LogicalChannelConfig> {
        self.0.iter().find(|c| c.lcid == lcid)
    }

    pub fn contains(&self, lcid: Lcid) -> bool {
        self.get(lcid).is_some()
    }

    /// Whether any configured channel belongs to the given LCG
    pub fn contains_lcg(&self, lcg: LcgId) -> bool {
        self.0.iter().any(|c| c.lc_group == lcg)
    }
}

/// DRX configuration (long cycle only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrxConfig {
    pub long_cycle_ms: u32,
    pub long_start_offset_ms: u32,
    pub on_duration_timer_ms: u32,
    pub inactivity_timer_ms: u32,
}

/// Presence of this block enables PUCCH closed-loop power control for the UE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchPowerControlConfig {
    /// p0-PUCCH-Value of the first P0 set, in dB
    #[serde(default)]
    pub p0_pucch_db: i8,
    #[serde(default)]
    pub two_pucch_pc_adjustment_states: bool,
}

/// PUCCH resources relevant to power control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchConfig {
    /// Format of the first resource in PUCCH resource set 0
    pub format_set_0: PucchFormat,
    /// Format of the first resource in PUCCH resource set 1
    pub format_set_1: PucchFormat,
    #[serde(default)]
    pub pw_control: Option<PucchPowerControlConfig>,
}

/// Fractional path-loss compensation factor (TS 38.331 Alpha)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PuschAlpha {
    Alpha0,
    Alpha04,
    Alpha05,
    Alpha06,
    Alpha07,
    Alpha08,
    Alpha09,
    Alpha1,
}

impl PuschAlpha {
    pub fn to_f32(&self) -> f32 {
        match self {
            PuschAlpha::Alpha0 => 0.0,
            PuschAlpha::Alpha04 => 0.4,
            PuschAlpha::Alpha05 => 0.5,
            PuschAlpha::Alpha06 => 0.6,
            PuschAlpha::Alpha07 => 0.7,
            PuschAlpha::Alpha08 => 0.8,
            PuschAlpha::Alpha09 => 0.9,
            PuschAlpha::Alpha1 => 1.0,
        }
    }
}

/// PUSCH power control parameters of the first P0/alpha set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuschPowerControlConfig {
    #[serde(default)]
    pub p0_ue_db: i8,
    pub alpha: PuschAlpha,
}

/// Per-cell part of a UE configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UeCellConfig {
    pub cell_index: DuCellIndex,
    /// Timing Advance Group of this serving cell
    #[serde(default = "default_tag_id")]
    pub tag_id: TagId,
    #[serde(default)]
    pub pucch: Option<PucchConfig>,
    #[serde(default)]
    pub pusch_pw_ctrl: Option<PuschPowerControlConfig>,
    #[serde(default = "default_nof_dl_ports")]
    pub nof_dl_ports: u8,
}

fn default_tag_id() -> TagId {
    TagId(0)
}

fn default_nof_dl_ports() -> u8 {
    1
}

/// Full UE configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UeConfiguration {
    pub ue_index: DuUeIndex,
    pub crnti: Rnti,
    /// Serving cells, PCell first
    pub cells: Vec<UeCellConfig>,
    #[serde(default)]
    pub logical_channels: LogicalChannelConfigList,
    #[serde(default)]
    pub drx: Option<DrxConfig>,
    /// Whether the UE is created during random access (contention resolution pending)
    #[serde(default = "default_starts_in_fallback")]
    pub starts_in_fallback: bool,
    /// Slot at which Msg3 was received, if created through random access
    #[serde(default)]
    pub ul_ccch_slot_rx: Option<SlotPoint>,
}

fn default_starts_in_fallback() -> bool {
    true
}

impl UeConfiguration {
    pub fn pcell(&self) -> &UeCellConfig {
        &self.cells[0]
    }

    /// Position of a cell in the UE serving cell list
    pub fn ue_cell_index(&self, cell_index: DuCellIndex) -> Option<usize> {
        self.cells.iter().position(|c| c.cell_index == cell_index)
    }

    pub fn cell_cfg(&self, cell_index: DuCellIndex) -> Option<&UeCellConfig> {
        self.cells.iter().find(|c| c.cell_index == cell_index)
    }

    /// Distinct TAGs of the configured serving cells, in configuration order
    pub fn tag_ids(&self) -> Vec<TagId> {
        let mut tags = Vec::new();
        for c in &self.cells {
            if !tags.contains(&c.tag_id) {
                tags.push(c.tag_id);
            }
        }
        tags
    }

    /// Structural checks that would otherwise become scheduler assertions
    pub fn validate(&self) -> Result<(), InterfaceError> {
        if self.cells.is_empty() {
            return Err(InterfaceError::InvalidConfig(format!(
                "ue={} has no serving cell",
                self.ue_index
            )));
        }
        let mut cells = HashSet::new();
        for c in &self.cells {
            if !cells.insert(c.cell_index) {
                return Err(InterfaceError::DuplicateEntry {
                    what: "cell index",
                    value: c.cell_index.0 as u32,
                });
            }
            if c.tag_id.0 as usize >= MAX_NOF_TAGS {
                return Err(InterfaceError::InvalidConfig(format!("invalid TAG id {}", c.tag_id)));
            }
        }
        let mut lcids = HashSet::new();
        for lc in self.logical_channels.iter() {
            if !lcids.insert(lc.lcid) {
                return Err(InterfaceError::DuplicateEntry {
                    what: "LCID",
                    value: lc.lcid.0 as u32,
                });
            }
            if let Some(qos) = &lc.qos {
                if qos.priority_level == 0
                    || qos.priority_level > MAX_QOS_PRIO_LEVEL
                    || qos.arp_priority == 0
                    || qos.arp_priority > MAX_ARP_PRIO_LEVEL
                {
                    return Err(InterfaceError::InvalidConfig(format!(
                        "invalid QoS priority for lcid={}",
                        lc.lcid
                    )));
                }
                if qos.average_window_ms == 0 {
                    return Err(InterfaceError::InvalidConfig(format!(
                        "zero averaging window for lcid={}",
                        lc.lcid
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Cell-wide parameters needed by the UE context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConfiguration {
    pub cell_index: DuCellIndex,
    pub scs_common: SubcarrierSpacing,
    /// p0-NominalWithGrant, in dBm
    #[serde(default = "default_p0_nominal_pusch")]
    pub p0_nominal_pusch_db: i32,
    #[serde(default = "default_nof_ul_prbs")]
    pub nof_ul_prbs: u32,
}

fn default_p0_nominal_pusch() -> i32 {
    -76
}

fn default_nof_ul_prbs() -> u32 {
    52
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ue_cfg() -> UeConfiguration {
        UeConfiguration {
            ue_index: DuUeIndex(0),
            crnti: Rnti(0x4601),
            cells: vec![UeCellConfig {
                cell_index: DuCellIndex(0),
                tag_id: TagId(0),
                pucch: None,
                pusch_pw_ctrl: None,
                nof_dl_ports: 1,
            }],
            logical_channels: LogicalChannelConfigList::new(vec![
                LogicalChannelConfig::srb(Lcid::SRB0),
                LogicalChannelConfig::srb(Lcid::SRB1),
            ]),
            drx: None,
            starts_in_fallback: true,
            ul_ccch_slot_rx: None,
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_lcid() {
        let mut cfg = ue_cfg();
        assert!(cfg.validate().is_ok());
        cfg.logical_channels.0.push(LogicalChannelConfig::srb(Lcid::SRB1));
        assert_eq!(
            cfg.validate(),
            Err(InterfaceError::DuplicateEntry { what: "LCID", value: 1 })
        );
    }

    #[test]
    fn test_validate_rejects_missing_cells() {
        let mut cfg = ue_cfg();
        cfg.cells.clear();
        assert!(matches!(cfg.validate(), Err(InterfaceError::InvalidConfig(_))));
    }

    #[test]
    fn test_lc_list_lookups() {
        let cfg = ue_cfg();
        assert!(cfg.logical_channels.contains(Lcid::SRB1));
        assert!(!cfg.logical_channels.contains(Lcid::SRB2));
        assert!(cfg.logical_channels.contains_lcg(LcgId(0)));
        assert!(!cfg.logical_channels.contains_lcg(LcgId(1)));
        assert_eq!(cfg.tag_ids(), vec![TagId(0)]);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "ue_index": 3,
            "crnti": 17921,
            "cells": [{ "cell_index": 0 }],
            "logical_channels": [
                { "lcid": 4, "lc_group": 1,
                  "qos": { "priority_level": 9, "arp_priority": 8 } }
            ]
        }"#;
        let cfg: UeConfiguration = serde_json::from_str(json).unwrap();
        assert!(cfg.starts_in_fallback);
        assert_eq!(cfg.pcell().tag_id, TagId(0));
        let drb = cfg.logical_channels.get(Lcid(4)).unwrap();
        assert_eq!(drb.priority, 1);
        assert_eq!(drb.qos.unwrap().average_window_ms, 2000);
        assert!(drb.qos.unwrap().gbr_qos_info.is_none());
    }
}
