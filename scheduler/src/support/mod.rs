//! Scheduler Support Utilities
//!
//! Containers and per-UE controllers that the UE context builds on.

pub mod flat_map;
pub mod mac_pdu_format;
pub mod pucch_info;
pub mod pucch_power_controller;
pub mod pusch_power_controller;
pub mod slot_table;

/// Length of the slot-indexed rings used to match UL feedback with its grant
pub const PW_CTRL_GRID_SIZE: usize = 40;
