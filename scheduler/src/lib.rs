//! MAC Scheduler UE Context
//!
//! Per-UE, per-slot scheduling state of the DU MAC scheduler: logical channel
//! buffer and QoS tracking with MAC PDU content selection, timing advance
//! management, closed-loop UL power control and the UE/cell repositories that
//! drive all of them from the slot tick.
//!
//! Everything in here runs on the single scheduling thread. Indications are
//! expected to be marshalled onto that thread before they reach this crate.

pub mod config;
pub mod support;
pub mod ue_context;

use common::types::{DuCellIndex, DuUeIndex};
use thiserror::Error;

pub use config::SchedulerExpertConfig;
pub use ue_context::logical_channel_system::{
    LogicalChannelSystem, UeLogicalChannelRepository, UeLogicalChannelView,
};
pub use ue_context::ta_management_system::{TaManagementSystem, UeTaManager};
pub use ue_context::ue_repository::{UeRemovalEvent, UeRepository};

/// Scheduler setup errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown cell {0}")]
    UnknownCell(DuCellIndex),

    #[error("Unknown UE {0}")]
    UnknownUe(DuUeIndex),

    #[error("Cell {0} already exists")]
    DuplicateCell(DuCellIndex),
}

impl From<interfaces::InterfaceError> for SchedError {
    fn from(err: interfaces::InterfaceError) -> Self {
        SchedError::InvalidConfig(err.to_string())
    }
}
