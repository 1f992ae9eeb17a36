//! Scheduler Interfaces Library
//!
//! Messages exchanged between the MAC scheduler core and its collaborators:
//! UE/cell configuration coming from the DU manager, indications coming from
//! the PHY/MAC adapter and DL PDU descriptors handed to PDU assembly.

pub mod dl_pdu;
pub mod message_types;
pub mod sched_config;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterfaceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate {what} {value} in configuration")]
    DuplicateEntry { what: &'static str, value: u32 },
}
