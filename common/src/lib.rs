//! Common Utilities and Types Library
//!
//! This crate provides identifiers, slot arithmetic and numeric helpers shared
//! across the MAC scheduler workspace.

pub mod slot_point;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use slot_point::*;
pub use types::*;
pub use utils::*;

use thiserror::Error;

/// Errors raised when building common types from untrusted values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("Invalid subcarrier spacing: {0} kHz")]
    InvalidScs(u32),

    #[error("Invalid LCID: {0}")]
    InvalidLcid(u8),

    #[error("Invalid LCG-ID: {0}")]
    InvalidLcgId(u8),
}
