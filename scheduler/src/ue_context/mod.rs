//! Scheduler UE context: per-UE state and the repositories owning it

pub mod harq_manager;
pub mod logical_channel_system;
pub mod ta_management_system;
pub mod ue;
pub mod ue_cell;
pub mod ue_cell_repository;
pub mod ue_channel_state_manager;
pub mod ue_drx_controller;
pub mod ue_link_adaptation;
pub mod ue_repository;
