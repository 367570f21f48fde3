//! Infrastructure layer: store implementations and wire DTOs.

pub mod dto;
pub mod memory;
