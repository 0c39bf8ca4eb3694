//! Zone persistence.

pub mod memory;
pub mod postgres;
pub mod traits;
