//! Common Utilities and Types Library
//! 
//! This crate provides shared types and utilities used across the L1 slot
//! control plane: slot addressing, numerology and antenna-port helpers.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
