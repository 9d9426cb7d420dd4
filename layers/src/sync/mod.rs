//! Slot Synchronization Primitives

pub mod barrier;

pub use barrier::{BarrierRing, DynamicBarrier};
