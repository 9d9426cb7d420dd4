//! L1 Slot Control Plane Library
//! 
//! This crate implements the real-time hand-off between the scheduler and the
//! lower physical-layer workers: per-slot PDU dispatch, HARQ process tracking,
//! the join barrier that finalizes a slot, and the shared scheduling-response
//! lifetime.

pub mod sync;
pub mod phy;
pub mod mac;

use common::types::SlotId;
use interfaces::InterfaceError;
use thiserror::Error;

/// Common errors for the slot core
///
/// Everything except `InvalidConfiguration` and `Interface` is a broken
/// producer/caller contract; see [`LayerError::is_fatal`].
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid protocol data unit: {0}")]
    InvalidPdu(String),
    
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    
    #[error("{category} capacity {capacity} exceeded in slot {slot}")]
    CapacityExceeded {
        category: &'static str,
        capacity: usize,
        slot: SlotId,
    },
    
    #[error("{category} index {index} already active in slot {slot}")]
    SlotIndexBusy {
        category: &'static str,
        index: usize,
        slot: SlotId,
    },
    
    #[error("{category} index {index} out of range (capacity {capacity})")]
    IndexOutOfRange {
        category: &'static str,
        index: usize,
        capacity: usize,
    },
    
    #[error("Invalid HARQ process {pid} (table size {size})")]
    InvalidHarqProcess { pid: u8, size: usize },
    
    #[error("Unknown scheduling response id {0}")]
    UnknownSchedResponse(u64),
    
    #[error("Barrier already joined {joined} times, cannot arm for {required}")]
    BarrierOverjoined { joined: usize, required: usize },
    
    #[error("Barrier already armed for {required} joins")]
    BarrierArmed { required: usize },
    
    #[error("Slot context for {slot} still busy with slot {busy}")]
    SlotOverrun { slot: SlotId, busy: SlotId },
    
    #[error("Worker pool stopped")]
    WorkersStopped,
    
    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),
}

impl LayerError {
    /// Contract violations: the caller aborts with this diagnostic
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            LayerError::InvalidConfiguration(_) | LayerError::Interface(_)
        )
    }
}
