//! Scheduling Interface Library
//! 
//! This crate carries the boundary contracts between the upper scheduling
//! stage and the L1 slot core: the per-slot PDU records delivered downwards,
//! the indication messages sent upwards, and the bounded queues that carry them.

pub mod fapi;
pub mod indications;
pub mod indication_queue;

use thiserror::Error;

pub use indication_queue::{IndicationQueue, IndicationQueues, PutError, QueueConfig};

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    
    #[error("Queue {0} is closed")]
    QueueClosed(&'static str),
}
