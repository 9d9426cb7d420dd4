//! MAC-side Scheduling Hand-off
//! 
//! Lifetime management of the scheduling responses the MAC hands to L1.

pub mod sched_response;

pub use sched_response::{SchedResponse, SchedResponseId, SchedResponsePool, SchedResponseRef};
