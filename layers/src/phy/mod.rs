//! Physical Layer Slot Core
//! 
//! Slot-level control of the lower physical layer: PDU storage and dispatch,
//! HARQ tracking, session timing, and the pipeline that fans channel work out
//! to worker threads.

pub mod harq;
pub mod slot_store;
pub mod dispatcher;
pub mod timing;
pub mod processor;
pub mod workers;
pub mod pipeline;

// Re-export commonly used types
pub use dispatcher::{DispatchReport, HarqFeedbackEvent, PduDispatcher};
pub use harq::{HarqDirection, HarqEntity, HarqProcessRecord, HarqProcessTable, HarqStatus, HarqTransition};
pub use pipeline::{PipelineConfig, PipelineStats, SlotPipeline, SlotTicket};
pub use processor::{ChannelProcessor, LoopbackProcessor};
pub use slot_store::{SlotPduStore, StoreCapacities};
pub use timing::SessionTiming;
pub use workers::WorkerPool;
