//! Upper-stage Indication Consumers
//! 
//! One blocking consumer per indication queue. Each logs what L1 reported
//! and returns a summary once its queue is closed and drained.

use common::types::SlotId;
use common::utils::bytes_to_hex_prefix;
use interfaces::indications::{HarqValue, Indication, IndicationClass};
use interfaces::{IndicationQueue, IndicationQueues};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// What one consumer saw over its lifetime
#[derive(Debug, Clone, Serialize)]
pub struct DrainSummary {
    pub class: IndicationClass,
    pub messages: u64,
    /// Entries across all messages (PDUs, CRCs, UCIs or occasions)
    pub entries: u64,
    pub last_slot: Option<SlotId>,
}

/// Consume `queue` until it is closed and empty
pub fn drain_queue<T: Indication>(
    queue: &IndicationQueue<T>,
    mut handle: impl FnMut(&T) -> usize,
) -> DrainSummary {
    let mut summary = DrainSummary {
        class: T::CLASS,
        messages: 0,
        entries: 0,
        last_slot: None,
    };
    
    while let Some(msg) = queue.get() {
        summary.messages += 1;
        summary.entries += handle(&msg) as u64;
        summary.last_slot = Some(msg.slot());
    }
    
    debug!(
        "{} consumer done: {} messages, {} entries",
        T::CLASS.name(), summary.messages, summary.entries
    );
    summary
}

/// Start a blocking consumer on each of the four queues
pub fn spawn_drains(queues: Arc<IndicationQueues>) -> Vec<JoinHandle<DrainSummary>> {
    let rx_data = Arc::clone(&queues);
    let crc = Arc::clone(&queues);
    let uci = Arc::clone(&queues);
    let rach = queues;
    
    vec![
        tokio::task::spawn_blocking(move || {
            drain_queue(&rx_data.rx_data, |ind| {
                for pdu in &ind.pdus {
                    trace!(
                        "RX_DATA {} rnti {:#06x} harq {}: {}",
                        ind.slot, pdu.rnti.value(), pdu.harq_id,
                        bytes_to_hex_prefix(&pdu.payload, 16)
                    );
                }
                ind.pdus.len()
            })
        }),
        tokio::task::spawn_blocking(move || {
            drain_queue(&crc.crc, |ind| {
                for pdu in ind.crcs.iter().filter(|c| !c.tb_crc_ok) {
                    warn!("CRC failure at {} for rnti {:#06x} harq {}", ind.slot, pdu.rnti.value(), pdu.harq_id);
                }
                ind.crcs.len()
            })
        }),
        tokio::task::spawn_blocking(move || {
            drain_queue(&uci.uci, |ind| {
                for pdu in &ind.ucis {
                    let nacks = pdu.harq.iter().filter(|h| h.value == HarqValue::Nack).count();
                    if nacks > 0 {
                        debug!("UCI {} rnti {:#06x}: {} NACK", ind.slot, pdu.rnti.value(), nacks);
                    }
                    if pdu.sr == Some(true) {
                        debug!("Scheduling request at {} from rnti {:#06x}", ind.slot, pdu.rnti.value());
                    }
                }
                ind.ucis.len()
            })
        }),
        tokio::task::spawn_blocking(move || {
            drain_queue(&rach.rach, |ind| {
                for pdu in &ind.pdus {
                    for preamble in &pdu.preambles {
                        info!(
                            "RACH at {}: preamble {} TA {}",
                            ind.slot, preamble.preamble_index, preamble.timing_advance
                        );
                    }
                }
                ind.pdus.len()
            })
        }),
    ]
}
