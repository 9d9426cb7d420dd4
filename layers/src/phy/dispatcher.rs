//! Slot PDU Dispatcher
//! 
//! Walks the scheduler's per-slot list in order and files every record into
//! the slot store. Data channels go through the HARQ state machine first;
//! channels that must not be processed stay in the store marked suppressed,
//! and their feedback is reported instead.

use crate::phy::harq::{HarqDirection, HarqEntity, HarqTransition};
use crate::phy::slot_store::{
    ChannelState, DataChannel, DataDescriptor, SlotPduStore, StampedPdu, SuppressReason,
};
use crate::phy::timing::SessionTiming;
use crate::LayerError;
use common::types::{DmrsPorts, DuplexMode, Pci, Rnti, SlotId, SubcarrierSpacing};
use interfaces::fapi::{PduType, SlotPdu, SlotRequest};
use interfaces::indications::HarqValue;
use tracing::{debug, trace, warn};

/// HARQ feedback produced while dispatching, for channels that were not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarqFeedbackEvent {
    pub pdu_index: usize,
    pub direction: HarqDirection,
    pub rnti: Rnti,
    pub harq_pid: u8,
    /// PUSCH handle, for uplink feedback reported as CRC; 0 for downlink
    pub handle: u32,
    pub num_cb: u16,
    pub value: HarqValue,
    pub reason: SuppressReason,
}

/// Summary of one dispatched slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub slot: SlotId,
    /// Records filed into the store
    pub dispatched: usize,
    /// Records skipped for an unknown type tag
    pub unknown: usize,
    /// Data channels stored but not to be processed
    pub suppressed: usize,
    /// In PDU order
    pub feedback: Vec<HarqFeedbackEvent>,
}

/// Shared-channel fields the HARQ path needs
struct DataGrant {
    direction: HarqDirection,
    rnti: Rnti,
    harq_pid: u8,
    new_data: bool,
    dmrs_ports: DmrsPorts,
    handle: u32,
    num_cb: u16,
    descriptor: DataDescriptor,
}

pub struct PduDispatcher {
    duplex: DuplexMode,
    slots_per_frame: u16,
    unknown_total: u64,
}

impl PduDispatcher {
    pub fn new(duplex: DuplexMode, scs: SubcarrierSpacing) -> Self {
        Self {
            duplex,
            slots_per_frame: scs.slots_per_frame(),
            unknown_total: 0,
        }
    }

    /// Unknown records skipped since startup
    pub fn unknown_total(&self) -> u64 {
        self.unknown_total
    }

    /// File one slot's records into `store`
    ///
    /// The request list is empty afterwards, its storage kept for the next
    /// slot.
    pub fn dispatch(
        &mut self,
        request: &mut SlotRequest,
        store: &mut SlotPduStore,
        harq: &mut HarqEntity,
        session: &mut SessionTiming,
    ) -> Result<DispatchReport, LayerError> {
        let slot = request.slot;
        let slot_type = self.duplex.slot_type(slot.absolute(self.slots_per_frame));
        let mut report = DispatchReport {
            slot,
            ..Default::default()
        };
        
        for (pdu_index, pdu) in request.pdus.drain(..).enumerate() {
            if let Some(pdu_type) = pdu.pdu_type() {
                if pdu_type.is_downlink() && !slot_type.carries_downlink() {
                    return Err(LayerError::InvalidPdu(format!(
                        "{} PDU {} scheduled in uplink slot {}",
                        pdu_type.name(), pdu_index, slot
                    )));
                }
            }
            trace!("Dispatching PDU {} type {} in {}", pdu_index, pdu.type_code(), slot);
            
            match pdu {
                SlotPdu::Dci(dci) => {
                    store.dci.push(StampedPdu::new(slot, pdu_index, dci))?;
                }
                SlotPdu::Ssb(ssb) => {
                    if ssb.bch_payload.is_none() {
                        return Err(LayerError::InvalidPdu(format!(
                            "SSB {} in {} carries no BCH payload",
                            ssb.ssb_index, slot
                        )));
                    }
                    if Pci::new(ssb.pci.0).is_none() {
                        return Err(LayerError::InvalidPdu(format!(
                            "SSB {} in {} has out-of-range PCI {}",
                            ssb.ssb_index, slot, ssb.pci.0
                        )));
                    }
                    let index = ssb.ssb_index as usize;
                    store.ssb.insert_at(index, StampedPdu::new(slot, pdu_index, ssb))?;
                }
                SlotPdu::CsiRs(csi_rs) => {
                    store.csi_rs.push(StampedPdu::new(slot, pdu_index, csi_rs))?;
                }
                SlotPdu::CsiIm(csi_im) => {
                    store.csi_im.push(StampedPdu::new(slot, pdu_index, csi_im))?;
                }
                SlotPdu::Dlsch(dlsch) => {
                    let grant = DataGrant {
                        direction: HarqDirection::Downlink,
                        rnti: dlsch.rnti,
                        harq_pid: dlsch.harq_pid,
                        new_data: dlsch.new_data,
                        dmrs_ports: dlsch.dmrs_ports,
                        handle: 0,
                        num_cb: 1,
                        descriptor: DataDescriptor::Dlsch(dlsch),
                    };
                    self.dispatch_data(slot, pdu_index, grant, store, harq, &mut report)?;
                }
                SlotPdu::Pusch(pusch) => {
                    let grant = DataGrant {
                        direction: HarqDirection::Uplink,
                        rnti: pusch.rnti,
                        harq_pid: pusch.harq_pid,
                        new_data: pusch.new_data,
                        dmrs_ports: pusch.dmrs_ports,
                        handle: pusch.handle,
                        num_cb: pusch.num_cb,
                        descriptor: DataDescriptor::Pusch(pusch),
                    };
                    self.dispatch_data(slot, pdu_index, grant, store, harq, &mut report)?;
                }
                SlotPdu::Prach(prach) => {
                    store.prach.push(StampedPdu::new(slot, pdu_index, prach))?;
                }
                SlotPdu::Pucch(pucch) => {
                    store.pucch.push(StampedPdu::new(slot, pdu_index, pucch))?;
                }
                SlotPdu::Srs(srs) => {
                    store.srs.push(StampedPdu::new(slot, pdu_index, srs))?;
                }
                SlotPdu::TaCommand(ta) => {
                    session.apply_ta_command(&ta)?;
                }
                SlotPdu::NtnConfig(ntn) => {
                    session.apply_ntn(&ntn);
                }
                SlotPdu::Unrecognized { type_code } => {
                    warn!(
                        "Skipping PDU {} with unknown type {} ({}) in {}",
                        pdu_index,
                        type_code,
                        PduType::from_code(type_code).map(|t| t.name()).unwrap_or("?"),
                        slot
                    );
                    report.unknown += 1;
                    self.unknown_total += 1;
                    continue;
                }
            }
            report.dispatched += 1;
        }
        
        debug!(
            "Slot {} dispatched: {} stored, {} unknown, {} suppressed",
            slot, report.dispatched, report.unknown, report.suppressed
        );
        Ok(report)
    }

    fn dispatch_data(
        &self,
        slot: SlotId,
        pdu_index: usize,
        grant: DataGrant,
        store: &mut SlotPduStore,
        harq: &mut HarqEntity,
        report: &mut DispatchReport,
    ) -> Result<(), LayerError> {
        let table = harq.table_mut(grant.direction);
        let pid = grant.harq_pid;
        table.get(pid)?;
        
        // Layers are resolved before the process is touched
        let num_layers = grant.dmrs_ports.num_layers();
        let suppressed = if num_layers == 0 {
            warn!(
                "{} grant for RNTI {:#06x} HARQ {} in {} has no DMRS port, reporting NACK",
                grant.direction.name(), grant.rnti.value(), pid, slot
            );
            Some((SuppressReason::ZeroLayers, table.force_nack(pid)?))
        } else {
            match table.on_scheduled(pid, grant.new_data, slot)? {
                HarqTransition::NewData | HarqTransition::Retransmission { .. } => None,
                HarqTransition::RoundsExhausted => Some((SuppressReason::RoundsExhausted, HarqValue::Nack)),
                HarqTransition::FalseRetransmission { stale } => {
                    Some((SuppressReason::FalseRetransmission, stale))
                }
            }
        };
        
        let state = match suppressed {
            Some((reason, value)) => {
                report.suppressed += 1;
                report.feedback.push(HarqFeedbackEvent {
                    pdu_index,
                    direction: grant.direction,
                    rnti: grant.rnti,
                    harq_pid: pid,
                    handle: grant.handle,
                    num_cb: grant.num_cb,
                    value,
                    reason,
                });
                ChannelState::Suppressed(reason)
            }
            None => ChannelState::Scheduled,
        };
        
        let channel = DataChannel {
            direction: grant.direction,
            rnti: grant.rnti,
            harq_pid: pid,
            num_layers,
            state,
            harq: *table.get(pid)?,
            descriptor: grant.descriptor,
        };
        store.data.push(StampedPdu::new(slot, pdu_index, channel))?;
        Ok(())
    }
}
