//! Per-Slot PDU Storage
//! 
//! Fixed-capacity arenas, one per PDU category, holding the records the
//! dispatcher accepted for one slot. Entries are stamped with the slot and
//! their position in the scheduler's list so outcomes can be reported in
//! request order.

use crate::phy::harq::{HarqDirection, HarqProcessRecord};
use crate::LayerError;
use common::types::{Rnti, SlotId};
use interfaces::fapi::{
    CsiImPdu, CsiRsPdu, DciPdu, DlschPdu, PrachPdu, PucchPdu, PuschPdu, SrsPdu, SsbPdu,
};
use serde::{Deserialize, Serialize};

/// A stored record with its slot stamp
#[derive(Debug, Clone, PartialEq)]
pub struct StampedPdu<T> {
    pub slot: SlotId,
    /// Position in the slot's request list
    pub pdu_index: usize,
    pub pdu: T,
}

impl<T> StampedPdu<T> {
    pub fn new(slot: SlotId, pdu_index: usize, pdu: T) -> Self {
        Self { slot, pdu_index, pdu }
    }
}

/// Fixed-capacity arena with occupied/free entries
#[derive(Debug)]
pub struct PduArena<T> {
    category: &'static str,
    entries: Vec<Option<StampedPdu<T>>>,
}

impl<T> PduArena<T> {
    pub fn new(category: &'static str, capacity: usize) -> Self {
        Self {
            category,
            entries: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Store in the first free entry
    pub fn push(&mut self, entry: StampedPdu<T>) -> Result<usize, LayerError> {
        match self.entries.iter().position(Option::is_none) {
            Some(index) => {
                self.entries[index] = Some(entry);
                Ok(index)
            }
            None => Err(LayerError::CapacityExceeded {
                category: self.category,
                capacity: self.entries.len(),
                slot: entry.slot,
            }),
        }
    }

    /// Store at a fixed index, which must be free
    pub fn insert_at(&mut self, index: usize, entry: StampedPdu<T>) -> Result<(), LayerError> {
        let capacity = self.entries.len();
        let category = self.category;
        let slot = entry.slot;
        match self.entries.get_mut(index) {
            None => Err(LayerError::IndexOutOfRange { category, index, capacity }),
            Some(Some(_)) => Err(LayerError::SlotIndexBusy { category, index, slot }),
            Some(free) => {
                *free = Some(entry);
                Ok(())
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&StampedPdu<T>> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut StampedPdu<T>> {
        self.entries.get_mut(index).and_then(Option::as_mut)
    }

    /// Consume an entry, freeing it
    pub fn take(&mut self, index: usize) -> Option<StampedPdu<T>> {
        self.entries.get_mut(index).and_then(Option::take)
    }

    pub fn iter_active(&self) -> impl Iterator<Item = (usize, &StampedPdu<T>)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|e| (index, e)))
    }

    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn category(&self) -> &'static str {
        self.category
    }
}

/// Why a data channel will not be processed this slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressReason {
    FalseRetransmission,
    ZeroLayers,
    RoundsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Scheduled,
    Suppressed(SuppressReason),
}

/// Scheduling record behind a data channel
#[derive(Debug, Clone, PartialEq)]
pub enum DataDescriptor {
    Dlsch(DlschPdu),
    Pusch(PuschPdu),
}

/// Downlink or uplink shared channel accepted for a slot
#[derive(Debug, Clone, PartialEq)]
pub struct DataChannel {
    pub direction: HarqDirection,
    pub rnti: Rnti,
    pub harq_pid: u8,
    pub num_layers: u8,
    pub state: ChannelState,
    /// HARQ process state as published by the dispatcher
    pub harq: HarqProcessRecord,
    pub descriptor: DataDescriptor,
}

impl DataChannel {
    pub fn is_scheduled(&self) -> bool {
        self.state == ChannelState::Scheduled
    }
}

/// Capacity of each PDU category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCapacities {
    #[serde(default = "default_dci")]
    pub dci: usize,
    #[serde(default = "default_ssb")]
    pub ssb: usize,
    #[serde(default = "default_csi_rs")]
    pub csi_rs: usize,
    #[serde(default = "default_one")]
    pub csi_im: usize,
    #[serde(default = "default_data")]
    pub data: usize,
    #[serde(default = "default_one")]
    pub prach: usize,
    #[serde(default = "default_pucch")]
    pub pucch: usize,
    #[serde(default = "default_one")]
    pub srs: usize,
}

fn default_dci() -> usize {
    10
}

fn default_ssb() -> usize {
    64
}

fn default_csi_rs() -> usize {
    common::utils::time::SYMBOLS_PER_SLOT
}

fn default_data() -> usize {
    2
}

fn default_pucch() -> usize {
    2
}

fn default_one() -> usize {
    1
}

impl Default for StoreCapacities {
    fn default() -> Self {
        Self {
            dci: default_dci(),
            ssb: default_ssb(),
            csi_rs: default_csi_rs(),
            csi_im: default_one(),
            data: default_data(),
            prach: default_one(),
            pucch: default_pucch(),
            srs: default_one(),
        }
    }
}

/// All PDU arenas of one slot context
#[derive(Debug)]
pub struct SlotPduStore {
    slot: SlotId,
    pub dci: PduArena<DciPdu>,
    /// Indexed by SSB block index
    pub ssb: PduArena<SsbPdu>,
    pub csi_rs: PduArena<CsiRsPdu>,
    pub csi_im: PduArena<CsiImPdu>,
    pub data: PduArena<DataChannel>,
    pub prach: PduArena<PrachPdu>,
    pub pucch: PduArena<PucchPdu>,
    pub srs: PduArena<SrsPdu>,
}

impl SlotPduStore {
    pub fn new(capacities: &StoreCapacities) -> Self {
        Self {
            slot: SlotId::default(),
            dci: PduArena::new("DCI", capacities.dci),
            ssb: PduArena::new("SSB", capacities.ssb),
            csi_rs: PduArena::new("CSI-RS", capacities.csi_rs),
            csi_im: PduArena::new("CSI-IM", capacities.csi_im),
            data: PduArena::new("data channel", capacities.data),
            prach: PduArena::new("PRACH", capacities.prach),
            pucch: PduArena::new("PUCCH", capacities.pucch),
            srs: PduArena::new("SRS", capacities.srs),
        }
    }

    /// Drop everything left from the previous use and stamp the new slot
    pub fn begin_slot(&mut self, slot: SlotId) {
        self.slot = slot;
        self.dci.clear();
        self.ssb.clear();
        self.csi_rs.clear();
        self.csi_im.clear();
        self.data.clear();
        self.prach.clear();
        self.pucch.clear();
        self.srs.clear();
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Any downlink record to put on air
    pub fn has_downlink(&self) -> bool {
        self.dci.active_count() > 0
            || self.ssb.active_count() > 0
            || self.csi_rs.active_count() > 0
            || self.csi_im.active_count() > 0
            || self
                .data
                .iter_active()
                .any(|(_, e)| e.pdu.direction == HarqDirection::Downlink && e.pdu.is_scheduled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::Pci;

    fn ssb(index: u8) -> SsbPdu {
        SsbPdu {
            pci: Pci(1),
            ssb_index: index,
            bch_payload: Some(0x1234),
        }
    }

    #[test]
    fn test_push_uses_first_free_entry() {
        let slot = SlotId::new(2, 4);
        let mut arena = PduArena::new("CSI-IM", 2);
        assert_eq!(arena.push(StampedPdu::new(slot, 0, 'a')).unwrap(), 0);
        assert_eq!(arena.push(StampedPdu::new(slot, 1, 'b')).unwrap(), 1);
        assert_eq!(arena.take(0).unwrap().pdu, 'a');
        assert_eq!(arena.push(StampedPdu::new(slot, 2, 'c')).unwrap(), 0);
        
        let err = arena.push(StampedPdu::new(slot, 3, 'd')).unwrap_err();
        assert!(matches!(err, LayerError::CapacityExceeded { capacity: 2, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_insert_at_busy_and_out_of_range() {
        let slot = SlotId::new(0, 1);
        let mut store = SlotPduStore::new(&StoreCapacities::default());
        store.ssb.insert_at(3, StampedPdu::new(slot, 0, ssb(3))).unwrap();
        let err = store.ssb.insert_at(3, StampedPdu::new(slot, 1, ssb(3))).unwrap_err();
        assert!(matches!(err, LayerError::SlotIndexBusy { index: 3, .. }));
        let err = store.ssb.insert_at(64, StampedPdu::new(slot, 2, ssb(64))).unwrap_err();
        assert!(matches!(err, LayerError::IndexOutOfRange { index: 64, capacity: 64, .. }));
    }

    #[test]
    fn test_begin_slot_clears_everything() {
        let mut store = SlotPduStore::new(&StoreCapacities::default());
        let slot = SlotId::new(5, 0);
        store.begin_slot(slot);
        store.ssb.insert_at(0, StampedPdu::new(slot, 0, ssb(0))).unwrap();
        assert!(store.has_downlink());
        assert_eq!(store.ssb.iter_active().count(), 1);
        
        store.begin_slot(slot.advance(1, 20));
        assert_eq!(store.slot(), SlotId::new(5, 1));
        assert_eq!(store.ssb.active_count(), 0);
        assert!(!store.has_downlink());
    }

    #[test]
    fn test_default_capacities() {
        let caps = StoreCapacities::default();
        assert_eq!(caps.dci, 10);
        assert_eq!(caps.ssb, 64);
        assert_eq!(caps.csi_rs, 14);
        assert_eq!(caps.data, 2);
        assert_eq!((caps.csi_im, caps.prach, caps.srs), (1, 1, 1));
    }
}
