//! HARQ Process Tracking
//! 
//! Per-direction tables of HARQ processes, sized once at startup. The
//! dispatcher drives the transmission state machine when a data channel is
//! scheduled; the slot finalize step applies decode outcomes.

use crate::LayerError;
use common::types::SlotId;
use interfaces::indications::HarqValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Direction served by a HARQ table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarqDirection {
    Downlink,
    Uplink,
}

impl HarqDirection {
    pub fn name(&self) -> &'static str {
        match self {
            HarqDirection::Downlink => "DL",
            HarqDirection::Uplink => "UL",
        }
    }
}

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HarqStatus {
    #[default]
    Inactive,
    Active,
}

/// Outcome of the latest decode attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecodeResult {
    #[default]
    Pending,
    Ack,
    Nack,
}

/// State of one HARQ process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HarqProcessRecord {
    /// Transport block still awaiting acknowledgement
    pub active: bool,
    /// The latest scheduling carried new data
    pub is_first_transmission: bool,
    /// Retransmission count of the current transport block
    pub round: u8,
    pub status: HarqStatus,
    pub decode_result: DecodeResult,
    /// Slot the process was last scheduled in
    pub associated: Option<SlotId>,
}

/// Result of scheduling a data channel on a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqTransition {
    NewData,
    Retransmission { round: u8 },
    /// Retransmission requested beyond the round limit; terminal failure
    RoundsExhausted,
    /// Retransmission requested on a process with nothing to retransmit
    FalseRetransmission { stale: HarqValue },
}

/// Feedback reported for a false retransmission
///
/// The upper stage asked to retransmit something this L1 no longer holds, so
/// it gets back the last known decode outcome. Anything but a confirmed Ack
/// is reported as Nack.
pub fn stale_feedback(record: &HarqProcessRecord) -> HarqValue {
    match record.decode_result {
        DecodeResult::Ack => HarqValue::Ack,
        DecodeResult::Pending | DecodeResult::Nack => HarqValue::Nack,
    }
}

/// Fixed-size table of HARQ processes for one direction
#[derive(Debug, Clone)]
pub struct HarqProcessTable {
    direction: HarqDirection,
    max_rounds: u8,
    processes: Vec<HarqProcessRecord>,
}

impl HarqProcessTable {
    pub fn new(direction: HarqDirection, num_processes: usize, max_rounds: u8) -> Result<Self, LayerError> {
        if num_processes == 0 || num_processes > u8::MAX as usize + 1 {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} HARQ process count {} out of range",
                direction.name(),
                num_processes
            )));
        }
        if max_rounds == 0 {
            return Err(LayerError::InvalidConfiguration(
                "maximum HARQ rounds must be at least 1".into(),
            ));
        }
        
        Ok(Self {
            direction,
            max_rounds,
            processes: vec![HarqProcessRecord::default(); num_processes],
        })
    }

    pub fn direction(&self) -> HarqDirection {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn max_rounds(&self) -> u8 {
        self.max_rounds
    }

    pub fn get(&self, pid: u8) -> Result<&HarqProcessRecord, LayerError> {
        let size = self.processes.len();
        self.processes
            .get(pid as usize)
            .ok_or(LayerError::InvalidHarqProcess { pid, size })
    }

    fn get_mut(&mut self, pid: u8) -> Result<&mut HarqProcessRecord, LayerError> {
        let size = self.processes.len();
        self.processes
            .get_mut(pid as usize)
            .ok_or(LayerError::InvalidHarqProcess { pid, size })
    }

    /// Apply a scheduling decision for `pid`
    pub fn on_scheduled(&mut self, pid: u8, new_data: bool, slot: SlotId) -> Result<HarqTransition, LayerError> {
        let direction = self.direction;
        let max_rounds = self.max_rounds;
        let process = self.get_mut(pid)?;
        
        if new_data {
            *process = HarqProcessRecord {
                active: true,
                is_first_transmission: true,
                round: 0,
                status: HarqStatus::Active,
                decode_result: DecodeResult::Pending,
                associated: Some(slot),
            };
            debug!("{} HARQ {} new data in {}", direction.name(), pid, slot);
            return Ok(HarqTransition::NewData);
        }
        
        process.is_first_transmission = false;
        if process.status != HarqStatus::Active {
            let stale = stale_feedback(process);
            warn!(
                "{} HARQ {} false retransmission in {} (last decode {:?}), reporting {:?}",
                direction.name(), pid, slot, process.decode_result, stale
            );
            return Ok(HarqTransition::FalseRetransmission { stale });
        }
        
        if process.round.saturating_add(1) >= max_rounds {
            process.active = false;
            process.status = HarqStatus::Inactive;
            process.decode_result = DecodeResult::Nack;
            warn!(
                "{} HARQ {} exhausted {} rounds in {}",
                direction.name(), pid, max_rounds, slot
            );
            return Ok(HarqTransition::RoundsExhausted);
        }
        
        process.round += 1;
        process.decode_result = DecodeResult::Pending;
        process.associated = Some(slot);
        debug!("{} HARQ {} retransmission round {} in {}", direction.name(), pid, process.round, slot);
        Ok(HarqTransition::Retransmission { round: process.round })
    }

    /// Apply a decode outcome
    ///
    /// Ack releases the process; Nack keeps it active for a retransmission.
    pub fn record_decode(&mut self, pid: u8, crc_ok: bool) -> Result<HarqValue, LayerError> {
        let process = self.get_mut(pid)?;
        if crc_ok {
            process.decode_result = DecodeResult::Ack;
            process.status = HarqStatus::Inactive;
            process.active = false;
        } else {
            process.decode_result = DecodeResult::Nack;
        }
        Ok(HarqValue::from_crc(crc_ok))
    }

    /// Mark the latest attempt as failed without a decode
    pub fn force_nack(&mut self, pid: u8) -> Result<HarqValue, LayerError> {
        let process = self.get_mut(pid)?;
        process.decode_result = DecodeResult::Nack;
        Ok(HarqValue::Nack)
    }

    pub fn reset(&mut self, pid: u8) -> Result<(), LayerError> {
        *self.get_mut(pid)? = HarqProcessRecord::default();
        Ok(())
    }

    pub fn reset_all(&mut self) {
        self.processes.fill(HarqProcessRecord::default());
    }
}

/// Downlink and uplink HARQ tables of one cell
#[derive(Debug, Clone)]
pub struct HarqEntity {
    pub dl: HarqProcessTable,
    pub ul: HarqProcessTable,
}

impl HarqEntity {
    pub fn new(num_dl: usize, num_ul: usize, max_rounds: u8) -> Result<Self, LayerError> {
        Ok(Self {
            dl: HarqProcessTable::new(HarqDirection::Downlink, num_dl, max_rounds)?,
            ul: HarqProcessTable::new(HarqDirection::Uplink, num_ul, max_rounds)?,
        })
    }

    pub fn table(&self, direction: HarqDirection) -> &HarqProcessTable {
        match direction {
            HarqDirection::Downlink => &self.dl,
            HarqDirection::Uplink => &self.ul,
        }
    }

    pub fn table_mut(&mut self, direction: HarqDirection) -> &mut HarqProcessTable {
        match direction {
            HarqDirection::Downlink => &mut self.dl,
            HarqDirection::Uplink => &mut self.ul,
        }
    }

    pub fn reset_all(&mut self) {
        self.dl.reset_all();
        self.ul.reset_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table() -> HarqProcessTable {
        HarqProcessTable::new(HarqDirection::Downlink, 16, 4).unwrap()
    }

    #[test]
    fn test_new_data_resets_round() {
        let mut harq = table();
        let slot = SlotId::new(1, 2);
        assert_eq!(harq.on_scheduled(3, true, slot).unwrap(), HarqTransition::NewData);
        assert_eq!(
            harq.on_scheduled(3, false, slot).unwrap(),
            HarqTransition::Retransmission { round: 1 }
        );
        assert_eq!(harq.on_scheduled(3, true, slot).unwrap(), HarqTransition::NewData);
        
        let record = harq.get(3).unwrap();
        assert_eq!(record.round, 0);
        assert!(record.is_first_transmission);
        assert_eq!(record.status, HarqStatus::Active);
        assert_eq!(record.decode_result, DecodeResult::Pending);
        assert_eq!(record.associated, Some(slot));
    }

    #[test]
    fn test_false_retransmission_keeps_state() {
        let mut harq = table();
        let transition = harq.on_scheduled(5, false, SlotId::new(0, 0)).unwrap();
        assert_eq!(transition, HarqTransition::FalseRetransmission { stale: HarqValue::Nack });
        let record = harq.get(5).unwrap();
        assert_eq!(record.round, 0);
        assert_eq!(record.status, HarqStatus::Inactive);
        assert!(!record.is_first_transmission);
    }

    #[test]
    fn test_false_retransmission_after_ack_reports_ack() {
        let mut harq = table();
        harq.on_scheduled(0, true, SlotId::new(0, 0)).unwrap();
        assert_eq!(harq.record_decode(0, true).unwrap(), HarqValue::Ack);
        assert_eq!(harq.get(0).unwrap().status, HarqStatus::Inactive);
        
        let transition = harq.on_scheduled(0, false, SlotId::new(0, 1)).unwrap();
        assert_eq!(transition, HarqTransition::FalseRetransmission { stale: HarqValue::Ack });
    }

    #[test]
    fn test_nack_keeps_process_active() {
        let mut harq = table();
        harq.on_scheduled(1, true, SlotId::new(0, 0)).unwrap();
        assert_eq!(harq.record_decode(1, false).unwrap(), HarqValue::Nack);
        let record = harq.get(1).unwrap();
        assert_eq!(record.status, HarqStatus::Active);
        assert_eq!(record.decode_result, DecodeResult::Nack);
        assert_eq!(
            harq.on_scheduled(1, false, SlotId::new(0, 8)).unwrap(),
            HarqTransition::Retransmission { round: 1 }
        );
    }

    #[test]
    fn test_rounds_exhausted() {
        let mut harq = table();
        let slot = SlotId::new(0, 0);
        harq.on_scheduled(2, true, slot).unwrap();
        for round in 1..=3 {
            assert_eq!(
                harq.on_scheduled(2, false, slot).unwrap(),
                HarqTransition::Retransmission { round }
            );
        }
        assert_eq!(harq.on_scheduled(2, false, slot).unwrap(), HarqTransition::RoundsExhausted);
        let record = harq.get(2).unwrap();
        assert_eq!(record.round, 3);
        assert_eq!(record.status, HarqStatus::Inactive);
        assert_eq!(record.decode_result, DecodeResult::Nack);
    }

    #[test]
    fn test_invalid_pid() {
        let mut harq = table();
        let err = harq.on_scheduled(16, true, SlotId::new(0, 0)).unwrap_err();
        assert!(matches!(err, LayerError::InvalidHarqProcess { pid: 16, size: 16 }));
        assert!(err.is_fatal());
        assert!(harq.get(200).is_err());
    }

    #[test]
    fn test_force_nack_and_reset() {
        let mut harq = table();
        harq.on_scheduled(4, true, SlotId::new(3, 3)).unwrap();
        assert_eq!(harq.force_nack(4).unwrap(), HarqValue::Nack);
        assert_eq!(harq.get(4).unwrap().decode_result, DecodeResult::Nack);
        harq.reset(4).unwrap();
        assert_eq!(*harq.get(4).unwrap(), HarqProcessRecord::default());
    }

    #[test]
    fn test_entity_tables_are_independent() {
        let mut entity = HarqEntity::new(16, 8, 4).unwrap();
        assert_eq!(entity.table(HarqDirection::Uplink).len(), 8);
        entity.table_mut(HarqDirection::Downlink).on_scheduled(0, true, SlotId::new(0, 0)).unwrap();
        assert_eq!(entity.dl.get(0).unwrap().status, HarqStatus::Active);
        assert_eq!(entity.ul.get(0).unwrap().status, HarqStatus::Inactive);
        entity.reset_all();
        assert_eq!(entity.dl.get(0).unwrap().status, HarqStatus::Inactive);
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(HarqProcessTable::new(HarqDirection::Uplink, 0, 4).is_err());
        assert!(HarqProcessTable::new(HarqDirection::Uplink, 8, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_is_monotonic_between_new_data(
            ops in proptest::collection::vec((any::<bool>(), proptest::option::of(any::<bool>())), 1..64)
        ) {
            let mut harq = HarqProcessTable::new(HarqDirection::Uplink, 1, 4).unwrap();
            let mut last_round = 0u8;
            for (n, (new_data, decode)) in ops.into_iter().enumerate() {
                let slot = SlotId::new(0, (n % 20) as u8);
                let transition = harq.on_scheduled(0, new_data, slot).unwrap();
                let round = harq.get(0).unwrap().round;
                match transition {
                    HarqTransition::NewData => prop_assert_eq!(round, 0),
                    HarqTransition::Retransmission { round: r } => {
                        prop_assert_eq!(r, last_round + 1);
                        prop_assert_eq!(round, r);
                    }
                    HarqTransition::RoundsExhausted | HarqTransition::FalseRetransmission { .. } => {
                        prop_assert_eq!(round, last_round);
                    }
                }
                prop_assert!(round < 4);
                last_round = round;
                if let Some(ok) = decode {
                    harq.record_decode(0, ok).unwrap();
                }
            }
        }
    }
}
