//! Indication Messages for L1 to Scheduler Reporting
//! 
//! Defines the outcome reports L1 hands upwards once a slot is finalized.
//! The upper stage owns their interpretation; L1 only fills and queues them.

use bytes::Bytes;
use common::types::{Rnti, SlotId};
use serde::{Deserialize, Serialize};

/// Indication classes, one queue each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicationClass {
    RxData,
    Crc,
    Uci,
    Rach,
}

impl IndicationClass {
    pub fn name(&self) -> &'static str {
        match self {
            IndicationClass::RxData => "rx_data",
            IndicationClass::Crc => "crc",
            IndicationClass::Uci => "uci",
            IndicationClass::Rach => "rach",
        }
    }
}

/// Common view over indication messages
pub trait Indication: Send + 'static {
    const CLASS: IndicationClass;

    /// Slot the reported outcome belongs to
    fn slot(&self) -> SlotId;
}

/// HARQ acknowledgement value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarqValue {
    Ack,
    Nack,
}

impl HarqValue {
    pub fn from_crc(ok: bool) -> Self {
        if ok {
            HarqValue::Ack
        } else {
            HarqValue::Nack
        }
    }
}

/// Received transport block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxDataPdu {
    pub handle: u32,
    pub rnti: Rnti,
    pub harq_id: u8,
    pub payload: Bytes,
    pub timing_advance: u16,
    pub ul_cqi: u8,
}

/// RX_DATA.indication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxDataIndication {
    pub slot: SlotId,
    pub pdus: Vec<RxDataPdu>,
}

impl Indication for RxDataIndication {
    const CLASS: IndicationClass = IndicationClass::RxData;

    fn slot(&self) -> SlotId {
        self.slot
    }
}

/// Transport block CRC outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrcPdu {
    pub handle: u32,
    pub rnti: Rnti,
    pub harq_id: u8,
    pub tb_crc_ok: bool,
    pub num_cb: u16,
    pub timing_advance: u16,
    pub ul_cqi: u8,
}

/// CRC.indication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrcIndication {
    pub slot: SlotId,
    pub crcs: Vec<CrcPdu>,
}

impl Indication for CrcIndication {
    const CLASS: IndicationClass = IndicationClass::Crc;

    fn slot(&self) -> SlotId {
        self.slot
    }
}

/// HARQ feedback for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UciHarq {
    pub harq_pid: u8,
    pub value: HarqValue,
}

/// Uplink control information for one RNTI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UciPdu {
    pub rnti: Rnti,
    pub harq: Vec<UciHarq>,
    /// Scheduling request, when one was carried
    pub sr: Option<bool>,
    /// CSI part 1 bits, little-endian bytes
    pub csi_part1: Option<Bytes>,
    pub ul_cqi: u8,
}

/// UCI.indication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UciIndication {
    pub slot: SlotId,
    pub ucis: Vec<UciPdu>,
}

impl Indication for UciIndication {
    const CLASS: IndicationClass = IndicationClass::Uci;

    fn slot(&self) -> SlotId {
        self.slot
    }
}

/// Detected preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RachPreamble {
    pub preamble_index: u8,
    pub timing_advance: u16,
    pub preamble_power: u32,
}

/// Detections on one random-access occasion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RachPdu {
    pub phy_cell_id: u16,
    pub symbol_index: u8,
    pub slot_index: u8,
    pub freq_index: u8,
    pub avg_rssi: u8,
    pub avg_snr: u8,
    pub preambles: Vec<RachPreamble>,
}

/// RACH.indication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RachIndication {
    pub slot: SlotId,
    pub pdus: Vec<RachPdu>,
}

impl Indication for RachIndication {
    const CLASS: IndicationClass = IndicationClass::Rach;

    fn slot(&self) -> SlotId {
        self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_indication_serialization() {
        let ind = RxDataIndication {
            slot: SlotId::new(10, 3),
            pdus: vec![RxDataPdu {
                handle: 7,
                rnti: Rnti(0x4601),
                harq_id: 2,
                payload: Bytes::from_static(&[0x01, 0x02, 0x03]),
                timing_advance: 31,
                ul_cqi: 255,
            }],
        };
        
        let serialized = serde_json::to_string(&ind).unwrap();
        let deserialized: RxDataIndication = serde_json::from_str(&serialized).unwrap();
        
        assert_eq!(ind, deserialized);
        assert_eq!(deserialized.slot(), SlotId::new(10, 3));
        assert_eq!(RxDataIndication::CLASS.name(), "rx_data");
    }

    #[test]
    fn test_harq_value_from_crc() {
        assert_eq!(HarqValue::from_crc(true), HarqValue::Ack);
        assert_eq!(HarqValue::from_crc(false), HarqValue::Nack);
    }
}
