//! FAPI-style Slot Configuration Records
//! 
//! Typed PDU records the scheduler hands to L1 once per slot. Each record
//! carries a numeric type tag so that records produced by a newer scheduler
//! can still travel through the list and be skipped by this L1.

use bytes::Bytes;
use common::types::{DmrsPorts, Pci, Rnti, SlotId};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// PDU type tags understood by this L1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum PduType {
    Dci = 1,
    Dlsch = 2,
    CsiRs = 6,
    CsiIm = 7,
    TaCommand = 8,
    NtnConfig = 9,
    Ssb = 10,
    Prach = 16,
    Pucch = 17,
    Pusch = 18,
    Srs = 19,
}

impl PduType {
    /// Decode a raw type tag, `None` for tags outside the known set
    pub fn from_code(code: u16) -> Option<Self> {
        FromPrimitive::from_u16(code)
    }

    /// Raw type tag
    pub fn code(&self) -> u16 {
        ToPrimitive::to_u16(self).unwrap_or(0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PduType::Dci => "DCI",
            PduType::Dlsch => "DLSCH",
            PduType::CsiRs => "CSI_RS",
            PduType::CsiIm => "CSI_IM",
            PduType::TaCommand => "TA",
            PduType::NtnConfig => "NTN",
            PduType::Ssb => "SSB",
            PduType::Prach => "PRACH",
            PduType::Pucch => "PUCCH",
            PduType::Pusch => "PUSCH",
            PduType::Srs => "SRS",
        }
    }

    /// True for records that need a downlink-capable slot
    pub fn is_downlink(&self) -> bool {
        matches!(
            self,
            PduType::Dci | PduType::Dlsch | PduType::CsiRs | PduType::CsiIm | PduType::Ssb
        )
    }
}

/// RNTI type of a downlink shared-channel grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RntiType {
    /// Cell RNTI (dedicated data)
    C,
    /// Random-access RNTI
    Ra,
    /// System-information RNTI
    Si,
    /// Paging RNTI
    P,
}

/// PDCCH / DCI search-space configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DciPdu {
    pub rnti: Rnti,
    pub coreset_id: u8,
    pub search_space_id: u8,
    pub aggregation_level: u8,
    /// DCI payload bits, LSB first
    pub payload: u64,
    pub payload_bits: u8,
}

/// SS/PBCH block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsbPdu {
    pub pci: Pci,
    /// SSB block index within the burst
    pub ssb_index: u8,
    /// MIB payload; the L1 does not generate it
    pub bch_payload: Option<u32>,
}

/// CSI-RS resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiRsPdu {
    pub start_rb: u16,
    pub nr_of_rbs: u16,
    /// Row of 38.211 Table 7.4.1.5.3-1
    pub row: u8,
    pub symbol_l0: u8,
    pub scramble_id: u16,
}

/// CSI interference-measurement resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiImPdu {
    pub start_rb: u16,
    pub nr_of_rbs: u16,
    pub symbol: u8,
}

/// Downlink shared-channel grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlschPdu {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub harq_pid: u8,
    pub new_data: bool,
    pub rv: u8,
    pub dmrs_ports: DmrsPorts,
    pub mcs: u8,
    pub tbs_bytes: u32,
    pub start_rb: u16,
    pub num_rbs: u16,
    /// Slots between reception and HARQ feedback (k1)
    pub k1_feedback: u8,
}

/// Uplink shared-channel grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuschPdu {
    pub handle: u32,
    pub rnti: Rnti,
    pub harq_pid: u8,
    pub new_data: bool,
    pub rv: u8,
    pub dmrs_ports: DmrsPorts,
    pub mcs: u8,
    pub num_cb: u16,
    /// Transport block to send; absent when the MAC had nothing to send
    pub tx_payload: Option<Bytes>,
}

/// Random-access occasion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrachPdu {
    pub phys_cell_id: u16,
    pub num_ra: u8,
    pub prach_start_symbol: u8,
    pub prach_slot: u8,
    pub preamble_index: u8,
}

/// Uplink control channel occasion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchPdu {
    pub rnti: Rnti,
    pub format: u8,
    /// Number of UCI bits carried
    pub n_bit: u8,
    pub sr_flag: bool,
    pub payload: u64,
}

/// Sounding reference signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrsPdu {
    pub rnti: Rnti,
    pub num_ant_ports: u8,
    pub num_symbols: u8,
    pub time_start_position: u8,
}

/// Timing-advance command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaCommandPdu {
    pub ta_frame: u16,
    pub ta_slot: u8,
    pub ta_command: u16,
    /// Command received in a random-access response
    pub is_rar: bool,
}

/// Cell-specific non-terrestrial timing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NtnConfigPdu {
    pub cell_specific_k_offset: u16,
    pub n_common_ta_adj: f64,
    pub ntn_ta_common_drift: f64,
    pub ntn_total_time_advance_ms: f64,
}

/// One record of a slot configuration list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotPdu {
    Dci(DciPdu),
    Ssb(SsbPdu),
    CsiRs(CsiRsPdu),
    CsiIm(CsiImPdu),
    Dlsch(DlschPdu),
    Pusch(PuschPdu),
    Prach(PrachPdu),
    Pucch(PucchPdu),
    Srs(SrsPdu),
    TaCommand(TaCommandPdu),
    NtnConfig(NtnConfigPdu),
    /// A record whose tag this L1 does not know
    Unrecognized { type_code: u16 },
}

impl SlotPdu {
    /// Known type of the record; `None` for unrecognized records, whatever their tag
    pub fn pdu_type(&self) -> Option<PduType> {
        match self {
            SlotPdu::Dci(_) => Some(PduType::Dci),
            SlotPdu::Ssb(_) => Some(PduType::Ssb),
            SlotPdu::CsiRs(_) => Some(PduType::CsiRs),
            SlotPdu::CsiIm(_) => Some(PduType::CsiIm),
            SlotPdu::Dlsch(_) => Some(PduType::Dlsch),
            SlotPdu::Pusch(_) => Some(PduType::Pusch),
            SlotPdu::Prach(_) => Some(PduType::Prach),
            SlotPdu::Pucch(_) => Some(PduType::Pucch),
            SlotPdu::Srs(_) => Some(PduType::Srs),
            SlotPdu::TaCommand(_) => Some(PduType::TaCommand),
            SlotPdu::NtnConfig(_) => Some(PduType::NtnConfig),
            SlotPdu::Unrecognized { .. } => None,
        }
    }

    /// Raw type tag as it travelled on the interface
    pub fn type_code(&self) -> u16 {
        match self {
            SlotPdu::Unrecognized { type_code } => *type_code,
            other => other.pdu_type().map(|t| t.code()).unwrap_or(0),
        }
    }
}

/// Per-slot configuration list from the scheduler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotRequest {
    pub slot: SlotId,
    pub pdus: Vec<SlotPdu>,
}

impl SlotRequest {
    pub fn new(slot: SlotId) -> Self {
        Self { slot, pdus: Vec::new() }
    }

    /// Start a new slot, reusing the list storage
    pub fn reset(&mut self, slot: SlotId) {
        self.slot = slot;
        self.pdus.clear();
    }

    pub fn push(&mut self, pdu: SlotPdu) -> &mut Self {
        self.pdus.push(pdu);
        self
    }
}

/// Downlink transport block referenced by position in the slot's PDU list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxDataPdu {
    pub pdu_index: u16,
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_type_codes() {
        assert_eq!(PduType::from_code(18), Some(PduType::Pusch));
        assert_eq!(PduType::from_code(3), None);
        assert_eq!(PduType::Srs.code(), 19);
        assert!(PduType::Ssb.is_downlink());
        assert!(!PduType::Prach.is_downlink());
    }

    #[test]
    fn test_unrecognized_tag_kept() {
        let pdu = SlotPdu::Unrecognized { type_code: 42 };
        assert_eq!(pdu.pdu_type(), None);
        assert_eq!(pdu.type_code(), 42);
        
        let colliding = SlotPdu::Unrecognized { type_code: PduType::Dlsch.code() };
        assert_eq!(colliding.pdu_type(), None);
        assert_eq!(colliding.type_code(), 2);

        let srs = SlotPdu::Srs(SrsPdu {
            rnti: Rnti(0x4601),
            num_ant_ports: 1,
            num_symbols: 1,
            time_start_position: 13,
        });
        assert_eq!(srs.type_code(), PduType::Srs.code());
    }

    #[test]
    fn test_request_reuses_storage() {
        let mut request = SlotRequest::new(SlotId::new(1, 2));
        request.push(SlotPdu::Unrecognized { type_code: 99 });
        let cap = request.pdus.capacity();
        request.reset(SlotId::new(1, 3));
        assert!(request.pdus.is_empty());
        assert_eq!(request.pdus.capacity(), cap);
        assert_eq!(request.slot, SlotId::new(1, 3));
    }
}
