//! Physical-Layer Channel Processing Seam
//! 
//! The signal math behind each channel is opaque to the slot core: workers
//! hand a stored record to a [`ChannelProcessor`] and report whatever comes
//! back. [`LoopbackProcessor`] is an emulated L1 that needs no radio.

use crate::mac::sched_response::SchedResponse;
use crate::phy::slot_store::{DataChannel, DataDescriptor, SlotPduStore};
use bytes::Bytes;
use common::types::SlotId;
use interfaces::fapi::{PrachPdu, PucchPdu};
use interfaces::indications::HarqValue;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Decode outcome of one data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataOutcome {
    pub crc_ok: bool,
    /// Decoded transport block, uplink only
    pub payload: Option<Bytes>,
    pub timing_advance: u16,
    pub ul_cqi: u8,
}

/// A detected random-access preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrachDetection {
    pub preamble_index: u8,
    pub timing_advance: u16,
    pub preamble_power: u32,
    pub avg_rssi: u8,
    pub avg_snr: u8,
}

/// Uplink control information measured on one PUCCH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UciReport {
    pub harq: Vec<HarqValue>,
    pub sr: Option<bool>,
    pub csi_part1: Option<Bytes>,
    pub ul_cqi: u8,
}

/// Channel-level physical-layer processing
pub trait ChannelProcessor: Send + Sync {
    /// Decode (uplink) or encode and verify (downlink) a data channel
    fn decode_data(&self, slot: SlotId, channel: &DataChannel) -> DataOutcome;
    
    fn detect_prach(&self, slot: SlotId, pdu: &PrachPdu) -> Option<PrachDetection>;
    
    fn measure_pucch(&self, slot: SlotId, pdu: &PucchPdu) -> UciReport;
    
    /// Put the slot's downlink on air, returning the number of transport blocks sent
    fn transmit(&self, slot: SlotId, store: &SlotPduStore, response: &SchedResponse) -> usize;
}

/// Timing advance reported for looped-back uplink data (no adjustment)
const LOOPBACK_TA: u16 = 31;

/// Channel quality reported when nothing was measured
pub const UL_CQI_UNKNOWN: u8 = 255;

/// Emulated L1: uplink payloads come back as received, every preamble is detected
#[derive(Debug, Default)]
pub struct LoopbackProcessor {
    /// Fail every n-th data decode, 0 for never
    crc_failure_period: u64,
    decodes: AtomicU64,
    transmitted: AtomicU64,
}

impl LoopbackProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crc_failure_period(period: u64) -> Self {
        Self {
            crc_failure_period: period,
            ..Self::default()
        }
    }

    /// Transport blocks put on air since startup
    pub fn transmitted(&self) -> u64 {
        self.transmitted.load(Ordering::Relaxed)
    }

    fn next_crc_ok(&self) -> bool {
        let n = self.decodes.fetch_add(1, Ordering::Relaxed) + 1;
        self.crc_failure_period == 0 || n % self.crc_failure_period != 0
    }
}

impl ChannelProcessor for LoopbackProcessor {
    fn decode_data(&self, slot: SlotId, channel: &DataChannel) -> DataOutcome {
        let crc_ok = self.next_crc_ok();
        trace!(
            "Loopback {} HARQ {} in {}: crc_ok={}",
            channel.direction.name(), channel.harq_pid, slot, crc_ok
        );
        let payload = match &channel.descriptor {
            DataDescriptor::Pusch(pusch) if crc_ok => {
                Some(pusch.tx_payload.clone().unwrap_or_default())
            }
            _ => None,
        };
        DataOutcome {
            crc_ok,
            payload,
            timing_advance: LOOPBACK_TA,
            ul_cqi: UL_CQI_UNKNOWN,
        }
    }

    fn detect_prach(&self, _slot: SlotId, pdu: &PrachPdu) -> Option<PrachDetection> {
        Some(PrachDetection {
            preamble_index: pdu.preamble_index,
            timing_advance: 0,
            preamble_power: 0xffff_ffff,
            avg_rssi: 128,
            avg_snr: 0xff,
        })
    }

    fn measure_pucch(&self, _slot: SlotId, pdu: &PucchPdu) -> UciReport {
        // Up to 3 bits are HARQ feedback (bit set means ACK), more bits are CSI
        let (harq, csi_part1) = if pdu.n_bit > 3 {
            let len = (pdu.n_bit as usize / 8 + 1).min(8);
            (Vec::new(), Some(Bytes::copy_from_slice(&pdu.payload.to_le_bytes()[..len])))
        } else {
            let harq = (0..pdu.n_bit)
                .map(|bit| HarqValue::from_crc(pdu.payload >> bit & 1 == 1))
                .collect();
            (harq, None)
        };
        UciReport {
            harq,
            sr: pdu.sr_flag.then_some(true),
            csi_part1,
            ul_cqi: UL_CQI_UNKNOWN,
        }
    }

    fn transmit(&self, slot: SlotId, store: &SlotPduStore, response: &SchedResponse) -> usize {
        let blocks = response.tx_data.len();
        trace!(
            "Loopback TX {}: {} DCI, {} SSB, {} transport blocks",
            slot,
            store.dci.active_count(),
            store.ssb.active_count(),
            blocks
        );
        self.transmitted.fetch_add(blocks as u64, Ordering::Relaxed);
        blocks
    }
}
