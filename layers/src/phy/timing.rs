//! Session Timing State
//! 
//! Timing-advance and non-terrestrial network parameters carried in the
//! downlink slot configuration. They are session state, not slot state: a
//! TA command received in one slot takes effect in a later one.

use crate::LayerError;
use common::types::{SlotId, SubcarrierSpacing};
use common::utils::time;
use interfaces::fapi::{NtnConfigPdu, TaCommandPdu};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Largest 12-bit TA command
const TA_MAX: f64 = 3846.0;

/// Offset applied to a random-access TA so it reuses the MAC-CE adjustment path
const RAR_TA_OFFSET: u16 = 31;

/// PDSCH processing time N1 in symbols, capability 1 with additional DMRS (38.214 5.3)
const PDSCH_N1_CAPABILITY_1: [u32; 4] = [13, 13, 20, 24];

/// PUSCH preparation time N2 in symbols, capability 1 (38.214 6.4)
const PUSCH_N2_CAPABILITY_1: [u32; 4] = [10, 12, 23, 36];

/// A timing-advance update waiting for its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaAdjustment {
    pub apply_at: SlotId,
    pub command: u16,
}

/// Latest NTN configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NtnParameters {
    pub cell_specific_k_offset: u16,
    pub n_common_ta_adj: f64,
    pub ntn_ta_common_drift: f64,
    pub total_time_advance_ms: f64,
}

/// Slots between a MAC-CE TA command and its application (38.213 4.2)
pub fn ul_tx_timing_adjustment(scs: SubcarrierSpacing, fft_size: u32) -> u32 {
    let mu = (scs.numerology() as usize).min(PDSCH_N1_CAPABILITY_1.len() - 1);
    let slots_per_subframe = scs.slots_per_subframe() as f64;
    let fft = fft_size as f64;
    
    // All durations below are in subframes (ms)
    let samples_per_subframe = 15.0 * fft * slots_per_subframe;
    let prefix_samples = fft * 144.0 / 2048.0;
    let symbol = (fft + prefix_samples) / samples_per_subframe;
    let bw_scaling = (16 * fft_size / 2048) as f64;
    
    let n_ta_max = TA_MAX * bw_scaling / samples_per_subframe;
    let n_t1 = PDSCH_N1_CAPABILITY_1[mu] as f64 * symbol;
    let n_t2 = PUSCH_N2_CAPABILITY_1[mu] as f64 * symbol;
    
    1 + (slots_per_subframe * (n_t1 + n_t2 + n_ta_max + 0.5)).ceil() as u32
}

/// Timing state of the running session
#[derive(Debug, Clone)]
pub struct SessionTiming {
    scs: SubcarrierSpacing,
    ul_adjustment: u32,
    pending_ta: Option<TaAdjustment>,
    ntn: Option<NtnParameters>,
    ntn_updated: bool,
}

impl SessionTiming {
    pub fn new(scs: SubcarrierSpacing, fft_size: u32) -> Result<Self, LayerError> {
        if fft_size < 128 || !fft_size.is_power_of_two() {
            return Err(LayerError::InvalidConfiguration(format!(
                "FFT size {} is not a power of two >= 128",
                fft_size
            )));
        }
        
        let ul_adjustment = ul_tx_timing_adjustment(scs, fft_size);
        debug!("UL timing adjustment for {:?} / FFT {}: {} slots", scs, fft_size, ul_adjustment);
        Ok(Self {
            scs,
            ul_adjustment,
            pending_ta: None,
            ntn: None,
            ntn_updated: false,
        })
    }

    pub fn ul_adjustment(&self) -> u32 {
        self.ul_adjustment
    }

    /// Record a TA command and compute the slot it applies in
    pub fn apply_ta_command(&mut self, cmd: &TaCommandPdu) -> Result<TaAdjustment, LayerError> {
        let slots_per_frame = self.scs.slots_per_frame();
        if cmd.ta_slot as u16 >= slots_per_frame || cmd.ta_frame as u32 >= time::FRAMES_PER_HYPERFRAME {
            return Err(LayerError::InvalidPdu(format!(
                "TA command for {}.{} outside {} slots per frame",
                cmd.ta_frame, cmd.ta_slot, slots_per_frame
            )));
        }
        
        let received = SlotId::new(cmd.ta_frame, cmd.ta_slot);
        let adjustment = if cmd.is_rar {
            TaAdjustment {
                apply_at: received,
                command: cmd.ta_command.saturating_add(RAR_TA_OFFSET),
            }
        } else {
            TaAdjustment {
                apply_at: received.advance(self.ul_adjustment, slots_per_frame),
                command: cmd.ta_command,
            }
        };
        
        info!(
            "TA command {} received in {}, applied at {}",
            cmd.ta_command, received, adjustment.apply_at
        );
        self.pending_ta = Some(adjustment);
        Ok(adjustment)
    }

    pub fn pending_ta(&self) -> Option<TaAdjustment> {
        self.pending_ta
    }

    /// Hand out the pending TA update once its slot is reached
    pub fn take_due_ta(&mut self, now: SlotId) -> Option<TaAdjustment> {
        match self.pending_ta {
            Some(ta) if ta.apply_at == now => self.pending_ta.take(),
            _ => None,
        }
    }

    pub fn apply_ntn(&mut self, pdu: &NtnConfigPdu) {
        self.ntn = Some(NtnParameters {
            cell_specific_k_offset: pdu.cell_specific_k_offset,
            n_common_ta_adj: pdu.n_common_ta_adj,
            ntn_ta_common_drift: pdu.ntn_ta_common_drift,
            total_time_advance_ms: pdu.ntn_total_time_advance_ms,
        });
        self.ntn_updated = true;
        debug!("NTN parameters updated: k_offset={}", pdu.cell_specific_k_offset);
    }

    pub fn ntn(&self) -> Option<&NtnParameters> {
        self.ntn.as_ref()
    }

    /// Parameters changed since the last call
    pub fn take_ntn_update(&mut self) -> Option<NtnParameters> {
        if std::mem::take(&mut self.ntn_updated) {
            self.ntn
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.pending_ta = None;
        self.ntn_updated = false;
    }
}
