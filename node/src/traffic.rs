//! Synthetic Scheduler
//! 
//! Stands in for the MAC scheduler: every slot it fills the request list with
//! a plausible mix of records for a few round-robin UEs, and builds the
//! matching scheduling response with the downlink transport blocks.

use crate::config::TrafficConfig;
use bytes::Bytes;
use common::types::{DmrsPorts, DuplexMode, Pci, Rnti, SlotId};
use interfaces::fapi::{
    DciPdu, DlschPdu, PrachPdu, PucchPdu, PuschPdu, RntiType, SlotPdu, SlotRequest, SsbPdu,
    TaCommandPdu, TxDataPdu,
};
use layers::mac::SchedResponse;
use layers::phy::PipelineConfig;

const FIRST_CRNTI: u16 = 0x4601;

pub struct SyntheticScheduler {
    traffic: TrafficConfig,
    duplex: DuplexMode,
    dl_processes: u8,
    ul_processes: u8,
    next_dl_pid: u8,
    next_ul_pid: u8,
    payload: Bytes,
    grants: u32,
}

fn every(absolute: u32, period: u32) -> bool {
    period > 0 && absolute % period == 0
}

impl SyntheticScheduler {
    pub fn new(traffic: &TrafficConfig, pipeline: &PipelineConfig) -> Self {
        let payload: Vec<u8> = (0..traffic.payload_bytes).map(|i| i as u8).collect();
        Self {
            traffic: traffic.clone(),
            duplex: pipeline.duplex,
            dl_processes: pipeline.dl_harq_processes.min(u8::MAX as usize) as u8,
            ul_processes: pipeline.ul_harq_processes.min(u8::MAX as usize) as u8,
            next_dl_pid: 0,
            next_ul_pid: 0,
            payload: Bytes::from(payload),
            grants: 0,
        }
    }

    fn rnti_for(&self, absolute: u32) -> Rnti {
        let ues = self.traffic.num_ues.max(1) as u32;
        Rnti(FIRST_CRNTI + (absolute % ues) as u16)
    }

    fn next_pid(next: &mut u8, processes: u8) -> u8 {
        let pid = *next;
        *next = (*next + 1) % processes.max(1);
        pid
    }

    /// Fill `request` for `slot` and build the matching scheduling response
    pub fn build(&mut self, slot: SlotId, absolute: u32, request: &mut SlotRequest) -> SchedResponse {
        request.reset(slot);
        let slot_type = self.duplex.slot_type(absolute);
        let rnti = self.rnti_for(absolute);
        let mut tx_data = Vec::new();
        
        if slot_type.carries_downlink() {
            if every(absolute, self.traffic.ssb_period_slots) {
                request.push(SlotPdu::Ssb(SsbPdu {
                    pci: Pci(1),
                    ssb_index: 0,
                    bch_payload: Some(slot.frame as u32),
                }));
            }
            
            request.push(SlotPdu::Dci(DciPdu {
                rnti,
                coreset_id: 0,
                search_space_id: 1,
                aggregation_level: 4,
                payload: absolute as u64,
                payload_bits: 39,
            }));
            let pdu_index = request.pdus.len() as u16;
            request.push(SlotPdu::Dlsch(DlschPdu {
                rnti,
                rnti_type: RntiType::C,
                harq_pid: Self::next_pid(&mut self.next_dl_pid, self.dl_processes),
                new_data: true,
                rv: 0,
                dmrs_ports: DmrsPorts::PORT0,
                mcs: 9,
                tbs_bytes: self.payload.len() as u32,
                start_rb: 0,
                num_rbs: 24,
                k1_feedback: 4,
            }));
            tx_data.push(TxDataPdu {
                pdu_index,
                payload: self.payload.clone(),
            });
        }
        
        if slot_type.carries_uplink() {
            self.grants = self.grants.wrapping_add(1);
            request.push(SlotPdu::Pusch(PuschPdu {
                handle: self.grants,
                rnti,
                harq_pid: Self::next_pid(&mut self.next_ul_pid, self.ul_processes),
                new_data: true,
                rv: 0,
                dmrs_ports: DmrsPorts::PORT0,
                mcs: 5,
                num_cb: 1,
                tx_payload: Some(self.payload.clone()),
            }));
            if every(absolute, self.traffic.pucch_period_slots) {
                request.push(SlotPdu::Pucch(PucchPdu {
                    rnti,
                    format: 0,
                    n_bit: 1,
                    sr_flag: true,
                    payload: 1,
                }));
            }
            if every(absolute, self.traffic.prach_period_slots) {
                request.push(SlotPdu::Prach(PrachPdu {
                    phys_cell_id: 1,
                    num_ra: 0,
                    prach_start_symbol: 0,
                    prach_slot: slot.slot,
                    preamble_index: (absolute % 64) as u8,
                }));
            }
        }
        
        if every(absolute, self.traffic.ta_period_slots) {
            request.push(SlotPdu::TaCommand(TaCommandPdu {
                ta_frame: slot.frame,
                ta_slot: slot.slot,
                ta_command: 31,
                is_rar: false,
            }));
        }
        
        SchedResponse { slot, tx_data }
    }
}
