//! Slot Pipeline
//! 
//! Wires the slot core together. The producer thread dispatches a slot's
//! records into a slot context, fans the per-channel work out to the worker
//! pool and arms the context's barrier. The last finished job (or the
//! producer itself when nothing is outstanding) finalizes the slot: HARQ
//! feedback is applied, indications are queued in PDU order and the
//! scheduling response is released.

use crate::mac::sched_response::{SchedResponse, SchedResponseRef};
use crate::phy::dispatcher::{DispatchReport, HarqFeedbackEvent, PduDispatcher};
use crate::phy::harq::{HarqDirection, HarqEntity, HarqProcessRecord, HarqStatus};
use crate::phy::processor::{ChannelProcessor, DataOutcome, PrachDetection, UciReport, UL_CQI_UNKNOWN};
use crate::phy::slot_store::{DataDescriptor, SlotPduStore, StoreCapacities};
use crate::phy::timing::SessionTiming;
use crate::phy::workers::WorkerPool;
use crate::sync::barrier::BarrierRing;
use crate::LayerError;
use common::types::{DuplexMode, Rnti, SlotId, SubcarrierSpacing};
use common::utils::time;
use interfaces::fapi::{PrachPdu, SlotRequest};
use interfaces::indications::{
    CrcIndication, CrcPdu, HarqValue, Indication, RachIndication, RachPdu, RachPreamble,
    RxDataIndication, RxDataPdu, UciHarq, UciIndication, UciPdu,
};
use interfaces::{IndicationQueue, IndicationQueues, PutError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Timing-advance report meaning no adjustment, for channels that were not measured
const TA_NO_CHANGE: u16 = 31;

/// Construction-time parameters of the slot pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub scs: SubcarrierSpacing,
    #[serde(default)]
    pub duplex: DuplexMode,
    #[serde(default = "default_harq_processes")]
    pub dl_harq_processes: usize,
    #[serde(default = "default_harq_processes")]
    pub ul_harq_processes: usize,
    #[serde(default = "default_max_harq_rounds")]
    pub max_harq_rounds: u8,
    #[serde(default)]
    pub capacities: StoreCapacities,
    /// Slots that may be in flight at once
    #[serde(default = "default_slot_contexts")]
    pub slot_contexts: usize,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// OFDM symbol size, for timing-advance timing
    #[serde(default = "default_fft_size")]
    pub fft_size: u32,
}

fn default_harq_processes() -> usize {
    16
}

fn default_max_harq_rounds() -> u8 {
    4
}

fn default_slot_contexts() -> usize {
    8
}

fn default_worker_threads() -> usize {
    4
}

fn default_fft_size() -> u32 {
    2048
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scs: SubcarrierSpacing::default(),
            duplex: DuplexMode::default(),
            dl_harq_processes: default_harq_processes(),
            ul_harq_processes: default_harq_processes(),
            max_harq_rounds: default_max_harq_rounds(),
            capacities: StoreCapacities::default(),
            slot_contexts: default_slot_contexts(),
            worker_threads: default_worker_threads(),
            fft_size: default_fft_size(),
        }
    }
}

/// Counters since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub slots_scheduled: u64,
    pub slots_finalized: u64,
    pub indications_sent: u64,
    pub indications_dropped: u64,
    pub unknown_pdus: u64,
    pub ta_applied: u64,
}

#[derive(Default)]
struct StatCounters {
    slots_scheduled: AtomicU64,
    slots_finalized: AtomicU64,
    indications_sent: AtomicU64,
    indications_dropped: AtomicU64,
    ta_applied: AtomicU64,
}

/// Accepted slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotTicket {
    pub slot: SlotId,
    /// Jobs the slot's barrier waits for
    pub jobs: usize,
    pub report: DispatchReport,
}

struct DataResult {
    pdu_index: usize,
    direction: HarqDirection,
    rnti: Rnti,
    harq_pid: u8,
    handle: u32,
    num_cb: u16,
    outcome: DataOutcome,
}

struct PrachResult {
    pdu_index: usize,
    pdu: PrachPdu,
    detection: PrachDetection,
}

struct PucchResult {
    pdu_index: usize,
    rnti: Rnti,
    report: UciReport,
}

#[derive(Default)]
struct SlotResults {
    data: Vec<DataResult>,
    prach: Vec<PrachResult>,
    pucch: Vec<PucchResult>,
    feedback: Vec<HarqFeedbackEvent>,
}

struct SlotContext {
    store: RwLock<SlotPduStore>,
    results: Mutex<SlotResults>,
    /// Slot currently using this context
    in_flight: Mutex<Option<SlotId>>,
}

struct Shared {
    harq: RwLock<HarqEntity>,
    contexts: Vec<SlotContext>,
    barriers: BarrierRing,
    processor: Arc<dyn ChannelProcessor>,
    queues: Arc<IndicationQueues>,
    stats: StatCounters,
}

enum JobKind {
    Data(usize),
    Prach(usize),
    Pucch(usize),
    Transmit(SchedResponseRef<SchedResponse>),
}

/// Joins the slot barrier on drop, so a panicking job still completes the slot
struct BarrierJoin {
    shared: Arc<Shared>,
    absolute_slot: u32,
}

impl Drop for BarrierJoin {
    fn drop(&mut self) {
        self.shared.barriers.for_slot(self.absolute_slot).join();
    }
}

pub struct SlotPipeline {
    config: PipelineConfig,
    shared: Arc<Shared>,
    dispatcher: Mutex<PduDispatcher>,
    session: Mutex<SessionTiming>,
    workers: WorkerPool,
}

impl SlotPipeline {
    pub fn new(
        config: PipelineConfig,
        processor: Arc<dyn ChannelProcessor>,
        queues: Arc<IndicationQueues>,
    ) -> Result<Self, LayerError> {
        let slots_per_hyperframe = config.scs.slots_per_frame() as usize * time::FRAMES_PER_HYPERFRAME as usize;
        if config.slot_contexts == 0 || slots_per_hyperframe % config.slot_contexts != 0 {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} slot contexts do not divide {} slots per hyperframe",
                config.slot_contexts, slots_per_hyperframe
            )));
        }
        
        let harq = HarqEntity::new(
            config.dl_harq_processes,
            config.ul_harq_processes,
            config.max_harq_rounds,
        )?;
        let session = SessionTiming::new(config.scs, config.fft_size)?;
        let contexts = (0..config.slot_contexts)
            .map(|_| SlotContext {
                store: RwLock::new(SlotPduStore::new(&config.capacities)),
                results: Mutex::new(SlotResults::default()),
                in_flight: Mutex::new(None),
            })
            .collect();
        let shared = Arc::new(Shared {
            harq: RwLock::new(harq),
            contexts,
            barriers: BarrierRing::new(config.slot_contexts)?,
            processor,
            queues,
            stats: StatCounters::default(),
        });
        let workers = WorkerPool::new(config.worker_threads, "l1-slot")?;
        
        info!(
            "Slot pipeline ready: {:?}, {} contexts, {} workers, {}/{} HARQ processes",
            config.scs, config.slot_contexts, config.worker_threads,
            config.dl_harq_processes, config.ul_harq_processes
        );
        Ok(Self {
            dispatcher: Mutex::new(PduDispatcher::new(config.duplex, config.scs)),
            session: Mutex::new(session),
            config,
            shared,
            workers,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Accept one slot's configuration and start processing it
    ///
    /// `request.pdus` is empty on return. `response` is the producer's
    /// reference to the slot's scheduling response; it is released when the
    /// slot is finalized.
    pub fn schedule_slot(
        &self,
        request: &mut SlotRequest,
        response: SchedResponseRef<SchedResponse>,
    ) -> Result<SlotTicket, LayerError> {
        let slot = request.slot;
        let slots_per_frame = self.config.scs.slots_per_frame();
        if slot.slot as u16 >= slots_per_frame {
            return Err(LayerError::InvalidPdu(format!(
                "slot {} outside {} slots per frame",
                slot, slots_per_frame
            )));
        }
        if slot.frame as u32 >= time::FRAMES_PER_HYPERFRAME {
            return Err(LayerError::InvalidPdu(format!(
                "slot {} outside the {}-frame hyperframe",
                slot, time::FRAMES_PER_HYPERFRAME
            )));
        }
        
        let absolute = slot.absolute(slots_per_frame);
        let ctx_index = absolute as usize % self.shared.contexts.len();
        let ctx = &self.shared.contexts[ctx_index];
        {
            let mut in_flight = ctx.in_flight.lock();
            if let Some(busy) = *in_flight {
                return Err(LayerError::SlotOverrun { slot, busy });
            }
            *in_flight = Some(slot);
        }
        self.shared.stats.slots_scheduled.fetch_add(1, Ordering::Relaxed);
        
        let report = match self.dispatch_into(ctx, request) {
            Ok(report) => report,
            Err(e) => {
                *ctx.in_flight.lock() = None;
                return Err(e);
            }
        };
        self.apply_session_updates(slot);
        
        let slot_type = self.config.duplex.slot_type(absolute);
        let mut jobs = Vec::new();
        {
            let store = ctx.store.read();
            jobs.extend(
                store
                    .data
                    .iter_active()
                    .filter(|(_, entry)| entry.pdu.is_scheduled())
                    .map(|(index, _)| JobKind::Data(index)),
            );
            jobs.extend(store.prach.iter_active().map(|(index, _)| JobKind::Prach(index)));
            jobs.extend(store.pucch.iter_active().map(|(index, _)| JobKind::Pucch(index)));
            if slot_type.carries_downlink() && store.has_downlink() {
                // Second reference, taken before the transmit job can run
                jobs.push(JobKind::Transmit(response.clone()));
            }
        }
        
        *ctx.results.lock() = SlotResults {
            feedback: report.feedback.clone(),
            ..Default::default()
        };
        
        let required = jobs.len();
        for kind in jobs {
            let shared = Arc::clone(&self.shared);
            let submitted = self.workers.submit(move || {
                let _join = BarrierJoin {
                    shared: Arc::clone(&shared),
                    absolute_slot: absolute,
                };
                run_job(&shared, ctx_index, slot, kind);
            });
            if let Err(e) = submitted {
                error!("Submitting jobs of {} failed: {}", slot, e);
                self.shared.barriers.for_slot(absolute).reset();
                *ctx.results.lock() = SlotResults::default();
                *ctx.in_flight.lock() = None;
                return Err(e);
            }
        }
        
        let shared = Arc::clone(&self.shared);
        self.shared
            .barriers
            .for_slot(absolute)
            .update(required, move || finalize(&shared, ctx_index, slot, response))?;
        
        trace!("Slot {} scheduled on context {} with {} jobs", slot, ctx_index, required);
        Ok(SlotTicket {
            slot,
            jobs: required,
            report,
        })
    }

    fn dispatch_into(&self, ctx: &SlotContext, request: &mut SlotRequest) -> Result<DispatchReport, LayerError> {
        let mut store = ctx.store.write();
        store.begin_slot(request.slot);
        let mut session = self.session.lock();
        let mut dispatcher = self.dispatcher.lock();
        // Workers only see the updated processes once this write lock is released
        let mut harq = self.shared.harq.write();
        dispatcher.dispatch(request, &mut store, &mut harq, &mut session)
    }

    fn apply_session_updates(&self, slot: SlotId) {
        let mut session = self.session.lock();
        if let Some(ta) = session.take_due_ta(slot) {
            info!("Applying TA command {} in {}", ta.command, slot);
            self.shared.stats.ta_applied.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ntn) = session.take_ntn_update() {
            info!(
                "NTN parameters active from {}: k_offset={}, total TA {} ms",
                slot, ntn.cell_specific_k_offset, ntn.total_time_advance_ms
            );
        }
    }

    /// Drop all in-flight state after the slot clock jumped
    ///
    /// Armed finalize steps are discarded without running, which releases
    /// their scheduling responses. Must not race with running jobs.
    pub fn resync(&self) {
        let pending = self.workers.pending();
        if pending > 0 {
            warn!("Resynchronizing with {} jobs still in flight", pending);
        }
        
        self.shared.barriers.reset_all();
        for ctx in &self.shared.contexts {
            *ctx.results.lock() = SlotResults::default();
            *ctx.in_flight.lock() = None;
        }
        self.shared.harq.write().reset_all();
        self.session.lock().reset();
        info!("Slot pipeline resynchronized");
    }

    pub fn stats(&self) -> PipelineStats {
        let stats = &self.shared.stats;
        PipelineStats {
            slots_scheduled: stats.slots_scheduled.load(Ordering::Relaxed),
            slots_finalized: stats.slots_finalized.load(Ordering::Acquire),
            indications_sent: stats.indications_sent.load(Ordering::Relaxed),
            indications_dropped: stats.indications_dropped.load(Ordering::Relaxed),
            unknown_pdus: self.dispatcher.lock().unknown_total(),
            ta_applied: stats.ta_applied.load(Ordering::Relaxed),
        }
    }

    pub fn slots_in_flight(&self) -> usize {
        self.shared
            .contexts
            .iter()
            .filter(|ctx| ctx.in_flight.lock().is_some())
            .count()
    }

    pub fn harq_record(&self, direction: HarqDirection, pid: u8) -> Result<HarqProcessRecord, LayerError> {
        self.shared.harq.read().table(direction).get(pid).copied()
    }
}

fn run_job(shared: &Shared, ctx_index: usize, slot: SlotId, kind: JobKind) {
    let ctx = &shared.contexts[ctx_index];
    match kind {
        JobKind::Data(index) => {
            let store = ctx.store.read();
            let entry = match store.data.get(index) {
                Some(entry) => entry,
                None => {
                    error!("Data channel {} of {} vanished before processing", index, slot);
                    return;
                }
            };
            let channel = &entry.pdu;
            let outcome = shared.processor.decode_data(slot, channel);
            let (handle, num_cb) = match &channel.descriptor {
                DataDescriptor::Pusch(pusch) => (pusch.handle, pusch.num_cb),
                DataDescriptor::Dlsch(_) => (0, 1),
            };
            let result = DataResult {
                pdu_index: entry.pdu_index,
                direction: channel.direction,
                rnti: channel.rnti,
                harq_pid: channel.harq_pid,
                handle,
                num_cb,
                outcome,
            };
            drop(store);
            ctx.results.lock().data.push(result);
        }
        JobKind::Prach(index) => {
            let store = ctx.store.read();
            let entry = match store.prach.get(index) {
                Some(entry) => entry,
                None => return,
            };
            if let Some(detection) = shared.processor.detect_prach(slot, &entry.pdu) {
                let result = PrachResult {
                    pdu_index: entry.pdu_index,
                    pdu: entry.pdu.clone(),
                    detection,
                };
                drop(store);
                ctx.results.lock().prach.push(result);
            }
        }
        JobKind::Pucch(index) => {
            let store = ctx.store.read();
            let entry = match store.pucch.get(index) {
                Some(entry) => entry,
                None => return,
            };
            let result = PucchResult {
                pdu_index: entry.pdu_index,
                rnti: entry.pdu.rnti,
                report: shared.processor.measure_pucch(slot, &entry.pdu),
            };
            drop(store);
            ctx.results.lock().pucch.push(result);
        }
        JobKind::Transmit(response) => {
            let store = ctx.store.read();
            let sent = shared.processor.transmit(slot, &store, &response);
            trace!("Slot {} transmitted {} transport blocks", slot, sent);
        }
    }
}

fn finalize(shared: &Shared, ctx_index: usize, slot: SlotId, response: SchedResponseRef<SchedResponse>) {
    let ctx = &shared.contexts[ctx_index];
    let mut results = std::mem::take(&mut *ctx.results.lock());
    results.data.sort_by_key(|r| r.pdu_index);
    results.prach.sort_by_key(|r| r.pdu_index);
    
    apply_decode_feedback(shared, slot, &results.data);
    
    let mut rx_pdus = Vec::new();
    let mut crcs: Vec<(usize, CrcPdu)> = Vec::new();
    let mut ucis: Vec<(usize, UciPdu)> = Vec::new();
    for result in results.data {
        let outcome = result.outcome;
        match result.direction {
            HarqDirection::Uplink => {
                if let Some(payload) = outcome.payload {
                    rx_pdus.push(RxDataPdu {
                        handle: result.handle,
                        rnti: result.rnti,
                        harq_id: result.harq_pid,
                        payload,
                        timing_advance: outcome.timing_advance,
                        ul_cqi: outcome.ul_cqi,
                    });
                }
                crcs.push((
                    result.pdu_index,
                    CrcPdu {
                        handle: result.handle,
                        rnti: result.rnti,
                        harq_id: result.harq_pid,
                        tb_crc_ok: outcome.crc_ok,
                        num_cb: result.num_cb,
                        timing_advance: outcome.timing_advance,
                        ul_cqi: outcome.ul_cqi,
                    },
                ));
            }
            HarqDirection::Downlink => {
                ucis.push((
                    result.pdu_index,
                    harq_uci(result.rnti, result.harq_pid, HarqValue::from_crc(outcome.crc_ok), outcome.ul_cqi),
                ));
            }
        }
    }
    // Unprocessed uplink channels still owe the scheduler a CRC for their process
    for event in results.feedback {
        match event.direction {
            HarqDirection::Uplink => crcs.push((
                event.pdu_index,
                CrcPdu {
                    handle: event.handle,
                    rnti: event.rnti,
                    harq_id: event.harq_pid,
                    tb_crc_ok: event.value == HarqValue::Ack,
                    num_cb: event.num_cb,
                    timing_advance: TA_NO_CHANGE,
                    ul_cqi: UL_CQI_UNKNOWN,
                },
            )),
            HarqDirection::Downlink => ucis.push((
                event.pdu_index,
                harq_uci(event.rnti, event.harq_pid, event.value, UL_CQI_UNKNOWN),
            )),
        }
    }
    for result in results.pucch {
        let report = result.report;
        let harq = report
            .harq
            .into_iter()
            .enumerate()
            .map(|(bit, value)| UciHarq {
                harq_pid: bit as u8,
                value,
            })
            .collect();
        ucis.push((
            result.pdu_index,
            UciPdu {
                rnti: result.rnti,
                harq,
                sr: report.sr,
                csi_part1: report.csi_part1,
                ul_cqi: report.ul_cqi,
            },
        ));
    }
    crcs.sort_by_key(|(index, _)| *index);
    ucis.sort_by_key(|(index, _)| *index);
    
    let rach_pdus: Vec<RachPdu> = results
        .prach
        .into_iter()
        .map(|r| RachPdu {
            phy_cell_id: r.pdu.phys_cell_id,
            symbol_index: r.pdu.prach_start_symbol,
            slot_index: slot.slot,
            freq_index: r.pdu.num_ra,
            avg_rssi: r.detection.avg_rssi,
            avg_snr: r.detection.avg_snr,
            preambles: vec![RachPreamble {
                preamble_index: r.detection.preamble_index,
                timing_advance: r.detection.timing_advance,
                preamble_power: r.detection.preamble_power,
            }],
        })
        .collect();
    
    let queues = &shared.queues;
    if !rx_pdus.is_empty() {
        deliver(shared, &queues.rx_data, RxDataIndication { slot, pdus: rx_pdus });
    }
    if !crcs.is_empty() {
        let crcs = crcs.into_iter().map(|(_, crc)| crc).collect();
        deliver(shared, &queues.crc, CrcIndication { slot, crcs });
    }
    if !ucis.is_empty() {
        let ucis = ucis.into_iter().map(|(_, uci)| uci).collect();
        deliver(shared, &queues.uci, UciIndication { slot, ucis });
    }
    if !rach_pdus.is_empty() {
        deliver(shared, &queues.rach, RachIndication { slot, pdus: rach_pdus });
    }
    
    *ctx.in_flight.lock() = None;
    drop(response);
    shared.stats.slots_finalized.fetch_add(1, Ordering::Release);
    debug!("Slot {} finalized", slot);
}

fn harq_uci(rnti: Rnti, harq_pid: u8, value: HarqValue, ul_cqi: u8) -> UciPdu {
    UciPdu {
        rnti,
        harq: vec![UciHarq { harq_pid, value }],
        sr: None,
        csi_part1: None,
        ul_cqi,
    }
}

/// Apply decode outcomes to the processes this slot scheduled
fn apply_decode_feedback(shared: &Shared, slot: SlotId, data: &[DataResult]) {
    if data.is_empty() {
        return;
    }
    let mut harq = shared.harq.write();
    for result in data {
        let table = harq.table_mut(result.direction);
        match table.get(result.harq_pid) {
            Ok(record) if record.associated == Some(slot) && record.status == HarqStatus::Active => {
                if let Err(e) = table.record_decode(result.harq_pid, result.outcome.crc_ok) {
                    error!("Applying decode result of {}: {}", slot, e);
                }
            }
            Ok(_) => debug!(
                "{} HARQ {} rescheduled after {}, decode result not applied",
                result.direction.name(), result.harq_pid, slot
            ),
            Err(e) => error!("Applying decode result of {}: {}", slot, e),
        }
    }
}

fn deliver<T: Indication>(shared: &Shared, queue: &IndicationQueue<T>, msg: T) {
    match queue.put(msg) {
        Ok(()) => {
            shared.stats.indications_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(PutError::Full(msg)) => {
            warn!("{} queue full, dropping indication of {}", queue.name(), msg.slot());
            shared.stats.indications_dropped.fetch_add(1, Ordering::Relaxed);
        }
        Err(PutError::Closed(msg)) => {
            debug!("{} queue closed, dropping indication of {}", queue.name(), msg.slot());
            shared.stats.indications_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
