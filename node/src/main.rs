//! Albor L1 Node Main Application
//! 
//! Runs the L1 slot pipeline against the loopback channel processor. A
//! built-in scheduler feeds it one slot request per slot period, and one
//! consumer per indication queue stands in for the upper stage.

mod config;
mod traffic;
mod upper;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::types::{SlotId, SubcarrierSpacing};
use common::utils::time;
use interfaces::fapi::SlotRequest;
use interfaces::IndicationQueues;
use layers::mac::{SchedResponse, SchedResponsePool};
use layers::phy::{LoopbackProcessor, SlotPipeline};
use layers::LayerError;

use config::NodeConfig;
use traffic::SyntheticScheduler;

/// Albor L1 slot-processing node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (.toml, .yaml or .yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
    
    /// Slots to run before shutting down, 0 runs until interrupted
    #[arg(long, default_value = "0")]
    slots: u64,
    
    /// Subcarrier spacing in kHz (15, 30, 60, 120, 240)
    #[arg(long)]
    scs_khz: Option<u32>,
    
    /// Slot pipeline worker threads
    #[arg(long)]
    workers: Option<usize>,
}

/// Slot periods the clock may fall behind before it resynchronizes
const MAX_LAG_SLOTS: u32 = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(khz) = args.scs_khz {
        config.pipeline.scs = SubcarrierSpacing::from_khz(khz)
            .ok_or_else(|| anyhow::anyhow!("Invalid subcarrier spacing: {} kHz", khz))?;
    }
    if let Some(workers) = args.workers {
        config.pipeline.worker_threads = workers;
    }

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor L1 node");
    match &args.config {
        Some(path) => info!("Configuration file: {}", path.display()),
        None => info!("No configuration file, using defaults"),
    }
    info!("Pipeline configuration:");
    info!("  Subcarrier spacing: {:?}", config.pipeline.scs);
    info!("  Duplex: {:?}", config.pipeline.duplex);
    info!("  Slot contexts: {}", config.pipeline.slot_contexts);
    info!("  Workers: {}", config.pipeline.worker_threads);
    info!("  UEs: {}", config.traffic.num_ues);

    let queues = Arc::new(IndicationQueues::new(&config.queues)?);
    let processor = Arc::new(LoopbackProcessor::with_crc_failure_period(
        config.traffic.crc_failure_period,
    ));
    let pipeline = Arc::new(SlotPipeline::new(
        config.pipeline.clone(),
        processor.clone(),
        Arc::clone(&queues),
    )?);
    let responses = SchedResponsePool::<SchedResponse>::new();
    let running = Arc::new(AtomicBool::new(true));
    
    let drains = upper::spawn_drains(Arc::clone(&queues));
    
    // Slot clock on a blocking thread
    let mut clock_handle = {
        let pipeline = Arc::clone(&pipeline);
        let responses = Arc::clone(&responses);
        let running = Arc::clone(&running);
        let scheduler = SyntheticScheduler::new(&config.traffic, &config.pipeline);
        let max_slots = args.slots;
        tokio::task::spawn_blocking(move || {
            run_slot_clock(&pipeline, &responses, scheduler, &running, max_slots)
        })
    };
    
    // Start statistics reporting
    let stats_handle = (config.log.stats_interval_s > 0).then(|| {
        let pipeline = Arc::clone(&pipeline);
        let running = Arc::clone(&running);
        let period = Duration::from_secs(config.log.stats_interval_s);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            while running.load(Ordering::Relaxed) {
                interval.tick().await;
                let stats = pipeline.stats();
                info!("L1 Statistics:");
                info!("  Slots scheduled: {}, finalized: {}, in flight: {}",
                      stats.slots_scheduled, stats.slots_finalized, pipeline.slots_in_flight());
                info!("  Indications sent: {}, dropped: {}",
                      stats.indications_sent, stats.indications_dropped);
                info!("  Unknown PDUs: {}, TA commands applied: {}",
                      stats.unknown_pdus, stats.ta_applied);
            }
        })
    });

    // Wait for the clock to finish or a shutdown signal
    let finished = tokio::select! {
        result = &mut clock_handle => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let clock_result = match finished {
        Some(result) => result?,
        None => {
            info!("Received shutdown signal");
            running.store(false, Ordering::Relaxed);
            clock_handle.await?
        }
    };
    running.store(false, Ordering::Relaxed);
    
    match clock_result {
        Ok(scheduled) => info!("Slot clock stopped after {} slots", scheduled),
        Err(e) if e.is_fatal() => {
            error!("Fatal slot pipeline error: {}", e);
            std::process::abort();
        }
        Err(e) => return Err(e.into()),
    }
    
    // Shutdown
    info!("Shutting down L1 node");
    let period = config.pipeline.scs.slot_duration();
    if !wait_idle(&pipeline, period, 1000) {
        warn!("{} slots still in flight at shutdown", pipeline.slots_in_flight());
    }
    queues.close_all();
    
    for handle in drains {
        let summary = handle.await?;
        info!(
            "Consumer {}: {} messages, {} entries, last slot {:?}",
            summary.class.name(), summary.messages, summary.entries, summary.last_slot
        );
    }
    if let Some(handle) = stats_handle {
        handle.abort();
    }
    
    info!("Downlink transport blocks transmitted: {}", processor.transmitted());
    info!("Scheduling responses freed: {}, live: {}", responses.freed(), responses.live());
    println!("{}", serde_json::to_string_pretty(&pipeline.stats())?);
    
    info!("L1 node shutdown complete");
    Ok(())
}

/// Poll until no slot is in flight, at most `attempts` slot periods
fn wait_idle(pipeline: &SlotPipeline, period: Duration, attempts: u32) -> bool {
    for _ in 0..attempts {
        if pipeline.slots_in_flight() == 0 {
            return true;
        }
        std::thread::sleep(period);
    }
    pipeline.slots_in_flight() == 0
}

/// Resynchronize the pipeline once no slot is in flight
///
/// Jobs still running would join barriers that a resync has reset, so the
/// resync is skipped when the pipeline does not drain in time.
fn resync_when_idle(pipeline: &SlotPipeline, period: Duration, attempts: u32) -> bool {
    if !wait_idle(pipeline, period, attempts) {
        warn!("{} slots still in flight, resync skipped", pipeline.slots_in_flight());
        return false;
    }
    pipeline.resync();
    true
}

/// Schedule one slot per slot period until stopped or `max_slots` is reached
fn run_slot_clock(
    pipeline: &SlotPipeline,
    responses: &Arc<SchedResponsePool<SchedResponse>>,
    mut scheduler: SyntheticScheduler,
    running: &AtomicBool,
    max_slots: u64,
) -> Result<u64, LayerError> {
    let scs = pipeline.config().scs;
    let slots_per_frame = scs.slots_per_frame();
    let slots_per_hyperframe = slots_per_frame as u32 * time::FRAMES_PER_HYPERFRAME;
    let period = scs.slot_duration();
    let max_lag = period * MAX_LAG_SLOTS;
    
    let mut request = SlotRequest::default();
    let mut absolute = 0u32;
    let mut scheduled = 0u64;
    let mut deadline = Instant::now();
    
    while running.load(Ordering::Relaxed) && (max_slots == 0 || scheduled < max_slots) {
        let slot = SlotId::from_absolute(absolute, slots_per_frame);
        let response = scheduler.build(slot, absolute, &mut request);
        pipeline.schedule_slot(&mut request, responses.create_ref(response))?;
        scheduled += 1;
        absolute = (absolute + 1) % slots_per_hyperframe;
        
        deadline += period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else if now - deadline > max_lag {
            warn!("Slot clock {:?} behind at {}, resynchronizing", now - deadline, slot);
            resync_when_idle(pipeline, period, 1000);
            deadline = Instant::now();
        }
    }
    
    Ok(scheduled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::types::{DmrsPorts, Rnti};
    use interfaces::fapi::{PrachPdu, PucchPdu, PuschPdu, SlotPdu};
    use interfaces::QueueConfig;
    use layers::phy::processor::{ChannelProcessor, DataOutcome, PrachDetection, UciReport};
    use layers::phy::slot_store::{DataChannel, SlotPduStore};
    use layers::phy::{HarqDirection, HarqStatus, PipelineConfig};

    /// Loopback decoding that waits until `open` is set
    struct HeldProcessor {
        inner: LoopbackProcessor,
        open: Arc<AtomicBool>,
    }

    impl ChannelProcessor for HeldProcessor {
        fn decode_data(&self, slot: SlotId, channel: &DataChannel) -> DataOutcome {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !self.open.load(Ordering::Acquire) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.inner.decode_data(slot, channel)
        }

        fn detect_prach(&self, slot: SlotId, pdu: &PrachPdu) -> Option<PrachDetection> {
            self.inner.detect_prach(slot, pdu)
        }

        fn measure_pucch(&self, slot: SlotId, pdu: &PucchPdu) -> UciReport {
            self.inner.measure_pucch(slot, pdu)
        }

        fn transmit(&self, slot: SlotId, store: &SlotPduStore, response: &SchedResponse) -> usize {
            self.inner.transmit(slot, store, response)
        }
    }

    #[test]
    fn test_resync_waits_for_in_flight_slots() {
        let open = Arc::new(AtomicBool::new(false));
        let queues = Arc::new(IndicationQueues::new(&QueueConfig::default()).unwrap());
        let pipeline = SlotPipeline::new(
            PipelineConfig {
                worker_threads: 1,
                ..Default::default()
            },
            Arc::new(HeldProcessor {
                inner: LoopbackProcessor::new(),
                open: Arc::clone(&open),
            }),
            queues,
        )
        .unwrap();
        let responses = SchedResponsePool::<SchedResponse>::new();
        
        let slot = SlotId::new(0, 1);
        let mut request = SlotRequest::new(slot);
        request.push(SlotPdu::Pusch(PuschPdu {
            handle: 1,
            rnti: Rnti(0x4601),
            harq_pid: 3,
            new_data: true,
            rv: 0,
            dmrs_ports: DmrsPorts::PORT0,
            mcs: 5,
            num_cb: 1,
            tx_payload: Some(Bytes::from_static(b"late")),
        }));
        let response = responses.create_ref(SchedResponse { slot, tx_data: Vec::new() });
        pipeline.schedule_slot(&mut request, response).unwrap();
        
        assert!(!resync_when_idle(&pipeline, Duration::from_millis(1), 3));
        let record = pipeline.harq_record(HarqDirection::Uplink, 3).unwrap();
        assert_eq!(record.status, HarqStatus::Active);
        assert_eq!(record.associated, Some(slot));
        
        open.store(true, Ordering::Release);
        assert!(resync_when_idle(&pipeline, Duration::from_millis(1), 5000));
        assert_eq!(pipeline.slots_in_flight(), 0);
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.stats().slots_finalized < 1 {
            assert!(Instant::now() < deadline, "slot not finalized in time");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(responses.live(), 0);
    }
}
