//! Slot Worker Pool
//! 
//! Named OS threads executing per-channel jobs. Jobs never block on each
//! other; completion is signalled through the slot barrier, not through the
//! pool.

use crate::LayerError;
use crossbeam_channel::{unbounded, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolCounters {
    pending: AtomicUsize,
    executed: AtomicU64,
    panicked: AtomicU64,
}

pub struct WorkerPool {
    name: String,
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn new(num_threads: usize, name: &str) -> Result<Self, LayerError> {
        if num_threads == 0 {
            return Err(LayerError::InvalidConfiguration(
                "worker pool needs at least one thread".into(),
            ));
        }
        
        let (tx, rx) = unbounded::<Job>();
        let counters = Arc::new(PoolCounters::default());
        let mut handles = Vec::with_capacity(num_threads);
        
        for index in 0..num_threads {
            let rx = rx.clone();
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
                            let msg = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            error!("Worker job panicked: {}", msg);
                            counters.panicked.fetch_add(1, Ordering::Relaxed);
                        }
                        counters.pending.fetch_sub(1, Ordering::AcqRel);
                        counters.executed.fetch_add(1, Ordering::Relaxed);
                    }
                })
                .map_err(|e| {
                    LayerError::InvalidConfiguration(format!("failed to spawn worker {}: {}", index, e))
                })?;
            handles.push(handle);
        }
        
        info!("Started worker pool '{}' with {} threads", name, num_threads);
        Ok(Self {
            name: name.to_string(),
            tx: Some(tx),
            handles,
            counters,
        })
    }

    pub fn submit<F>(&self, job: F) -> Result<(), LayerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(LayerError::WorkersStopped)?;
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        tx.send(Box::new(job)).map_err(|_| {
            self.counters.pending.fetch_sub(1, Ordering::AcqRel);
            LayerError::WorkersStopped
        })
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Jobs submitted and not yet finished
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::Acquire)
    }

    pub fn executed(&self) -> u64 {
        self.counters.executed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.counters.panicked.load(Ordering::Relaxed)
    }

    /// Finish queued jobs and join every thread
    pub fn shutdown(&mut self) {
        if self.tx.take().is_none() {
            return;
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread of pool '{}' terminated abnormally", self.name);
            }
        }
        debug!("Worker pool '{}' stopped", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
