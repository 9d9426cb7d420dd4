//! Dynamic Join Barrier
//! 
//! A barrier whose join count is only known after the joiners have started.
//! Workers `join` when done; the producer `update`s the barrier with the number
//! of joins to expect and the action to run. Whichever call completes the count
//! runs the action, on its own thread, exactly once per arming cycle.

use crate::LayerError;
use parking_lot::Mutex;
use tracing::{debug, trace};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct BarrierState {
    joined: usize,
    required: usize,
    callback: Option<Callback>,
}

/// Join barrier with a late-bound join count
pub struct DynamicBarrier {
    state: Mutex<BarrierState>,
}

impl DynamicBarrier {
    /// Create an unarmed barrier with no joins recorded
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                joined: 0,
                required: 0,
                callback: None,
            }),
        }
    }

    /// Record one finished worker, running the armed callback if it completes the count
    pub fn join(&self) {
        let fire = {
            let mut state = self.state.lock();
            state.joined += 1;
            trace!("Barrier join {}/{}", state.joined, state.required);
            if state.callback.is_some() && state.joined == state.required {
                state.joined = 0;
                state.callback.take()
            } else {
                None
            }
        };
        
        if let Some(callback) = fire {
            callback();
        }
    }

    /// Arm the barrier for `required` joins
    ///
    /// If exactly `required` joins already happened the callback runs now, on
    /// the calling thread, and the barrier stays unarmed.
    pub fn update<F>(&self, required: usize, callback: F) -> Result<(), LayerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.joined == required {
            state.joined = 0;
            drop(state);
            debug!("Barrier already complete with {} joins, firing on update", required);
            callback();
            return Ok(());
        }
        
        if state.joined > required {
            return Err(LayerError::BarrierOverjoined {
                joined: state.joined,
                required,
            });
        }
        
        if state.callback.is_some() {
            return Err(LayerError::BarrierArmed {
                required: state.required,
            });
        }
        
        state.required = required;
        state.callback = Some(Box::new(callback));
        Ok(())
    }

    /// Forget recorded joins and drop an armed callback without running it
    pub fn reset(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.joined = 0;
            state.required = 0;
            state.callback.take()
        };
        // Captured state is released outside the lock
        drop(dropped);
    }

    /// Joins recorded in the current cycle
    pub fn joined(&self) -> usize {
        self.state.lock().joined
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().callback.is_some()
    }
}

impl Default for DynamicBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed ring of barriers, one per in-flight slot
pub struct BarrierRing {
    barriers: Vec<DynamicBarrier>,
}

impl BarrierRing {
    pub fn new(size: usize) -> Result<Self, LayerError> {
        if size == 0 {
            return Err(LayerError::InvalidConfiguration(
                "barrier ring needs at least one barrier".into(),
            ));
        }
        Ok(Self {
            barriers: (0..size).map(|_| DynamicBarrier::new()).collect(),
        })
    }

    /// Barrier serving an absolute slot count
    pub fn for_slot(&self, absolute_slot: u32) -> &DynamicBarrier {
        &self.barriers[absolute_slot as usize % self.barriers.len()]
    }

    /// Drop every pending cycle, e.g. after the slot clock resynchronized
    pub fn reset_all(&self) {
        for barrier in &self.barriers {
            barrier.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn counter_callback(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_update_after_joins_fires_immediately() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = DynamicBarrier::new();
        for _ in 0..4 {
            barrier.join();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        
        barrier.update(4, counter_callback(&fired)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.joined(), 0);
        assert!(!barrier.is_armed());
    }

    #[test]
    fn test_trigger_twice() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = DynamicBarrier::new();
        for round in 1..=2 {
            for _ in 0..4 {
                barrier.join();
            }
            barrier.update(4, counter_callback(&fired)).unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), round);
        }
    }

    #[test]
    fn test_armed_then_joined() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = DynamicBarrier::new();
        barrier.update(3, counter_callback(&fired)).unwrap();
        barrier.join();
        barrier.join();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        barrier.join();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Extra joins after firing start a fresh cycle and do not fire
        barrier.join();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.joined(), 1);
    }

    #[test]
    fn test_zero_required_fires_on_update() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = DynamicBarrier::new();
        barrier.update(0, counter_callback(&fired)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_overjoined_update_rejected() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = DynamicBarrier::new();
        for _ in 0..3 {
            barrier.join();
        }
        let err = barrier.update(2, counter_callback(&fired)).unwrap_err();
        assert!(matches!(err, LayerError::BarrierOverjoined { joined: 3, required: 2 }));
        assert!(err.is_fatal());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reset_drops_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = DynamicBarrier::new();
        barrier.join();
        barrier.update(2, counter_callback(&fired)).unwrap();
        barrier.reset();
        assert!(!barrier.is_armed());
        barrier.join();
        barrier.join();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_joiners_fire_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(DynamicBarrier::new());
        barrier.update(4, counter_callback(&fired)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || barrier.join())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multithreaded_update_race() {
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..300 {
            let barrier = Arc::new(DynamicBarrier::new());
            let updater = {
                let barrier = Arc::clone(&barrier);
                let callback = counter_callback(&fired);
                thread::spawn(move || barrier.update(3, callback).unwrap())
            };
            let joiners: Vec<_> = (0..3)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || barrier.join())
                })
                .collect();
            for joiner in joiners {
                joiner.join().unwrap();
            }
            updater.join().unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 300);
    }

    #[test]
    fn test_ring_indexing() {
        let ring = BarrierRing::new(4).unwrap();
        assert_eq!(ring.len(), 4);
        ring.for_slot(1).join();
        assert_eq!(ring.for_slot(5).joined(), 1);
        assert_eq!(ring.for_slot(2).joined(), 0);
        ring.reset_all();
        assert_eq!(ring.for_slot(1).joined(), 0);
        assert!(BarrierRing::new(0).is_err());
    }
}
