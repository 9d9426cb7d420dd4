//! Scheduling Response Lifetime
//! 
//! A scheduling response is shared between the slot producer and the
//! transmit job of the same slot. Each holder owns one reference; the
//! response is released when the last holder lets go, whichever thread that
//! is.

use crate::LayerError;
use common::types::SlotId;
use interfaces::fapi::TxDataPdu;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Scheduling response handed from the MAC for one slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedResponse {
    pub slot: SlotId,
    /// Downlink transport blocks, by position in the slot's PDU list
    pub tx_data: Vec<TxDataPdu>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedResponseId(pub u64);

impl fmt::Display for SchedResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry<P> {
    refcount: usize,
    payload: Arc<P>,
}

struct PoolInner<P> {
    next_id: u64,
    entries: HashMap<u64, Entry<P>>,
}

/// Reference-counted table of live scheduling responses
pub struct SchedResponsePool<P> {
    inner: Mutex<PoolInner<P>>,
    freed: AtomicU64,
}

impl<P: Send + Sync + 'static> SchedResponsePool<P> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                next_id: 0,
                entries: HashMap::new(),
            }),
            freed: AtomicU64::new(0),
        })
    }

    fn insert(&self, payload: P) -> (SchedResponseId, Arc<P>) {
        let payload = Arc::new(payload);
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                refcount: 1,
                payload: Arc::clone(&payload),
            },
        );
        trace!("Scheduling response {} created", id);
        (SchedResponseId(id), payload)
    }

    /// Register a response held once by the caller
    pub fn create(&self, payload: P) -> SchedResponseId {
        self.insert(payload).0
    }

    /// Register a response and wrap the caller's reference in a handle
    pub fn create_ref(self: &Arc<Self>, payload: P) -> SchedResponseRef<P> {
        let (id, payload) = self.insert(payload);
        SchedResponseRef {
            pool: Arc::clone(self),
            id,
            payload,
        }
    }

    /// Add one holder
    pub fn acquire(&self, id: SchedResponseId) -> Result<(), LayerError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&id.0)
            .ok_or(LayerError::UnknownSchedResponse(id.0))?;
        entry.refcount += 1;
        trace!("Scheduling response {} acquired, refcount {}", id, entry.refcount);
        Ok(())
    }

    /// Drop one holder; true when this call freed the response
    pub fn release(&self, id: SchedResponseId) -> Result<bool, LayerError> {
        let freed = {
            let mut inner = self.inner.lock();
            let entry = inner
                .entries
                .get_mut(&id.0)
                .ok_or(LayerError::UnknownSchedResponse(id.0))?;
            entry.refcount -= 1;
            if entry.refcount == 0 {
                inner.entries.remove(&id.0)
            } else {
                None
            }
        };
        
        match freed {
            Some(entry) => {
                // Payload goes away on the releasing thread, outside the table lock
                drop(entry);
                self.freed.fetch_add(1, Ordering::Relaxed);
                trace!("Scheduling response {} freed", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn payload(&self, id: SchedResponseId) -> Result<Arc<P>, LayerError> {
        self.inner
            .lock()
            .entries
            .get(&id.0)
            .map(|e| Arc::clone(&e.payload))
            .ok_or(LayerError::UnknownSchedResponse(id.0))
    }

    pub fn refcount(&self, id: SchedResponseId) -> Option<usize> {
        self.inner.lock().entries.get(&id.0).map(|e| e.refcount)
    }

    /// Responses not yet freed
    pub fn live(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Responses freed since startup
    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }
}

/// One holder's reference to a scheduling response
///
/// Cloning takes another reference; dropping releases this one.
pub struct SchedResponseRef<P: Send + Sync + 'static> {
    pool: Arc<SchedResponsePool<P>>,
    id: SchedResponseId,
    payload: Arc<P>,
}

impl<P: Send + Sync + 'static> SchedResponseRef<P> {
    pub fn id(&self) -> SchedResponseId {
        self.id
    }

    pub fn refcount(&self) -> usize {
        self.pool.refcount(self.id).unwrap_or(0)
    }
}

impl<P: Send + Sync + 'static> Clone for SchedResponseRef<P> {
    fn clone(&self) -> Self {
        if let Err(e) = self.pool.acquire(self.id) {
            error!("Cloning scheduling response handle: {}", e);
        }
        Self {
            pool: Arc::clone(&self.pool),
            id: self.id,
            payload: Arc::clone(&self.payload),
        }
    }
}

impl<P: Send + Sync + 'static> Drop for SchedResponseRef<P> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.release(self.id) {
            error!("Releasing scheduling response handle: {}", e);
        }
    }
}

impl<P: Send + Sync + 'static> Deref for SchedResponseRef<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.payload
    }
}

impl<P: Send + Sync + fmt::Debug + 'static> fmt::Debug for SchedResponseRef<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedResponseRef")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_acquire_release_counts() {
        let pool = SchedResponsePool::new();
        let id = pool.create(SchedResponse::default());
        assert_eq!(pool.refcount(id), Some(1));
        pool.acquire(id).unwrap();
        assert_eq!(pool.refcount(id), Some(2));
        assert!(!pool.release(id).unwrap());
        assert!(pool.release(id).unwrap());
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.freed(), 1);
    }

    #[test]
    fn test_unknown_id_rejected() {
        let pool: Arc<SchedResponsePool<SchedResponse>> = SchedResponsePool::new();
        let id = pool.create(SchedResponse::default());
        pool.release(id).unwrap();
        let err = pool.release(id).unwrap_err();
        assert!(matches!(err, LayerError::UnknownSchedResponse(0)));
        assert!(err.is_fatal());
        assert!(pool.acquire(SchedResponseId(99)).is_err());
        assert!(pool.payload(id).is_err());
    }

    #[test]
    fn test_concurrent_double_release_frees_once() {
        for _ in 0..200 {
            let drops = Arc::new(AtomicUsize::new(0));
            let pool = SchedResponsePool::new();
            let id = pool.create(DropCounter(Arc::clone(&drops)));
            pool.acquire(id).unwrap();
            
            let releasers: Vec<_> = (0..2)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || pool.release(id).unwrap())
                })
                .collect();
            let freed_by: Vec<bool> = releasers.into_iter().map(|h| h.join().unwrap()).collect();
            
            assert_eq!(freed_by.iter().filter(|f| **f).count(), 1);
            assert_eq!(pool.freed(), 1);
            assert_eq!(pool.live(), 0);
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_handle_clone_and_drop() {
        let drops = Arc::new(AtomicUsize::new(0));
        let pool = SchedResponsePool::new();
        let producer = pool.create_ref(DropCounter(Arc::clone(&drops)));
        let tx = producer.clone();
        assert_eq!(producer.refcount(), 2);
        
        let tx_thread = thread::spawn(move || drop(tx));
        tx_thread.join().unwrap();
        assert_eq!(producer.refcount(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        
        drop(producer);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(pool.freed(), 1);
    }

    #[test]
    fn test_handle_derefs_to_payload() {
        let pool = SchedResponsePool::new();
        let handle = pool.create_ref(SchedResponse {
            slot: SlotId::new(3, 1),
            tx_data: Vec::new(),
        });
        assert_eq!(handle.slot, SlotId::new(3, 1));
        assert_eq!(pool.payload(handle.id()).unwrap().slot, SlotId::new(3, 1));
    }
}
