//! Bounded Indication Queues
//! 
//! Fixed-capacity multi-producer/multi-consumer queues carrying indication
//! messages from L1 to the scheduler. A `put` never blocks: it either moves
//! the message into the queue or hands it back to the caller.

use crate::indications::{
    CrcIndication, Indication, RachIndication, RxDataIndication, UciIndication,
};
use crate::InterfaceError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Rejected `put`; the message is still owned by the caller
pub enum PutError<T> {
    /// Queue at capacity
    Full(T),
    /// Queue closed
    Closed(T),
}

impl<T> PutError<T> {
    /// Take back the rejected message
    pub fn into_inner(self) -> T {
        match self {
            PutError::Full(msg) | PutError::Closed(msg) => msg,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, PutError::Full(_))
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Full(_) => f.write_str("Full(..)"),
            PutError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Full(_) => f.write_str("queue full"),
            PutError::Closed(_) => f.write_str("queue closed"),
        }
    }
}

impl<T> std::error::Error for PutError<T> {}

/// Bounded FIFO of heap-owned messages
pub struct IndicationQueue<T> {
    name: &'static str,
    capacity: usize,
    /// Dropped on close so that blocked consumers wake up
    tx: RwLock<Option<Sender<T>>>,
    rx: Receiver<T>,
}

impl<T> IndicationQueue<T> {
    /// Create a queue holding at most `capacity` messages
    pub fn new(name: &'static str, capacity: usize) -> Result<Self, InterfaceError> {
        if capacity == 0 {
            return Err(InterfaceError::InvalidConfig(format!(
                "queue {} needs a capacity of at least 1",
                name
            )));
        }
        let (tx, rx) = bounded(capacity);
        debug!("Created indication queue {} with capacity {}", name, capacity);
        Ok(Self {
            name,
            capacity,
            tx: RwLock::new(Some(tx)),
            rx,
        })
    }

    /// Move `msg` into the queue without blocking
    pub fn put(&self, msg: T) -> Result<(), PutError<T>> {
        let guard = self.tx.read();
        match guard.as_ref() {
            None => Err(PutError::Closed(msg)),
            Some(tx) => tx.try_send(msg).map_err(|e| match e {
                TrySendError::Full(msg) => PutError::Full(msg),
                TrySendError::Disconnected(msg) => PutError::Closed(msg),
            }),
        }
    }

    /// Block until a message arrives; `None` once the queue is closed and drained
    pub fn get(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking `get`
    pub fn try_get(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// `get` bounded by `timeout`, for callers that enforce a slot deadline
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<T>, InterfaceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(InterfaceError::QueueClosed(self.name)),
        }
    }

    /// Refuse further puts and wake blocked consumers once drained
    pub fn close(&self) {
        if self.tx.write().take().is_some() {
            info!("Closed indication queue {} ({} pending)", self.name, self.rx.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Capacity of each indication queue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub rx_data_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub crc_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub uci_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub rach_capacity: usize,
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            rx_data_capacity: default_queue_capacity(),
            crc_capacity: default_queue_capacity(),
            uci_capacity: default_queue_capacity(),
            rach_capacity: default_queue_capacity(),
        }
    }
}

/// The four L1 to scheduler queues
pub struct IndicationQueues {
    pub rx_data: IndicationQueue<RxDataIndication>,
    pub crc: IndicationQueue<CrcIndication>,
    pub uci: IndicationQueue<UciIndication>,
    pub rach: IndicationQueue<RachIndication>,
}

impl IndicationQueues {
    pub fn new(config: &QueueConfig) -> Result<Self, InterfaceError> {
        Ok(Self {
            rx_data: IndicationQueue::new(RxDataIndication::CLASS.name(), config.rx_data_capacity)?,
            crc: IndicationQueue::new(CrcIndication::CLASS.name(), config.crc_capacity)?,
            uci: IndicationQueue::new(UciIndication::CLASS.name(), config.uci_capacity)?,
            rach: IndicationQueue::new(RachIndication::CLASS.name(), config.rach_capacity)?,
        })
    }

    pub fn close_all(&self) {
        self.rx_data.close();
        self.crc.close();
        self.uci.close();
        self.rach.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = IndicationQueue::new("test", 4).unwrap();
        for msg in ["A", "B", "C"] {
            queue.put(msg.to_string()).unwrap();
        }
        assert_eq!(queue.get().as_deref(), Some("A"));
        assert_eq!(queue.get().as_deref(), Some("B"));
        assert_eq!(queue.get().as_deref(), Some("C"));
        assert!(queue.try_get().is_none());
    }

    #[test]
    fn test_put_on_full_queue_returns_message() {
        let queue = IndicationQueue::new("test", 2).unwrap();
        queue.put(1u32).unwrap();
        queue.put(2u32).unwrap();

        let err = queue.put(3u32).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.into_inner(), 3);

        // Contents unchanged
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_get(), Some(1));
        assert_eq!(queue.try_get(), Some(2));
    }

    #[test]
    fn test_close_rejects_and_drains() {
        let queue = IndicationQueue::new("test", 2).unwrap();
        queue.put(5u8).unwrap();
        queue.close();
        assert!(queue.is_closed());

        match queue.put(6u8) {
            Err(PutError::Closed(msg)) => assert_eq!(msg, 6),
            other => panic!("unexpected put result: {:?}", other),
        }
        assert_eq!(queue.get(), Some(5));
        assert_eq!(queue.get(), None);
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let queue = Arc::new(IndicationQueue::<u32>::new("test", 1).unwrap());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_get_timeout() {
        let queue = IndicationQueue::<u32>::new("test", 1).unwrap();
        assert_eq!(queue.get_timeout(Duration::from_millis(5)).unwrap(), None);
        queue.close();
        assert!(queue.get_timeout(Duration::from_millis(5)).is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(IndicationQueue::<u32>::new("test", 0).is_err());
    }

    #[test]
    fn test_queues_are_independent() {
        let config = QueueConfig {
            rx_data_capacity: 1,
            crc_capacity: 2,
            ..QueueConfig::default()
        };
        let queues = IndicationQueues::new(&config).unwrap();
        let ind = RxDataIndication { slot: Default::default(), pdus: Vec::new() };
        queues.rx_data.put(ind.clone()).unwrap();
        assert!(queues.rx_data.put(ind).unwrap_err().is_full());

        let crc = CrcIndication { slot: Default::default(), crcs: Vec::new() };
        assert!(queues.crc.put(crc).is_ok());
        assert_eq!(queues.rach.capacity(), 64);
    }
}
