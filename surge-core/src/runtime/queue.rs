//! Bounded FIFO backlog with blocking push
//!
//! Capacity is fixed at construction. `push` on a full queue blocks the
//! producer until space frees; the only way to abort a blocked push is
//! `close()`, which drops the item and counts it as abandoned.

use crate::{Error, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    capacity: usize,
    abandoned: AtomicU64,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("queue_capacity must be > 0"));
        }
        let (tx, rx) = bounded(capacity);
        let (close_tx, close_rx) = bounded(0);
        Ok(Self {
            tx,
            rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            capacity,
            abandoned: AtomicU64::new(0),
        })
    }

    /// Append `item`, blocking while the queue is full
    ///
    /// Returns `Error::Shutdown` if the queue is closed before space frees;
    /// the item is dropped in that case.
    pub fn push(&self, item: T) -> Result<()> {
        if self.is_closed() {
            return self.abandon();
        }
        let item = match self.tx.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(item)) => item,
            Err(TrySendError::Disconnected(_)) => return self.abandon(),
        };

        select! {
            send(self.tx, item) -> res => match res {
                Ok(()) => Ok(()),
                Err(_) => self.abandon(),
            },
            recv(self.close_rx) -> _ => self.abandon(),
        }
    }

    /// Append `item` only if there is room; otherwise give it back
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        if self.is_closed() {
            return Err(item);
        }
        self.tx.try_send(item).map_err(TrySendError::into_inner)
    }

    /// Remove the head item, if any
    pub fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
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

    /// Number of items dropped because the queue closed before they fit
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Wake every blocked producer with an abandonment
    ///
    /// Items already queued stay poppable.
    pub fn close(&self) {
        if let Ok(mut guard) = self.close_tx.lock() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        // A disconnected close channel is always ready
        matches!(self.close_rx.try_recv(), Err(crossbeam_channel::TryRecvError::Disconnected))
    }

    fn abandon(&self) -> Result<()> {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
        Err(Error::Shutdown("queue closed while waiting for space".to_string()))
    }
}
