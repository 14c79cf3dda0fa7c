//! Bounded hand-off from discovery to the dialers.
//!
//! The queue's capacity is the only throttle on discovery: once it is full the
//! discovery task waits in [`DialQueueSender::reserve`] until a dialer frees a slot.

use crate::lifecycle::{Interrupted, Lifecycle};
use kad_peers_overlay::PeerInfo;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Why a queue operation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The lifecycle was cancelled while waiting.
    Cancelled,
    /// The other side of the queue is gone, and for pops, the queue is drained.
    Closed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Cancelled => write!(f, "Dial queue wait cancelled"),
            QueueError::Closed => write!(f, "Dial queue closed"),
        }
    }
}

impl Error for QueueError {}

impl From<Interrupted> for QueueError {
    fn from(_: Interrupted) -> Self {
        QueueError::Cancelled
    }
}

/// Create a dial queue holding at most `capacity` peers.
///
/// # Panics
///
/// If `capacity` is zero.
pub fn dial_queue(capacity: usize) -> (DialQueueSender, DialQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        DialQueueSender { tx },
        DialQueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producing half, owned by the discovery task.
///
/// Dropping it closes the queue: receivers drain what is left and then see
/// [`QueueError::Closed`].
#[derive(Debug)]
pub struct DialQueueSender {
    tx: mpsc::Sender<PeerInfo>,
}

/// A reserved slot in the queue, guaranteed to accept one peer.
pub struct DialSlot<'a> {
    permit: mpsc::Permit<'a, PeerInfo>,
}

impl DialSlot<'_> {
    pub fn send(self, peer: PeerInfo) {
        self.permit.send(peer);
    }
}

impl DialQueueSender {
    /// Wait for a free slot without handing over a peer yet.
    pub async fn reserve(&self, lifecycle: &Lifecycle) -> Result<DialSlot<'_>, QueueError> {
        let permit = lifecycle
            .guard(self.tx.reserve())
            .await?
            .map_err(|_| QueueError::Closed)?;
        Ok(DialSlot { permit })
    }

    /// Hand a peer to the dialers, waiting while the queue is full.
    pub async fn push(&self, peer: PeerInfo, lifecycle: &Lifecycle) -> Result<(), QueueError> {
        self.reserve(lifecycle).await?.send(peer);
        Ok(())
    }

    /// Number of peers waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consuming half, shared by every dialer.
///
/// Clones pop from the same queue; each peer is delivered to exactly one of
/// them.
#[derive(Debug, Clone)]
pub struct DialQueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<PeerInfo>>>,
}

impl DialQueueReceiver {
    /// Wait for the next peer.
    ///
    /// # Returns
    ///
    /// * `Ok(PeerInfo)` - The next peer in FIFO order.
    /// * `Err(QueueError::Cancelled)` - The lifecycle was cancelled first.
    /// * `Err(QueueError::Closed)` - The sender is gone and the queue is empty.
    pub async fn pop(&self, lifecycle: &Lifecycle) -> Result<PeerInfo, QueueError> {
        let mut rx = lifecycle.guard(self.rx.lock()).await?;
        lifecycle
            .guard(rx.recv())
            .await?
            .ok_or(QueueError::Closed)
    }

    /// Take the next peer if one is queued and no other receiver is popping.
    pub fn try_pop(&self) -> Option<PeerInfo> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}
