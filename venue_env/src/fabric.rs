//! In-process channel fabric: one shared inbound channel and one private
//! reply channel per customer group.
//!
//! # Record Flow
//!
//! ```text
//! Customer                     Fabric                        Broker
//!   |                            |                              |
//!   |-- open_reply(id) --------->| registry[id] = tx            |
//!   |-- inbound.send(line) ----->|----------------------------->| recv_timeout()
//!   |                            |<-- send_reply(id, line) -----|
//!   |<-- recv_timeout() ---------|                              |
//!   |-- close() ---------------->| registry.remove(id)          |
//! ```
//!
//! Records are newline-terminated text. Writes never block: a reply to a
//! channel that is missing, full or closed fails immediately with a
//! [`FabricError`] and the caller decides whether to retry.

use crate::error::FabricError;
use crate::types::ChannelId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Default number of records the inbound channel buffers.
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

/// Number of records a reply channel buffers. One reply is expected.
const REPLY_CAPACITY: usize = 4;

/// How many removed reply ids the fabric remembers. Older ids fall back to
/// [`FabricError::NoReader`].
const RETIRED_CAPACITY: usize = 4096;

/// Result of a timed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A record arrived
    Record(String),
    /// Nothing arrived before the timeout
    Empty,
    /// Every writer is gone; nothing will ever arrive
    Disconnected,
}

/// The shared channel fabric.
///
/// Cheap to clone; all clones address the same channels.
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

struct FabricInner {
    inbound_tx: mpsc::Sender<String>,
    inbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
    replies: Mutex<ReplyRegistry>,
    controller: FabricController,
    opened: AtomicU64,
    removed: AtomicU64,
}

/// Open reply channels, plus a bounded window of recently removed ids.
#[derive(Default)]
struct ReplyRegistry {
    open: HashMap<ChannelId, mpsc::Sender<String>>,
    retired: HashSet<ChannelId>,
    retired_order: VecDeque<ChannelId>,
}

impl ReplyRegistry {
    fn open(&mut self, id: ChannelId, tx: mpsc::Sender<String>) {
        if self.retired.remove(&id) {
            self.retired_order.retain(|old| old != &id);
        }
        self.open.insert(id, tx);
    }

    fn remove(&mut self, id: &ChannelId) -> bool {
        if self.open.remove(id).is_none() {
            return false;
        }
        if self.retired_order.len() >= RETIRED_CAPACITY {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
        self.retired.insert(id.clone());
        self.retired_order.push_back(id.clone());
        true
    }

    fn writer(&self, id: &ChannelId) -> Result<mpsc::Sender<String>, FabricError> {
        match self.open.get(id) {
            Some(tx) => Ok(tx.clone()),
            None if self.retired.contains(id) => Err(FabricError::Removed(id.clone())),
            None => Err(FabricError::NoReader(id.clone())),
        }
    }
}

impl FabricInner {
    fn replies(&self) -> MutexGuard<'_, ReplyRegistry> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_reply(&self, id: &ChannelId) -> bool {
        let removed = self.replies().remove(id);
        if removed {
            self.removed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }
}

impl Fabric {
    /// Creates a fabric whose inbound channel buffers `inbound_capacity` records.
    pub fn new(inbound_capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        Self {
            inner: Arc::new(FabricInner {
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                replies: Mutex::new(ReplyRegistry::default()),
                controller: FabricController::new(),
                opened: AtomicU64::new(0),
                removed: AtomicU64::new(0),
            }),
        }
    }

    /// Claims the single reader end of the inbound channel.
    pub fn take_inbound(&self) -> Result<InboundReceiver, FabricError> {
        let mut slot = self
            .inner
            .inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.take()
            .map(|rx| InboundReceiver { rx })
            .ok_or(FabricError::InboundTaken)
    }

    /// Returns a writer for the inbound channel.
    pub fn inbound(&self) -> InboundSender {
        InboundSender {
            tx: self.inner.inbound_tx.clone(),
        }
    }

    /// Creates a private reply channel and registers it under `id`.
    ///
    /// Re-opening an id that is still registered replaces the old writer.
    pub fn open_reply(&self, id: ChannelId) -> ReplyChannel {
        let (tx, rx) = mpsc::channel(REPLY_CAPACITY);
        self.inner.replies().open(id.clone(), tx);
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        debug!("[Fabric] opened reply channel {}", id);
        ReplyChannel {
            id,
            rx,
            fabric: Arc::clone(&self.inner),
            closed: false,
        }
    }

    /// Writes one record to a reply channel without waiting.
    ///
    /// A channel its owner already removed fails with
    /// [`FabricError::Removed`]; one never opened fails with
    /// [`FabricError::NoReader`].
    pub fn send_reply(&self, to: &ChannelId, record: &str) -> Result<(), FabricError> {
        if self.inner.controller.take_fault() {
            return Err(FabricError::InjectedFault(to.clone()));
        }

        let tx = self.inner.replies().writer(to)?;

        tx.try_send(record.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => FabricError::Full(to.clone()),
            mpsc::error::TrySendError::Closed(_) => FabricError::Closed(to.clone()),
        })
    }

    /// Number of reply channels currently registered.
    pub fn live_reply_channels(&self) -> usize {
        self.inner.replies().open.len()
    }

    /// Total reply channels opened over the fabric's lifetime.
    pub fn reply_channels_opened(&self) -> u64 {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// Total reply channels removed over the fabric's lifetime.
    pub fn reply_channels_removed(&self) -> u64 {
        self.inner.removed.load(Ordering::Relaxed)
    }

    /// Fault-injection controls.
    pub fn controller(&self) -> &FabricController {
        &self.inner.controller
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new(DEFAULT_INBOUND_CAPACITY)
    }
}

/// Writer end of the inbound channel.
#[derive(Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<String>,
}

impl InboundSender {
    /// Sends one record, waiting at most `timeout` for buffer space.
    pub async fn send(&self, record: String, timeout: Duration) -> Result<(), FabricError> {
        self.tx.send_timeout(record, timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(_) => FabricError::Full(inbound_id()),
            mpsc::error::SendTimeoutError::Closed(_) => FabricError::Closed(inbound_id()),
        })
    }
}

fn inbound_id() -> ChannelId {
    ChannelId::new("inbound")
}

/// Reader end of the inbound channel. Dropping it releases the channel:
/// later writes fail with [`FabricError::Closed`].
pub struct InboundReceiver {
    rx: mpsc::Receiver<String>,
}

impl InboundReceiver {
    /// Waits up to `timeout` for the next record.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> RecvOutcome {
        recv_timeout(&mut self.rx, timeout).await
    }

    /// Returns the next already-queued record, if any.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// A customer group's private reply channel.
///
/// The registry entry is removed by [`ReplyChannel::close`] or, failing
/// that, on drop. Removal happens at most once.
pub struct ReplyChannel {
    id: ChannelId,
    rx: mpsc::Receiver<String>,
    fabric: Arc<FabricInner>,
    closed: bool,
}

impl ReplyChannel {
    /// The channel's id, used as the inbound address prefix.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Waits up to `timeout` for the next record.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> RecvOutcome {
        if self.closed {
            return RecvOutcome::Disconnected;
        }
        recv_timeout(&mut self.rx, timeout).await
    }

    /// Removes the channel from the fabric.
    ///
    /// Returns `true` only on the call that actually removed it.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.rx.close();
        let removed = self.fabric.remove_reply(&self.id);
        debug!("[Fabric] removed reply channel {}", self.id);
        removed
    }

    /// True once [`ReplyChannel::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ReplyChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn recv_timeout(rx: &mut mpsc::Receiver<String>, timeout: Duration) -> RecvOutcome {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(record)) => RecvOutcome::Record(record),
        Ok(None) => RecvOutcome::Disconnected,
        Err(_) => RecvOutcome::Empty,
    }
}

/// Fault injection for reply writes.
pub struct FabricController {
    pending_reply_faults: AtomicU32,
    injected: AtomicU64,
}

impl FabricController {
    fn new() -> Self {
        Self {
            pending_reply_faults: AtomicU32::new(0),
            injected: AtomicU64::new(0),
        }
    }

    /// Makes the next `count` reply writes fail with `InjectedFault`.
    pub fn fail_next_replies(&self, count: u32) {
        self.pending_reply_faults.fetch_add(count, Ordering::Relaxed);
    }

    /// Number of faults injected so far.
    pub fn injected_faults(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    fn take_fault(&self) -> bool {
        let taken = self
            .pending_reply_faults
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            self.injected.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }
}
