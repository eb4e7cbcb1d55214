//! 📥 The pending buffer — where messages wait for their flight.
//!
//! 🎬 *[a departure lounge. no wifi. everyone is a message.]*
//!
//! One [`PendingBuffer`] per write path. The producer pushes, the flush worker
//! drains. The atomic count mirrors the Vec length and is only ever changed while
//! the lock is held, so a drainer can never see half a push. The lock is held for
//! a `push` or a `mem::take`, never across an `.await`, which is why this is a
//! `std::sync::Mutex` and not the tokio one wearing a trench coat.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::Message;

/// 📦 Unbounded, ordered, thread-safe intake buffer.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    items: Mutex<Vec<Arc<Message>>>,
    count: AtomicUsize,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // -- 🔒 a panicking pusher poisons the mutex; the Vec is still a Vec, so take it back
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Message>>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 🚀 Append one message. O(1) amortized, never blocks on I/O, never fails.
    ///
    /// Returns the pending count right after this push, which is what the lane
    /// compares against its flush threshold.
    pub fn enqueue(&self, message: Arc<Message>) -> usize {
        let mut items = self.lock();
        items.push(message);
        let pending = items.len();
        self.count.store(pending, Ordering::Release);
        pending
    }

    /// 🗑️ Atomically take everything currently queued.
    ///
    /// A concurrent `enqueue` lands either in this drain or the next one. Never both,
    /// never neither.
    pub fn drain_all(&self) -> Vec<Arc<Message>> {
        let mut items = self.lock();
        let drained = std::mem::take(&mut *items);
        self.count.store(0, Ordering::Release);
        drained
    }

    /// 🔢 Pending count, lock-free. Used by the scheduler's "anything to do?" check.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
