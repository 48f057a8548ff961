//! Write queue feeding the batch processor.
//!
//! A plain FIFO of [`GraphUpdate`]s. The engine's ticker drains it in
//! fixed-size batches; anything queued while a flush is running simply waits
//! for the next tick.
//!
//! Entries pushed with [`WriteQueue::push_applied`] were already applied to
//! the in-memory graph by the caller. They hold only the token id and mark
//! the graph dirty; the batch processor persists them without applying them
//! a second time.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::model::{GraphUpdate, TokenId};

/// Default number of updates drained per flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum QueuedUpdate {
    /// Still to be applied to the store.
    Pending(GraphUpdate),
    /// Already reflected in memory; only the id is kept.
    Applied(TokenId),
}

/// A drained batch, split by whether the store still has to apply it.
#[derive(Debug, Default)]
pub struct Batch {
    pub pending: Vec<GraphUpdate>,
    pub applied: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.pending.len() + self.applied
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct WriteQueue {
    pending: Mutex<VecDeque<QueuedUpdate>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a mutation to be applied at the next flush.
    pub fn push(&self, update: GraphUpdate) {
        self.pending.lock().push_back(QueuedUpdate::Pending(update));
    }

    /// Record that the caller already changed `id` in memory.
    pub fn push_applied(&self, id: impl Into<TokenId>) {
        self.pending.lock().push_back(QueuedUpdate::Applied(id.into()));
    }

    /// Take up to `max` updates from the front, oldest first.
    pub fn drain_batch(&self, max: usize) -> Batch {
        let mut pending = self.pending.lock();
        let n = max.min(pending.len());
        let mut batch = Batch::default();
        for queued in pending.drain(..n) {
            match queued {
                QueuedUpdate::Pending(update) => batch.pending.push(update),
                QueuedUpdate::Applied(_) => batch.applied += 1,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Discard everything queued. Returns how many updates were dropped.
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let n = pending.len();
        pending.clear();
        n
    }
}
