//! Batch Accumulator: groups submitted objects into sealed batches.
//!
//! There is exactly one open batch. It is sealed when it reaches the target
//! object count, when the next object would overflow the byte budget, on an
//! explicit flush, or when it has been open longer than `max_wait`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use akidb_client_core::ObjectWriteRequest;
use tokio::time::Instant;

use crate::aggregator::ResultAggregator;

/// Lifecycle of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Accumulating,
    Dispatched,
    Retrying,
    Completed,
    PartiallyFailed,
    Failed,
}

impl BatchState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accumulating => "accumulating",
            Self::Dispatched => "dispatched",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed | Self::Failed)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object in a batch, tied to its slot in the operation's aggregator.
#[derive(Debug)]
pub struct BatchEntry {
    pub aggregator: Arc<ResultAggregator>,
    pub index: usize,
    pub object: ObjectWriteRequest,
    /// Estimated encoded size in bytes.
    pub size: usize,
}

impl BatchEntry {
    #[must_use]
    pub fn new(
        aggregator: Arc<ResultAggregator>,
        index: usize,
        object: ObjectWriteRequest,
    ) -> Self {
        let size = object.estimated_size();
        Self {
            aggregator,
            index,
            object,
            size,
        }
    }

    /// Overrides the size estimate, e.g. with one that counts the default
    /// collection.
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.aggregator.is_pending(self.index)
    }
}

/// A group of objects sent together. Dropping a batch marks every entry that
/// is still pending as `NotAttempted`.
#[derive(Debug)]
pub struct Batch {
    pub seq: u64,
    pub entries: Vec<BatchEntry>,
    pub estimated_bytes: usize,
    pub opened_at: Instant,
    pub state: BatchState,
}

impl Batch {
    fn open(seq: u64) -> Self {
        Self {
            seq,
            entries: Vec::new(),
            estimated_bytes: 0,
            opened_at: Instant::now(),
            state: BatchState::Accumulating,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops entries that already reached a terminal outcome, e.g. because
    /// their operation was cancelled while the batch was queued.
    pub fn retain_pending(&mut self) {
        self.entries.retain(BatchEntry::is_pending);
        self.estimated_bytes = self.entries.iter().map(|entry| entry.size).sum();
    }

    fn push(&mut self, entry: BatchEntry) {
        self.estimated_bytes += entry.size;
        self.entries.push(entry);
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        for entry in &self.entries {
            entry.aggregator.abandon(entry.index);
        }
    }
}

/// Single-writer accumulator. Callers serialise access to it.
#[derive(Debug)]
pub struct BatchAccumulator {
    max_count: usize,
    max_bytes: usize,
    max_wait: Duration,
    open: Option<Batch>,
    next_seq: u64,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(max_count: usize, max_bytes: usize, max_wait: Duration) -> Self {
        Self {
            max_count: max_count.max(1),
            max_bytes: max_bytes.max(1),
            max_wait,
            open: None,
            next_seq: 1,
        }
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Objects in the open batch.
    #[must_use]
    pub fn open_len(&self) -> usize {
        self.open.as_ref().map_or(0, Batch::len)
    }

    /// Appends an entry and returns the batches sealed by it, oldest first.
    ///
    /// `target_count` is the controller's current target batch size; it is
    /// clamped to the configured maximum. An entry larger than the byte
    /// budget is sealed into a batch of its own.
    pub fn push(&mut self, entry: BatchEntry, target_count: usize) -> Vec<Batch> {
        let limit = target_count.clamp(1, self.max_count);
        let mut sealed = Vec::new();

        let overflows = self.open.as_ref().is_some_and(|open| {
            !open.is_empty() && open.estimated_bytes + entry.size > self.max_bytes
        });
        if overflows {
            sealed.extend(self.seal());
        }

        let max_bytes = self.max_bytes;
        let open = self.open_batch();
        open.push(entry);
        if open.len() >= limit || open.estimated_bytes >= max_bytes {
            sealed.extend(self.seal());
        }
        sealed
    }

    /// Seals the open batch regardless of its size.
    pub fn flush(&mut self) -> Option<Batch> {
        self.seal()
    }

    /// Seals the open batch if it has been open for at least `max_wait`.
    /// A zero `max_wait` disables the time threshold.
    pub fn seal_expired(&mut self, now: Instant) -> Option<Batch> {
        if self.max_wait.is_zero() {
            return None;
        }
        let expired = self
            .open
            .as_ref()
            .is_some_and(|open| now.saturating_duration_since(open.opened_at) >= self.max_wait);
        if expired {
            self.seal()
        } else {
            None
        }
    }

    fn open_batch(&mut self) -> &mut Batch {
        let seq = self.next_seq;
        let open = self.open.get_or_insert_with(|| Batch::open(seq));
        if open.seq == seq {
            self.next_seq += 1;
        }
        open
    }

    fn seal(&mut self) -> Option<Batch> {
        self.open.take().filter(|batch| !batch.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use akidb_client_core::{CorrelationToken, OperationId, OutcomeStatus};
    use bytes::Bytes;

    use super::*;

    fn operation(count: usize) -> Arc<ResultAggregator> {
        Arc::new(
            ResultAggregator::new(
                OperationId::new(),
                (0..count).map(|i| (CorrelationToken::new(format!("obj-{i}")), uuid::Uuid::nil())),
            )
            .unwrap(),
        )
    }

    fn entry(aggregator: &Arc<ResultAggregator>, index: usize, payload: usize) -> BatchEntry {
        let object = ObjectWriteRequest::from_payload(
            format!("obj-{index}"),
            Bytes::from(vec![b' '; payload]),
        );
        BatchEntry::new(Arc::clone(aggregator), index, object)
    }

    #[test]
    fn test_seals_at_target_count() {
        let agg = operation(25);
        let mut acc = BatchAccumulator::new(10, usize::MAX, Duration::ZERO);
        let sealed: Vec<Batch> = (0..25).flat_map(|i| acc.push(entry(&agg, i, 8), 10)).collect();

        assert_eq!(sealed.iter().map(Batch::len).collect::<Vec<_>>(), vec![10, 10]);
        assert_eq!(acc.open_len(), 5);
        let last = acc.flush().unwrap();
        assert_eq!(last.len(), 5);
        assert_eq!(
            sealed.iter().chain([&last]).map(|b| b.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        let indexes: Vec<usize> = sealed
            .iter()
            .chain([&last])
            .flat_map(|b| b.entries.iter().map(|e| e.index))
            .collect();
        assert_eq!(indexes, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_target_below_max_count() {
        let agg = operation(4);
        let mut acc = BatchAccumulator::new(100, usize::MAX, Duration::ZERO);
        assert!(acc.push(entry(&agg, 0, 8), 2).is_empty());
        assert_eq!(acc.push(entry(&agg, 1, 8), 2).len(), 1);
        // Target above the hard cap is clamped.
        let mut acc = BatchAccumulator::new(1, usize::MAX, Duration::ZERO);
        assert_eq!(acc.push(entry(&agg, 2, 8), 50).len(), 1);
    }

    #[test]
    fn test_seals_before_byte_overflow() {
        let agg = operation(3);
        let size = entry(&agg, 0, 100).size;
        let mut acc = BatchAccumulator::new(100, size * 2 + size / 2, Duration::ZERO);
        assert!(acc.push(entry(&agg, 0, 100), 100).is_empty());
        assert!(acc.push(entry(&agg, 1, 100), 100).is_empty());
        let sealed = acc.push(entry(&agg, 2, 100), 100);
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].len(), 2);
        assert!(sealed[0].estimated_bytes <= acc.max_bytes());
        assert_eq!(acc.open_len(), 1);
    }

    #[test]
    fn test_oversized_entry_travels_alone() {
        let agg = operation(2);
        let mut acc = BatchAccumulator::new(100, 200, Duration::ZERO);
        assert!(acc.push(entry(&agg, 0, 10), 100).is_empty());
        let sealed = acc.push(entry(&agg, 1, 1_000), 100);
        assert_eq!(sealed.iter().map(Batch::len).collect::<Vec<_>>(), vec![1, 1]);
        assert_eq!(sealed[1].entries[0].index, 1);
        assert!(acc.flush().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_threshold() {
        let agg = operation(1);
        let mut acc = BatchAccumulator::new(100, usize::MAX, Duration::from_millis(500));
        acc.push(entry(&agg, 0, 8), 100);
        assert!(acc.seal_expired(Instant::now()).is_none());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(acc.seal_expired(Instant::now()).unwrap().len(), 1);
        assert!(acc.seal_expired(Instant::now()).is_none());
    }

    #[test]
    fn test_dropped_batch_abandons_pending_entries() {
        let agg = operation(2);
        let mut acc = BatchAccumulator::new(100, usize::MAX, Duration::ZERO);
        acc.push(entry(&agg, 0, 8), 100);
        acc.push(entry(&agg, 1, 8), 100);
        drop(acc);
        assert!(agg.is_finished());
        assert_eq!(agg.status(0), Some(OutcomeStatus::NotAttempted));
    }

    #[test]
    fn test_retain_pending_skips_cancelled() {
        let agg = operation(2);
        let other = operation(1);
        let mut acc = BatchAccumulator::new(100, usize::MAX, Duration::ZERO);
        acc.push(entry(&agg, 0, 8), 100);
        acc.push(entry(&agg, 1, 8), 100);
        acc.push(entry(&other, 0, 8), 100);
        let mut batch = acc.flush().unwrap();
        agg.cancel();
        batch.retain_pending();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.estimated_bytes, batch.entries[0].size);
    }
}
