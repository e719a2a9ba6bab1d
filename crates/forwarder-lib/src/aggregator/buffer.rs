//! Flush buffer shared by the ingest path and the flush loop

use crate::models::NormalizedMetric;
use std::sync::{Mutex, MutexGuard};

/// Append-only collection of normalized metrics since the last flush.
///
/// `drain` swaps the contents out under the lock, so every appended metric
/// lands in exactly one drained batch.
#[derive(Debug, Default)]
pub struct FlushBuffer {
    metrics: Mutex<Vec<NormalizedMetric>>,
}

impl FlushBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<NormalizedMetric>> {
        // A panic while holding the lock cannot leave the Vec half-written
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a metric, returning the buffer length afterwards
    pub fn append(&self, metric: NormalizedMetric) -> usize {
        let mut metrics = self.lock();
        metrics.push(metric);
        metrics.len()
    }

    /// Take all buffered metrics in insertion order, leaving the buffer empty
    pub fn drain(&self) -> Vec<NormalizedMetric> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
