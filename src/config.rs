//! Runtime configuration shared by every stage of a [`Pipeline`](crate::Pipeline).
//!
//! A [`Config`] is attached to a pipeline with
//! [`Pipeline::with_config`](crate::Pipeline::with_config) and copied into each
//! stage when the stage is built, so changing the pipeline's config later only
//! affects stages built afterwards.

use std::time::Duration;

/// Tuning knobs for buffers, batching and the parallel executor.
#[derive(Clone, Debug)]
pub struct Config {
    /// Worker threads per parallel stage.
    pub workers: usize,
    /// Capacity (in batches) of every buffer between two stages.
    pub buffer_capacity: usize,
    /// A stage flushes its output batch once it holds this many values.
    pub output_batch_size: usize,
    /// A stage flushes a non-empty output batch once this much time passed since the last flush.
    pub flush_interval: Duration,
    /// Desired wall-clock time of one executor job.
    pub target_batch_time: Duration,
    /// Number of input values folded locally by one fold job.
    pub fold_batch_size: usize,
    /// Partial grouping flushes its index every `partial_chunk_size * workers` values.
    pub partial_chunk_size: usize,
    /// Timeout used by every blocking wait before the stop flag is re-checked.
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            buffer_capacity: 100,
            output_batch_size: 1000,
            flush_interval: Duration::from_millis(500),
            target_batch_time: Duration::from_secs(3),
            fold_batch_size: 1000,
            partial_chunk_size: 10_000,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_output_batch_size(mut self, size: usize) -> Self {
        self.output_batch_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    #[must_use]
    pub fn with_target_batch_time(mut self, target: Duration) -> Self {
        self.target_batch_time = target;
        self
    }

    #[must_use]
    pub fn with_fold_batch_size(mut self, size: usize) -> Self {
        self.fold_batch_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_partial_chunk_size(mut self, size: usize) -> Self {
        self.partial_chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Number of values a partial grouping stage absorbs before flushing its index.
    pub(crate) fn partial_flush_threshold(&self) -> usize {
        self.partial_chunk_size.saturating_mul(self.workers.max(1))
    }
}
