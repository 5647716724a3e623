//! Online batch-size control loop.

use std::collections::VecDeque;
use std::time::Duration;

/// Once the batch size reached this floor it never drops below it again.
pub const MIN_BATCH: usize = 10;

/// Tracks recent per-item processing times and derives the next batch size.
///
/// The window holds the last `10 * workers` samples, each one a job's wall
/// time divided by its length. The next size aims for `target / average`,
/// but grows at most by doubling per completion (jumping straight to
/// [`MIN_BATCH`] is always allowed). The estimate is blended with the
/// previous size, heavily while the window is still filling so a cold start
/// doesn't commit to a huge batch, and lightly once it is full.
#[derive(Clone, Debug)]
pub struct BatchSizer {
    window: VecDeque<f64>,
    capacity: usize,
    target: f64,
    current: usize,
}

impl BatchSizer {
    #[must_use]
    pub fn new(workers: usize, target: Duration) -> Self {
        let capacity = 10 * workers.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            target: target.as_secs_f64(),
            current: 1,
        }
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.current
    }

    /// Mean of the current window, in seconds per item.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
        }
    }

    /// Share of the previous size kept in the next estimate.
    ///
    /// Falls linearly from 0.8 with an empty window to 0.3 with a full one.
    #[allow(clippy::cast_precision_loss)]
    fn weight(&self) -> f64 {
        0.8 - 0.5 * self.window.len() as f64 / self.capacity as f64
    }

    /// Feed one finished job of `len` items that took `elapsed`; returns the new batch size.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn record(&mut self, elapsed: Duration, len: usize) -> usize {
        if len == 0 {
            return self.current;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(elapsed.as_secs_f64() / len as f64);

        let avg = self.average().unwrap_or_default();
        let weight = self.weight();
        let ceiling = MIN_BATCH.max(self.current.saturating_mul(2));
        let desired = if avg > 0.0 {
            (weight * self.current as f64 + (1.0 - weight) * self.target / avg).ceil()
        } else {
            f64::INFINITY
        };
        let mut next = if desired.is_finite() && desired < ceiling as f64 {
            desired as usize
        } else {
            ceiling
        };
        if self.current >= MIN_BATCH {
            next = next.max(MIN_BATCH);
        }
        self.current = next.max(1);
        self.current
    }
}
