//! Testing utilities for Parade pipelines.
//!
//! This module provides:
//!
//! - **Assertions**: Compare pipeline outputs with expected results
//! - **[`TestPipeline`]**: a pipeline tuned for fast, small test runs
//!
//! # Quick Start
//!
//! ```no_run
//! use parade::*;
//! use parade::testing::*;
//!
//! #[test]
//! fn test_simple_pipeline() -> anyhow::Result<()> {
//!     let p = TestPipeline::new();
//!
//!     let result = from_vec(&p, vec![1, 2, 3])
//!         .map(|x: i32| x * 2)
//!         .collect()?;
//!
//!     assert_collections_equal(&result, &[2, 4, 6]);
//!     Ok(())
//! }
//! ```
//!
//! # Assertion Functions
//!
//! - [`assert_collections_equal`]: Exact order-dependent comparison
//! - [`assert_collections_unordered_equal`]: Order-independent comparison
//! - [`assert_kv_collections_equal`]: Compare key-value pairs (sorted by key)
//! - [`assert_grouped_kv_equal`]: Compare grouped output, values as multisets
//! - [`assert_keys_strictly_sorted`]: Keyed output has each key once, ascending
//! - [`assert_all`]: Verify all elements match a predicate
//! - [`assert_all_finished`]: Every stage of a run reached `finished`

pub mod assertions;

// Re-export commonly used items
pub use assertions::*;

use crate::{Config, Pipeline};
use std::time::Duration;

/// A test-focused wrapper around [`Pipeline`].
///
/// Its [`Config`] uses a few workers, small buffers and batches, and short
/// poll and flush intervals, so multi-stage behaviour (backpressure, adaptive
/// batching, cancellation) shows up on small inputs.
///
/// # Example
///
/// ```
/// use parade::testing::TestPipeline;
/// use parade::from_vec;
///
/// let p = TestPipeline::new();
/// let data = from_vec(&p, vec![1, 2, 3]);
/// assert_eq!(p.stage_count(), 1);
/// ```
#[derive(Clone)]
pub struct TestPipeline {
    pipeline: Pipeline,
}

impl TestPipeline {
    /// Create a new test pipeline with [`TestPipeline::config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            pipeline: Pipeline::with_config(config),
        }
    }

    /// The configuration [`TestPipeline::new`] uses.
    #[must_use]
    pub fn config() -> Config {
        Config::default()
            .with_workers(4)
            .with_buffer_capacity(8)
            .with_output_batch_size(64)
            .with_flush_interval(Duration::from_millis(20))
            .with_target_batch_time(Duration::from_millis(20))
            .with_fold_batch_size(100)
            .with_partial_chunk_size(100)
            .with_poll_interval(Duration::from_millis(2))
    }

    /// Print the stage graph for debugging purposes.
    pub fn debug_print_graph(&self) {
        let g = self.pipeline.inner.lock();
        println!("Pipeline Graph:");
        println!("  Stages: {}", g.stages.len());
        let mut ids: Vec<_> = g.stages.keys().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(stage) = g.stages.get(&id) {
                println!("    {id} {} ({})", stage.name(), stage.kind());
            }
        }
        println!("  Edges: {}", g.edges.len());
        for (from, to) in &g.edges {
            println!("    {from} -> {to}");
        }
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// Allow TestPipeline to be used wherever Pipeline is expected
impl std::ops::Deref for TestPipeline {
    type Target = Pipeline;

    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

impl AsRef<Pipeline> for TestPipeline {
    fn as_ref(&self) -> &Pipeline {
        &self.pipeline
    }
}
