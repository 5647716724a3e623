//! # Parade
//!
//! A **single-machine staged parallel pipeline engine**. A program declares a
//! chain of transformations over a dataset; at run time every stage runs on
//! its own thread, stages are connected by bounded buffers, and CPU-bound
//! stages spread their work over a pool of worker threads whose batch size
//! adapts to how long elements take to process.
//!
//! ## Key Features
//!
//! - **Pipelined execution** - every stage runs concurrently with its neighbours
//! - **Parallel map / flat-map / fold** - a worker pool per stage, results in input order
//! - **Adaptive batching** - jobs are sized so one job takes roughly a configurable target time
//! - **Backpressure** - bounded buffers block fast producers instead of growing without limit
//! - **Keyed aggregation** - group-by-key and reduce-by-key, fully or in memory-bounded chunks
//! - **Cooperative cancellation** - `stop()` on a runner or any stage, idempotent and asynchronous
//! - **Status snapshots** - per-stage counters and timings, serializable to JSON
//!
//! ## Quick Start
//!
//! ```no_run
//! use parade::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let p = Pipeline::default();
//!
//! let lines = from_vec(&p, vec![
//!     "hello world".to_string(),
//!     "hello rust".to_string(),
//! ]);
//!
//! let counts = lines
//!     .flat_map(|line: String| {
//!         line.split_whitespace()
//!             .map(|w| (w.to_string(), 1u64))
//!             .collect::<Vec<_>>()
//!     })
//!     .reduce_by_key(|a, b| a + b);
//!
//! // Keys come out in sorted order.
//! let results = counts.collect()?;
//! assert_eq!(results[0], ("hello".to_string(), 2));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Pipeline
//!
//! A [`Pipeline`] holds the stages you define and the [`Config`] they are tuned
//! with. Create one with `Pipeline::default()` or [`Pipeline::with_config`].
//!
//! ### Dataset
//!
//! A [`Dataset<T>`] is the output of one stage. Sources are created with
//! [`from_vec`], [`from_iter_fn`] and [`from_iter_fn_with_len`]; every
//! transformation returns a new dataset. Nothing runs until
//! [`collect`](Dataset::collect) is called.
//!
//! ### Transformations
//!
//! - [`map`](Dataset::map), [`try_map`](Dataset::try_map),
//!   [`map_with_context`](Dataset::map_with_context) - one output per input
//! - [`flat_map`](Dataset::flat_map) - zero or more outputs per input
//! - [`fold`](Dataset::fold) - a single value for the whole dataset
//! - [`group_by_key`](Dataset::group_by_key) and
//!   [`reduce_by_key`](Dataset::reduce_by_key) on `Dataset<(K, V)>`, with
//!   `_partial` variants that bound memory by flushing periodically
//!
//! ### Running
//!
//! [`Runner`] owns the chain behind a terminal dataset. Besides
//! [`collect`](Runner::collect) it exposes [`stop`](Runner::stop),
//! [`status`](Runner::status) and
//! [`estimated_completion`](Runner::estimated_completion), all callable from
//! other threads while the chain runs.
//!
//! ```no_run
//! use parade::*;
//! use std::sync::Arc;
//! use std::thread;
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = Pipeline::default();
//! let squares = from_iter_fn_with_len(&p, 1_000_000, || 0..1_000_000u64).map(|x: u64| x * x);
//! let runner = Arc::new(squares.runner()?);
//!
//! let watcher = Arc::clone(&runner);
//! let handle = thread::spawn(move || watcher.collect());
//! println!("eta: {:?}", runner.estimated_completion());
//! let values = handle.join().expect("runner thread")?;
//! assert_eq!(values.len(), 1_000_000);
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Engine failures are [`PipelineError`]s. The public entry points return
//! [`anyhow::Result`], with the failing stage added as context; downcast to
//! recover the variant. A stop request is not an error: a stopped run returns
//! whatever was emitted before the stop took effect.
//!
//! ## Logging
//!
//! Stage lifecycle and batch-size decisions are reported through [`tracing`].
//! The library never installs a subscriber.

pub mod buffer;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod index;
pub mod node;
pub mod pipeline;
pub mod runner;
pub mod signal;
mod source;
mod stage;
pub mod stage_id;
pub mod status;
pub mod testing;
mod transform;

// General re-exports
pub use config::Config;
pub use dataset::{from_iter_fn, from_iter_fn_with_len, from_vec, Dataset, Element};
pub use error::PipelineError;
pub use executor::ParMap;
pub use index::{GroupMode, GroupingIndex};
pub use node::{Operation, StageKind};
pub use pipeline::Pipeline;
pub use runner::Runner;
pub use signal::StopFlag;
pub use stage_id::StageId;
pub use status::{PipelineStatus, StageStatus};
