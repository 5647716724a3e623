//! Typed dataset handles and the builder API.
//!
//! A [`Dataset<T>`] names the output of one stage. Every transformation
//! registers a new stage in the shared [`Pipeline`] and returns a handle to
//! its output; nothing runs until [`Dataset::collect`] (or a [`Runner`]) drives
//! the chain ending at that handle.
//!
//! ```no_run
//! use parade::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = Pipeline::default();
//! let counts = from_vec(&p, vec!["a b".to_string(), "b c".to_string()])
//!     .flat_map(|line: String| {
//!         line.split_whitespace()
//!             .map(|w| (w.to_string(), 1u64))
//!             .collect::<Vec<_>>()
//!     })
//!     .reduce_by_key(|a, b| a + b)
//!     .collect()?;
//! assert_eq!(counts[1], ("b".to_string(), 2));
//! # Ok(())
//! # }
//! ```

use crate::StageId;
use crate::error::PipelineError;
use crate::executor::{InitFn, TaskFn};
use crate::index::GroupMode;
use crate::node::{Operation, Producer};
use crate::pipeline::Pipeline;
use crate::runner::Runner;
use crate::source::{Factory, Source};
use crate::stage::Stage;
use crate::status::StageStatus;
use crate::transform::{Combine, FlatMapOp, FoldOp, GroupOp, MapOp, ReduceOp, Transform};
use anyhow::Result;
use std::sync::Arc;

/// Bound for values flowing between stages.
pub trait Element: 'static + Send + Sync + Clone {}
impl<T> Element for T where T: 'static + Send + Sync + Clone {}

/// Handle to the output of one stage.
pub struct Dataset<T> {
    pub(crate) pipeline: Pipeline,
    pub(crate) id: StageId,
    pub(crate) producer: Arc<dyn Producer<T>>,
    pub(crate) op: Arc<dyn Operation>,
}

impl<T> Clone for Dataset<T> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            id: self.id,
            producer: Arc::clone(&self.producer),
            op: Arc::clone(&self.op),
        }
    }
}

/// A dataset over a materialized vector; its length is known.
pub fn from_vec<T: Element>(p: &Pipeline, data: Vec<T>) -> Dataset<T> {
    let source = p.insert_with(None, |id, config| Source::materialized(id, data, config));
    Dataset::attach(p, source)
}

/// A dataset over the finite sequence produced by calling `f` once, when the chain runs.
pub fn from_iter_fn<T, I, F>(p: &Pipeline, f: F) -> Dataset<T>
where
    T: Element,
    I: IntoIterator<Item = T>,
    I::IntoIter: 'static,
    F: Fn() -> I + Send + Sync + 'static,
{
    generated(p, f, None)
}

/// Like [`from_iter_fn`], with the number of values `f` will produce declared up front.
pub fn from_iter_fn_with_len<T, I, F>(p: &Pipeline, len: usize, f: F) -> Dataset<T>
where
    T: Element,
    I: IntoIterator<Item = T>,
    I::IntoIter: 'static,
    F: Fn() -> I + Send + Sync + 'static,
{
    generated(p, f, Some(len))
}

fn generated<T, I, F>(p: &Pipeline, f: F, len: Option<usize>) -> Dataset<T>
where
    T: Element,
    I: IntoIterator<Item = T>,
    I::IntoIter: 'static,
    F: Fn() -> I + Send + Sync + 'static,
{
    let factory: Factory<T> =
        Arc::new(move || -> Box<dyn Iterator<Item = T>> { Box::new(f().into_iter()) });
    let source = p.insert_with(None, |id, config| Source::generated(id, factory, len, config));
    Dataset::attach(p, source)
}

impl<T: Element> Dataset<T> {
    fn attach<S>(p: &Pipeline, stage: Arc<S>) -> Self
    where
        S: Operation + Producer<T> + 'static,
    {
        Self {
            pipeline: p.clone(),
            id: stage.id(),
            producer: Arc::clone(&stage) as Arc<dyn Producer<T>>,
            op: stage,
        }
    }

    /// Register a stage running `transform` over this dataset.
    fn then<O, X>(&self, transform: X) -> Dataset<O>
    where
        O: Element,
        X: Transform<T, O> + 'static,
    {
        let upstream = Arc::clone(&self.producer);
        let stage = self.pipeline.insert_with(Some(self.id), |id, config| {
            Stage::new(id, self.id, upstream, Box::new(transform), config)
        });
        Dataset::attach(&self.pipeline, stage)
    }

    #[must_use]
    pub fn id(&self) -> StageId {
        self.id
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Apply `f` to every value, in parallel, preserving order.
    #[must_use]
    pub fn map<O, F>(&self, f: F) -> Dataset<O>
    where
        O: Element,
        F: Fn(T) -> O + Send + Sync + 'static,
    {
        self.try_map(move |x| Ok(f(x)))
    }

    /// Like [`map`](Self::map) with a fallible function; the first error fails the run.
    #[must_use]
    pub fn try_map<O, F>(&self, f: F) -> Dataset<O>
    where
        O: Element,
        F: Fn(T) -> Result<O> + Send + Sync + 'static,
    {
        let init: InitFn<()> = Arc::new(|| Ok(()));
        let func: TaskFn<(), T, O> = Arc::new(move |_: &mut (), x: T| f(x));
        self.then(MapOp::new(init, func))
    }

    /// Map with a context built once per worker by `init`, on the worker's thread.
    ///
    /// Useful for resources that are expensive to set up or not `Send`, such
    /// as connections or scratch buffers.
    #[must_use]
    pub fn map_with_context<O, C, N, F>(&self, init: N, f: F) -> Dataset<O>
    where
        O: Element,
        C: 'static,
        N: Fn() -> Result<C> + Send + Sync + 'static,
        F: Fn(&mut C, T) -> Result<O> + Send + Sync + 'static,
    {
        let init: InitFn<C> = Arc::new(init);
        let func: TaskFn<C, T, O> = Arc::new(f);
        self.then(MapOp::new(init, func))
    }

    /// Turn every value into zero or more outputs, each emitted individually.
    #[must_use]
    pub fn flat_map<O, I, F>(&self, f: F) -> Dataset<O>
    where
        O: Element,
        I: IntoIterator<Item = O>,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        self.try_flat_map(move |x| Ok(f(x)))
    }

    #[must_use]
    pub fn try_flat_map<O, I, F>(&self, f: F) -> Dataset<O>
    where
        O: Element,
        I: IntoIterator<Item = O>,
        F: Fn(T) -> Result<I> + Send + Sync + 'static,
    {
        let func: TaskFn<(), T, Vec<O>> = Arc::new(move |_: &mut (), x: T| -> Result<Vec<O>> {
            Ok(f(x)?.into_iter().collect())
        });
        self.then(FlatMapOp::new(func))
    }

    /// Fold the whole dataset into one value, combining chunks in parallel.
    ///
    /// `zero` should be the identity of `f` and `f` associative; otherwise the
    /// result depends on how the input was chunked.
    #[must_use]
    pub fn fold<F>(&self, zero: T, f: F) -> Dataset<T>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let combine: Combine<T> = Arc::new(f);
        self.then(FoldOp::new(zero, combine))
    }

    /// Set the display name shown in status snapshots.
    #[must_use]
    pub fn named(self, name: impl Into<String>) -> Self {
        self.op.rename(name.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.op.name()
    }

    /// Number of values this dataset will hold.
    ///
    /// # Errors
    ///
    /// [`PipelineError::LengthUnknown`] if the length doesn't follow from a
    /// declared source length.
    pub fn len(&self) -> Result<usize, PipelineError> {
        self.producer.declared_len().ok_or(PipelineError::LengthUnknown)
    }

    /// Request this stage to stop. Idempotent; returns immediately.
    pub fn stop(&self) {
        self.op.stop();
    }

    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.op.status()
    }

    /// A runner over the chain ending at this dataset.
    ///
    /// # Errors
    ///
    /// Fails if the chain is broken (a stage is missing from the pipeline).
    pub fn runner(&self) -> Result<Runner<T>> {
        Runner::new(self)
    }

    /// Run the chain ending here and return every value in emission order.
    ///
    /// # Errors
    ///
    /// The first failure of any stage in the chain.
    pub fn collect(&self) -> Result<Vec<T>> {
        self.runner()?.collect()
    }
}

impl<K, V> Dataset<(K, V)>
where
    K: Element + Ord,
    V: Element,
{
    /// Gather the values of each key; every key is emitted once, in key order.
    #[must_use]
    pub fn group_by_key(&self) -> Dataset<(K, Vec<V>)> {
        self.then(GroupOp::new(GroupMode::Full))
    }

    /// Memory-bounded grouping: the index is flushed every
    /// `partial_chunk_size * workers` values, so a key may appear once per flush.
    #[must_use]
    pub fn group_by_key_partial(&self) -> Dataset<(K, Vec<V>)> {
        self.then(GroupOp::new(self.partial_mode()))
    }

    /// Combine the values of each key with `f`, a left fold in arrival order.
    #[must_use]
    pub fn reduce_by_key<F>(&self, f: F) -> Dataset<(K, V)>
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        let combine: Combine<V> = Arc::new(f);
        self.then(ReduceOp::new(GroupMode::Full, combine))
    }

    /// [`reduce_by_key`](Self::reduce_by_key) with the flush schedule of
    /// [`group_by_key_partial`](Self::group_by_key_partial).
    #[must_use]
    pub fn reduce_by_key_partial<F>(&self, f: F) -> Dataset<(K, V)>
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        let combine: Combine<V> = Arc::new(f);
        self.then(ReduceOp::new(self.partial_mode(), combine))
    }

    fn partial_mode(&self) -> GroupMode {
        GroupMode::Partial {
            flush_every: self.pipeline.config().partial_flush_threshold(),
        }
    }
}
