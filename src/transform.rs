//! The computation a [`Stage`](crate::stage::Stage) runs over its input.
//!
//! Map, flat-map and fold hand their work to a [`ParMap`] pool sized by the
//! stage's [`Config`]; group-by-key and reduce-by-key build a
//! [`GroupingIndex`] on the stage thread itself.

use crate::config::Config;
use crate::dataset::Element;
use crate::error::PipelineError;
use crate::executor::{InitFn, ParMap, TaskFn};
use crate::index::{GroupMode, GroupingIndex};
use crate::node::StageKind;
use crate::signal::StopFlag;
use crate::stage::Emitter;
use crate::status::StageState;
use std::sync::Arc;

/// Binary combiner shared by reduce-by-key and fold.
pub(crate) type Combine<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

/// What a running stage lends its transform.
pub(crate) struct RunContext<'a> {
    pub stop: &'a StopFlag,
    pub state: &'a StageState,
    pub config: &'a Config,
}

impl RunContext<'_> {
    /// A pool wired to this stage's stop flag and tuning.
    fn executor<I, O, C>(&self, init: InitFn<C>, func: TaskFn<C, I, O>) -> ParMap<I, O, C>
    where
        I: Send + 'static,
        O: Send + 'static,
        C: 'static,
    {
        ParMap::from_parts(self.config.workers, init, func)
            .with_stop_flag(self.stop.clone())
            .with_target(self.config.target_batch_time)
            .with_poll_interval(self.config.poll_interval)
    }
}

pub(crate) trait Transform<I, O>: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Output length, if it follows from the upstream's.
    fn declared_len(&self, _upstream: Option<usize>) -> Option<usize> {
        None
    }

    fn run(
        &self,
        input: &mut dyn Iterator<Item = I>,
        out: &mut Emitter<'_, O>,
        cx: &RunContext<'_>,
    ) -> Result<(), PipelineError>;
}

/// One output per input, computed in parallel with an optional per-worker context.
pub(crate) struct MapOp<I, O, C> {
    init: InitFn<C>,
    func: TaskFn<C, I, O>,
}

impl<I, O, C> MapOp<I, O, C> {
    pub(crate) fn new(init: InitFn<C>, func: TaskFn<C, I, O>) -> Self {
        Self { init, func }
    }
}

impl<I: Element, O: Element, C: 'static> Transform<I, O> for MapOp<I, O, C> {
    fn kind(&self) -> StageKind {
        StageKind::Map
    }

    fn declared_len(&self, upstream: Option<usize>) -> Option<usize> {
        upstream
    }

    fn run(
        &self,
        input: &mut dyn Iterator<Item = I>,
        out: &mut Emitter<'_, O>,
        cx: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let exec = cx.executor(Arc::clone(&self.init), Arc::clone(&self.func));
        for result in exec.map(input) {
            out.push(result?)?;
            cx.state.add_processed(1);
        }
        Ok(())
    }
}

/// Zero or more outputs per input, emitted individually in order.
pub(crate) struct FlatMapOp<I, O> {
    func: TaskFn<(), I, Vec<O>>,
}

impl<I, O> FlatMapOp<I, O> {
    pub(crate) fn new(func: TaskFn<(), I, Vec<O>>) -> Self {
        Self { func }
    }
}

impl<I: Element, O: Element> Transform<I, O> for FlatMapOp<I, O> {
    fn kind(&self) -> StageKind {
        StageKind::FlatMap
    }

    fn run(
        &self,
        input: &mut dyn Iterator<Item = I>,
        out: &mut Emitter<'_, O>,
        cx: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let init: InitFn<()> = Arc::new(|| Ok(()));
        let exec = cx.executor(init, Arc::clone(&self.func));
        for result in exec.map(input) {
            for value in result? {
                out.push(value)?;
            }
            cx.state.add_processed(1);
        }
        Ok(())
    }
}

/// Emit everything the index holds, in key order.
fn flush_index<K, A>(
    index: &mut GroupingIndex<K, A>,
    out: &mut Emitter<'_, (K, A)>,
) -> Result<(), PipelineError>
where
    K: Ord + Clone,
    A: Clone,
{
    for pair in index.drain() {
        out.push(pair)?;
    }
    Ok(())
}

/// `(K, V)` pairs to `(K, Vec<V>)` groups.
pub(crate) struct GroupOp {
    mode: GroupMode,
}

impl GroupOp {
    pub(crate) fn new(mode: GroupMode) -> Self {
        Self { mode }
    }
}

impl<K, V> Transform<(K, V), (K, Vec<V>)> for GroupOp
where
    K: Element + Ord,
    V: Element,
{
    fn kind(&self) -> StageKind {
        StageKind::GroupByKey
    }

    fn run(
        &self,
        input: &mut dyn Iterator<Item = (K, V)>,
        out: &mut Emitter<'_, (K, Vec<V>)>,
        cx: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let mut index = GroupingIndex::new();
        for (key, value) in input {
            index.group(key, value);
            cx.state.add_processed(1);
            if self.mode.due(index.absorbed()) {
                flush_index(&mut index, out)?;
            }
        }
        // A stopped full-mode stage never emits a half-built index.
        if cx.stop.is_raised() {
            return Err(PipelineError::Cancelled);
        }
        flush_index(&mut index, out)
    }
}

/// `(K, V)` pairs to one `(K, V)` per key, left-folded with a combiner.
pub(crate) struct ReduceOp<V> {
    mode: GroupMode,
    combine: Combine<V>,
}

impl<V> ReduceOp<V> {
    pub(crate) fn new(mode: GroupMode, combine: Combine<V>) -> Self {
        Self { mode, combine }
    }
}

impl<K, V> Transform<(K, V), (K, V)> for ReduceOp<V>
where
    K: Element + Ord,
    V: Element,
{
    fn kind(&self) -> StageKind {
        StageKind::ReduceByKey
    }

    fn run(
        &self,
        input: &mut dyn Iterator<Item = (K, V)>,
        out: &mut Emitter<'_, (K, V)>,
        cx: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let mut index = GroupingIndex::new();
        for (key, value) in input {
            index.reduce(key, value, |acc, v| (self.combine)(acc, v));
            cx.state.add_processed(1);
            if self.mode.due(index.absorbed()) {
                flush_index(&mut index, out)?;
            }
        }
        if cx.stop.is_raised() {
            return Err(PipelineError::Cancelled);
        }
        flush_index(&mut index, out)
    }
}

/// Splits a stream into vectors of at most `size` values.
struct Chunks<'a, T> {
    input: &'a mut dyn Iterator<Item = T>,
    size: usize,
}

impl<T> Iterator for Chunks<'_, T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        let chunk: Vec<T> = (&mut *self.input).take(self.size).collect();
        (!chunk.is_empty()).then_some(chunk)
    }
}

/// Folds the whole stream into a single value.
///
/// Chunks of `fold_batch_size` values are folded from `zero` in parallel and
/// the partials are folded again, in order, from `zero`. A combiner that is
/// not associative, or a `zero` that is not its identity, makes the result
/// depend on the chunk size.
pub(crate) struct FoldOp<T> {
    zero: T,
    combine: Combine<T>,
}

impl<T> FoldOp<T> {
    pub(crate) fn new(zero: T, combine: Combine<T>) -> Self {
        Self { zero, combine }
    }
}

impl<T: Element> Transform<T, T> for FoldOp<T> {
    fn kind(&self) -> StageKind {
        StageKind::Fold
    }

    fn declared_len(&self, _upstream: Option<usize>) -> Option<usize> {
        Some(1)
    }

    fn run(
        &self,
        input: &mut dyn Iterator<Item = T>,
        out: &mut Emitter<'_, T>,
        cx: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let zero = self.zero.clone();
        let combine = Arc::clone(&self.combine);
        let init: InitFn<()> = Arc::new(|| Ok(()));
        let func: TaskFn<(), Vec<T>, (usize, T)> = Arc::new(
            move |_: &mut (), chunk: Vec<T>| -> anyhow::Result<(usize, T)> {
                let len = chunk.len();
                Ok((len, chunk.into_iter().fold(zero.clone(), |acc, v| combine(acc, v))))
            },
        );

        let chunks = Chunks {
            input,
            size: cx.config.fold_batch_size.max(1),
        };
        let mut acc = self.zero.clone();
        for result in cx.executor(init, func).map(chunks) {
            let (len, partial) = result?;
            acc = (self.combine)(acc, partial);
            cx.state.add_processed(len as u64);
        }
        if cx.stop.is_raised() {
            return Err(PipelineError::Cancelled);
        }
        out.push(acc)
    }
}
