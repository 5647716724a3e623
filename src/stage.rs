//! The unit of pipeline execution.
//!
//! A [`Stage`] reads batches from its upstream buffer, hands the flattened
//! values to its transform (the parallel executor for map / flat-map / fold,
//! the grouping index for group / reduce-by-key), and republishes results in
//! batches through its own [`Outlet`].
//!
//! State machine: `created -> running -> finished`, with an orthogonal,
//! monotone stop flag. Cancellation and natural completion finalize the same
//! way: buffered output is flushed, the outlet is closed (end-of-stream for
//! every consumer), `finished` is set and `running` cleared.

use crate::StageId;
use crate::buffer::{Buffer, Outlet};
use crate::config::Config;
use crate::dataset::Element;
use crate::error::PipelineError;
use crate::node::{Operation, Producer, StageKind};
use crate::signal::StopFlag;
use crate::status::{StageState, StageStatus};
use crate::transform::{RunContext, Transform};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Batches output values and flushes them on size or age.
pub(crate) struct Emitter<'a, T> {
    outlet: &'a Outlet<Vec<T>>,
    stop: &'a StopFlag,
    batch: Vec<T>,
    limit: usize,
    interval: Duration,
    last_flush: Instant,
}

impl<'a, T: Clone> Emitter<'a, T> {
    pub(crate) fn new(outlet: &'a Outlet<Vec<T>>, stop: &'a StopFlag, config: &Config) -> Self {
        Self {
            outlet,
            stop,
            batch: Vec::new(),
            limit: config.output_batch_size.max(1),
            interval: config.flush_interval,
            last_flush: Instant::now(),
        }
    }

    pub(crate) fn push(&mut self, value: T) -> Result<(), PipelineError> {
        self.batch.push(value);
        if self.batch.len() >= self.limit || self.last_flush.elapsed() >= self.interval {
            self.flush()?;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), PipelineError> {
        self.last_flush = Instant::now();
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        match self.outlet.publish(batch, self.stop) {
            Err(PipelineError::Disconnected) => {
                // Nobody reads our output any more; wind the stage down.
                self.stop.raise();
                Err(PipelineError::Disconnected)
            }
            other => other,
        }
    }
}

/// A non-source stage turning a stream of `I` into a stream of `O`.
pub struct Stage<I, O> {
    id: StageId,
    upstream_id: StageId,
    upstream: Arc<dyn Producer<I>>,
    transform: Box<dyn Transform<I, O>>,
    inbox: Mutex<Option<Arc<Buffer<Vec<I>>>>>,
    outlet: Outlet<Vec<O>>,
    state: StageState,
    config: Config,
}

impl<I: Element, O: Element> Stage<I, O> {
    pub(crate) fn new(
        id: StageId,
        upstream_id: StageId,
        upstream: Arc<dyn Producer<I>>,
        transform: Box<dyn Transform<I, O>>,
        config: Config,
    ) -> Self {
        Self {
            id,
            upstream_id,
            upstream,
            state: StageState::new(transform.kind().label()),
            transform,
            inbox: Mutex::new(None),
            outlet: Outlet::new(config.buffer_capacity, config.poll_interval),
            config,
        }
    }

    fn inbox(&self) -> Arc<Buffer<Vec<I>>> {
        let mut slot = self.inbox.lock();
        Arc::clone(slot.get_or_insert_with(|| Arc::new(self.upstream.subscribe())))
    }

    fn run(&self, inbox: Arc<Buffer<Vec<I>>>) -> Result<(), PipelineError> {
        self.state.begin();
        debug!(
            stage = %self.id,
            name = %self.state.name(),
            kind = %self.transform.kind(),
            "stage started"
        );

        let stop = self.state.stop_flag();
        let outcome = {
            let mut input = inbox.generate_until(stop).flatten();
            let mut out = Emitter::new(&self.outlet, stop, &self.config);
            let cx = RunContext {
                stop,
                state: &self.state,
                config: &self.config,
            };
            let outcome =
                catch_unwind(AssertUnwindSafe(|| self.transform.run(&mut input, &mut out, &cx)))
                    .unwrap_or_else(|payload| Err(PipelineError::from_panic(payload.as_ref())));
            let flushed = match &outcome {
                Ok(()) => out.flush(),
                Err(e) if e.is_cancellation() => out.flush(),
                Err(_) => Ok(()),
            };
            outcome.and(flushed)
        };

        // Release the input so the upstream producer sees us go away.
        drop(inbox);
        self.inbox.lock().take();
        self.outlet.close();
        self.state.finish();

        match outcome {
            Ok(()) => {
                debug!(stage = %self.id, processed = self.status().processed, "stage finished");
                Ok(())
            }
            Err(e) if e.is_cancellation() => {
                debug!(stage = %self.id, reason = %e, "stage stopped");
                Ok(())
            }
            Err(e) => {
                warn!(stage = %self.id, error = %e, "stage failed");
                Err(e)
            }
        }
    }
}

impl<I: Element, O: Element> Operation for Stage<I, O> {
    fn id(&self) -> StageId {
        self.id
    }

    fn kind(&self) -> StageKind {
        self.transform.kind()
    }

    fn name(&self) -> String {
        self.state.name()
    }

    fn rename(&self, name: String) {
        self.state.rename(name);
    }

    fn upstream(&self) -> Option<StageId> {
        Some(self.upstream_id)
    }

    fn connect(&self) {
        self.inbox();
    }

    fn start(self: Arc<Self>) -> Result<JoinHandle<Result<(), PipelineError>>, PipelineError> {
        self.state.launch(self.id)?;
        let inbox = self.inbox();
        let name = format!("parade-{}-{}", self.transform.kind().label(), self.id.raw());
        Ok(thread::Builder::new().name(name).spawn(move || self.run(inbox))?)
    }

    fn stop(&self) {
        self.state.request_stop();
    }

    fn status(&self) -> StageStatus {
        let buffered = self.inbox.lock().as_ref().map(|b| b.len());
        self.state.snapshot(
            self.id,
            self.transform.kind(),
            self.transform.declared_len(self.upstream.declared_len()),
            buffered,
        )
    }
}

impl<I: Element, O: Element> Producer<O> for Stage<I, O> {
    fn subscribe(&self) -> Buffer<Vec<O>> {
        self.outlet.subscribe()
    }

    fn declared_len(&self) -> Option<usize> {
        self.transform.declared_len(self.upstream.declared_len())
    }
}
