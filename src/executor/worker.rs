//! Worker threads of the parallel executor.
//!
//! Each worker owns a typed command channel and its per-worker context. The
//! context is built once, inside the worker thread, and dropped when the
//! worker exits.

use super::{InitFn, TaskFn};
use crate::error::{PipelineError, panic_message};
use crate::signal::StopFlag;
use anyhow::anyhow;
use crossbeam_channel::{Receiver, Sender};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::warn;

pub(super) enum Command<I> {
    Run { seq: u64, batch: Vec<I> },
    Terminate,
}

pub(super) struct Report<O> {
    pub seq: u64,
    pub worker: usize,
    pub finished: Instant,
    pub outcome: Result<Vec<O>, PipelineError>,
}

pub(super) struct WorkerHandle<I> {
    tx: Sender<Command<I>>,
    join: Option<JoinHandle<()>>,
}

impl<I> WorkerHandle<I> {
    /// Hand a batch to the worker; `false` if the worker thread is gone.
    pub fn run(&self, seq: u64, batch: Vec<I>) -> bool {
        self.tx.send(Command::Run { seq, batch }).is_ok()
    }

    /// Queue a terminate command, waiting for a queued batch to be picked up first.
    pub fn terminate(&self) {
        let _ = self.tx.send(Command::Terminate);
    }

    /// Queue a terminate command unless a batch is still waiting in the channel.
    pub fn try_terminate(&self) {
        let _ = self.tx.try_send(Command::Terminate);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

pub(super) fn spawn<C, I, O>(
    id: usize,
    init: InitFn<C>,
    func: TaskFn<C, I, O>,
    stop: StopFlag,
    reports: Sender<Report<O>>,
) -> Result<WorkerHandle<I>, PipelineError>
where
    C: 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    let join = thread::Builder::new()
        .name(format!("parade-worker-{id}"))
        .spawn(move || worker_loop(id, &init, &func, &stop, &rx, &reports))?;
    Ok(WorkerHandle {
        tx,
        join: Some(join),
    })
}

fn worker_loop<C, I, O>(
    id: usize,
    init: &InitFn<C>,
    func: &TaskFn<C, I, O>,
    stop: &StopFlag,
    rx: &Receiver<Command<I>>,
    reports: &Sender<Report<O>>,
) {
    let mut context = match catch_unwind(AssertUnwindSafe(|| init())) {
        Ok(Ok(ctx)) => Ok(ctx),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(format!("initializer panicked: {}", panic_message(payload.as_ref()))),
    };
    if let Err(msg) = &context {
        warn!(worker = id, error = %msg, "worker initialization failed");
    }

    while let Ok(Command::Run { seq, batch }) = rx.recv() {
        let outcome = match context.as_mut() {
            Ok(ctx) => run_batch(ctx, func, batch, stop, seq),
            Err(msg) => Err(PipelineError::WorkerInit(msg.clone())),
        };
        let report = Report {
            seq,
            worker: id,
            finished: Instant::now(),
            outcome,
        };
        if reports.send(report).is_err() {
            break;
        }
    }
}

fn run_batch<C, I, O>(
    ctx: &mut C,
    func: &TaskFn<C, I, O>,
    batch: Vec<I>,
    stop: &StopFlag,
    seq: u64,
) -> Result<Vec<O>, PipelineError> {
    let mut out = Vec::with_capacity(batch.len());
    for item in batch {
        if stop.is_raised() {
            return Err(PipelineError::Cancelled);
        }
        match catch_unwind(AssertUnwindSafe(|| func(ctx, item))) {
            Ok(Ok(value)) => out.push(value),
            Ok(Err(source)) => return Err(PipelineError::Transformation { job: seq, source }),
            Err(payload) => {
                return Err(PipelineError::Transformation {
                    job: seq,
                    source: anyhow!("worker panicked: {}", panic_message(payload.as_ref())),
                });
            }
        }
    }
    Ok(out)
}
