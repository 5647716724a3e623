//! Adaptive parallel map executor.
//!
//! [`ParMap`] applies a fallible function to every element of a lazy input
//! sequence with a fixed pool of worker threads:
//!
//! - input is pulled lazily and grouped into batches of the current batch
//!   size; each batch becomes a job handed to the next idle worker
//! - results come back **in submission order**: a job that finishes early is
//!   held until every earlier job has been yielded
//! - at most `10 * workers` jobs sit in the job table at once, bounding memory
//! - the batch size is re-estimated after every completed job by
//!   [`BatchSizer`] so one job takes roughly [`ParMap::with_target`]
//! - a failing element fails its whole job; [`map`](ParMap::map) yields that
//!   error exactly once, when the job's turn comes, and then ends
//! - [`stop`](ParMap::stop) aborts in-flight batches between elements and makes
//!   the sequence end with a single [`PipelineError::Cancelled`]
//!
//! Every call to `map` spawns and owns its own pool; the workers are told to
//! terminate and joined when the sequence ends or is dropped.
//!
//! ```no_run
//! use parade::executor::ParMap;
//!
//! let exec = ParMap::new(4, |x: u64| Ok(x * 2));
//! let doubled: Vec<u64> = exec.map(0..1000).collect::<Result<_, _>>().unwrap();
//! assert_eq!(doubled[10], 20);
//! ```

mod sizing;
mod worker;

pub use sizing::{BatchSizer, MIN_BATCH};

use crate::error::PipelineError;
use crate::signal::StopFlag;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::{BTreeMap, VecDeque};
use std::iter::Fuse;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;
use worker::{Report, WorkerHandle};

/// Per-element function run by a worker, with mutable access to that worker's context.
pub type TaskFn<C, I, O> = Arc<dyn Fn(&mut C, I) -> anyhow::Result<O> + Send + Sync>;

/// Builds one worker's context, once, on the worker thread.
pub type InitFn<C> = Arc<dyn Fn() -> anyhow::Result<C> + Send + Sync>;

/// A pool definition: worker count, per-worker context, function and tuning.
pub struct ParMap<I, O, C = ()> {
    workers: usize,
    init: InitFn<C>,
    func: TaskFn<C, I, O>,
    stop: StopFlag,
    target: Duration,
    poll: Duration,
}

impl<I, O> ParMap<I, O, ()>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// A pool of `workers` threads applying `f` without per-worker state.
    pub fn new<F>(workers: usize, f: F) -> Self
    where
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let init: InitFn<()> = Arc::new(|| Ok(()));
        let func: TaskFn<(), I, O> = Arc::new(move |_: &mut (), i: I| f(i));
        Self::from_parts(workers, init, func)
    }
}

impl<I, O, C> ParMap<I, O, C>
where
    I: Send + 'static,
    O: Send + 'static,
    C: 'static,
{
    /// A pool whose workers each build a context with `init` before their first job.
    ///
    /// If `init` fails, that worker answers every job with
    /// [`PipelineError::WorkerInit`].
    pub fn with_context<N, F>(workers: usize, init: N, f: F) -> Self
    where
        N: Fn() -> anyhow::Result<C> + Send + Sync + 'static,
        F: Fn(&mut C, I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        Self::from_parts(workers, Arc::new(init), Arc::new(f))
    }

    pub(crate) fn from_parts(workers: usize, init: InitFn<C>, func: TaskFn<C, I, O>) -> Self {
        Self {
            workers: workers.max(1),
            init,
            func,
            stop: StopFlag::new(),
            target: Duration::from_secs(3),
            poll: Duration::from_millis(50),
        }
    }

    /// Share an existing stop flag (a stage hands in its own).
    #[must_use]
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Desired wall-clock time of one job.
    #[must_use]
    pub fn with_target(mut self, target: Duration) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Request cancellation. Idempotent; returns before workers have halted.
    pub fn stop(&self) {
        self.stop.raise();
    }

    #[must_use]
    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// Apply the function to every element of `input`, yielding results in input order.
    pub fn map<It>(&self, input: It) -> ParMapIter<It::IntoIter, I, O>
    where
        It: IntoIterator<Item = I>,
    {
        let (report_tx, reports) = crossbeam_channel::unbounded();
        let mut pool = Vec::with_capacity(self.workers);
        let mut pending_error = None;
        for id in 0..self.workers {
            match worker::spawn(
                id,
                Arc::clone(&self.init),
                Arc::clone(&self.func),
                self.stop.clone(),
                report_tx.clone(),
            ) {
                Ok(handle) => pool.push(handle),
                Err(e) => {
                    pending_error = Some(e);
                    break;
                }
            }
        }

        ParMapIter {
            input: input.into_iter().fuse(),
            input_done: false,
            idle: (0..pool.len()).collect(),
            pool,
            reports,
            jobs: BTreeMap::new(),
            ready: Vec::new().into_iter(),
            next_seq: 0,
            sizer: BatchSizer::new(self.workers, self.target),
            max_pending: 10 * self.workers,
            stop: self.stop.clone(),
            poll: self.poll,
            pending_error,
            finished: false,
        }
    }
}

struct Job<O> {
    worker: usize,
    len: usize,
    started: Instant,
    outcome: Option<Result<Vec<O>, PipelineError>>,
}

/// Lazy, ordered result sequence of one [`ParMap::map`] call.
pub struct ParMapIter<It: Iterator, I, O> {
    input: Fuse<It>,
    input_done: bool,
    pool: Vec<WorkerHandle<I>>,
    idle: VecDeque<usize>,
    reports: Receiver<Report<O>>,
    jobs: BTreeMap<u64, Job<O>>,
    ready: std::vec::IntoIter<O>,
    next_seq: u64,
    sizer: BatchSizer,
    max_pending: usize,
    stop: StopFlag,
    poll: Duration,
    pending_error: Option<PipelineError>,
    finished: bool,
}

impl<It, I, O> ParMapIter<It, I, O>
where
    It: Iterator<Item = I>,
{
    /// Current adaptive batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.sizer.batch_size()
    }

    /// Jobs dispatched or completed but not yet yielded.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Remove the head job if its outcome arrived.
    fn take_head(&mut self) -> Option<Result<Vec<O>, PipelineError>> {
        let entry = self.jobs.first_entry()?;
        if entry.get().outcome.is_none() {
            return None;
        }
        entry.remove().outcome
    }

    /// Start one job if a worker is idle and the job table has room.
    ///
    /// Returns `true` if it made progress (dispatched, or found the input exhausted).
    fn dispatch(&mut self) -> bool {
        if self.input_done || self.jobs.len() >= self.max_pending {
            return false;
        }
        let Some(&worker) = self.idle.front() else {
            return false;
        };
        let size = self.sizer.batch_size();
        let batch: Vec<I> = self.input.by_ref().take(size).collect();
        if batch.len() < size {
            self.input_done = true;
        }
        if batch.is_empty() {
            return true;
        }

        self.idle.pop_front();
        let seq = self.next_seq;
        self.next_seq += 1;
        let len = batch.len();
        let delivered = self.pool[worker].run(seq, batch);
        self.jobs.insert(
            seq,
            Job {
                worker,
                len,
                started: Instant::now(),
                outcome: (!delivered).then_some(Err(PipelineError::WorkerLost(worker))),
            },
        );
        true
    }

    /// Block for at most one poll interval waiting for job reports.
    fn wait_for_reports(&mut self) {
        match self.reports.recv_timeout(self.poll) {
            Ok(report) => self.record(report),
            Err(RecvTimeoutError::Timeout) => return,
            Err(RecvTimeoutError::Disconnected) => {
                // Every worker is gone; fail whatever is still outstanding.
                for job in self.jobs.values_mut() {
                    if job.outcome.is_none() {
                        job.outcome = Some(Err(PipelineError::WorkerLost(job.worker)));
                    }
                }
                return;
            }
        }
        while let Ok(report) = self.reports.try_recv() {
            self.record(report);
        }
    }

    fn record(&mut self, report: Report<O>) {
        self.idle.push_back(report.worker);
        let Some(job) = self.jobs.get_mut(&report.seq) else {
            return;
        };
        if report.outcome.is_ok() {
            let elapsed = report.finished.saturating_duration_since(job.started);
            let next = self.sizer.record(elapsed, job.len);
            trace!(job = report.seq, len = job.len, ?elapsed, batch_size = next, "job completed");
        }
        job.outcome = Some(report.outcome);
    }

    /// Tell every worker to terminate after its in-flight job; optionally wait for them.
    ///
    /// Without `join` this never blocks: a worker whose channel still holds a
    /// batch is terminated and joined on drop instead.
    fn shutdown(&mut self, join: bool) {
        self.finished = true;
        self.jobs.clear();
        if join {
            for worker in &self.pool {
                worker.terminate();
            }
            for worker in &mut self.pool {
                worker.join();
            }
        } else {
            for worker in &self.pool {
                worker.try_terminate();
            }
        }
    }

    fn fail(&mut self, err: PipelineError) -> Option<Result<O, PipelineError>> {
        self.shutdown(false);
        Some(Err(err))
    }
}

impl<It, I, O> Iterator for ParMapIter<It, I, O>
where
    It: Iterator<Item = I>,
{
    type Item = Result<O, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.ready.next() {
                return Some(Ok(value));
            }
            if self.finished {
                return None;
            }
            if let Some(err) = self.pending_error.take() {
                return self.fail(err);
            }
            if self.stop.is_raised() {
                return self.fail(PipelineError::Cancelled);
            }
            match self.take_head() {
                Some(Ok(results)) => {
                    self.ready = results.into_iter();
                    continue;
                }
                Some(Err(err)) => return self.fail(err),
                None => {}
            }
            if self.dispatch() {
                continue;
            }
            if self.input_done && self.jobs.is_empty() {
                self.shutdown(true);
                return None;
            }
            self.wait_for_reports();
        }
    }
}

impl<It: Iterator, I, O> Drop for ParMapIter<It, I, O> {
    fn drop(&mut self) {
        for worker in &self.pool {
            worker.terminate();
        }
        for worker in &mut self.pool {
            worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn preserves_order_with_uneven_work() {
        let exec = ParMap::new(4, |x: u64| {
            if x % 7 == 0 {
                thread::sleep(Duration::from_micros(300));
            }
            Ok(x * 3)
        })
        .with_target(Duration::from_millis(5))
        .with_poll_interval(Duration::from_millis(2));
        let got: Vec<u64> = exec.map(0..5_000).collect::<Result<_, _>>().unwrap();
        assert_eq!(got, (0..5_000).map(|x| x * 3).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input_ends_immediately() {
        let exec = ParMap::new(3, |x: u8| Ok(x));
        assert_eq!(exec.map(Vec::<u8>::new()).count(), 0);
    }

    #[test]
    fn single_worker_matches_sequential_map() {
        let exec = ParMap::new(1, |s: String| Ok(s.len()));
        let input: Vec<String> = (0..300).map(|i| "x".repeat(i % 13)).collect();
        let expected: Vec<usize> = input.iter().map(String::len).collect();
        let got: Vec<usize> = exec.map(input).collect::<Result<_, _>>().unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn error_is_yielded_once_after_earlier_results() {
        let exec = ParMap::new(4, |x: u32| {
            if x == 500 {
                bail!("bad element {x}");
            }
            Ok(x)
        });
        let mut ok = Vec::new();
        let mut errors = Vec::new();
        let mut iter = exec.map(0..10_000);
        for r in iter.by_ref() {
            match r {
                Ok(v) => {
                    assert!(errors.is_empty(), "value {v} after the error");
                    ok.push(v);
                }
                Err(e) => errors.push(e),
            }
        }
        assert!(iter.next().is_none());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], PipelineError::Transformation { .. }));
        assert!(ok.len() <= 500);
        assert_eq!(ok, (0..ok.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn panics_become_transformation_errors() {
        let exec = ParMap::new(2, |x: u32| {
            assert!(x != 3, "three is not allowed");
            Ok(x)
        });
        let err = exec.map(0..10).find_map(Result::err).unwrap();
        let PipelineError::Transformation { source, .. } = err else {
            panic!("unexpected error kind");
        };
        assert!(source.to_string().contains("three is not allowed"));
    }

    #[test]
    fn failing_initializer_fails_every_job() {
        let exec: ParMap<u32, u32, String> =
            ParMap::with_context(2, || bail!("no resource"), |_ctx: &mut String, x| Ok(x));
        let results: Vec<_> = exec.map(0..100).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            Err(PipelineError::WorkerInit(msg)) if msg.contains("no resource")
        ));
    }

    #[test]
    fn error_does_not_wait_for_a_queued_batch() {
        // Worker 1 is still initializing when job 0 fails on worker 0, so
        // job 1 sits in worker 1's channel.
        let exec = ParMap::with_context(
            2,
            || {
                if thread::current().name() == Some("parade-worker-1") {
                    thread::sleep(Duration::from_millis(1_500));
                }
                Ok(())
            },
            |_: &mut (), x: u32| {
                if x == 0 {
                    bail!("first element rejected");
                }
                Ok(x)
            },
        );
        let mut iter = exec.map(0..100);
        let started = Instant::now();
        let first = iter.next();
        let waited = started.elapsed();
        assert!(matches!(first, Some(Err(PipelineError::Transformation { job: 0, .. }))));
        assert!(waited < Duration::from_millis(1_000), "error took {waited:?}");
        assert!(iter.next().is_none());
    }

    #[test]
    fn context_is_built_once_per_worker() {
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inits);
        let exec = ParMap::with_context(
            3,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0u64)
            },
            |calls: &mut u64, x: u64| {
                *calls += 1;
                Ok(x + 1)
            },
        );
        let sum: u64 = exec.map(0..2_000).map(Result::unwrap).sum();
        assert_eq!(sum, (1..=2_000u64).sum::<u64>());
        assert_eq!(inits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_ends_with_single_cancellation() {
        let exec = ParMap::new(2, |x: u64| {
            thread::sleep(Duration::from_millis(1));
            Ok(x)
        })
        .with_poll_interval(Duration::from_millis(2));
        let mut iter = exec.map(0..1_000_000);
        assert!(iter.next().unwrap().is_ok());
        exec.stop();
        exec.stop();
        let rest: Vec<_> = iter.collect();
        let cancelled = rest
            .iter()
            .filter(|r| matches!(r, Err(PipelineError::Cancelled)))
            .count();
        assert_eq!(cancelled, 1);
        assert!(matches!(rest.last(), Some(Err(PipelineError::Cancelled))));
    }

    #[test]
    fn in_flight_jobs_stay_bounded() {
        let exec = ParMap::new(2, |x: u32| Ok(x)).with_target(Duration::from_millis(1));
        let mut iter = exec.map(0..50_000);
        let mut seen = 0;
        while let Some(r) = iter.next() {
            r.unwrap();
            seen += 1;
            assert!(iter.pending_jobs() <= 20);
        }
        assert_eq!(seen, 50_000);
        assert!(iter.batch_size() >= MIN_BATCH);
    }
}
