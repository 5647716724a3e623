use crate::StageId;
use crate::dataset::{Dataset, Element};
use crate::node::{Operation, Producer};
use crate::status::PipelineStatus;
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Drives the chain of stages behind a terminal dataset.
///
/// `collect` connects every stage to its upstream, starts one thread per
/// stage, drains the terminal's output in emission order and joins the
/// threads. Each stage runs once, so a runner (or any other runner sharing
/// one of its stages) can be collected only once.
pub struct Runner<T> {
    chain: Vec<Arc<dyn Operation>>,
    terminal: Arc<dyn Producer<T>>,
}

impl<T: Element> Runner<T> {
    /// Resolve the chain ending at `terminal`, source first.
    ///
    /// # Errors
    ///
    /// Fails if a stage on the way back to the source is missing.
    pub fn new(terminal: &Dataset<T>) -> Result<Self> {
        let p = terminal.pipeline();
        let edges = p.edges();

        // Linear backwalk: terminal → … → source
        let mut chain: Vec<Arc<dyn Operation>> = Vec::new();
        let mut cur = terminal.id();
        loop {
            let stage = p.stage(cur).ok_or_else(|| anyhow!("missing stage {cur}"))?;
            chain.push(stage);
            if let Some((from, _)) = edges.iter().find(|(_, to)| *to == cur).copied() {
                cur = from;
            } else {
                break;
            }
        }
        chain.reverse();

        Ok(Self {
            chain,
            terminal: Arc::clone(&terminal.producer),
        })
    }

    /// Stage ids, source first.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.chain.iter().map(|s| s.id()).collect()
    }

    /// Run the chain to completion and return the terminal's values in emission order.
    ///
    /// A stopped chain returns whatever was emitted before the stop took
    /// effect. If a stage fails, the rest of the chain winds down and the
    /// first failure, in chain order, is returned.
    ///
    /// # Errors
    ///
    /// The first stage failure, or [`PipelineError::AlreadyStarted`](crate::PipelineError::AlreadyStarted)
    /// if a stage of this chain already ran.
    pub fn collect(&self) -> Result<Vec<T>> {
        let started = Instant::now();
        info!(stages = self.chain.len(), "running pipeline");

        let output = self.terminal.subscribe();
        for stage in &self.chain {
            stage.connect();
        }

        let mut handles: Vec<JoinHandle<_>> = Vec::with_capacity(self.chain.len());
        for stage in &self.chain {
            match Arc::clone(stage).start() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.stop();
                    drop(output);
                    for (started, handle) in self.chain.iter().zip(handles) {
                        let id = started.id();
                        match handle.join() {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) if err.is_cancellation() => {}
                            Ok(Err(err)) => {
                                debug!(stage = %id, error = %err, "stage failed in teardown");
                            }
                            Err(_) => debug!(stage = %id, "stage thread panicked in teardown"),
                        }
                    }
                    return Err(e).with_context(|| format!("starting stage {}", stage.id()));
                }
            }
        }

        let values: Vec<T> = output.generate().flatten().collect();
        drop(output);

        let mut first_error = None;
        for (stage, handle) in self.chain.iter().zip(handles) {
            let outcome = match handle.join() {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => anyhow::Error::new(e),
                Err(_) => anyhow!("stage thread panicked"),
            };
            debug!(stage = %stage.id(), error = %outcome, "stage reported failure");
            if first_error.is_none() {
                self.stop();
                let ctx = format!("stage {} ({}) failed", stage.id(), stage.name());
                first_error = Some(outcome.context(ctx));
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        info!(values = values.len(), elapsed = ?started.elapsed(), "pipeline finished");
        Ok(values)
    }

    /// Ask every stage of the chain to stop. Idempotent; returns immediately.
    pub fn stop(&self) {
        for stage in &self.chain {
            stage.stop();
        }
    }

    /// Snapshot of every stage, source first.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            stages: self.chain.iter().map(|s| s.status()).collect(),
        }
    }

    /// Values consumed so far by the terminal stage.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.status().processed()
    }

    /// Time left, extrapolated from the source's declared length and the
    /// progress of the first stage reading from it.
    ///
    /// `None` until there is a declared length and some progress to go by.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimated_completion(&self) -> Option<Duration> {
        let status = self.status();
        let source = status.stages.first()?;
        let total = source.declared_len? as f64;
        let reader = status.stages.get(1).unwrap_or(source);
        if reader.finished {
            return Some(Duration::ZERO);
        }
        let done = reader.processed as f64;
        let elapsed = reader.elapsed()?.as_secs_f64();
        if done <= 0.0 {
            return None;
        }
        let remaining = (total - done).max(0.0) * elapsed / done;
        Some(Duration::from_secs_f64(remaining))
    }
}
