//! Error taxonomy of the execution engine.
//!
//! Public entry points such as [`Runner::collect`](crate::Runner::collect)
//! return [`anyhow::Result`]; the concrete [`PipelineError`] can be recovered
//! with `err.downcast_ref::<PipelineError>()`.

use crate::StageId;
use std::any::Any;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The user function failed (or panicked) on an element of the given job.
    #[error("transformation failed in job {job}")]
    Transformation {
        job: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A stop request was observed at a blocking point.
    #[error("stop requested")]
    Cancelled,

    /// The per-worker context initializer failed; the worker fails every job it receives.
    #[error("worker initialization failed: {0}")]
    WorkerInit(String),

    /// A worker thread went away without reporting its job.
    #[error("worker {0} exited unexpectedly")]
    WorkerLost(usize),

    /// The dataset's length was queried but is not known.
    #[error("dataset length is not known")]
    LengthUnknown,

    /// A stage can run only once.
    #[error("stage {0} was already started")]
    AlreadyStarted(StageId),

    /// Every reader of a buffer has gone away.
    #[error("downstream buffer disconnected")]
    Disconnected,

    /// User code running on a stage thread (a combiner) panicked.
    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error("failed to spawn thread")]
    Spawn(#[from] std::io::Error),
}

impl PipelineError {
    /// Cancellation-like errors unwind a stage cleanly and are not reported as failures.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Disconnected)
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::Panicked(panic_message(payload))
    }
}

/// Text carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
