//! Lightweight unique identifier for stages within a [`Pipeline`](crate::pipeline::Pipeline).
//!
//! Each source and stage inserted into the pipeline is assigned a sequential
//! `StageId`. They're small, `Copy`, and hashable, so the runner uses them as
//! keys when walking the chain behind a terminal dataset.

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Unique numeric identifier for a stage in a pipeline.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct StageId(u64);

impl StageId {
    /// Create a new `StageId` (used internally by the pipeline).
    pub(crate) fn new(v: u64) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for StageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
