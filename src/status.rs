//! Execution state and status snapshots.
//!
//! Every source and stage keeps a [`StageState`]: `running` / `finished`
//! flags, a monotone `processed` counter, a monotone stop flag and start/finish
//! timestamps that are each set once. [`StageStatus`] is a point-in-time copy of
//! that state, and [`PipelineStatus`] groups the snapshots of a whole chain.
//! Both serialize to JSON so an external reporter can compute throughput and
//! ETA without touching the engine.
//!
//! ```no_run
//! use parade::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = Pipeline::default();
//! let runner = Runner::new(&from_vec(&p, (0..100u32).collect::<Vec<u32>>()).map(|x: u32| x + 1))?;
//! runner.collect()?;
//! runner.status().save_to_file("status.json")?;
//! # Ok(())
//! # }
//! ```

use crate::StageId;
use crate::error::PipelineError;
use crate::node::StageKind;
use crate::signal::StopFlag;
use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Runtime counters of one stage.
pub(crate) struct StageState {
    name: Mutex<String>,
    launched: AtomicBool,
    running: AtomicBool,
    finished: AtomicBool,
    processed: AtomicU64,
    stop: StopFlag,
    started: Mutex<Option<Instant>>,
    ended: Mutex<Option<Instant>>,
}

impl StageState {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: Mutex::new(name.into()),
            launched: AtomicBool::new(false),
            running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            stop: StopFlag::new(),
            started: Mutex::new(None),
            ended: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn rename(&self, name: String) {
        *self.name.lock() = name;
    }

    /// Claim the single run of this stage.
    pub(crate) fn launch(&self, id: StageId) -> Result<(), PipelineError> {
        if self.launched.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::AlreadyStarted(id));
        }
        Ok(())
    }

    pub(crate) fn begin(&self) {
        self.started.lock().get_or_insert_with(Instant::now);
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn finish(&self) {
        self.ended.lock().get_or_insert_with(Instant::now);
        self.finished.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn add_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    pub(crate) fn request_stop(&self) {
        self.stop.raise();
    }

    pub(crate) fn snapshot(
        &self,
        id: StageId,
        kind: StageKind,
        declared_len: Option<usize>,
        input_buffered: Option<usize>,
    ) -> StageStatus {
        StageStatus {
            id,
            name: self.name(),
            kind,
            running: self.running.load(Ordering::Acquire),
            finished: self.finished.load(Ordering::Acquire),
            stop_requested: self.stop.is_raised(),
            processed: self.processed.load(Ordering::Relaxed),
            declared_len,
            input_buffered,
            time_started: *self.started.lock(),
            time_finished: *self.ended.lock(),
        }
    }
}

/// Point-in-time status of one stage.
#[derive(Clone, Debug, Serialize)]
pub struct StageStatus {
    pub id: StageId,
    pub name: String,
    pub kind: StageKind,
    pub running: bool,
    pub finished: bool,
    pub stop_requested: bool,
    /// Values consumed so far.
    pub processed: u64,
    /// Values the stage will emit, if known.
    pub declared_len: Option<usize>,
    /// Batches waiting in the stage's input buffer.
    pub input_buffered: Option<usize>,
    #[serde(skip)]
    pub time_started: Option<Instant>,
    #[serde(skip)]
    pub time_finished: Option<Instant>,
}

impl StageStatus {
    /// Time spent running: until it finished, or until now if it is still running.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.time_started?;
        Some(self.time_finished.unwrap_or_else(Instant::now).duration_since(start))
    }

    /// Processed values per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> Option<f64> {
        let secs = self.elapsed()?.as_secs_f64();
        (secs > 0.0).then(|| self.processed as f64 / secs)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut value = json!(self);
        if let (Some(obj), Some(elapsed)) = (value.as_object_mut(), self.elapsed()) {
            obj.insert("elapsed_ms".to_string(), json!(elapsed.as_millis()));
        }
        value
    }
}

/// Status of every stage in a chain, source first.
#[derive(Clone, Debug)]
pub struct PipelineStatus {
    pub stages: Vec<StageStatus>,
}

impl PipelineStatus {
    /// Values consumed by the terminal stage.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.stages.last().map_or(0, |s| s.processed)
    }

    #[must_use]
    pub fn finished(&self) -> bool {
        self.stages.iter().all(|s| s.finished)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "processed": self.processed(),
            "finished": self.finished(),
            "stages": self.stages.iter().map(StageStatus::to_json).collect::<Vec<_>>(),
        })
    }

    /// Save the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let mut file = File::create(path)?;
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}
