//! Raw data sources feeding the first stage of a chain.

use crate::StageId;
use crate::buffer::{Buffer, Outlet};
use crate::config::Config;
use crate::dataset::Element;
use crate::error::PipelineError;
use crate::node::{Operation, Producer, StageKind};
use crate::stage::Emitter;
use crate::status::{StageState, StageStatus};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Zero-argument factory producing a finite sequence.
pub(crate) type Factory<T> = Arc<dyn Fn() -> Box<dyn Iterator<Item = T>> + Send + Sync>;

enum Origin<T> {
    /// Taken on the single run.
    Materialized(Mutex<Option<Vec<T>>>),
    Generated(Factory<T>),
}

/// A materialized vector or a generator, published in batches to its consumers.
pub struct Source<T> {
    id: StageId,
    origin: Origin<T>,
    declared_len: Option<usize>,
    outlet: Outlet<Vec<T>>,
    state: StageState,
    config: Config,
}

impl<T: Element> Source<T> {
    pub(crate) fn materialized(id: StageId, data: Vec<T>, config: Config) -> Self {
        let len = data.len();
        Self::with_origin(id, Origin::Materialized(Mutex::new(Some(data))), Some(len), config)
    }

    pub(crate) fn generated(
        id: StageId,
        factory: Factory<T>,
        declared_len: Option<usize>,
        config: Config,
    ) -> Self {
        Self::with_origin(id, Origin::Generated(factory), declared_len, config)
    }

    fn with_origin(
        id: StageId,
        origin: Origin<T>,
        declared_len: Option<usize>,
        config: Config,
    ) -> Self {
        Self {
            id,
            origin,
            declared_len,
            outlet: Outlet::new(config.buffer_capacity, config.poll_interval),
            state: StageState::new(StageKind::Source.label()),
            config,
        }
    }

    fn run(&self) -> Result<(), PipelineError> {
        self.state.begin();
        debug!(stage = %self.id, name = %self.state.name(), "source started");
        let outcome = catch_unwind(AssertUnwindSafe(|| self.fill()))
            .unwrap_or_else(|payload| Err(PipelineError::from_panic(payload.as_ref())));
        self.outlet.close();
        self.state.finish();
        match outcome {
            Err(e) if e.is_cancellation() => {
                debug!(stage = %self.id, reason = %e, "source stopped");
                Ok(())
            }
            Err(e) => {
                warn!(stage = %self.id, error = %e, "source failed");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    fn fill(&self) -> Result<(), PipelineError> {
        let values: Box<dyn Iterator<Item = T>> = match &self.origin {
            Origin::Materialized(slot) => {
                Box::new(slot.lock().take().unwrap_or_default().into_iter())
            }
            Origin::Generated(factory) => factory(),
        };
        let stop = self.state.stop_flag();
        let mut out = Emitter::new(&self.outlet, stop, &self.config);
        for value in values {
            if stop.is_raised() {
                out.flush()?;
                return Err(PipelineError::Cancelled);
            }
            out.push(value)?;
            self.state.add_processed(1);
        }
        out.flush()
    }
}

impl<T: Element> Operation for Source<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn kind(&self) -> StageKind {
        StageKind::Source
    }

    fn name(&self) -> String {
        self.state.name()
    }

    fn rename(&self, name: String) {
        self.state.rename(name);
    }

    fn upstream(&self) -> Option<StageId> {
        None
    }

    fn connect(&self) {}

    fn start(self: Arc<Self>) -> Result<JoinHandle<Result<(), PipelineError>>, PipelineError> {
        self.state.launch(self.id)?;
        let name = format!("parade-source-{}", self.id.raw());
        Ok(thread::Builder::new().name(name).spawn(move || self.run())?)
    }

    fn stop(&self) {
        self.state.request_stop();
    }

    fn status(&self) -> StageStatus {
        self.state.snapshot(self.id, StageKind::Source, self.declared_len, None)
    }
}

impl<T: Element> Producer<T> for Source<T> {
    fn subscribe(&self) -> Buffer<Vec<T>> {
        self.outlet.subscribe()
    }

    fn declared_len(&self) -> Option<usize> {
        self.declared_len
    }
}
