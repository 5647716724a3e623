use crate::StageId;
use crate::buffer::Buffer;
use crate::error::PipelineError;
use crate::status::StageStatus;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The closed set of stage kinds a pipeline is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum StageKind {
    Source,
    Map,
    FlatMap,
    GroupByKey,
    ReduceByKey,
    Fold,
}

impl StageKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Map => "map",
            Self::FlatMap => "flat_map",
            Self::GroupByKey => "group_by_key",
            Self::ReduceByKey => "reduce_by_key",
            Self::Fold => "fold",
        }
    }
}

impl Display for StageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Type-erased control surface of a stage, shared by every kind.
pub trait Operation: Send + Sync {
    fn id(&self) -> StageId;

    fn kind(&self) -> StageKind;

    fn name(&self) -> String;

    fn rename(&self, name: String);

    /// The stage this one reads from; `None` for sources.
    fn upstream(&self) -> Option<StageId>;

    /// Attach to the upstream producer's output. Idempotent.
    fn connect(&self);

    /// Launch the stage on its own thread. A stage runs at most once.
    fn start(self: Arc<Self>) -> Result<JoinHandle<Result<(), PipelineError>>, PipelineError>;

    /// Request cancellation. Idempotent and asynchronous.
    fn stop(&self);

    fn status(&self) -> StageStatus;
}

/// Anything that emits batches of `T` to attached buffers.
pub trait Producer<T>: Send + Sync {
    /// Attach a new consumer buffer.
    fn subscribe(&self) -> Buffer<Vec<T>>;

    /// Number of values this producer will emit, if known up front.
    fn declared_len(&self) -> Option<usize>;
}
