use crate::StageId;
use crate::config::Config;
use crate::node::Operation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// -------- Pipeline + stages --------
/// A registry of stages and the edges between them. Datasets built from the
/// same pipeline share it; every stage is registered once, when it is defined.
pub struct Pipeline {
    pub(crate) inner: Arc<Mutex<PipelineInner>>,
}

pub struct PipelineInner {
    pub next_id: u64,
    pub stages: HashMap<StageId, Arc<dyn Operation>>,
    pub edges: Vec<(StageId, StageId)>,
    pub config: Config,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

/// Allow `Pipeline` cloning.
impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Pipeline { inner: Arc::clone(&self.inner) }
    }
}

impl Pipeline {
    /// A pipeline whose stages are tuned by `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PipelineInner {
                next_id: 0,
                stages: HashMap::new(),
                edges: Vec::new(),
                config,
            })),
        }
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.inner.lock().config.clone()
    }

    /// Number of stages defined so far, sources included.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.inner.lock().stages.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.lock().edges.len()
    }

    /// Register a stage built by `build` under a fresh id, downstream of `upstream`.
    pub(crate) fn insert_with<S, F>(&self, upstream: Option<StageId>, build: F) -> Arc<S>
    where
        S: Operation + 'static,
        F: FnOnce(StageId, Config) -> S,
    {
        let mut g = self.inner.lock();
        let id = StageId::new(g.next_id);
        g.next_id += 1;
        let stage = Arc::new(build(id, g.config.clone()));
        g.stages.insert(id, Arc::clone(&stage) as Arc<dyn Operation>);
        if let Some(from) = upstream {
            g.edges.push((from, id));
        }
        stage
    }

    pub(crate) fn stage(&self, id: StageId) -> Option<Arc<dyn Operation>> {
        self.inner.lock().stages.get(&id).cloned()
    }

    /// Snapshot of the edge list.
    pub(crate) fn edges(&self) -> Vec<(StageId, StageId)> {
        self.inner.lock().edges.clone()
    }

    /// Ask every stage of the pipeline to stop. Idempotent.
    pub fn stop(&self) {
        let stages: Vec<_> = self.inner.lock().stages.values().cloned().collect();
        for stage in stages {
            stage.stop();
        }
    }
}
