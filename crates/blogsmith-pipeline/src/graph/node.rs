use std::sync::Arc;

use futures::future::BoxFuture;

use blogsmith_core::error::Result;
use blogsmith_core::workflow::{Stage, StateUpdate, WorkflowState};

/// A stage handler: reads the current state and returns the fields it produces.
///
/// Errors abort the run. The executor never retries a failed stage.
pub trait StageFn: Send + Sync + 'static {
    fn call<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>>;
}

/// Adapter for synchronous closures.
pub struct FnStage<F>(pub F);

impl<F> StageFn for FnStage<F>
where
    F: Fn(&WorkflowState) -> Result<StateUpdate> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(futures::future::ready((self.0)(state)))
    }
}

/// A stage in the pipeline graph together with its handler.
#[derive(Clone)]
pub struct Node {
    pub stage: Stage,
    pub handler: Arc<dyn StageFn>,
}

impl Node {
    pub fn new(stage: Stage, handler: impl StageFn) -> Self {
        Self {
            stage,
            handler: Arc::new(handler),
        }
    }

    /// Node backed by a synchronous closure.
    pub fn from_fn<F>(stage: Stage, f: F) -> Self
    where
        F: Fn(&WorkflowState) -> Result<StateUpdate> + Send + Sync + 'static,
    {
        Self::new(stage, FnStage(f))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("stage", &self.stage).finish_non_exhaustive()
    }
}
