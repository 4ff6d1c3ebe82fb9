//! Pipeline graph: stages, the edges between them, and the executor.
//!
//! Each `Node` pairs a `Stage` with the handler that produces its
//! `StateUpdate`. `Edge`s are either unconditional or guarded by a router
//! that decides between looping back and stopping. The `PipelineExecutor`
//! walks the graph from the entry stage, merging each update into the shared
//! `WorkflowState`.

pub mod edge;
pub mod executor;
pub mod node;

pub use edge::{blog_edges, Edge, EdgeCondition, Router};
pub use executor::{PipelineExecutor, StageOutput};
pub use node::{FnStage, Node, StageFn};
