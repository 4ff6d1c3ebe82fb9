pub mod graph;
pub mod prompts;
pub mod quality;
pub mod routing;
pub mod run_log;
pub mod stages;

pub use graph::{blog_edges, Edge, EdgeCondition, FnStage, Node, PipelineExecutor, StageFn, StageOutput};
pub use quality::{parse_quality_report, QualityReport};
pub use routing::should_revise;
pub use run_log::RunLogger;
pub use stages::{llm_nodes, LlmStage};
