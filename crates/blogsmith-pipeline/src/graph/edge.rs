use std::fmt;
use std::sync::Arc;

use blogsmith_core::config::PipelineConfig;
use blogsmith_core::workflow::{Route, Stage, WorkflowState};

use crate::routing::should_revise;

/// Routing predicate evaluated on the state after the source stage completes.
pub type Router = Arc<dyn Fn(&WorkflowState) -> Route + Send + Sync>;

/// An edge connecting two stages in the pipeline graph.
#[derive(Clone)]
pub struct Edge {
    /// Source stage.
    pub from: Stage,
    /// Target stage.
    pub to: Stage,
    /// Condition that must hold to traverse this edge.
    pub condition: EdgeCondition,
}

/// Condition for traversing an edge.
#[derive(Clone, Default)]
pub enum EdgeCondition {
    /// Always traverse this edge.
    #[default]
    Always,
    /// Traverse when the router answers [`Route::Write`]; end the run on
    /// [`Route::Stop`].
    Conditional(Router),
}

impl fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Conditional(_) => f.write_str("Conditional(..)"),
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({:?})", self.from, self.to, self.condition)
    }
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: Stage, to: Stage) -> Self {
        Self {
            from,
            to,
            condition: EdgeCondition::Always,
        }
    }

    /// Create an edge guarded by a routing predicate.
    pub fn conditional<F>(from: Stage, to: Stage, router: F) -> Self
    where
        F: Fn(&WorkflowState) -> Route + Send + Sync + 'static,
    {
        Self {
            from,
            to,
            condition: EdgeCondition::Conditional(Arc::new(router)),
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.condition, EdgeCondition::Conditional(_))
    }
}

/// The fixed blog pipeline: research → write → edit → quality_check, with
/// quality_check looping back to write while the score is below threshold.
pub fn blog_edges(config: &PipelineConfig) -> Vec<Edge> {
    let threshold = config.quality_threshold;
    let default_score = config.default_score;
    vec![
        Edge::always(Stage::Research, Stage::Write),
        Edge::always(Stage::Write, Stage::Edit),
        Edge::always(Stage::Edit, Stage::QualityCheck),
        Edge::conditional(Stage::QualityCheck, Stage::Write, move |state| {
            should_revise(state, threshold, default_score)
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_builders() {
        let e = Edge::always(Stage::Research, Stage::Write);
        assert_eq!(e.from, Stage::Research);
        assert_eq!(e.to, Stage::Write);
        assert!(!e.is_conditional());

        let e = Edge::conditional(Stage::QualityCheck, Stage::Write, |_| Route::Stop);
        assert!(e.is_conditional());
        assert_eq!(format!("{:?}", e), "quality_check -> write (Conditional(..))");
    }

    #[test]
    fn test_blog_edges_shape() {
        let edges = blog_edges(&PipelineConfig::default());
        assert_eq!(edges.len(), 4);
        assert_eq!(edges.iter().filter(|e| e.is_conditional()).count(), 1);

        let back = edges.iter().find(|e| e.is_conditional()).unwrap();
        assert_eq!(back.from, Stage::QualityCheck);
        assert_eq!(back.to, Stage::Write);
    }

    #[test]
    fn test_blog_router_uses_configured_threshold() {
        let config = PipelineConfig {
            quality_threshold: 9,
            ..PipelineConfig::default()
        };
        let edges = blog_edges(&config);
        let EdgeCondition::Conditional(router) = &edges[3].condition else {
            panic!("expected conditional edge");
        };

        let mut state = WorkflowState::new("t");
        state.quality_score = Some(8);
        assert_eq!(router(&state), Route::Write);
        state.quality_score = Some(9);
        assert_eq!(router(&state), Route::Stop);
    }
}
