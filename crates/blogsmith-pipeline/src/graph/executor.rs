use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use blogsmith_core::config::{ExhaustedPolicy, PipelineConfig};
use blogsmith_core::error::{BlogsmithError, Result};
use blogsmith_core::event::EventBus;
use blogsmith_core::types::{PipelineEvent, RunId};
use blogsmith_core::workflow::{Route, Stage, StateUpdate, WorkflowState};

use super::edge::{blog_edges, Edge, EdgeCondition};
use super::node::{Node, StageFn};

/// Output of one completed stage, as yielded by [`PipelineExecutor::stream`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutput {
    pub stage: Stage,
    /// 1-based write/edit/quality_check pass. Research runs in pass 1.
    pub pass: u32,
    /// The fields this stage produced.
    pub update: StateUpdate,
}

/// Drives a [`WorkflowState`] through the pipeline graph.
///
/// Starting from the entry stage, each stage handler runs in turn and its
/// [`StateUpdate`] is merged into the shared state. Unconditional edges are
/// followed directly; the conditional edge consults its router, which either
/// loops back (starting a new pass) or ends the run.
pub struct PipelineExecutor {
    handlers: HashMap<Stage, Arc<dyn StageFn>>,
    edges: HashMap<Stage, Edge>,
    entry: Stage,
    config: PipelineConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stages: Vec<Stage> = self.handlers.keys().copied().collect();
        stages.sort_by_key(|s| Stage::ALL.iter().position(|a| a == s));
        f.debug_struct("PipelineExecutor")
            .field("entry", &self.entry)
            .field("stages", &stages)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    /// Create an executor, rejecting graphs it cannot run.
    ///
    /// Every stage needs a handler and exactly one outgoing edge, exactly one
    /// edge must be conditional, no edge may target the entry stage, and every
    /// stage must be reachable from the entry.
    pub fn new(
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        entry: Stage,
        config: PipelineConfig,
    ) -> Result<Self> {
        let mut handlers = HashMap::new();
        for node in nodes {
            if handlers.insert(node.stage, node.handler).is_some() {
                return Err(BlogsmithError::InvalidGraph(format!(
                    "duplicate handler for stage '{}'",
                    node.stage
                )));
            }
        }

        validate(&handlers, &edges, entry)?;

        let edges = edges.into_iter().map(|e| (e.from, e)).collect();
        Ok(Self {
            handlers,
            edges,
            entry,
            config,
            event_bus: None,
        })
    }

    /// The research → write → edit → quality_check pipeline with its
    /// quality-gated loop back to write.
    pub fn blog(nodes: Vec<Node>, config: PipelineConfig) -> Result<Self> {
        let edges = blog_edges(&config);
        Self::new(nodes, edges, Stage::Research, config)
    }

    /// Publish [`PipelineEvent`]s to this bus while running.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run to completion and return the final state.
    pub async fn run(&self, initial: WorkflowState) -> Result<WorkflowState> {
        self.run_with_id(RunId::new(), initial).await
    }

    pub async fn run_with_id(&self, run_id: RunId, initial: WorkflowState) -> Result<WorkflowState> {
        let mut cursor = Cursor::new(self, run_id, initial);
        while cursor.step().await?.is_some() {}
        Ok(cursor.state)
    }

    /// Run lazily, yielding each completed stage. The stream ends after the
    /// final stage or right after the first error.
    ///
    /// With [`ExhaustedPolicy::ReturnBest`] the best pass is only reflected in
    /// the state returned by [`run`](Self::run); the stream reports what each
    /// stage actually produced.
    pub fn stream(&self, initial: WorkflowState) -> BoxStream<'_, Result<StageOutput>> {
        self.stream_with_id(RunId::new(), initial)
    }

    pub fn stream_with_id(
        &self,
        run_id: RunId,
        initial: WorkflowState,
    ) -> BoxStream<'_, Result<StageOutput>> {
        let cursor = Cursor::new(self, run_id, initial);
        Box::pin(futures::stream::unfold(Some(cursor), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.step().await {
                Ok(Some(output)) => Some((Ok(output), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        }))
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    async fn call_stage(
        &self,
        stage: Stage,
        handler: &dyn StageFn,
        state: &WorkflowState,
    ) -> Result<StateUpdate> {
        let fut = handler.call(state);
        match self.config.stage_timeout_secs {
            0 => fut.await,
            secs => tokio::time::timeout(Duration::from_secs(secs), fut)
                .await
                .map_err(|_| BlogsmithError::StageTimeout {
                    stage: stage.name().to_string(),
                    timeout_secs: secs,
                })?,
        }
    }
}

fn validate(
    handlers: &HashMap<Stage, Arc<dyn StageFn>>,
    edges: &[Edge],
    entry: Stage,
) -> Result<()> {
    let invalid = |msg: String| Err(BlogsmithError::InvalidGraph(msg));

    if !handlers.contains_key(&entry) {
        return invalid(format!("entry stage '{}' has no handler", entry));
    }

    for edge in edges {
        for stage in [edge.from, edge.to] {
            if !handlers.contains_key(&stage) {
                return invalid(format!("edge {:?} references stage '{}' with no handler", edge, stage));
            }
        }
        if edge.to == entry {
            return invalid(format!("edge {:?} targets the entry stage", edge));
        }
    }

    for stage in Stage::ALL.into_iter().filter(|s| handlers.contains_key(s)) {
        let outgoing = edges.iter().filter(|e| e.from == stage).count();
        if outgoing != 1 {
            return invalid(format!(
                "stage '{}' has {} outgoing edges, expected 1",
                stage, outgoing
            ));
        }
    }

    let conditional = edges.iter().filter(|e| e.is_conditional()).count();
    if conditional != 1 {
        return invalid(format!(
            "expected exactly one conditional edge, found {}",
            conditional
        ));
    }

    let mut reached = vec![entry];
    let mut current = entry;
    while let Some(edge) = edges.iter().find(|e| e.from == current) {
        if reached.contains(&edge.to) {
            break;
        }
        reached.push(edge.to);
        current = edge.to;
    }
    for stage in Stage::ALL.into_iter().filter(|s| handlers.contains_key(s)) {
        if !reached.contains(&stage) {
            return invalid(format!("stage '{}' is unreachable from '{}'", stage, entry));
        }
    }

    Ok(())
}

/// What the cursor does on its next step.
enum Next {
    Stage(Stage),
    Finish,
    Fail(BlogsmithError),
    Done,
}

/// State snapshot kept for [`ExhaustedPolicy::ReturnBest`].
struct Snapshot {
    score: u8,
    pass: u32,
    state: WorkflowState,
}

/// Single-run stepping logic shared by `run` and `stream`.
struct Cursor<'a> {
    exec: &'a PipelineExecutor,
    run_id: RunId,
    state: WorkflowState,
    next: Next,
    pass: u32,
    best: Option<Snapshot>,
    started: Option<Instant>,
}

impl<'a> Cursor<'a> {
    fn new(exec: &'a PipelineExecutor, run_id: RunId, state: WorkflowState) -> Self {
        Self {
            exec,
            run_id,
            state,
            next: Next::Stage(exec.entry),
            pass: 1,
            best: None,
            started: None,
        }
    }

    /// Execute the next stage. `Ok(None)` once the run has finished.
    async fn step(&mut self) -> Result<Option<StageOutput>> {
        let started = match self.started {
            Some(t) => t,
            None => {
                info!(run_id = %self.run_id, topic = %self.state.topic, "Pipeline run started");
                self.exec.publish(PipelineEvent::RunStarted {
                    run_id: self.run_id.clone(),
                    topic: self.state.topic.clone(),
                });
                *self.started.insert(Instant::now())
            }
        };

        match std::mem::replace(&mut self.next, Next::Done) {
            Next::Done => Ok(None),
            Next::Finish => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(run_id = %self.run_id, passes = self.pass, elapsed_ms, "Pipeline run complete");
                self.exec.publish(PipelineEvent::RunComplete {
                    run_id: self.run_id.clone(),
                    passes: self.pass,
                    elapsed_ms,
                });
                Ok(None)
            }
            Next::Fail(e) => Err(self.fail(e)),
            Next::Stage(stage) => match self.run_stage(stage).await {
                Ok(output) => Ok(Some(output)),
                Err(e) => Err(self.fail(e)),
            },
        }
    }

    async fn run_stage(&mut self, stage: Stage) -> Result<StageOutput> {
        let exec = self.exec;
        let handler = exec.handlers.get(&stage).ok_or_else(|| {
            BlogsmithError::InvalidGraph(format!("no handler for stage '{}'", stage))
        })?;

        info!(stage = %stage, pass = self.pass, "Stage started");
        exec.publish(PipelineEvent::StageStarted {
            stage,
            pass: self.pass,
        });

        let stage_start = Instant::now();
        let update = exec.call_stage(stage, handler.as_ref(), &self.state).await?;
        let elapsed_ms = stage_start.elapsed().as_millis() as u64;

        self.state.apply(&update);
        let fields: Vec<&str> = update.fields().into_iter().map(|(k, _)| k).collect();
        debug!(stage = %stage, fields = ?fields, "State updated");
        info!(stage = %stage, pass = self.pass, elapsed_ms, "Stage complete");
        exec.publish(PipelineEvent::StageCompleted {
            stage,
            pass: self.pass,
            update: update.clone(),
            elapsed_ms,
        });

        let output = StageOutput {
            stage,
            pass: self.pass,
            update,
        };
        self.next = self.advance(stage);
        Ok(output)
    }

    /// Follow the outgoing edge of `from`.
    fn advance(&mut self, from: Stage) -> Next {
        let exec = self.exec;
        let Some(edge) = exec.edges.get(&from) else {
            return Next::Finish;
        };

        let router = match &edge.condition {
            EdgeCondition::Always => return Next::Stage(edge.to),
            EdgeCondition::Conditional(router) => router,
        };

        let route = router(&self.state);
        let score = self.state.quality_score.unwrap_or(exec.config.default_score);
        exec.publish(PipelineEvent::RouteDecided {
            pass: self.pass,
            score,
            route,
        });
        self.remember(score);

        match route {
            Route::Stop => Next::Finish,
            Route::Write => {
                let max = exec.config.max_passes;
                if max > 0 && self.pass >= max {
                    return self.exhausted(score);
                }
                self.pass += 1;
                debug!(pass = self.pass, score, "Revising");
                Next::Stage(edge.to)
            }
        }
    }

    fn remember(&mut self, score: u8) {
        if self.exec.config.on_exhausted != ExhaustedPolicy::ReturnBest {
            return;
        }
        // Ties go to the later pass
        if self.best.as_ref().map_or(true, |b| score >= b.score) {
            self.best = Some(Snapshot {
                score,
                pass: self.pass,
                state: self.state.clone(),
            });
        }
    }

    fn exhausted(&mut self, last_score: u8) -> Next {
        warn!(passes = self.pass, last_score, "Revision limit reached without a passing score");
        match self.exec.config.on_exhausted {
            ExhaustedPolicy::Fail => Next::Fail(BlogsmithError::RevisionsExhausted {
                passes: self.pass,
                last_score,
            }),
            ExhaustedPolicy::ReturnBest => {
                if let Some(best) = self.best.take() {
                    info!(best_pass = best.pass, score = best.score, "Returning best pass");
                    self.exec.publish(PipelineEvent::PassesExhausted {
                        passes: self.pass,
                        best_pass: best.pass,
                    });
                    self.state = best.state;
                }
                Next::Finish
            }
        }
    }

    fn fail(&self, e: BlogsmithError) -> BlogsmithError {
        error!(run_id = %self.run_id, pass = self.pass, error = %e, "Pipeline run failed");
        self.exec.publish(PipelineEvent::RunError {
            run_id: self.run_id.clone(),
            error: e.to_string(),
        });
        e
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::StreamExt;

    use super::*;

    type Trace = Arc<Mutex<Vec<Stage>>>;

    /// Nodes that append a marker and score each pass from `scores`.
    fn scripted(scores: Vec<Option<u8>>) -> (Vec<Node>, Trace) {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let scores = Arc::new(Mutex::new(scores.into_iter()));

        let t = trace.clone();
        let research = Node::from_fn(Stage::Research, move |s| {
            t.lock().unwrap().push(Stage::Research);
            Ok(StateUpdate::research_notes(format!("{}|R", s.topic)))
        });
        let t = trace.clone();
        let write = Node::from_fn(Stage::Write, move |s| {
            let mut trace = t.lock().unwrap();
            trace.push(Stage::Write);
            let n = trace.iter().filter(|s| **s == Stage::Write).count();
            Ok(StateUpdate::draft(format!("{}|W{}", s.research_notes.clone().unwrap_or_default(), n)))
        });
        let t = trace.clone();
        let edit = Node::from_fn(Stage::Edit, move |s| {
            t.lock().unwrap().push(Stage::Edit);
            Ok(StateUpdate::final_content(format!("{}|E", s.draft_content.clone().unwrap_or_default())))
        });
        let t = trace.clone();
        let quality = Node::from_fn(Stage::QualityCheck, move |_| {
            t.lock().unwrap().push(Stage::QualityCheck);
            Ok(match scores.lock().unwrap().next().flatten() {
                Some(score) => StateUpdate::quality(score, format!("scored {}", score)),
                None => StateUpdate::default(),
            })
        });

        (vec![research, write, edit, quality], trace)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_passes: 0,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_single_pass_order() {
        let (nodes, trace) = scripted(vec![Some(9)]);
        let exec = PipelineExecutor::blog(nodes, config()).unwrap();
        let state = exec.run(WorkflowState::new("X")).await.unwrap();

        assert_eq!(*trace.lock().unwrap(), Stage::ALL.to_vec());
        assert_eq!(state.final_content.as_deref(), Some("X|R|W1|E"));
        assert_eq!(state.quality_score, Some(9));
    }

    #[tokio::test]
    async fn test_revision_then_pass() {
        let (nodes, trace) = scripted(vec![Some(5), Some(8)]);
        let exec = PipelineExecutor::blog(nodes, config()).unwrap();
        let state = exec.run(WorkflowState::new("X")).await.unwrap();

        use Stage::*;
        assert_eq!(
            *trace.lock().unwrap(),
            vec![Research, Write, Edit, QualityCheck, Write, Edit, QualityCheck]
        );
        assert_eq!(state.research_notes.as_deref(), Some("X|R"));
        assert_eq!(state.final_content.as_deref(), Some("X|R|W2|E"));
        assert_eq!(state.quality_feedback.as_deref(), Some("scored 8"));
    }

    #[tokio::test]
    async fn test_stream_reports_passes() {
        let (nodes, _) = scripted(vec![Some(3), Some(7)]);
        let exec = PipelineExecutor::blog(nodes, config()).unwrap();
        let outputs: Vec<_> = exec
            .stream(WorkflowState::new("X"))
            .map(|r| r.map(|o| (o.stage, o.pass)))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();

        use Stage::*;
        assert_eq!(
            outputs,
            vec![
                (Research, 1),
                (Write, 1),
                (Edit, 1),
                (QualityCheck, 1),
                (Write, 2),
                (Edit, 2),
                (QualityCheck, 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_error_aborts() {
        let (mut nodes, trace) = scripted(vec![Some(9)]);
        nodes[2] = Node::from_fn(Stage::Edit, |_| {
            Err(BlogsmithError::LlmRequest("HTTP 500".into()))
        });
        let exec = PipelineExecutor::blog(nodes, config()).unwrap();

        let mut stream = exec.stream(WorkflowState::new("X"));
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(BlogsmithError::LlmRequest(_)))
        ));
        assert!(stream.next().await.is_none());
        assert!(!trace.lock().unwrap().contains(&Stage::QualityCheck));
    }

    #[tokio::test]
    async fn test_exhausted_fail() {
        let (nodes, _) = scripted(vec![Some(2), Some(3), Some(4)]);
        let cfg = PipelineConfig {
            max_passes: 2,
            ..PipelineConfig::default()
        };
        let exec = PipelineExecutor::blog(nodes, cfg).unwrap();
        let err = exec.run(WorkflowState::new("X")).await.unwrap_err();
        assert!(matches!(
            err,
            BlogsmithError::RevisionsExhausted {
                passes: 2,
                last_score: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_exhausted_return_best_prefers_latest_tie() {
        let (nodes, _) = scripted(vec![Some(6), Some(4), Some(6)]);
        let cfg = PipelineConfig {
            max_passes: 3,
            on_exhausted: ExhaustedPolicy::ReturnBest,
            ..PipelineConfig::default()
        };
        let exec = PipelineExecutor::blog(nodes, cfg).unwrap();
        let state = exec.run(WorkflowState::new("X")).await.unwrap();
        assert_eq!(state.final_content.as_deref(), Some("X|R|W3|E"));
        assert_eq!(state.quality_score, Some(6));
    }

    #[tokio::test]
    async fn test_exhausted_return_best_picks_highest() {
        let (nodes, _) = scripted(vec![Some(6), Some(4), Some(5)]);
        let cfg = PipelineConfig {
            max_passes: 3,
            on_exhausted: ExhaustedPolicy::ReturnBest,
            ..PipelineConfig::default()
        };
        let exec = PipelineExecutor::blog(nodes, cfg).unwrap();
        let state = exec.run(WorkflowState::new("X")).await.unwrap();
        assert_eq!(state.final_content.as_deref(), Some("X|R|W1|E"));
        assert_eq!(state.quality_score, Some(6));
        assert_eq!(state.quality_feedback.as_deref(), Some("scored 6"));
    }

    #[tokio::test]
    async fn test_timeout() {
        struct Slow;
        impl StageFn for Slow {
            fn call<'a>(
                &'a self,
                _state: &'a WorkflowState,
            ) -> futures::future::BoxFuture<'a, Result<StateUpdate>> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(StateUpdate::default())
                })
            }
        }

        let (mut nodes, _) = scripted(vec![Some(9)]);
        nodes[0] = Node::new(Stage::Research, Slow);
        let cfg = PipelineConfig {
            stage_timeout_secs: 1,
            ..PipelineConfig::default()
        };
        let exec = PipelineExecutor::blog(nodes, cfg).unwrap();
        let err = exec.run(WorkflowState::new("X")).await.unwrap_err();
        assert!(matches!(
            err,
            BlogsmithError::StageTimeout { ref stage, timeout_secs: 1 } if stage == "research"
        ));
    }

    #[tokio::test]
    async fn test_events_published() {
        let (nodes, _) = scripted(vec![Some(5), Some(9)]);
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let exec = PipelineExecutor::blog(nodes, config())
            .unwrap()
            .with_event_bus(bus.clone());
        exec.run(WorkflowState::new("X")).await.unwrap();

        let mut routes = Vec::new();
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::RouteDecided { score, route, .. } = &event {
                routes.push((*score, *route));
            }
            last = Some(event);
        }
        assert_eq!(routes, vec![(5, Route::Write), (9, Route::Stop)]);
        assert!(matches!(last, Some(PipelineEvent::RunComplete { passes: 2, .. })));
    }

    #[test]
    fn test_validation() {
        let cfg = PipelineConfig::default();

        let (mut nodes, _) = scripted(vec![]);
        nodes.pop();
        let err = PipelineExecutor::blog(nodes, cfg.clone()).unwrap_err();
        assert!(err.to_string().contains("no handler"), "{}", err);

        let (nodes, _) = scripted(vec![]);
        let mut edges = blog_edges(&cfg);
        edges.push(Edge::always(Stage::Write, Stage::QualityCheck));
        let err = PipelineExecutor::new(nodes, edges, Stage::Research, cfg.clone()).unwrap_err();
        assert!(err.to_string().contains("outgoing edges"), "{}", err);

        let (nodes, _) = scripted(vec![]);
        let mut edges = blog_edges(&cfg);
        edges[3] = Edge::conditional(Stage::QualityCheck, Stage::Research, |_| Route::Stop);
        let err = PipelineExecutor::new(nodes, edges, Stage::Research, cfg.clone()).unwrap_err();
        assert!(err.to_string().contains("entry stage"), "{}", err);

        let (nodes, _) = scripted(vec![]);
        let mut edges = blog_edges(&cfg);
        edges[3] = Edge::always(Stage::QualityCheck, Stage::Write);
        let err = PipelineExecutor::new(nodes, edges, Stage::Research, cfg.clone()).unwrap_err();
        assert!(err.to_string().contains("conditional"), "{}", err);

        let (mut nodes, _) = scripted(vec![]);
        nodes.push(Node::from_fn(Stage::Write, |_| Ok(StateUpdate::default())));
        let err = PipelineExecutor::blog(nodes, cfg).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{}", err);
    }

    #[test]
    fn test_debug_lists_stages_in_order() {
        let (nodes, _) = scripted(vec![]);
        let exec = PipelineExecutor::blog(nodes, PipelineConfig::default()).unwrap();
        let debug = format!("{:?}", exec);
        assert!(debug.starts_with("PipelineExecutor { entry: Research"), "{}", debug);
        assert!(debug.contains("stages: [Research, Write, Edit, QualityCheck]"), "{}", debug);
        assert!(debug.ends_with(".. }"), "{}", debug);
    }
}
