//! Orchestration engine
//!
//! Single entry point: resolve a node tree, validate it against the tool
//! registry and the initial state, drive execution top-down, and return
//! final state plus the trace. Top-level failures come back as an explicit
//! marker on the report, never as a panic past the caller.

use crate::backend::LanguageBackend;
use crate::composer::{Node, ParallelPolicy};
use crate::models::RunFailure;
use crate::observability::Metrics;
use crate::state::SharedState;
use crate::tools::ToolRegistry;
use crate::trace::ExecutionTrace;
use crate::unit::Unit;
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Engine-wide policy, configured once and applied uniformly to every
/// composer the engine drives.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Transparent retries for backend transport failures.
    pub backend_retries: u32,
    /// Transparent retries for read-only tool failures.
    pub tool_retries: u32,
    /// Default failure policy for parallel groups without their own.
    pub parallel_policy: ParallelPolicy,
    /// Default time budget for parallel children without their own.
    pub parallel_timeout: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_retries: 2,
            tool_retries: 2,
            parallel_policy: ParallelPolicy::BestEffort,
            parallel_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Everything a node needs at execution time, threaded down the tree.
#[derive(Clone)]
pub struct ExecutionContext {
    pub registry: Arc<ToolRegistry>,
    pub backend: Arc<dyn LanguageBackend>,
    pub metrics: Metrics,
    pub cancellation: CancellationToken,
    pub config: EngineConfig,
}

impl ExecutionContext {
    /// Same context under a different cancellation scope.
    pub fn with_cancellation(&self, cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..self.clone()
        }
    }
}

/// Outcome of one engine run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub final_state: SharedState,
    pub trace: ExecutionTrace,
    /// Present when the run did not complete; partial state and the full
    /// trace are still populated for diagnosis.
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Read a declared key out of the final state.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.final_state.get(key)
    }

    /// The most recently written key, for surfacing best-effort output
    /// alongside a failure marker.
    pub fn last_populated_key(&self) -> Option<&str> {
        self.final_state.keys().last()
    }
}

pub struct Engine {
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn LanguageBackend>,
    metrics: Metrics,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Arc<ToolRegistry>, backend: Arc<dyn LanguageBackend>) -> Self {
        Self {
            registry,
            backend,
            metrics: Metrics::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Static checks before anything executes: every bound tool must be
    /// registered, and every declared input key must be produced by a
    /// preceding node or present in the initial state.
    pub fn validate(&self, root: &Node, initial_state: &SharedState) -> Result<()> {
        for unit in collect_units(root) {
            for tool in unit.tools() {
                if !self.registry.contains(tool) {
                    return Err(crate::error::OrchestrationError::UnknownTool {
                        unit: unit.name().to_string(),
                        tool: tool.clone(),
                    });
                }
            }
        }

        let mut available: HashSet<String> =
            initial_state.keys().map(str::to_string).collect();
        root.validate_inputs(&mut available)
    }

    pub async fn run(&self, root: &Node, initial_state: SharedState, task: &str) -> RunReport {
        self.run_with_cancellation(root, initial_state, task, CancellationToken::new())
            .await
    }

    /// Run with an external cancellation token; cancelling it aborts
    /// in-flight LM and tool waits throughout the tree.
    pub async fn run_with_cancellation(
        &self,
        root: &Node,
        initial_state: SharedState,
        task: &str,
        cancellation: CancellationToken,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut state = initial_state;
        let mut trace = ExecutionTrace::new(run_id);

        info!(%run_id, root = root.name(), "Engine: starting run");
        self.metrics.increment("engine.runs");

        let failure = match self.validate(root, &state) {
            Err(e) => {
                warn!(%run_id, "Engine: pipeline rejected: {}", e);
                Some(RunFailure {
                    node: root.name().to_string(),
                    error: e.to_string(),
                })
            }
            Ok(()) => {
                let ctx = ExecutionContext {
                    registry: Arc::clone(&self.registry),
                    backend: Arc::clone(&self.backend),
                    metrics: self.metrics.clone(),
                    cancellation,
                    config: self.config.clone(),
                };

                match root.execute(&ctx, &mut state, &mut trace, task).await {
                    Ok(()) => None,
                    Err(e) => {
                        let node = trace
                            .first_failure()
                            .map(|record| record.node.clone())
                            .unwrap_or_else(|| root.name().to_string());
                        warn!(%run_id, node = %node, "Engine: run failed: {}", e);
                        Some(RunFailure {
                            node,
                            error: e.to_string(),
                        })
                    }
                }
            }
        };

        if failure.is_some() {
            self.metrics.increment("engine.failures");
        }

        let finished_at = Utc::now();
        self.metrics.observe_ms(
            "engine.run_ms",
            (finished_at - started_at).num_milliseconds() as f64,
        );
        info!(
            %run_id,
            success = failure.is_none(),
            state_keys = state.len(),
            trace_records = trace.len(),
            "Engine: run finished"
        );

        RunReport {
            run_id,
            final_state: state,
            trace,
            failure,
            started_at,
            finished_at,
        }
    }
}

fn collect_units(node: &Node) -> Vec<&Unit> {
    match node {
        Node::Unit(unit) => vec![unit],
        Node::Sequential(seq) => seq.children.iter().flat_map(|c| collect_units(c)).collect(),
        Node::Parallel(par) => par.children.iter().flat_map(|c| collect_units(c)).collect(),
        Node::Loop(lp) => lp.children.iter().flat_map(|c| collect_units(c)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::composer::testing::{echo_unit, failing_unit, test_registry};
    use crate::composer::{ParallelComposer, SequentialComposer};
    use serde_json::json;

    fn engine() -> Engine {
        Engine::new(
            Arc::new(test_registry()),
            Arc::new(ScriptedBackend::always("unused")),
        )
    }

    #[tokio::test]
    async fn test_run_returns_final_state_and_trace() {
        let root = Node::Sequential(SequentialComposer::new(
            "pipeline",
            vec![echo_unit("a", &[], "ka"), echo_unit("b", &["ka"], "kb")],
        ));

        let report = engine().run(&root, SharedState::new(), "task").await;

        assert!(report.is_success());
        assert!(report.output("kb").is_some());
        assert!(!report.trace.is_empty());
        assert_eq!(report.last_populated_key(), Some("kb"));
    }

    #[tokio::test]
    async fn test_failure_marker_names_failing_node() {
        let root = Node::Sequential(SequentialComposer::new(
            "pipeline",
            vec![
                echo_unit("a", &[], "ka"),
                failing_unit("b", "kb"),
                echo_unit("c", &[], "kc"),
            ],
        ));

        let report = engine().run(&root, SharedState::new(), "task").await;

        assert!(!report.is_success());
        let failure = report.failure.unwrap();
        assert_eq!(failure.node, "b");
        // Partial state survives the failure.
        assert_eq!(report.final_state.get("ka"), Some(&json!({})));
        assert!(!report.final_state.contains("kc"));
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected_before_execution() {
        let root = Node::Unit(
            crate::unit::Unit::new("a", "ka")
                .with_tools(["nonexistent_tool"])
                .tool_only(),
        );

        let report = engine().run(&root, SharedState::new(), "task").await;

        assert!(!report.is_success());
        assert!(report.trace.is_empty());
        assert!(report.failure.unwrap().error.contains("nonexistent_tool"));
    }

    #[tokio::test]
    async fn test_unresolved_input_rejected_before_execution() {
        let root = Node::Sequential(SequentialComposer::new(
            "pipeline",
            vec![echo_unit("a", &["missing_key"], "ka")],
        ));

        let report = engine().run(&root, SharedState::new(), "task").await;

        assert!(!report.is_success());
        assert!(report.trace.is_empty());
        assert!(report.failure.unwrap().error.contains("missing_key"));
    }

    #[tokio::test]
    async fn test_initial_state_keys_satisfy_inputs() {
        let root = Node::Sequential(SequentialComposer::new(
            "pipeline",
            vec![echo_unit("a", &["user_preferences"], "ka")],
        ));

        let mut initial = SharedState::new();
        initial.set("user_preferences", json!({"risk_tolerance": "low"}));
        let report = engine().run(&root, initial, "task").await;

        assert!(report.is_success());
        assert_eq!(
            report.output("ka"),
            Some(&json!({"user_preferences": {"risk_tolerance": "low"}}))
        );
    }

    #[tokio::test]
    async fn test_external_cancellation_surfaces_as_failure() {
        let root = echo_unit("a", &[], "ka");
        let token = CancellationToken::new();
        token.cancel();

        let report = engine()
            .run_with_cancellation(&root, SharedState::new(), "task", token)
            .await;

        assert!(!report.is_success());
        assert!(report.failure.unwrap().error.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_nested_tree_runs_end_to_end() {
        let research = ParallelComposer::new(
            "research",
            vec![echo_unit("market", &[], "market_data_result"),
                 echo_unit("news", &[], "news_research_result")],
        )
        .unwrap();
        let root = Node::Sequential(SequentialComposer::new(
            "workflow",
            vec![
                Node::Parallel(research),
                echo_unit("analyst", &["market_data_result", "news_research_result"], "analysis_result"),
            ],
        ));

        let report = engine().run(&root, SharedState::new(), "task").await;

        assert!(report.is_success());
        let analysis = report.output("analysis_result").unwrap();
        assert!(analysis.get("market_data_result").is_some());
        assert!(analysis.get("news_research_result").is_some());
    }
}
