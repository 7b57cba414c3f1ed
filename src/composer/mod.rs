//! Structural combinators over units
//!
//! A pipeline is a tree of [`Node`]s: units at the leaves, sequential,
//! parallel and loop composers above them. Composers are pure structure;
//! all runtime state lives in [`SharedState`] and the execution trace.

pub mod parallel;
pub mod refine;
pub mod sequential;

pub use parallel::{ParallelComposer, ParallelPolicy};
pub use refine::{
    LoopComposer, LOOP_PHASE_APPROVED, LOOP_PHASE_EXHAUSTED, LOOP_PHASE_RUNNING,
};
pub use sequential::SequentialComposer;

use crate::engine::ExecutionContext;
use crate::error::OrchestrationError;
use crate::state::SharedState;
use crate::trace::{ExecutionTrace, NodeOutcome, TraceRecord};
use crate::unit::Unit;
use crate::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A node in the pipeline tree.
#[derive(Debug, Clone)]
pub enum Node {
    Unit(Unit),
    Sequential(SequentialComposer),
    Parallel(ParallelComposer),
    Loop(LoopComposer),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Unit(unit) => unit.name(),
            Node::Sequential(seq) => &seq.name,
            Node::Parallel(par) => &par.name,
            Node::Loop(lp) => &lp.name,
        }
    }

    /// All output keys this subtree may write, in declaration order.
    pub fn output_keys(&self) -> Vec<String> {
        match self {
            Node::Unit(unit) => vec![unit.output_key().to_string()],
            Node::Sequential(seq) => collect_keys(&seq.children),
            Node::Parallel(par) => collect_keys(&par.children),
            Node::Loop(lp) => {
                let mut keys = collect_keys(&lp.children);
                keys.push(lp.phase_key());
                keys.push(lp.iterations_key());
                keys
            }
        }
    }

    /// Reject any unit whose declared input key no preceding node produces.
    ///
    /// `available` starts as the initial-state keys and accumulates output
    /// keys while walking the tree. Loop bodies may read keys produced
    /// later in the same body (they exist from the second iteration on),
    /// so the body's own outputs count as available throughout.
    pub fn validate_inputs(&self, available: &mut HashSet<String>) -> Result<()> {
        match self {
            Node::Unit(unit) => {
                for key in unit.input_keys() {
                    if !available.contains(key) {
                        return Err(OrchestrationError::UnresolvedInputKey {
                            unit: unit.name().to_string(),
                            key: key.clone(),
                        });
                    }
                }
                available.insert(unit.output_key().to_string());
                Ok(())
            }
            Node::Sequential(seq) => {
                for child in &seq.children {
                    child.validate_inputs(available)?;
                }
                Ok(())
            }
            Node::Parallel(par) => {
                // Siblings see the entry snapshot, never each other.
                for child in &par.children {
                    let mut child_available = available.clone();
                    child.validate_inputs(&mut child_available)?;
                }
                for key in self.output_keys() {
                    available.insert(key);
                }
                Ok(())
            }
            Node::Loop(lp) => {
                for key in self.output_keys() {
                    available.insert(key);
                }
                for child in &lp.children {
                    child.validate_inputs(available)?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        state: &'a mut SharedState,
        trace: &'a mut ExecutionTrace,
        task: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Node::Unit(unit) => execute_unit(unit, ctx, state, trace, task).await,
                Node::Sequential(seq) => seq.execute(ctx, state, trace, task).await,
                Node::Parallel(par) => par.execute(ctx, state, trace, task).await,
                Node::Loop(lp) => lp.execute(ctx, state, trace, task).await,
            }
        })
    }
}

fn collect_keys(children: &[Arc<Node>]) -> Vec<String> {
    children
        .iter()
        .flat_map(|child| child.output_keys())
        .collect()
}

/// Run a unit and apply its write; the unit itself never touches state.
async fn execute_unit(
    unit: &Unit,
    ctx: &ExecutionContext,
    state: &mut SharedState,
    trace: &mut ExecutionTrace,
    task: &str,
) -> Result<()> {
    let started_at = Utc::now();
    let view = state.snapshot();

    match unit.execute(ctx, &view, task).await {
        Ok(result) => {
            state.set(result.output_key.clone(), result.output_value.clone());
            trace.push(TraceRecord {
                node: unit.name().to_string(),
                started_at,
                finished_at: Utc::now(),
                outcome: if result.escalate {
                    NodeOutcome::Escalated
                } else {
                    NodeOutcome::Success
                },
                tool_calls: result.tool_calls,
            });
            Ok(())
        }
        Err(e) => {
            trace.push(TraceRecord {
                node: unit.name().to_string(),
                started_at,
                finished_at: Utc::now(),
                outcome: NodeOutcome::Failure(e.to_string()),
                tool_calls: Vec::new(),
            });
            Err(e)
        }
    }
}

impl From<Unit> for Node {
    fn from(unit: Unit) -> Self {
        Node::Unit(unit)
    }
}

impl From<SequentialComposer> for Node {
    fn from(composer: SequentialComposer) -> Self {
        Node::Sequential(composer)
    }
}

impl From<ParallelComposer> for Node {
    fn from(composer: ParallelComposer) -> Self {
        Node::Parallel(composer)
    }
}

impl From<LoopComposer> for Node {
    fn from(composer: LoopComposer) -> Self {
        Node::Loop(composer)
    }
}

/// Shared fixtures for composer and engine tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::engine::{EngineConfig, ExecutionContext};
    use crate::models::{SideEffect, ToolOutput};
    use crate::observability::Metrics;
    use crate::tools::{InputSchema, Tool, ToolRegistry};
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    /// Echoes its arguments back as data.
    pub(crate) struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Returns its arguments unchanged"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::default()
        }

        async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
            Ok(ToolOutput {
                success: true,
                data: arguments.clone(),
                error: None,
            })
        }
    }

    /// Always fails; destructive so the retry policy leaves it alone.
    pub(crate) struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        fn description(&self) -> &'static str {
            "Fails unconditionally"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::default()
        }

        fn side_effect(&self) -> SideEffect {
            SideEffect::Destructive
        }

        async fn execute(&self, _arguments: &Value) -> Result<ToolOutput> {
            Err(OrchestrationError::ToolExecution {
                tool: "always_fails".into(),
                message: "broken".into(),
            })
        }
    }

    pub(crate) fn test_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailingTool));
        registry
    }

    pub(crate) fn test_context() -> ExecutionContext {
        ExecutionContext {
            registry: Arc::new(test_registry()),
            backend: Arc::new(ScriptedBackend::always("unused")),
            metrics: Metrics::new(),
            cancellation: CancellationToken::new(),
            config: EngineConfig::default(),
        }
    }

    pub(crate) fn echo_unit(name: &str, inputs: &[&str], output: &str) -> Node {
        Node::Unit(
            Unit::new(name, output)
                .with_input_keys(inputs.iter().copied())
                .with_tools(["echo"])
                .tool_only(),
        )
    }

    pub(crate) fn failing_unit(name: &str, output: &str) -> Node {
        Node::Unit(
            Unit::new(name, output)
                .with_tools(["always_fails"])
                .tool_only(),
        )
    }
}
