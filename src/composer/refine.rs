//! Loop composer
//!
//! Runs its children as one sequential iteration, then checks the
//! iteration's trace window for the termination signal raised by an
//! evaluator child. Stops on approval or when the iteration cap is
//! reached; the capped case keeps the last iteration's output (best
//! attempt after N tries is the contract, not failure).

use crate::composer::Node;
use crate::engine::ExecutionContext;
use crate::error::OrchestrationError;
use crate::state::SharedState;
use crate::trace::{ExecutionTrace, NodeOutcome, TraceRecord};
use crate::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

pub const LOOP_PHASE_RUNNING: &str = "running";
pub const LOOP_PHASE_APPROVED: &str = "approved";
pub const LOOP_PHASE_EXHAUSTED: &str = "exhausted";

#[derive(Debug, Clone)]
pub struct LoopComposer {
    pub(crate) name: String,
    pub(crate) children: Vec<Arc<Node>>,
    pub(crate) max_iterations: u32,
}

impl LoopComposer {
    pub fn new<I>(name: impl Into<String>, children: I, max_iterations: u32) -> Result<Self>
    where
        I: IntoIterator<Item = Node>,
    {
        let name = name.into();
        if max_iterations == 0 {
            return Err(OrchestrationError::InvalidPipeline(format!(
                "loop '{}' must allow at least one iteration",
                name
            )));
        }

        Ok(Self {
            name,
            children: children.into_iter().map(Arc::new).collect(),
            max_iterations,
        })
    }

    /// Control key holding the terminal phase of the loop.
    pub fn phase_key(&self) -> String {
        format!("{}.phase", self.name)
    }

    /// Control key holding the number of iterations that ran.
    pub fn iterations_key(&self) -> String {
        format!("{}.iterations", self.name)
    }

    pub(crate) async fn execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut SharedState,
        trace: &mut ExecutionTrace,
        task: &str,
    ) -> Result<()> {
        let started_at = Utc::now();
        state.set(self.phase_key(), json!(LOOP_PHASE_RUNNING));

        for iteration in 1..=self.max_iterations {
            debug!(composer = %self.name, iteration, "Loop: starting iteration");
            state.set(self.iterations_key(), json!(iteration));

            // One iteration = the child list run sequentially; every write
            // of the previous iteration stays visible.
            let window = trace.len();
            for child in &self.children {
                if let Err(e) = child.execute(ctx, state, trace, task).await {
                    trace.push(TraceRecord {
                        node: self.name.clone(),
                        started_at,
                        finished_at: Utc::now(),
                        outcome: NodeOutcome::Failure(format!(
                            "iteration {} child '{}' failed: {}",
                            iteration,
                            child.name(),
                            e
                        )),
                        tool_calls: Vec::new(),
                    });
                    return Err(e);
                }
            }

            if trace.escalated_since(window) {
                info!(composer = %self.name, iteration, "Loop: approved");
                state.set(self.phase_key(), json!(LOOP_PHASE_APPROVED));
                trace.push(TraceRecord {
                    node: self.name.clone(),
                    started_at,
                    finished_at: Utc::now(),
                    outcome: NodeOutcome::Success,
                    tool_calls: Vec::new(),
                });
                return Ok(());
            }
        }

        info!(
            composer = %self.name,
            max_iterations = self.max_iterations,
            "Loop: iteration cap reached, keeping last attempt"
        );
        state.set(self.phase_key(), json!(LOOP_PHASE_EXHAUSTED));
        trace.push(TraceRecord {
            node: self.name.clone(),
            started_at,
            finished_at: Utc::now(),
            outcome: NodeOutcome::Success,
            tool_calls: Vec::new(),
        });
        Ok(())
    }
}
