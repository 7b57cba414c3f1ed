//! Sequential composer
//!
//! Runs children in list order; child i+1 observes every write of
//! children 0..i. The first failure aborts the remainder, keeping the
//! partial state accumulated so far (fail-fast with partial results).

use crate::composer::Node;
use crate::engine::ExecutionContext;
use crate::state::SharedState;
use crate::trace::{ExecutionTrace, NodeOutcome, TraceRecord};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SequentialComposer {
    pub(crate) name: String,
    pub(crate) children: Vec<Arc<Node>>,
}

impl SequentialComposer {
    pub fn new<I>(name: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = Node>,
    {
        Self {
            name: name.into(),
            children: children.into_iter().map(Arc::new).collect(),
        }
    }

    pub(crate) async fn execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut SharedState,
        trace: &mut ExecutionTrace,
        task: &str,
    ) -> Result<()> {
        let started_at = Utc::now();
        debug!(composer = %self.name, children = self.children.len(), "Sequential: starting");

        for child in &self.children {
            if let Err(e) = child.execute(ctx, state, trace, task).await {
                trace.push(TraceRecord {
                    node: self.name.clone(),
                    started_at,
                    finished_at: Utc::now(),
                    outcome: NodeOutcome::Failure(format!(
                        "child '{}' failed: {}",
                        child.name(),
                        e
                    )),
                    tool_calls: Vec::new(),
                });
                return Err(e);
            }
        }

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
