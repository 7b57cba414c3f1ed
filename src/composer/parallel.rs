//! Parallel composer
//!
//! Runs children concurrently against the same immutable snapshot taken at
//! composer entry, then merges their declared output keys write-once after
//! all of them finish. Sibling output keys must be disjoint; that is
//! checked at construction, not at runtime.

use crate::composer::Node;
use crate::engine::ExecutionContext;
use crate::error::OrchestrationError;
use crate::state::SharedState;
use crate::trace::{ExecutionTrace, NodeOutcome, TraceRecord};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Failure policy for one parallel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPolicy {
    /// Failed children leave their output keys absent; siblings still merge.
    BestEffort,
    /// The first failure cancels in-flight siblings and propagates.
    FailTogether,
}

#[derive(Debug, Clone)]
pub struct ParallelComposer {
    pub(crate) name: String,
    pub(crate) children: Vec<Arc<Node>>,
    pub(crate) policy: Option<ParallelPolicy>,
    pub(crate) timeout: Option<Duration>,
}

impl ParallelComposer {
    /// Build a parallel group, rejecting output-key collisions up front.
    pub fn new<I>(name: impl Into<String>, children: I) -> Result<Self>
    where
        I: IntoIterator<Item = Node>,
    {
        let name = name.into();
        let children: Vec<Arc<Node>> = children.into_iter().map(Arc::new).collect();

        let mut seen = HashSet::new();
        for child in &children {
            for key in child.output_keys() {
                if !seen.insert(key.clone()) {
                    return Err(OrchestrationError::DuplicateOutputKey { group: name, key });
                }
            }
        }

        Ok(Self {
            name,
            children,
            policy: None,
            timeout: None,
        })
    }

    pub fn with_policy(mut self, policy: ParallelPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) async fn execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut SharedState,
        trace: &mut ExecutionTrace,
        task: &str,
    ) -> Result<()> {
        let started_at = Utc::now();
        let policy = self.policy.unwrap_or(ctx.config.parallel_policy);
        let timeout = self.timeout.unwrap_or(ctx.config.parallel_timeout);

        debug!(
            composer = %self.name,
            children = self.children.len(),
            ?policy,
            "Parallel: starting"
        );

        // Every child reads this snapshot; no child sees another's writes.
        let snapshot = state.clone();
        let sibling_token = ctx.cancellation.child_token();
        let child_ctx = ctx.with_cancellation(sibling_token.clone());

        let mut join_set = JoinSet::new();
        for (index, child) in self.children.iter().enumerate() {
            let child = Arc::clone(child);
            let ctx = child_ctx.clone();
            let task = task.to_string();
            let base = snapshot.clone();
            let run_id = trace.run_id;

            join_set.spawn(async move {
                let mut scratch = base;
                let mut sub_trace = ExecutionTrace::new(run_id);
                let child_started = Utc::now();

                let result = match tokio::time::timeout(
                    timeout,
                    child.execute(&ctx, &mut scratch, &mut sub_trace, &task),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        let error = OrchestrationError::Timeout(child.name().to_string());
                        sub_trace.push(TraceRecord {
                            node: child.name().to_string(),
                            started_at: child_started,
                            finished_at: Utc::now(),
                            outcome: NodeOutcome::Failure(error.to_string()),
                            tool_calls: Vec::new(),
                        });
                        Err(error)
                    }
                };

                (index, scratch, sub_trace, result)
            });
        }

        let mut slots: Vec<Option<(SharedState, ExecutionTrace, Result<()>)>> =
            self.children.iter().map(|_| None).collect();
        let mut first_failure: Option<OrchestrationError> = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, scratch, sub_trace, result)) => {
                    if result.is_err() {
                        if policy == ParallelPolicy::FailTogether && first_failure.is_none() {
                            warn!(composer = %self.name, "Parallel: cancelling siblings");
                            sibling_token.cancel();
                        }
                    }
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some((scratch, sub_trace, result));
                    }
                }
                Err(join_error) => {
                    let error = OrchestrationError::Unknown(format!(
                        "parallel child task failed: {}",
                        join_error
                    ));
                    if policy == ParallelPolicy::FailTogether && first_failure.is_none() {
                        sibling_token.cancel();
                        first_failure = Some(error);
                    } else {
                        warn!(composer = %self.name, "Parallel: {}", error);
                    }
                }
            }
        }

        // Deterministic merge in declaration order, write-once per key.
        for (child, slot) in self.children.iter().zip(slots.into_iter()) {
            let Some((scratch, sub_trace, result)) = slot else {
                continue;
            };
            trace.absorb(sub_trace);

            for key in child.output_keys() {
                if let Some(value) = scratch.get(&key) {
                    state.set(key, value.clone());
                }
            }

            if let Err(e) = result {
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }

        match (policy, first_failure) {
            (ParallelPolicy::FailTogether, Some(error)) => {
                trace.push(TraceRecord {
                    node: self.name.clone(),
                    started_at,
                    finished_at: Utc::now(),
                    outcome: NodeOutcome::Failure(error.to_string()),
                    tool_calls: Vec::new(),
                });
                Err(error)
            }
            _ => {
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::testing::{echo_unit, failing_unit, test_context, EchoTool};
    use crate::unit::Unit;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_key_collision_fails_at_construction() {
        let err = ParallelComposer::new(
            "research",
            vec![echo_unit("a", &[], "same_key"), echo_unit("b", &[], "same_key")],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            OrchestrationError::DuplicateOutputKey { ref key, .. } if key == "same_key"
        ));
    }

    #[tokio::test]
    async fn test_children_read_the_entry_snapshot() {
        let ctx = test_context();
        // Both children echo the "counter" key; A also writes its own key,
        // which B must never observe.
        let composer = ParallelComposer::new(
            "isolation",
            vec![
                echo_unit("a", &["counter"], "ka"),
                echo_unit("b", &["counter", "ka"], "kb"),
            ],
        );
        // Construction rejects b reading ka; build the honest variant.
        assert!(composer.is_err());

        let composer = ParallelComposer::new(
            "isolation",
            vec![
                echo_unit("a", &["counter"], "ka"),
                echo_unit("b", &["counter"], "kb"),
            ],
        )
        .unwrap();

        let mut state = SharedState::new();
        state.set("counter", json!(1));
        let mut trace = ExecutionTrace::new(Uuid::new_v4());

        composer
            .execute(&ctx, &mut state, &mut trace, "task")
            .await
            .unwrap();

        // Both saw the identical pre-execution snapshot.
        assert_eq!(state.get("ka"), Some(&json!({"counter": 1})));
        assert_eq!(state.get("kb"), Some(&json!({"counter": 1})));
    }

    #[tokio::test]
    async fn test_best_effort_merges_surviving_siblings() {
        let ctx = test_context();
        let composer = ParallelComposer::new(
            "research",
            vec![
                echo_unit("a", &[], "ka"),
                failing_unit("b", "kb"),
                echo_unit("c", &[], "kc"),
            ],
        )
        .unwrap()
        .with_policy(ParallelPolicy::BestEffort);

        let mut state = SharedState::new();
        let mut trace = ExecutionTrace::new(Uuid::new_v4());

        composer
            .execute(&ctx, &mut state, &mut trace, "task")
            .await
            .unwrap();

        assert!(state.contains("ka"));
        assert!(state.contains("kc"));
        assert!(!state.contains("kb"));
        assert_eq!(trace.first_failure().map(|r| r.node.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn test_fail_together_propagates() {
        let ctx = test_context();
        let composer = ParallelComposer::new(
            "research",
            vec![echo_unit("a", &[], "ka"), failing_unit("b", "kb")],
        )
        .unwrap()
        .with_policy(ParallelPolicy::FailTogether);

        let mut state = SharedState::new();
        let mut trace = ExecutionTrace::new(Uuid::new_v4());

        let err = composer
            .execute(&ctx, &mut state, &mut trace, "task")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_timeout_marks_slow_child_failed() {
        struct SlowTool;

        #[async_trait::async_trait]
        impl crate::tools::Tool for SlowTool {
            fn name(&self) -> &'static str {
                "slow"
            }

            fn description(&self) -> &'static str {
                "Sleeps past the composer timeout"
            }

            fn input_schema(&self) -> crate::tools::InputSchema {
                crate::tools::InputSchema::default()
            }

            async fn execute(
                &self,
                _arguments: &serde_json::Value,
            ) -> crate::Result<crate::models::ToolOutput> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(crate::models::ToolOutput {
                    success: true,
                    data: json!({}),
                    error: None,
                })
            }
        }

        let mut ctx = test_context();
        let mut registry = crate::tools::ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(SlowTool));
        ctx.registry = Arc::new(registry);

        let slow = Node::Unit(Unit::new("slow", "ks").with_tools(["slow"]).tool_only());
        let composer = ParallelComposer::new(
            "research",
            vec![echo_unit("a", &[], "ka"), slow],
        )
        .unwrap()
        .with_timeout(Duration::from_millis(50));

        let mut state = SharedState::new();
        let mut trace = ExecutionTrace::new(Uuid::new_v4());

        composer
            .execute(&ctx, &mut state, &mut trace, "task")
            .await
            .unwrap();

        // Completed sibling merged; the slow child's key is absent and its
        // failure is on the trace.
        assert!(state.contains("ka"));
        assert!(!state.contains("ks"));
        let failure = trace.first_failure().unwrap();
        assert_eq!(failure.node, "slow");
    }
}
