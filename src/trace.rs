//! Execution trace
//!
//! Ordered record of what ran during one engine invocation. Used for
//! diagnostics and by the loop composer's termination check.

use crate::models::ToolCallRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase", tag = "status", content = "reason")]
pub enum NodeOutcome {
    Success,
    Failure(String),
    /// The node raised the loop-termination signal with its result.
    Escalated,
}

impl NodeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, NodeOutcome::Failure(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: NodeOutcome,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Ordered sequence of trace records for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub run_id: Uuid,
    records: Vec<TraceRecord>,
}

impl ExecutionTrace {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: TraceRecord) {
        self.records.push(record);
    }

    /// Fold another trace's records in, preserving their order.
    ///
    /// Parallel children record into private traces that merge here after
    /// all of them finish.
    pub fn absorb(&mut self, other: ExecutionTrace) {
        self.records.extend(other.records);
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records appended at or after the given index.
    pub fn since(&self, index: usize) -> &[TraceRecord] {
        &self.records[index.min(self.records.len())..]
    }

    /// Whether any record in the given window carries the termination signal.
    pub fn escalated_since(&self, index: usize) -> bool {
        self.since(index)
            .iter()
            .any(|r| r.outcome == NodeOutcome::Escalated)
    }

    /// Name of the first failing node, if any.
    pub fn first_failure(&self) -> Option<&TraceRecord> {
        self.records.iter().find(|r| r.outcome.is_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(node: &str, outcome: NodeOutcome) -> TraceRecord {
        TraceRecord {
            node: node.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome,
            tool_calls: vec![],
        }
    }

    #[test]
    fn test_escalation_window() {
        let mut trace = ExecutionTrace::new(Uuid::new_v4());
        trace.push(record("generator", NodeOutcome::Success));
        let iteration_start = trace.len();
        trace.push(record("critic", NodeOutcome::Escalated));

        assert!(trace.escalated_since(iteration_start));
        assert!(trace.escalated_since(0));
        assert!(!trace.escalated_since(trace.len()));
    }

    #[test]
    fn test_first_failure_reports_node() {
        let mut trace = ExecutionTrace::new(Uuid::new_v4());
        trace.push(record("a", NodeOutcome::Success));
        trace.push(record("b", NodeOutcome::Failure("boom".into())));
        trace.push(record("c", NodeOutcome::Failure("later".into())));

        assert_eq!(trace.first_failure().map(|r| r.node.as_str()), Some("b"));
    }

    #[test]
    fn test_absorb_preserves_order() {
        let mut outer = ExecutionTrace::new(Uuid::new_v4());
        outer.push(record("first", NodeOutcome::Success));

        let mut inner = ExecutionTrace::new(outer.run_id);
        inner.push(record("second", NodeOutcome::Success));
        inner.push(record("third", NodeOutcome::Success));

        outer.absorb(inner);

        let names: Vec<&str> = outer.records().iter().map(|r| r.node.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
