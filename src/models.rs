//! Core data models shared across the orchestration core

use serde::{Deserialize, Serialize};
use serde_json::Value;

//
// ================= Tool I/O =================
//

/// Side-effect classification, consumed by the retry policy.
///
/// Read-only invocations are safe to retry transparently; destructive ones
/// are never retried without explicit confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SideEffect {
    ReadOnly,
    Destructive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
}

/// One tool invocation as recorded in the execution trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

//
// ================= Unit Result =================
//

/// What a unit hands back to its owning composer.
///
/// The unit never writes shared state itself; the composer applies
/// `output_value` to the unit's declared output key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    pub output_key: String,
    pub output_value: Value,
    /// Termination signal for an enclosing loop ("this result is accepted").
    pub escalate: bool,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl UnitResult {
    pub fn new(output_key: impl Into<String>, output_value: Value) -> Self {
        Self {
            output_key: output_key.into(),
            output_value,
            escalate: false,
            tool_calls: Vec::new(),
        }
    }
}

//
// ================= Run Failure =================
//

/// Top-level failure marker attached to a run report.
///
/// The engine returns this alongside partial state and the full trace
/// instead of throwing past the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    pub node: String,
    pub error: String,
}
