//! Unit - the atomic execution node
//!
//! A unit wraps a bounded LM decision loop plus optional tool calls.
//! It receives a read-only state view and returns its output value; the
//! owning composer applies the write, which keeps units referentially
//! transparent and directly testable.

use crate::backend::{generate_with_retry, extract_json, GenerateRequest};
use crate::engine::ExecutionContext;
use crate::error::OrchestrationError;
use crate::models::{SideEffect, ToolCallRecord, UnitResult};
use crate::state::SharedStateView;
use crate::Result;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};

/// Quality gate for loop-evaluator units.
///
/// When the unit's output carries `score_field` at or above `threshold`,
/// the unit raises the loop-termination signal with its result.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub score_field: String,
    pub threshold: f64,
}

/// Atomic execution node. Immutable after construction; no per-invocation
/// state survives between calls except through shared state.
#[derive(Debug, Clone)]
pub struct Unit {
    name: String,
    instruction: String,
    input_keys: Vec<String>,
    output_key: String,
    tools: Vec<String>,
    llm: bool,
    max_rounds: u32,
    gate: Option<QualityGate>,
}

impl Unit {
    pub fn new(name: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: String::new(),
            input_keys: Vec::new(),
            output_key: output_key.into(),
            tools: Vec::new(),
            llm: true,
            max_rounds: 8,
            gate: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_input_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Disable the LM backend: the unit invokes its bound tools directly.
    pub fn tool_only(mut self) -> Self {
        self.llm = false;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_quality_gate(mut self, score_field: impl Into<String>, threshold: f64) -> Self {
        self.gate = Some(QualityGate {
            score_field: score_field.into(),
            threshold,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    pub fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn uses_llm(&self) -> bool {
        self.llm
    }

    /// Run the unit against a state snapshot.
    pub async fn execute(&self, ctx: &ExecutionContext, view: &SharedStateView, task: &str) -> Result<UnitResult> {
        let started = Instant::now();
        ctx.metrics.increment("unit.invocations");

        let result = if self.llm {
            self.execute_llm(ctx, view, task).await
        } else {
            self.execute_tools(ctx, view).await
        };

        ctx.metrics
            .observe_ms("unit.latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Bounded decision loop: ask the backend, run the requested tool,
    /// feed the observation back, repeat until a final answer.
    async fn execute_llm(
        &self,
        ctx: &ExecutionContext,
        view: &SharedStateView,
        task: &str,
    ) -> Result<UnitResult> {
        let mut observations: Vec<Value> = Vec::new();
        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();

        for round in 0..self.max_rounds {
            if ctx.cancellation.is_cancelled() {
                return Err(OrchestrationError::Cancelled(self.name.clone()));
            }

            let request = GenerateRequest {
                unit: self.name.clone(),
                task: task.to_string(),
                instruction: self.instruction.clone(),
                inputs: view.project(&self.input_keys),
                tool_schemas: ctx.registry.schemas(&self.tools),
                observations: observations.clone(),
            };

            let response = tokio::select! {
                _ = ctx.cancellation.cancelled() => {
                    return Err(OrchestrationError::Cancelled(self.name.clone()));
                }
                response = generate_with_retry(
                    ctx.backend.as_ref(),
                    &request,
                    ctx.config.backend_retries,
                ) => response?,
            };
            ctx.metrics.increment("backend.calls");

            let Some(call) = response.tool_call else {
                let output_value =
                    extract_json(&response.text).unwrap_or(Value::String(response.text));
                let escalate = self.gate_passes(&output_value);
                debug!(unit = %self.name, round, escalate, "Unit produced final answer");
                return Ok(UnitResult {
                    output_key: self.output_key.clone(),
                    output_value,
                    escalate,
                    tool_calls,
                });
            };

            // Re-validate the requested tool against the bindings each round.
            if !self.tools.iter().any(|t| t == &call.name) {
                warn!(unit = %self.name, tool = %call.name, "Backend requested unbound tool");
                observations.push(json!({
                    "tool": call.name,
                    "error": "tool is not available to this unit",
                }));
                continue;
            }

            match self.invoke_tool(ctx, &call.name, &call.arguments, &mut tool_calls).await {
                Ok(data) => observations.push(json!({
                    "tool": call.name,
                    "result": data,
                })),
                Err(e) => observations.push(json!({
                    "tool": call.name,
                    "error": e.to_string(),
                })),
            }
        }

        Err(OrchestrationError::Incomplete {
            unit: self.name.clone(),
            rounds: self.max_rounds,
        })
    }

    /// Pure-tool path: invoke every bound tool once with the input
    /// projection as arguments.
    async fn execute_tools(&self, ctx: &ExecutionContext, view: &SharedStateView) -> Result<UnitResult> {
        let arguments = Value::Object(view.project(&self.input_keys));
        let mut tool_calls = Vec::new();
        let mut outputs = serde_json::Map::new();

        for tool in &self.tools {
            if ctx.cancellation.is_cancelled() {
                return Err(OrchestrationError::Cancelled(self.name.clone()));
            }
            let data = self
                .invoke_tool(ctx, tool, &arguments, &mut tool_calls)
                .await?;
            outputs.insert(tool.clone(), data);
        }

        let output_value = if outputs.len() == 1 {
            outputs
                .into_iter()
                .next()
                .map(|(_, v)| v)
                .unwrap_or(Value::Null)
        } else {
            Value::Object(outputs)
        };

        let escalate = self.gate_passes(&output_value);
        Ok(UnitResult {
            output_key: self.output_key.clone(),
            output_value,
            escalate,
            tool_calls,
        })
    }

    /// Invoke one tool through the registry, retrying read-only failures.
    async fn invoke_tool(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        arguments: &Value,
        tool_calls: &mut Vec<ToolCallRecord>,
    ) -> Result<Value> {
        let retries = match ctx.registry.side_effect(name) {
            Some(SideEffect::ReadOnly) => ctx.config.tool_retries,
            _ => 0,
        };

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = tokio::select! {
                _ = ctx.cancellation.cancelled() => {
                    return Err(OrchestrationError::Cancelled(self.name.clone()));
                }
                result = ctx.registry.invoke(name, arguments) => result,
            };
            let duration_ms = started.elapsed().as_millis() as u64;
            ctx.metrics.increment("tool.calls");

            match result {
                Ok(output) => {
                    tool_calls.push(ToolCallRecord {
                        tool_name: name.to_string(),
                        arguments: arguments.clone(),
                        success: true,
                        error: None,
                        duration_ms,
                    });
                    return Ok(output.data);
                }
                Err(e) => {
                    tool_calls.push(ToolCallRecord {
                        tool_name: name.to_string(),
                        arguments: arguments.clone(),
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                    ctx.metrics.increment("tool.errors");

                    let retryable =
                        matches!(e, OrchestrationError::ToolExecution { .. }) && attempt < retries;
                    if retryable {
                        attempt += 1;
                        warn!(unit = %self.name, tool = name, attempt, "Retrying read-only tool");
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn gate_passes(&self, output: &Value) -> bool {
        let Some(gate) = &self.gate else {
            return false;
        };
        output
            .get(&gate.score_field)
            .and_then(Value::as_f64)
            .map(|score| score >= gate.threshold)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerateResponse, ScriptedBackend};
    use crate::engine::{EngineConfig, ExecutionContext};
    use crate::observability::Metrics;
    use crate::state::SharedState;
    use crate::models::ToolOutput;
    use crate::tools::{create_default_registry, InputSchema, Tool, ToolRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context(backend: ScriptedBackend, registry: ToolRegistry) -> ExecutionContext {
        ExecutionContext {
            registry: Arc::new(registry),
            backend: Arc::new(backend),
            metrics: Metrics::new(),
            cancellation: CancellationToken::new(),
            config: EngineConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_llm_unit_tool_round_then_answer() {
        let backend = ScriptedBackend::new(vec![
            GenerateResponse::tool_call("get_stock_price", json!({"symbol": "AAPL"})),
            GenerateResponse::final_text("AAPL trades at 178.50"),
        ]);
        let ctx = context(backend, create_default_registry());

        let unit = Unit::new("market_data_researcher", "market_data_result")
            .with_instruction("You are a market data specialist.")
            .with_tools(["get_stock_price"]);

        let state = SharedState::new();
        let result = unit
            .execute(&ctx, &state.snapshot(), "What is AAPL at?")
            .await
            .unwrap();

        assert_eq!(result.output_key, "market_data_result");
        assert_eq!(result.output_value, json!("AAPL trades at 178.50"));
        assert_eq!(result.tool_calls.len(), 1);
        assert!(result.tool_calls[0].success);
        assert_eq!(ctx.metrics.counter("tool.calls"), 1);
    }

    #[tokio::test]
    async fn test_round_exhaustion_is_incomplete() {
        // Backend that always asks for another tool call.
        let backend = ScriptedBackend::new(vec![
            GenerateResponse::tool_call("get_market_summary", json!({}));
            4
        ]);
        let ctx = context(backend, create_default_registry());

        let unit = Unit::new("restless", "out")
            .with_tools(["get_market_summary"])
            .with_max_rounds(3);

        let state = SharedState::new();
        let err = unit
            .execute(&ctx, &state.snapshot(), "task")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestrationError::Incomplete { rounds: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_unbound_tool_request_is_fed_back() {
        let backend = ScriptedBackend::new(vec![
            GenerateResponse::tool_call("calculate_var", json!({})),
            GenerateResponse::final_text("done without it"),
        ]);
        let ctx = context(backend, create_default_registry());

        let unit = Unit::new("restricted", "out").with_tools(["get_stock_price"]);

        let state = SharedState::new();
        let result = unit
            .execute(&ctx, &state.snapshot(), "task")
            .await
            .unwrap();

        // The unbound call never reached the registry.
        assert!(result.tool_calls.is_empty());
        assert_eq!(result.output_value, json!("done without it"));
    }

    #[tokio::test]
    async fn test_quality_gate_escalates() {
        let backend = ScriptedBackend::new(vec![GenerateResponse::final_text(
            "{\"score\": 9, \"verdict\": \"ship it\"}",
        )]);
        let ctx = context(backend, create_default_registry());

        let unit = Unit::new("critic", "recommendation_criticism")
            .with_quality_gate("score", 8.0);

        let state = SharedState::new();
        let result = unit
            .execute(&ctx, &state.snapshot(), "evaluate")
            .await
            .unwrap();

        assert!(result.escalate);
        assert_eq!(result.output_value["score"], json!(9));
    }

    #[tokio::test]
    async fn test_quality_gate_below_threshold() {
        let backend =
            ScriptedBackend::new(vec![GenerateResponse::final_text("{\"score\": 5}")]);
        let ctx = context(backend, create_default_registry());

        let unit = Unit::new("critic", "recommendation_criticism")
            .with_quality_gate("score", 8.0);

        let state = SharedState::new();
        let result = unit
            .execute(&ctx, &state.snapshot(), "evaluate")
            .await
            .unwrap();

        assert!(!result.escalate);
    }

    struct FlakyTool {
        failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &'static str {
            "flaky_quote"
        }

        fn description(&self) -> &'static str {
            "Fails a few times, then succeeds"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::default()
        }

        async fn execute(&self, _arguments: &Value) -> crate::Result<ToolOutput> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                Err(OrchestrationError::ToolExecution {
                    tool: "flaky_quote".into(),
                    message: "upstream hiccup".into(),
                })
            } else {
                Ok(ToolOutput {
                    success: true,
                    data: json!({"price": 42.0}),
                    error: None,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_read_only_tool_is_retried() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FlakyTool {
            failures: AtomicUsize::new(2),
        }));
        let ctx = context(ScriptedBackend::always("unused"), registry);

        let unit = Unit::new("fetcher", "quote")
            .with_tools(["flaky_quote"])
            .tool_only();

        let state = SharedState::new();
        let result = unit
            .execute(&ctx, &state.snapshot(), "fetch")
            .await
            .unwrap();

        assert_eq!(result.output_value, json!({"price": 42.0}));
        // Two failed attempts recorded, then the success.
        assert_eq!(result.tool_calls.len(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_wait() {
        let ctx = context(ScriptedBackend::always("never"), create_default_registry());
        ctx.cancellation.cancel();

        let unit = Unit::new("doomed", "out");
        let state = SharedState::new();
        let err = unit
            .execute(&ctx, &state.snapshot(), "task")
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::Cancelled(_)));
    }
}
