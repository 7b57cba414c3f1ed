//! Tool trait and registry
//!
//! Tools are deterministic, side-effect-classified operations with a
//! declared input schema. The registry validates arguments against the
//! schema before the handler ever runs.

pub mod calculation;
pub mod market;
pub mod portfolio;
pub mod risk;

use crate::error::OrchestrationError;
use crate::models::{SideEffect, ToolOutput};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

//
// ================= Input Schema =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
        }
    }
}

/// One declared input field with optional numeric bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            minimum: None,
            exclusive_minimum: None,
            maximum: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Object)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn min(mut self, value: f64) -> Self {
        self.minimum = Some(value);
        self
    }

    pub fn above(mut self, value: f64) -> Self {
        self.exclusive_minimum = Some(value);
        self
    }

    pub fn max(mut self, value: f64) -> Self {
        self.maximum = Some(value);
        self
    }
}

/// Declarative input schema for a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSchema {
    pub fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Validate arguments, failing before any handler runs.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let Some(object) = arguments.as_object() else {
            return Err(OrchestrationError::Validation(
                "arguments must be a JSON object".to_string(),
            ));
        };

        for field in &self.fields {
            let Some(value) = object.get(&field.name) else {
                if field.required {
                    return Err(OrchestrationError::Validation(format!(
                        "missing required field '{}'",
                        field.name
                    )));
                }
                continue;
            };

            if !field.kind.matches(value) {
                return Err(OrchestrationError::Validation(format!(
                    "field '{}' must be of type {}",
                    field.name,
                    field.kind.label()
                )));
            }

            if let Some(number) = value.as_f64() {
                if let Some(min) = field.minimum {
                    if number < min {
                        return Err(OrchestrationError::Validation(format!(
                            "field '{}' must be >= {}",
                            field.name, min
                        )));
                    }
                }
                if let Some(min) = field.exclusive_minimum {
                    if number <= min {
                        return Err(OrchestrationError::Validation(format!(
                            "field '{}' must be > {}",
                            field.name, min
                        )));
                    }
                }
                if let Some(max) = field.maximum {
                    if number > max {
                        return Err(OrchestrationError::Validation(format!(
                            "field '{}' must be <= {}",
                            field.name, max
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// JSON description handed to the LM backend and the RPC surface.
    pub fn describe(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            let mut spec = serde_json::Map::new();
            spec.insert("type".to_string(), json!(field.kind.label()));
            if let Some(min) = field.minimum {
                spec.insert("minimum".to_string(), json!(min));
            }
            if let Some(min) = field.exclusive_minimum {
                spec.insert("exclusiveMinimum".to_string(), json!(min));
            }
            if let Some(max) = field.maximum {
                spec.insert("maximum".to_string(), json!(max));
            }
            properties.insert(field.name.clone(), Value::Object(spec));
            if field.required {
                required.push(field.name.clone());
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

//
// ================= Tool Trait =================
//

/// Trait for a single tool (deterministic execution)
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> InputSchema;

    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadOnly
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput>;
}

//
// ================= Registry =================
//

/// Validated catalog of tools. Immutable after construction and safe for
/// concurrent invocation.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn side_effect(&self, name: &str) -> Option<SideEffect> {
        self.tools.get(name).map(|t| t.side_effect())
    }

    /// Schema descriptions for a subset of tools, for prompt assembly.
    pub fn schemas(&self, names: &[String]) -> Vec<Value> {
        names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "input_schema": tool.input_schema().describe(),
                })
            })
            .collect()
    }

    /// Validate arguments against the tool's schema, then dispatch.
    ///
    /// Schema mismatch fails without calling the handler.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> Result<ToolOutput> {
        let tool = self.get(name).ok_or_else(|| {
            OrchestrationError::Validation(format!("tool '{}' is not registered", name))
        })?;

        tool.input_schema().validate(arguments).map_err(|e| match e {
            OrchestrationError::Validation(msg) => {
                OrchestrationError::Validation(format!("{}: {}", name, msg))
            }
            other => other,
        })?;

        let output = tool.execute(arguments).await?;
        if !output.success {
            return Err(OrchestrationError::ToolExecution {
                tool: name.to_string(),
                message: output
                    .error
                    .unwrap_or_else(|| "handler returned a failure payload".to_string()),
            });
        }
        Ok(output)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the default registry with all financial tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Market tools
    registry.register(Arc::new(market::GetStockPriceTool));
    registry.register(Arc::new(market::GetMarketSummaryTool));
    registry.register(Arc::new(market::GetStockHistoryTool));
    registry.register(Arc::new(market::SearchMarketNewsTool));

    // Portfolio tools
    registry.register(Arc::new(portfolio::AnalyzePortfolioTool));
    registry.register(Arc::new(portfolio::CalculatePortfolioMetricsTool));
    registry.register(Arc::new(portfolio::SuggestRebalancingTool));

    // Risk tools
    registry.register(Arc::new(risk::CalculateVarTool));
    registry.register(Arc::new(risk::AssessRiskProfileTool));
    registry.register(Arc::new(risk::RunStressTestTool));

    // Calculation tools
    registry.register(Arc::new(calculation::CompoundInterestTool));
    registry.register(Arc::new(calculation::RoiTool));
    registry.register(Arc::new(calculation::SharpeRatioTool));
    registry.register(Arc::new(calculation::DiversificationScoreTool));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingTool {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn description(&self) -> &'static str {
            "Counts invocations"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::new(vec![FieldSpec::number("amount").above(0.0)])
        }

        async fn execute(&self, _arguments: &Value) -> Result<ToolOutput> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(ToolOutput {
                success: true,
                data: json!({}),
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn test_invoke_rejects_before_handler() {
        let tool = Arc::new(CountingTool {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone());

        let err = registry
            .invoke("counting", &json!({"amount": -5.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
        assert_eq!(tool.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        registry
            .invoke("counting", &json!({"amount": 5.0}))
            .await
            .unwrap();
        assert_eq!(tool.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("missing", &json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
    }

    #[test]
    fn test_schema_validation() {
        let schema = InputSchema::new(vec![
            FieldSpec::string("symbol"),
            FieldSpec::integer("days").optional().min(1.0).max(365.0),
        ]);

        assert!(schema.validate(&json!({"symbol": "AAPL"})).is_ok());
        assert!(schema.validate(&json!({"symbol": "AAPL", "days": 30})).is_ok());
        assert!(schema.validate(&json!({})).is_err());
        assert!(schema.validate(&json!({"symbol": 42})).is_err());
        assert!(schema.validate(&json!({"symbol": "AAPL", "days": 0})).is_err());
        assert!(schema.validate(&json!("not an object")).is_err());
    }

    #[test]
    fn test_schema_description_lists_required() {
        let schema = InputSchema::new(vec![
            FieldSpec::number("portfolio_value").above(0.0),
            FieldSpec::object("holdings"),
            FieldSpec::number("confidence_level").optional(),
        ]);

        let described = schema.describe();
        let required = described["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
        assert_eq!(described["properties"]["portfolio_value"]["exclusiveMinimum"], json!(0.0));
    }

    #[test]
    fn test_default_registry_contents() {
        let registry = create_default_registry();
        assert!(registry.contains("get_stock_price"));
        assert!(registry.contains("calculate_var"));
        assert!(registry.contains("suggest_rebalancing"));
        assert!(registry.contains("calculate_sharpe_ratio"));
        assert_eq!(registry.list().len(), 14);
        assert_eq!(
            registry.side_effect("get_stock_price"),
            Some(SideEffect::ReadOnly)
        );
    }
}
