//! Language-model backend
//!
//! The backend is an opaque decision function: given a task, the values of
//! a unit's declared input keys and the schemas of its bound tools, it
//! returns either a final text answer or a tool call to make next.

pub mod gemini;

pub use gemini::GeminiBackend;

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// One request to the decision function.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub unit: String,
    pub task: String,
    pub instruction: String,
    /// Values of the unit's declared input keys, present ones only.
    pub inputs: Map<String, Value>,
    /// Schemas of the unit's bound tools.
    pub tool_schemas: Vec<Value>,
    /// Tool results fed back from earlier rounds of the same invocation.
    pub observations: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Value,
}

/// The decision: final text, or a tool to call before deciding again.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub tool_call: Option<ToolCallRequest>,
}

impl GenerateResponse {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_call: None,
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            text: String::new(),
            tool_call: Some(ToolCallRequest {
                name: name.into(),
                arguments,
            }),
        }
    }
}

#[async_trait::async_trait]
pub trait LanguageBackend: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;
}

/// Retry transport failures with exponential backoff.
///
/// Only `BackendUnavailable` is retried; every other error reflects a
/// decision the backend actually made and propagates immediately.
pub async fn generate_with_retry(
    backend: &dyn LanguageBackend,
    request: &GenerateRequest,
    max_retries: u32,
) -> Result<GenerateResponse> {
    let mut attempt = 0;
    loop {
        match backend.generate(request).await {
            Ok(response) => return Ok(response),
            Err(OrchestrationError::BackendUnavailable(message)) if attempt < max_retries => {
                attempt += 1;
                let delay = Duration::from_millis(200u64 << attempt.min(6));
                warn!(
                    unit = %request.unit,
                    attempt,
                    "Backend unavailable, retrying in {:?}: {}",
                    delay,
                    message
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Deterministic backend for tests and the offline CLI demo.
///
/// Pops scripted decisions in order; once the script is exhausted every
/// call returns a canned final answer.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<GenerateResponse>>,
    fallback: String,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<GenerateResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            fallback: "Scripted response exhausted.".to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Backend that always answers with the same final text.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(text)
    }
}

#[async_trait::async_trait]
impl LanguageBackend for ScriptedBackend {
    async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResponse> {
        let mut script = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(script
            .pop_front()
            .unwrap_or_else(|| GenerateResponse::final_text(self.fallback.clone())))
    }
}

/// Try to extract a JSON object embedded in model text.
///
/// Handles a ```json fenced block first, then the widest brace-delimited
/// span. Models often wrap structured answers either way.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            if let Ok(parsed) = serde_json::from_str::<Value>(after[..end].trim()) {
                if parsed.is_object() {
                    return Some(parsed);
                }
            }
        }
    }

    let brace_start = text.find('{')?;
    let brace_end = text.rfind('}')?;
    if brace_end <= brace_start {
        return None;
    }
    serde_json::from_str::<Value>(&text[brace_start..=brace_end])
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> GenerateRequest {
        GenerateRequest {
            unit: "test".into(),
            task: "task".into(),
            instruction: "instruction".into(),
            inputs: Map::new(),
            tool_schemas: vec![],
            observations: vec![],
        }
    }

    #[tokio::test]
    async fn test_scripted_backend_pops_in_order() {
        let backend = ScriptedBackend::new(vec![
            GenerateResponse::tool_call("get_stock_price", json!({"symbol": "AAPL"})),
            GenerateResponse::final_text("done"),
        ]);

        let first = backend.generate(&request()).await.unwrap();
        assert_eq!(first.tool_call.unwrap().name, "get_stock_price");

        let second = backend.generate(&request()).await.unwrap();
        assert!(second.tool_call.is_none());
        assert_eq!(second.text, "done");

        let third = backend.generate(&request()).await.unwrap();
        assert_eq!(third.text, "Scripted response exhausted.");
    }

    struct FlakyBackend {
        failures_left: AtomicU32,
    }

    #[async_trait::async_trait]
    impl LanguageBackend for FlakyBackend {
        async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResponse> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                Err(OrchestrationError::BackendUnavailable("transient".into()))
            } else {
                Ok(GenerateResponse::final_text("recovered"))
            }
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let backend = FlakyBackend {
            failures_left: AtomicU32::new(2),
        };
        let response = generate_with_retry(&backend, &request(), 3).await.unwrap();
        assert_eq!(response.text, "recovered");
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let backend = FlakyBackend {
            failures_left: AtomicU32::new(10),
        };
        let err = generate_with_retry(&backend, &request(), 2).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::BackendUnavailable(_)));
    }

    #[test]
    fn test_extract_json_from_fence() {
        let text = "Here you go:\n```json\n{\"score\": 8}\n```\nthanks";
        assert_eq!(extract_json(text), Some(json!({"score": 8})));
    }

    #[test]
    fn test_extract_json_from_braces() {
        let text = "verdict {\"score\": 6, \"criticism\": \"too vague\"} end";
        assert_eq!(
            extract_json(text),
            Some(json!({"score": 6, "criticism": "too vague"}))
        );
        assert_eq!(extract_json("no json here"), None);
    }
}
