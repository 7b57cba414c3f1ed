//! Gemini backend
//!
//! Calls the Gemini API with function declarations built from the unit's
//! bound tool schemas, so the model can answer with either text or a
//! function call. Uses a long-lived reqwest::Client for connection pooling.

use crate::backend::{GenerateRequest, GenerateResponse, LanguageBackend, ToolCallRequest};
use crate::error::OrchestrationError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(&self, request: &GenerateRequest) -> GeminiRequest {
        let mut prompt = format!("Task: {}\n", request.task);
        if !request.inputs.is_empty() {
            prompt.push_str(&format!(
                "\nAvailable context:\n{}\n",
                serde_json::to_string_pretty(&request.inputs).unwrap_or_default()
            ));
        }
        for observation in &request.observations {
            prompt.push_str(&format!(
                "\nTool result:\n{}\n",
                serde_json::to_string_pretty(observation).unwrap_or_default()
            ));
        }

        let tools = if request.tool_schemas.is_empty() {
            None
        } else {
            let declarations: Vec<Value> = request
                .tool_schemas
                .iter()
                .map(|schema| {
                    json!({
                        "name": schema.get("name").cloned().unwrap_or_default(),
                        "description": schema.get("description").cloned().unwrap_or_default(),
                        "parameters": schema.get("input_schema").cloned().unwrap_or_default(),
                    })
                })
                .collect();
            Some(vec![json!({ "function_declarations": declarations })])
        };

        GeminiRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt),
                    function_call: None,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: Some(request.instruction.clone()),
                    function_call: None,
                }],
            },
            tools,
        }
    }
}

#[async_trait::async_trait]
impl LanguageBackend for GeminiBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::BackendUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = self.build_request(request);

        debug!(unit = %request.unit, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::BackendUnavailable(format!("Gemini request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(OrchestrationError::BackendUnavailable(format!(
                "Gemini returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::Llm(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response.candidates.into_iter().next().ok_or_else(|| {
            OrchestrationError::Llm("No candidates in Gemini response".to_string())
        })?;

        let mut text = String::new();
        for part in candidate.content.parts {
            if let Some(call) = part.function_call {
                return Ok(GenerateResponse {
                    text,
                    tool_call: Some(ToolCallRequest {
                        name: call.name,
                        arguments: call.args,
                    }),
                });
            }
            if let Some(part_text) = part.text {
                text.push_str(&part_text);
            }
        }

        if text.is_empty() {
            return Err(OrchestrationError::Llm(
                "Empty response from Gemini".to_string(),
            ));
        }

        Ok(GenerateResponse {
            text,
            tool_call: None,
        })
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    args: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
