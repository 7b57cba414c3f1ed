//! Error types for the advisor orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Execution Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tool execution error in '{tool}': {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Unit '{unit}' exhausted {rounds} decision rounds without a final answer")]
    Incomplete { unit: String, rounds: u32 },

    #[error("Node '{0}' exceeded its time budget")]
    Timeout(String),

    #[error("Execution cancelled while waiting on '{0}'")]
    Cancelled(String),

    // =============================
    // Construction Errors
    // =============================

    #[error("Parallel group '{group}' declares output key '{key}' more than once")]
    DuplicateOutputKey { group: String, key: String },

    #[error("Unit '{unit}' is bound to unknown tool '{tool}'")]
    UnknownTool { unit: String, tool: String },

    #[error("Unit '{unit}' reads key '{key}' which no preceding node produces")]
    UnresolvedInputKey { unit: String, key: String },

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    // =============================
    // Peripheral Errors
    // =============================

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Whether the unit-level retry policy may transparently retry this error.
    ///
    /// Only backend transport failures and tool failures qualify; for tool
    /// failures the caller additionally checks the side-effect class.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestrationError::BackendUnavailable(_) | OrchestrationError::ToolExecution { .. }
        )
    }
}
