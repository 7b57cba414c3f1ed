//! Environment-driven configuration

use crate::composer::ParallelPolicy;
use crate::engine::EngineConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub model: String,
    pub gemini_api_key: String,
    pub api_port: u16,
    /// Cap for the recommendation refinement loop.
    pub max_loop_iterations: u32,
    /// Time budget for each parallel research child.
    pub parallel_timeout_secs: u64,
    /// Decision-round cap per unit invocation.
    pub unit_max_rounds: u32,
    pub backend_retries: u32,
    pub tool_retries: u32,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            app_name: env::var("APP_NAME").unwrap_or_else(|_| "financial_advisor".to_string()),
            model: env::var("DEFAULT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            gemini_api_key: env::var("GEMINI_API_KEY")
                .or_else(|_| env::var("GOOGLE_API_KEY"))
                .unwrap_or_default(),
            api_port: env_or("PORT", 8080),
            max_loop_iterations: env_or("MAX_LOOP_ITERATIONS", 3),
            parallel_timeout_secs: env_or("PARALLEL_TIMEOUT_SECONDS", 30),
            unit_max_rounds: env_or("UNIT_MAX_ROUNDS", 8),
            backend_retries: env_or("BACKEND_RETRIES", 2),
            tool_retries: env_or("TOOL_RETRIES", 2),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            backend_retries: self.backend_retries,
            tool_retries: self.tool_retries,
            parallel_policy: ParallelPolicy::BestEffort,
            parallel_timeout: Duration::from_secs(self.parallel_timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "financial_advisor".to_string(),
            model: "gemini-2.0-flash".to_string(),
            gemini_api_key: String::new(),
            api_port: 8080,
            max_loop_iterations: 3,
            parallel_timeout_secs: 30,
            unit_max_rounds: 8,
            backend_retries: 2,
            tool_retries: 2,
        }
    }
}
