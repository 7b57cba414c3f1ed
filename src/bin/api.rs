use financial_advisor_orchestrator::{
    api::{start_server, ApiState},
    backend::GeminiBackend,
    config::Config,
    engine::Engine,
    state::session_store_from_env,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = Config::from_env();
    if config.gemini_api_key.is_empty() {
        eprintln!("GEMINI_API_KEY not set; backend calls will fail until it is configured");
    }

    info!("Financial Advisor Orchestrator - API Server");
    info!("Port: {}", config.api_port);

    let backend = GeminiBackend::new(config.gemini_api_key.clone(), config.model.clone())?;
    let registry = create_default_registry();
    let engine = Arc::new(
        Engine::new(Arc::new(registry), Arc::new(backend)).with_config(config.engine_config()),
    );

    let sessions = session_store_from_env();
    let state = ApiState::new(engine, &config, sessions)?;

    info!("Engine initialized, starting API server");

    start_server(state, config.api_port).await?;

    Ok(())
}
