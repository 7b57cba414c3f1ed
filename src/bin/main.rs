use financial_advisor_orchestrator::{
    backend::{GenerateResponse, ScriptedBackend},
    config::Config,
    engine::Engine,
    pipeline::{self, FINAL_RECOMMENDATION_KEY},
    state::SharedState,
    tools::create_default_registry,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Scripted decisions that walk the full workflow offline: research units
/// make one tool call each, analysis and recommendation units answer
/// directly, the critic clears its quality gate on the second pass.
fn demo_script() -> ScriptedBackend {
    ScriptedBackend::new(vec![
        // Parallel research (one tool round each; arrival order may vary,
        // so every research unit uses the same shape of script).
        GenerateResponse::tool_call("get_market_summary", json!({})),
        GenerateResponse::tool_call("search_market_news", json!({"query": "technology sector"})),
        GenerateResponse::tool_call("get_stock_history", json!({"symbol": "AAPL"})),
        GenerateResponse::final_text("Market indices are up; sentiment bullish."),
        GenerateResponse::final_text("News flow is mixed with a positive tilt."),
        GenerateResponse::final_text("AAPL trends above its period average."),
        // Sequential analysis
        GenerateResponse::final_text("Risk level: Moderate. VaR within tolerance."),
        GenerateResponse::final_text("Portfolio tilted to tech; diversification grade C."),
        GenerateResponse::final_text("Overall health good; concentration is the main weakness."),
        // Refinement loop, two iterations
        GenerateResponse::final_text(
            "{\"recommendation\": \"Trim tech to 30%, add staples\", \"score\": 6}",
        ),
        GenerateResponse::final_text("{\"score\": 6, \"criticism\": \"No timeline given\"}"),
        GenerateResponse::final_text(
            "{\"recommendation\": \"Trim tech to 30% over two quarters, add staples\", \"score\": 9}",
        ),
        GenerateResponse::final_text("{\"score\": 9, \"criticism\": \"None\"}"),
        // Synthesis
        GenerateResponse::final_text(
            "FINANCIAL RECOMMENDATION REPORT\n\nReduce technology exposure to 30% \
             over two quarters and add consumer staples. Educational purposes only; \
             consult a licensed advisor.",
        ),
    ])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenv::dotenv().ok();

    info!("Financial Advisor Orchestrator - offline demo run");

    let config = Config::from_env();
    let registry = create_default_registry();
    let engine = Engine::new(Arc::new(registry), Arc::new(demo_script()))
        .with_config(config.engine_config());

    let root = pipeline::default_pipeline(&config)?;

    let mut initial_state = SharedState::new();
    initial_state.set(
        "user_preferences",
        json!({"risk_tolerance": "medium", "horizon": "5 years"}),
    );

    let report = engine
        .run(
            &root,
            initial_state,
            "Analyze my portfolio (AAPL 40%, MSFT 30%, CASH 30%) and recommend rebalancing",
        )
        .await;

    println!("\n=== RUN REPORT ===");
    println!("Run ID:  {}", report.run_id);
    println!("Success: {}", report.is_success());
    if let Some(failure) = &report.failure {
        println!("Failed at '{}': {}", failure.node, failure.error);
    }

    println!("\nTrace:");
    for (i, record) in report.trace.records().iter().enumerate() {
        println!(
            "  {:>2}. {:<28} {:?} ({} tool calls)",
            i + 1,
            record.node,
            record.outcome,
            record.tool_calls.len()
        );
    }

    println!("\nState keys: {:?}", report.final_state.keys().collect::<Vec<_>>());
    if let Some(answer) = report.output(FINAL_RECOMMENDATION_KEY) {
        println!("\nFinal recommendation:\n{}", answer);
    }
    println!("\nState hash: {}", report.final_state.integrity_hash());

    Ok(())
}
