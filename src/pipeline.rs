//! Pipeline assembly
//!
//! The declarative construction surface consumed by the engine: named
//! units with tool bindings, and composer nodes with child lists and
//! per-variant config. [`default_pipeline`] builds the full advisory
//! workflow; [`NodeSpec`] lets callers describe their own tree as data.

use crate::composer::{LoopComposer, Node, ParallelComposer, ParallelPolicy, SequentialComposer};
use crate::config::Config;
use crate::unit::Unit;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Key holding the polished final recommendation after a full run.
pub const FINAL_RECOMMENDATION_KEY: &str = "final_recommendation";

/// Key holding the direct answer of the quick-query unit.
pub const QUICK_ANSWER_KEY: &str = "quick_answer";

//
// ================= Declarative Spec =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateSpec {
    pub score_field: String,
    pub threshold: f64,
}

fn default_true() -> bool {
    true
}

/// Serializable description of a pipeline node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Unit {
        name: String,
        output_key: String,
        #[serde(default)]
        instruction: String,
        #[serde(default)]
        input_keys: Vec<String>,
        #[serde(default)]
        tools: Vec<String>,
        #[serde(default = "default_true")]
        llm: bool,
        #[serde(default)]
        max_rounds: Option<u32>,
        #[serde(default)]
        quality_gate: Option<QualityGateSpec>,
    },
    Sequential {
        name: String,
        children: Vec<NodeSpec>,
    },
    Parallel {
        name: String,
        children: Vec<NodeSpec>,
        #[serde(default)]
        policy: Option<ParallelPolicy>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Loop {
        name: String,
        children: Vec<NodeSpec>,
        max_iterations: u32,
    },
}

impl NodeSpec {
    /// Resolve the description into an executable node tree.
    pub fn build(&self) -> Result<Node> {
        match self {
            NodeSpec::Unit {
                name,
                output_key,
                instruction,
                input_keys,
                tools,
                llm,
                max_rounds,
                quality_gate,
            } => {
                let mut unit = Unit::new(name, output_key)
                    .with_instruction(instruction.clone())
                    .with_input_keys(input_keys.clone())
                    .with_tools(tools.clone());
                if !llm {
                    unit = unit.tool_only();
                }
                if let Some(rounds) = max_rounds {
                    unit = unit.with_max_rounds(*rounds);
                }
                if let Some(gate) = quality_gate {
                    unit = unit.with_quality_gate(gate.score_field.clone(), gate.threshold);
                }
                Ok(Node::Unit(unit))
            }
            NodeSpec::Sequential { name, children } => {
                let children = build_children(children)?;
                Ok(Node::Sequential(SequentialComposer::new(name, children)))
            }
            NodeSpec::Parallel {
                name,
                children,
                policy,
                timeout_secs,
            } => {
                let children = build_children(children)?;
                let mut composer = ParallelComposer::new(name, children)?;
                if let Some(policy) = policy {
                    composer = composer.with_policy(*policy);
                }
                if let Some(secs) = timeout_secs {
                    composer = composer.with_timeout(Duration::from_secs(*secs));
                }
                Ok(Node::Parallel(composer))
            }
            NodeSpec::Loop {
                name,
                children,
                max_iterations,
            } => {
                let children = build_children(children)?;
                Ok(Node::Loop(LoopComposer::new(name, children, *max_iterations)?))
            }
        }
    }
}

fn build_children(specs: &[NodeSpec]) -> Result<Vec<Node>> {
    specs.iter().map(NodeSpec::build).collect()
}

//
// ================= Default Advisory Pipeline =================
//

/// Quick-query unit: answers simple questions with direct tool usage.
pub fn quick_query_unit(config: &Config) -> Unit {
    Unit::new("quick_query", QUICK_ANSWER_KEY)
        .with_instruction(
            "You handle simple, quick financial queries that don't require \
             comprehensive analysis. Use tools directly to answer questions \
             about current stock prices, market conditions, simple \
             calculations, or quick portfolio checks. Provide concise, \
             direct answers.",
        )
        .with_input_keys(["user_preferences"])
        .with_tools([
            "get_stock_price",
            "get_market_summary",
            "get_stock_history",
            "calculate_compound_interest",
            "calculate_roi",
            "analyze_portfolio",
        ])
        .with_max_rounds(config.unit_max_rounds)
}

/// The full advisory workflow: parallel research, sequential analysis,
/// iterative recommendation refinement, final synthesis.
pub fn default_pipeline(config: &Config) -> Result<Node> {
    let rounds = config.unit_max_rounds;

    // Stage 1 - research runs concurrently against the same snapshot.
    let market_data_researcher = Unit::new("market_data_researcher", "market_data_result")
        .with_instruction(
            "You are a market data specialist. Gather current market \
             information including stock prices and market indices. Provide \
             concise, data-focused summaries with key numbers and trends.",
        )
        .with_tools(["get_stock_price", "get_market_summary"])
        .with_max_rounds(rounds);

    let news_researcher = Unit::new("news_researcher", "news_research_result")
        .with_instruction(
            "You are a financial news analyst. Find and summarize relevant \
             news with main headlines, overall sentiment (bullish, bearish \
             or neutral), and the potential impact on investments.",
        )
        .with_tools(["search_market_news"])
        .with_max_rounds(rounds);

    let historical_researcher = Unit::new("historical_researcher", "historical_research_result")
        .with_instruction(
            "You are a historical data analyst. Analyze price trends over \
             different periods, historical volatility and period returns. \
             Compare current prices to historical averages.",
        )
        .with_tools(["get_stock_history"])
        .with_max_rounds(rounds);

    let research = ParallelComposer::new(
        "parallel_research",
        vec![
            Node::Unit(market_data_researcher),
            Node::Unit(news_researcher),
            Node::Unit(historical_researcher),
        ],
    )?
    .with_timeout(Duration::from_secs(config.parallel_timeout_secs));

    // Stage 2 - analysis builds on research, each step on the previous.
    let risk_assessor = Unit::new("risk_assessor", "risk_assessment_result")
        .with_instruction(
            "You are a risk assessment specialist. Use calculate_var, \
             assess_risk_profile and run_stress_test against the research \
             results. Output a structured risk assessment with a risk level \
             and the key risk factors identified.",
        )
        .with_input_keys([
            "market_data_result",
            "news_research_result",
            "historical_research_result",
        ])
        .with_tools(["calculate_var", "assess_risk_profile", "run_stress_test"])
        .with_max_rounds(rounds);

    let portfolio_analyst = Unit::new("portfolio_analyst", "portfolio_analysis_result")
        .with_instruction(
            "You are a portfolio analysis expert. Evaluate composition, \
             performance metrics and diversification quality using the risk \
             assessment and research data. Output a structured analysis for \
             the performance evaluation step.",
        )
        .with_input_keys([
            "risk_assessment_result",
            "market_data_result",
            "historical_research_result",
        ])
        .with_tools([
            "analyze_portfolio",
            "calculate_portfolio_metrics",
            "calculate_diversification_score",
        ])
        .with_max_rounds(rounds);

    let performance_evaluator = Unit::new("performance_evaluator", "performance_evaluation_result")
        .with_instruction(
            "You are a performance evaluation specialist. Synthesize all \
             previous analysis into a comprehensive evaluation covering \
             overall health, strengths, weaknesses and opportunities.",
        )
        .with_input_keys([
            "risk_assessment_result",
            "portfolio_analysis_result",
            "market_data_result",
            "news_research_result",
            "historical_research_result",
        ])
        .with_max_rounds(rounds);

    let analysis = SequentialComposer::new(
        "analysis_pipeline",
        vec![
            Node::Unit(risk_assessor),
            Node::Unit(portfolio_analyst),
            Node::Unit(performance_evaluator),
        ],
    );

    // Stage 3 - generator/critic refinement until the quality gate passes.
    let recommendation_generator = Unit::new("recommendation_generator", "current_recommendation")
        .with_instruction(
            "You are a financial recommendation specialist. Generate an \
             investment recommendation from the analysis in context, with an \
             executive summary, specific numbered actions, risk \
             considerations and expected outcomes. If criticism from a \
             previous iteration is present, address every point raised. \
             Use suggest_rebalancing when portfolio changes are needed. \
             Respond as JSON with a \"recommendation\" field and a \"score\" \
             field holding your 1-10 self-assessment.",
        )
        .with_input_keys([
            "performance_evaluation_result",
            "risk_assessment_result",
            "portfolio_analysis_result",
            "market_data_result",
            "news_research_result",
            "recommendation_criticism",
            "current_recommendation",
        ])
        .with_tools(["suggest_rebalancing"])
        .with_max_rounds(rounds);

    let recommendation_critic = Unit::new("recommendation_critic", "recommendation_criticism")
        .with_instruction(
            "You are a critical reviewer of investment recommendations. \
             Score the current recommendation 1-10 on completeness, \
             actionability, data support, risk awareness and clarity, then \
             respond as JSON with the overall \"score\" and a \"criticism\" \
             field listing exactly what needs improvement.",
        )
        .with_input_keys([
            "current_recommendation",
            "performance_evaluation_result",
            "risk_assessment_result",
        ])
        .with_quality_gate("score", 8.0)
        .with_max_rounds(rounds);

    let refinement = LoopComposer::new(
        "recommendation_refinement",
        vec![
            Node::Unit(recommendation_generator),
            Node::Unit(recommendation_critic),
        ],
        config.max_loop_iterations,
    )?;

    // Stage 4 - polish the refined recommendation for the caller.
    let synthesizer = Unit::new("recommendation_synthesizer", FINAL_RECOMMENDATION_KEY)
        .with_instruction(
            "You are the final synthesizer of financial recommendations. \
             Present the refined recommendation as a polished, client-ready \
             report with an executive summary, recommended actions, risk \
             management notes and a standard advisory disclaimer.",
        )
        .with_input_keys(["current_recommendation"])
        .with_max_rounds(rounds);

    Ok(Node::Sequential(SequentialComposer::new(
        "full_analysis_workflow",
        vec![
            Node::Parallel(research),
            Node::Sequential(analysis),
            Node::Loop(refinement),
            Node::Unit(synthesizer),
        ],
    )))
}
