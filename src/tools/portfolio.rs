//! Portfolio analysis tools

use crate::models::ToolOutput;
use crate::tools::{FieldKind, FieldSpec, InputSchema, Tool};
use crate::Result;
use chrono::Utc;
use serde_json::{json, Map, Value};

/// Sector for a symbol; "Other" when unmapped.
pub(crate) fn sector_of(symbol: &str) -> &'static str {
    match symbol {
        "AAPL" | "GOOGL" | "MSFT" | "NVDA" => "Technology",
        "META" | "DIS" | "NFLX" => "Communication Services",
        "AMZN" | "TSLA" | "HD" => "Consumer Discretionary",
        "JPM" | "V" | "BAC" => "Financials",
        "JNJ" | "UNH" | "PFE" => "Healthcare",
        "PG" | "KO" => "Consumer Staples",
        "XOM" | "CVX" => "Energy",
        "CASH" => "Cash",
        _ => "Other",
    }
}

fn sector_risk(sector: &str) -> &'static str {
    match sector {
        "Technology" | "Consumer Discretionary" | "Energy" => "High",
        "Communication Services" => "Medium-High",
        "Healthcare" | "Financials" => "Medium",
        "Consumer Staples" => "Low",
        "Cash" => "Very Low",
        _ => "Unknown",
    }
}

/// Annualized volatility assumption per symbol, 30% default.
pub(crate) fn volatility_of(symbol: &str) -> f64 {
    match symbol {
        "AAPL" => 0.25,
        "GOOGL" => 0.28,
        "MSFT" => 0.24,
        "AMZN" => 0.32,
        "NVDA" => 0.45,
        "TSLA" => 0.55,
        "META" => 0.35,
        "JPM" => 0.22,
        "V" => 0.20,
        "JNJ" => 0.15,
        "CASH" => 0.0,
        _ => 0.30,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn holdings_of(arguments: &Value) -> Vec<(String, f64)> {
    arguments
        .get("holdings")
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(symbol, pct)| pct.as_f64().map(|p| (symbol.to_uppercase(), p)))
                .collect()
        })
        .unwrap_or_default()
}

fn sector_allocation(holdings: &[(String, f64)]) -> Map<String, Value> {
    let mut allocation: Map<String, Value> = Map::new();
    for (symbol, pct) in holdings {
        let sector = sector_of(symbol);
        let current = allocation.get(sector).and_then(Value::as_f64).unwrap_or(0.0);
        allocation.insert(sector.to_string(), json!(round2(current + pct)));
    }
    allocation
}

//
// ================= analyze_portfolio =================
//

pub struct AnalyzePortfolioTool;

#[async_trait::async_trait]
impl Tool for AnalyzePortfolioTool {
    fn name(&self) -> &'static str {
        "analyze_portfolio"
    }

    fn description(&self) -> &'static str {
        "Analyze portfolio composition, sector allocation and concentration"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![FieldSpec::object("holdings")])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let holdings = holdings_of(arguments);
        let allocation = sector_allocation(&holdings);

        let total: f64 = holdings.iter().map(|(_, p)| p).sum();
        let max_position = holdings.iter().map(|(_, p)| *p).fold(0.0, f64::max);
        let num_holdings = holdings.iter().filter(|(_, p)| *p > 0.0).count();

        let tech_weight = allocation.get("Technology").and_then(Value::as_f64).unwrap_or(0.0);
        let cash_weight = allocation.get("Cash").and_then(Value::as_f64).unwrap_or(0.0);

        let portfolio_type = if tech_weight > 50.0 {
            "Aggressive Growth"
        } else if cash_weight > 30.0 {
            "Conservative"
        } else if tech_weight > 30.0 {
            "Growth"
        } else {
            "Balanced"
        };

        let sector_risks: Map<String, Value> = allocation
            .keys()
            .map(|sector| (sector.clone(), json!(sector_risk(sector))))
            .collect();

        let unknown: Vec<&String> = holdings
            .iter()
            .filter(|(symbol, _)| sector_of(symbol) == "Other")
            .map(|(symbol, _)| symbol)
            .collect();

        let data = json!({
            "portfolio_summary": {
                "total_allocation": round2(total),
                "number_of_holdings": num_holdings,
                "portfolio_type": portfolio_type,
                "largest_position": round2(max_position),
                "cash_allocation": round2(cash_weight),
            },
            "sector_allocation": allocation,
            "sector_risks": sector_risks,
            "concentration_analysis": {
                "is_concentrated": max_position > 25.0,
                "diversification_score": (num_holdings as f64 * 10.0 + (100.0 - max_position)).min(100.0),
            },
            "unknown_holdings": unknown,
            "timestamp": Utc::now().to_rfc3339(),
        });

        Ok(ToolOutput {
            success: true,
            data,
            error: None,
        })
    }
}

//
// ================= calculate_portfolio_metrics =================
//

pub struct CalculatePortfolioMetricsTool;

#[async_trait::async_trait]
impl Tool for CalculatePortfolioMetricsTool {
    fn name(&self) -> &'static str {
        "calculate_portfolio_metrics"
    }

    fn description(&self) -> &'static str {
        "Calculate risk-adjusted performance metrics against a benchmark"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::object("holdings"),
            FieldSpec::string("benchmark").optional(),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let holdings = holdings_of(arguments);
        let benchmark = arguments
            .get("benchmark")
            .and_then(Value::as_str)
            .unwrap_or("SPY");

        // Weighted volatility from per-asset assumptions; return scales with
        // risk taken. Simulated, not market data.
        let portfolio_volatility: f64 = holdings
            .iter()
            .map(|(symbol, pct)| pct / 100.0 * volatility_of(symbol) * 100.0)
            .sum();
        let portfolio_volatility = portfolio_volatility.max(5.0);

        let benchmark_volatility = 18.5;
        let benchmark_return = 11.0;
        let risk_free_rate = 4.0;
        let portfolio_return = risk_free_rate + portfolio_volatility * 0.45;

        let sharpe_ratio = (portfolio_return - risk_free_rate) / portfolio_volatility;
        let beta = portfolio_volatility / benchmark_volatility;
        let alpha = portfolio_return - (risk_free_rate + beta * (benchmark_return - risk_free_rate));
        let sortino_ratio = (portfolio_return - risk_free_rate) / (portfolio_volatility * 0.75);

        let data = json!({
            "performance_metrics": {
                "portfolio_return_ytd": round2(portfolio_return),
                "benchmark_return_ytd": round2(benchmark_return),
                "excess_return": round2(portfolio_return - benchmark_return),
                "portfolio_volatility": round2(portfolio_volatility),
                "benchmark_volatility": benchmark_volatility,
            },
            "risk_adjusted_metrics": {
                "sharpe_ratio": round3(sharpe_ratio),
                "sortino_ratio": round3(sortino_ratio),
                "beta": round3(beta),
                "alpha": round2(alpha),
            },
            "benchmark": benchmark,
            "interpretation": {
                "sharpe": if sharpe_ratio > 1.0 { "Good" } else if sharpe_ratio > 0.5 { "Below average" } else { "Poor" },
                "beta": if beta > 1.2 { "Aggressive" } else if beta > 0.8 { "Market-like" } else { "Defensive" },
                "alpha": if alpha > 0.0 { "Outperforming" } else { "Underperforming" },
            },
            "timestamp": Utc::now().to_rfc3339(),
        });

        Ok(ToolOutput {
            success: true,
            data,
            error: None,
        })
    }
}

//
// ================= suggest_rebalancing =================
//

pub struct SuggestRebalancingTool;

fn target_allocation(risk_tolerance: &str) -> Value {
    match risk_tolerance {
        "conservative" => json!({"Stocks": 40, "Bonds": 40, "Cash": 15, "Alternatives": 5}),
        "aggressive" => json!({"Stocks": 80, "Bonds": 10, "Cash": 5, "Alternatives": 5}),
        _ => json!({"Stocks": 60, "Bonds": 25, "Cash": 10, "Alternatives": 5}),
    }
}

#[async_trait::async_trait]
impl Tool for SuggestRebalancingTool {
    fn name(&self) -> &'static str {
        "suggest_rebalancing"
    }

    fn description(&self) -> &'static str {
        "Suggest rebalancing actions toward a risk-appropriate target allocation"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::object("holdings"),
            FieldSpec::string("risk_tolerance").optional(),
            FieldSpec::new("target_allocation", FieldKind::Object).optional(),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let holdings = holdings_of(arguments);
        let risk_tolerance = arguments
            .get("risk_tolerance")
            .and_then(Value::as_str)
            .unwrap_or("moderate")
            .to_lowercase();

        let targets = arguments
            .get("target_allocation")
            .cloned()
            .unwrap_or_else(|| target_allocation(&risk_tolerance));

        let cash_pct: f64 = holdings
            .iter()
            .filter(|(symbol, _)| symbol == "CASH")
            .map(|(_, p)| p)
            .sum();
        let current = json!({
            "Stocks": round1(100.0 - cash_pct),
            "Cash": round1(cash_pct),
            "Bonds": 0.0,
            "Alternatives": 0.0,
        });

        let mut actions = Vec::new();
        if let Some(target_map) = targets.as_object() {
            for (asset_class, target_pct) in target_map {
                let target_pct = target_pct.as_f64().unwrap_or(0.0);
                let current_pct = current.get(asset_class).and_then(Value::as_f64).unwrap_or(0.0);
                let diff = target_pct - current_pct;
                if diff.abs() > 2.0 {
                    actions.push(json!({
                        "asset_class": asset_class,
                        "action": if diff > 0.0 { "Buy" } else { "Sell" },
                        "current_allocation": round1(current_pct),
                        "target_allocation": target_pct,
                        "adjustment_needed": round1(diff.abs()),
                        "priority": if diff.abs() > 10.0 { "High" } else if diff.abs() > 5.0 { "Medium" } else { "Low" },
                    }));
                }
            }
        }

        let mut stock_suggestions = Vec::new();
        for (symbol, pct) in &holdings {
            if *pct > 25.0 && symbol != "CASH" {
                stock_suggestions.push(json!({
                    "symbol": symbol,
                    "action": "Reduce",
                    "reason": format!("Position size ({}%) exceeds recommended 25% maximum", pct),
                    "suggested_target": 20,
                }));
            }
        }
        if holdings.len() < 10 {
            stock_suggestions.push(json!({
                "action": "Diversify",
                "reason": format!(
                    "Portfolio has only {} holdings. Consider adding more positions.",
                    holdings.len()
                ),
            }));
        }

        let urgent = actions
            .iter()
            .any(|a| a["priority"] == json!("High"));

        let data = json!({
            "risk_tolerance": risk_tolerance,
            "current_allocation": current,
            "target_allocation": targets,
            "rebalancing_actions": actions,
            "stock_specific_suggestions": stock_suggestions,
            "summary": {
                "urgency": if urgent { "High" } else { "Moderate" },
            },
            "tax_considerations": "Consider tax implications of selling positions with gains",
            "timestamp": Utc::now().to_rfc3339(),
        });

        Ok(ToolOutput {
            success: true,
            data,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_analyze_portfolio_classifies_tech_heavy() {
        let output = AnalyzePortfolioTool
            .execute(&json!({"holdings": {"AAPL": 40, "MSFT": 30, "CASH": 30}}))
            .await
            .unwrap();

        let summary = &output.data["portfolio_summary"];
        assert_eq!(summary["portfolio_type"], json!("Aggressive Growth"));
        assert_eq!(summary["number_of_holdings"], json!(3));
        assert_eq!(output.data["sector_allocation"]["Technology"], json!(70.0));
    }

    #[tokio::test]
    async fn test_metrics_are_deterministic() {
        let args = json!({"holdings": {"AAPL": 50, "JNJ": 50}});
        let first = CalculatePortfolioMetricsTool.execute(&args).await.unwrap();
        let second = CalculatePortfolioMetricsTool.execute(&args).await.unwrap();

        assert_eq!(
            first.data["risk_adjusted_metrics"],
            second.data["risk_adjusted_metrics"]
        );
    }

    #[tokio::test]
    async fn test_rebalancing_flags_concentration() {
        let output = SuggestRebalancingTool
            .execute(&json!({
                "holdings": {"TSLA": 60, "CASH": 40},
                "risk_tolerance": "conservative",
            }))
            .await
            .unwrap();

        let suggestions = output.data["stock_specific_suggestions"].as_array().unwrap();
        assert!(suggestions
            .iter()
            .any(|s| s["symbol"] == json!("TSLA") && s["action"] == json!("Reduce")));
    }
}
