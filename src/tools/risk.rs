//! Risk assessment tools

use crate::models::ToolOutput;
use crate::tools::portfolio::{sector_of, volatility_of};
use crate::tools::{FieldSpec, InputSchema, Tool};
use crate::Result;
use chrono::Utc;
use serde_json::{json, Value};

const TRADING_DAYS: f64 = 252.0;

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn z_score(confidence_level: f64) -> f64 {
    if confidence_level >= 0.99 {
        2.33
    } else if confidence_level >= 0.95 {
        1.65
    } else {
        1.28
    }
}

//
// ================= calculate_var =================
//

pub struct CalculateVarTool;

#[async_trait::async_trait]
impl Tool for CalculateVarTool {
    fn name(&self) -> &'static str {
        "calculate_var"
    }

    fn description(&self) -> &'static str {
        "Calculate Value at Risk for a portfolio at a confidence level"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::number("portfolio_value").above(0.0),
            FieldSpec::object("holdings"),
            FieldSpec::number("confidence_level").optional().above(0.0).max(0.99),
            FieldSpec::integer("time_horizon_days").optional().min(1.0),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let portfolio_value = arguments
            .get("portfolio_value")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        let confidence_level = arguments
            .get("confidence_level")
            .and_then(Value::as_f64)
            .unwrap_or(0.95);
        let horizon_days = arguments
            .get("time_horizon_days")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);

        // Uncorrelated-asset simplification.
        let mut portfolio_variance = 0.0;
        if let Some(holdings) = arguments.get("holdings").and_then(Value::as_object) {
            for (symbol, pct) in holdings {
                let weight = pct.as_f64().unwrap_or(0.0) / 100.0;
                let vol = volatility_of(&symbol.to_uppercase());
                portfolio_variance += (weight * vol).powi(2);
            }
        }
        let portfolio_volatility = portfolio_variance.sqrt();

        // VaR = V * z * sigma * sqrt(t/252)
        let daily_var = portfolio_value
            * z_score(confidence_level)
            * portfolio_volatility
            * (horizon_days / TRADING_DAYS).sqrt();
        let var_pct = daily_var / portfolio_value * 100.0;
        let cvar = daily_var * 1.25;

        let data = json!({
            "var_analysis": {
                "portfolio_value": portfolio_value,
                "confidence_level": format!("{}%", confidence_level * 100.0),
                "time_horizon_days": horizon_days,
                "value_at_risk_dollars": round2(daily_var),
                "value_at_risk_percentage": round2(var_pct),
                "conditional_var_dollars": round2(cvar),
            },
            "portfolio_risk_metrics": {
                "annualized_volatility": round2(portfolio_volatility * 100.0),
                "daily_volatility": round2(portfolio_volatility * 100.0 / TRADING_DAYS.sqrt()),
            },
            "risk_assessment": if var_pct > 3.0 { "High" } else if var_pct > 1.5 { "Moderate" } else { "Low" },
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
// ================= assess_risk_profile =================
//

pub struct AssessRiskProfileTool;

#[async_trait::async_trait]
impl Tool for AssessRiskProfileTool {
    fn name(&self) -> &'static str {
        "assess_risk_profile"
    }

    fn description(&self) -> &'static str {
        "Assess an investor's risk profile from age, horizon, income and net worth"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::integer("age").min(18.0).max(120.0),
            FieldSpec::integer("investment_horizon_years").min(1.0),
            FieldSpec::number("annual_income").min(0.0),
            FieldSpec::number("liquid_net_worth").min(0.0),
            FieldSpec::integer("risk_capacity_score").optional().min(1.0).max(10.0),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let age = arguments.get("age").and_then(Value::as_f64).unwrap_or(40.0);
        let horizon = arguments
            .get("investment_horizon_years")
            .and_then(Value::as_f64)
            .unwrap_or(10.0);
        let income = arguments
            .get("annual_income")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        let net_worth = arguments
            .get("liquid_net_worth")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        let self_score = arguments
            .get("risk_capacity_score")
            .and_then(Value::as_f64);

        let age_factor = match age as u32 {
            0..=29 => 10.0,
            30..=39 => 8.0,
            40..=49 => 6.0,
            50..=59 => 4.0,
            _ => 2.0,
        };
        let horizon_factor = if horizon >= 20.0 {
            10.0
        } else if horizon >= 10.0 {
            8.0
        } else if horizon >= 5.0 {
            6.0
        } else if horizon >= 3.0 {
            4.0
        } else {
            2.0
        };
        let income_factor = (income / 50_000.0).min(2.0) * 5.0;
        let networth_factor = if net_worth >= 1_000_000.0 {
            10.0
        } else if net_worth >= 500_000.0 {
            8.0
        } else if net_worth >= 250_000.0 {
            6.0
        } else if net_worth >= 100_000.0 {
            4.0
        } else {
            2.0
        };

        let objective_score =
            age_factor * 0.25 + horizon_factor * 0.35 + income_factor * 0.20 + networth_factor * 0.20;
        let final_score = match self_score {
            Some(score) => objective_score * 0.7 + score * 0.3,
            None => objective_score,
        };

        let (profile, stocks, bonds) = if final_score >= 8.0 {
            ("Aggressive", "80-100%", "0-20%")
        } else if final_score >= 6.0 {
            ("Moderately Aggressive", "60-80%", "20-40%")
        } else if final_score >= 4.0 {
            ("Moderate", "40-60%", "40-60%")
        } else if final_score >= 2.0 {
            ("Moderately Conservative", "20-40%", "60-80%")
        } else {
            ("Conservative", "0-20%", "80-100%")
        };

        let data = json!({
            "risk_profile": profile,
            "risk_score": round1(final_score),
            "score_breakdown": {
                "age_factor": age_factor,
                "horizon_factor": horizon_factor,
                "income_factor": round1(income_factor),
                "networth_factor": networth_factor,
                "self_assessment": self_score,
            },
            "recommended_allocation": {
                "stocks": stocks,
                "bonds": bonds,
                "alternatives": "0-10%",
                "cash": "5-10%",
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
// ================= run_stress_test =================
//

pub struct RunStressTestTool;

/// Sector impact (percent) under a named scenario.
fn scenario_impact(scenario: &str, sector: &str) -> f64 {
    match (scenario, sector) {
        ("market_crash", "Technology") => -35.0,
        ("market_crash", "Financials") => -45.0,
        ("market_crash", "Consumer Discretionary") => -40.0,
        ("market_crash", "Healthcare") => -20.0,
        ("market_crash", "Consumer Staples") => -15.0,
        ("market_crash", "Energy") => -50.0,
        ("market_crash", "Communication Services") => -30.0,
        ("market_crash", "Cash") => 0.0,
        ("tech_bubble", "Technology") => -60.0,
        ("tech_bubble", "Communication Services") => -55.0,
        ("tech_bubble", "Consumer Discretionary") => -25.0,
        ("tech_bubble", "Financials") => -15.0,
        ("tech_bubble", "Healthcare") => -5.0,
        ("tech_bubble", "Energy") => 5.0,
        ("tech_bubble", "Cash") => 0.0,
        ("inflation_spike", "Technology") => -25.0,
        ("inflation_spike", "Energy") => 15.0,
        ("inflation_spike", "Cash") => -8.0,
        ("inflation_spike", _) => -15.0,
        ("interest_rate_hike", "Technology") => -30.0,
        ("interest_rate_hike", "Financials") => 10.0,
        ("interest_rate_hike", "Cash") => 3.0,
        ("interest_rate_hike", _) => -15.0,
        ("recession", "Financials") => -30.0,
        ("recession", "Consumer Discretionary") => -35.0,
        ("recession", "Consumer Staples") => -5.0,
        ("recession", "Cash") => 0.0,
        ("recession", _) => -25.0,
        (_, "Cash") => 0.0,
        _ => -20.0,
    }
}

fn scenario_description(scenario: &str) -> &'static str {
    match scenario {
        "tech_bubble" => "Technology sector collapse similar to 2000-2002",
        "inflation_spike" => "Rapid inflation increase (>8% annual)",
        "interest_rate_hike" => "Rapid interest rate increases (300+ bps)",
        "recession" => "Economic recession with GDP contraction",
        _ => "Broad market decline similar to 2008 or March 2020",
    }
}

#[async_trait::async_trait]
impl Tool for RunStressTestTool {
    fn name(&self) -> &'static str {
        "run_stress_test"
    }

    fn description(&self) -> &'static str {
        "Project portfolio losses under a named market stress scenario"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::number("portfolio_value").above(0.0),
            FieldSpec::object("holdings"),
            FieldSpec::string("scenario").optional(),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let portfolio_value = arguments
            .get("portfolio_value")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        let scenario = arguments
            .get("scenario")
            .and_then(Value::as_str)
            .unwrap_or("market_crash")
            .to_lowercase();

        let mut total_impact = 0.0;
        let mut positions = Vec::new();

        if let Some(holdings) = arguments.get("holdings").and_then(Value::as_object) {
            for (symbol, pct) in holdings {
                let symbol = symbol.to_uppercase();
                let sector = sector_of(&symbol);
                let impact_pct = scenario_impact(&scenario, sector);
                let position_value = portfolio_value * pct.as_f64().unwrap_or(0.0) / 100.0;
                let position_loss = position_value * impact_pct / 100.0;
                total_impact += position_loss;

                positions.push(json!({
                    "symbol": symbol,
                    "sector": sector,
                    "current_value": round2(position_value),
                    "scenario_impact_pct": impact_pct,
                    "projected_loss": round2(position_loss),
                    "projected_value": round2(position_value + position_loss),
                }));
            }
        }

        positions.sort_by(|a, b| {
            let la = a["projected_loss"].as_f64().unwrap_or(0.0);
            let lb = b["projected_loss"].as_f64().unwrap_or(0.0);
            la.partial_cmp(&lb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let impact_pct = total_impact / portfolio_value * 100.0;
        let severity = if impact_pct < -30.0 {
            "Severe"
        } else if impact_pct < -20.0 {
            "High"
        } else {
            "Moderate"
        };

        let data = json!({
            "scenario": scenario,
            "scenario_description": scenario_description(&scenario),
            "portfolio_summary": {
                "initial_value": portfolio_value,
                "projected_value": round2(portfolio_value + total_impact),
                "total_impact_dollars": round2(total_impact),
                "total_impact_percentage": round2(impact_pct),
            },
            "position_analysis": positions,
            "risk_assessment": {
                "severity": severity,
                "recovery_estimate": match severity {
                    "Severe" => "12-24 months",
                    "High" => "6-12 months",
                    _ => "3-6 months",
                },
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_var_rejects_nonpositive_portfolio_value() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculateVarTool));

        let err = registry
            .invoke("calculate_var", &json!({"portfolio_value": -100, "holdings": {}}))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::Validation(_)));
    }

    #[tokio::test]
    async fn test_var_computation() {
        let output = CalculateVarTool
            .execute(&json!({
                "portfolio_value": 100000.0,
                "holdings": {"AAPL": 50, "JNJ": 50},
                "confidence_level": 0.95,
            }))
            .await
            .unwrap();

        let var = output.data["var_analysis"]["value_at_risk_dollars"]
            .as_f64()
            .unwrap();
        assert!(var > 0.0);
        assert!(var < 100000.0);
    }

    #[tokio::test]
    async fn test_risk_profile_young_long_horizon_is_aggressive() {
        let output = AssessRiskProfileTool
            .execute(&json!({
                "age": 25,
                "investment_horizon_years": 30,
                "annual_income": 120000.0,
                "liquid_net_worth": 1500000.0,
                "risk_capacity_score": 9,
            }))
            .await
            .unwrap();

        assert_eq!(output.data["risk_profile"], json!("Aggressive"));
    }

    #[tokio::test]
    async fn test_stress_test_tech_bubble_hits_tech() {
        let output = RunStressTestTool
            .execute(&json!({
                "portfolio_value": 100000.0,
                "holdings": {"NVDA": 80, "CASH": 20},
                "scenario": "tech_bubble",
            }))
            .await
            .unwrap();

        let impact = output.data["portfolio_summary"]["total_impact_percentage"]
            .as_f64()
            .unwrap();
        assert!(impact <= -40.0);
        assert_eq!(output.data["risk_assessment"]["severity"], json!("Severe"));
    }
}
