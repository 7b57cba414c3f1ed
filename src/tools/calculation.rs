//! Financial calculation tools

use crate::models::ToolOutput;
use crate::tools::portfolio::sector_of;
use crate::tools::{FieldSpec, InputSchema, Tool};
use crate::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

//
// ================= calculate_compound_interest =================
//

pub struct CompoundInterestTool;

#[async_trait::async_trait]
impl Tool for CompoundInterestTool {
    fn name(&self) -> &'static str {
        "calculate_compound_interest"
    }

    fn description(&self) -> &'static str {
        "Project investment growth with compounding and optional contributions"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::number("principal").min(0.0),
            FieldSpec::number("annual_rate").min(0.0).max(100.0),
            FieldSpec::integer("years").min(1.0).max(100.0),
            FieldSpec::integer("compounds_per_year").optional().min(1.0),
            FieldSpec::number("monthly_contribution").optional().min(0.0),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let principal = arguments.get("principal").and_then(Value::as_f64).unwrap_or(0.0);
        let annual_rate = arguments.get("annual_rate").and_then(Value::as_f64).unwrap_or(0.0);
        let years = arguments.get("years").and_then(Value::as_u64).unwrap_or(1);
        let compounds = arguments
            .get("compounds_per_year")
            .and_then(Value::as_f64)
            .unwrap_or(12.0);
        let monthly_contribution = arguments
            .get("monthly_contribution")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let rate = annual_rate / 100.0;
        let t = years as f64;

        // FV = P(1 + r/n)^(nt)
        let fv_principal = principal * (1.0 + rate / compounds).powf(compounds * t);

        // FV_contributions = PMT * (((1 + r/12)^(12t) - 1) / (r/12))
        let fv_contributions = if monthly_contribution > 0.0 && rate > 0.0 {
            let monthly_rate = rate / 12.0;
            monthly_contribution * (((1.0 + monthly_rate).powf(12.0 * t) - 1.0) / monthly_rate)
        } else {
            monthly_contribution * 12.0 * t
        };

        let future_value = fv_principal + fv_contributions;
        let total_contributions = principal + monthly_contribution * 12.0 * t;

        let mut yearly_breakdown = Vec::new();
        let mut balance = principal;
        for year in 1..=years {
            let year_start = balance;
            for _ in 0..12 {
                balance = balance * (1.0 + rate / 12.0) + monthly_contribution;
            }
            yearly_breakdown.push(json!({
                "year": year,
                "balance": round2(balance),
                "year_growth": round2(balance - year_start - monthly_contribution * 12.0),
            }));
        }
        let tail_start = yearly_breakdown.len().saturating_sub(5);
        let yearly_breakdown: Vec<Value> = yearly_breakdown.split_off(tail_start);

        let data = json!({
            "inputs": {
                "principal": principal,
                "annual_rate": format!("{}%", annual_rate),
                "years": years,
                "monthly_contribution": monthly_contribution,
            },
            "results": {
                "future_value": round2(future_value),
                "total_contributions": round2(total_contributions),
                "total_interest_earned": round2(future_value - total_contributions),
                "effective_annual_rate": round3(((1.0 + rate / compounds).powf(compounds) - 1.0) * 100.0),
            },
            "yearly_breakdown": yearly_breakdown,
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
// ================= calculate_roi =================
//

pub struct RoiTool;

#[async_trait::async_trait]
impl Tool for RoiTool {
    fn name(&self) -> &'static str {
        "calculate_roi"
    }

    fn description(&self) -> &'static str {
        "Calculate return on investment and annualized growth"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::number("initial_investment").above(0.0),
            FieldSpec::number("final_value").min(0.0),
            FieldSpec::number("holding_period_years").optional().above(0.0),
            FieldSpec::number("dividends_received").optional().min(0.0),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let initial = arguments
            .get("initial_investment")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        let final_value = arguments
            .get("final_value")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let dividends = arguments
            .get("dividends_received")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let total_return = final_value + dividends - initial;
        let roi_pct = total_return / initial * 100.0;

        let mut data = json!({
            "inputs": {
                "initial_investment": initial,
                "final_value": final_value,
                "dividends_received": dividends,
            },
            "returns": {
                "total_return_dollars": round2(total_return),
                "total_return_percentage": round2(roi_pct),
                "capital_gain": round2(final_value - initial),
                "dividend_return": dividends,
            },
        });

        if let Some(years) = arguments
            .get("holding_period_years")
            .and_then(Value::as_f64)
            .filter(|y| *y > 0.0)
        {
            // CAGR = (FV/PV)^(1/n) - 1
            let cagr = (((final_value + dividends) / initial).powf(1.0 / years) - 1.0) * 100.0;
            data["annualized"] = json!({
                "holding_period_years": years,
                "cagr": round2(cagr),
                "average_annual_return": round2(roi_pct / years),
            });
            data["performance_assessment"] = json!(if cagr >= 15.0 {
                "Excellent - significantly above market average"
            } else if cagr >= 10.0 {
                "Good - above historical market average"
            } else if cagr >= 7.0 {
                "Acceptable - near historical market average"
            } else if cagr >= 0.0 {
                "Below average - underperforming market"
            } else {
                "Poor - negative returns"
            });
        }

        data["timestamp"] = json!(Utc::now().to_rfc3339());

        Ok(ToolOutput {
            success: true,
            data,
            error: None,
        })
    }
}

//
// ================= calculate_sharpe_ratio =================
//

pub struct SharpeRatioTool;

#[async_trait::async_trait]
impl Tool for SharpeRatioTool {
    fn name(&self) -> &'static str {
        "calculate_sharpe_ratio"
    }

    fn description(&self) -> &'static str {
        "Calculate the Sharpe ratio for risk-adjusted returns"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::number("portfolio_return"),
            FieldSpec::number("risk_free_rate"),
            FieldSpec::number("portfolio_volatility").above(0.0),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let portfolio_return = arguments
            .get("portfolio_return")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let risk_free_rate = arguments
            .get("risk_free_rate")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let volatility = arguments
            .get("portfolio_volatility")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);

        let excess_return = portfolio_return - risk_free_rate;
        let sharpe_ratio = excess_return / volatility;

        let interpretation = if sharpe_ratio >= 2.0 {
            "Excellent - very strong risk-adjusted returns"
        } else if sharpe_ratio >= 1.0 {
            "Good - returns adequately compensate for risk"
        } else if sharpe_ratio >= 0.5 {
            "Average - moderate risk-adjusted returns"
        } else if sharpe_ratio >= 0.0 {
            "Below Average - poor risk compensation"
        } else {
            "Poor - negative excess returns; risk-free better"
        };

        let data = json!({
            "inputs": {
                "portfolio_return": format!("{}%", portfolio_return),
                "risk_free_rate": format!("{}%", risk_free_rate),
                "portfolio_volatility": format!("{}%", volatility),
            },
            "sharpe_ratio": round3(sharpe_ratio),
            "excess_return": round2(excess_return),
            "interpretation": interpretation,
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
// ================= calculate_diversification_score =================
//

pub struct DiversificationScoreTool;

#[async_trait::async_trait]
impl Tool for DiversificationScoreTool {
    fn name(&self) -> &'static str {
        "calculate_diversification_score"
    }

    fn description(&self) -> &'static str {
        "Score portfolio diversification across holdings and sectors"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![FieldSpec::object("holdings")])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let holdings: Vec<(String, f64)> = arguments
            .get("holdings")
            .and_then(Value::as_object)
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(symbol, pct)| pct.as_f64().map(|p| (symbol.to_uppercase(), p)))
                    .collect()
            })
            .unwrap_or_default();

        let mut sector_weights: HashMap<&str, f64> = HashMap::new();
        for (symbol, pct) in &holdings {
            *sector_weights.entry(sector_of(symbol)).or_insert(0.0) += pct;
        }

        let num_holdings = holdings.iter().filter(|(_, p)| *p > 0.0).count();
        let num_sectors = sector_weights.values().filter(|w| **w > 0.0).count();
        let max_position = holdings.iter().map(|(_, p)| *p).fold(0.0, f64::max);
        let max_sector = sector_weights.values().copied().fold(0.0, f64::max);

        // Herfindahl-Hirschman index; lower means more diversified.
        let hhi: f64 = holdings.iter().map(|(_, p)| (p / 100.0).powi(2)).sum();
        let effective_positions = if hhi > 0.0 { 1.0 / hhi } else { 0.0 };

        let holdings_score = (num_holdings as f64 * 5.0).min(25.0);
        let sector_score = (num_sectors as f64 * 5.0).min(25.0);
        let concentration_score = (25.0 - (max_position - 10.0)).clamp(0.0, 25.0);
        let sector_concentration_score = (25.0 - (max_sector - 25.0) * 0.5).clamp(0.0, 25.0);
        let total_score =
            holdings_score + sector_score + concentration_score + sector_concentration_score;

        let (grade, assessment) = if total_score >= 85.0 {
            ("A", "Excellent diversification")
        } else if total_score >= 70.0 {
            ("B", "Good diversification with minor concentration")
        } else if total_score >= 55.0 {
            ("C", "Moderate diversification - consider rebalancing")
        } else if total_score >= 40.0 {
            ("D", "Poor diversification - significant concentration risk")
        } else {
            ("F", "Very poor diversification - high concentration risk")
        };

        let mut recommendations = Vec::new();
        if num_holdings < 10 {
            recommendations.push(format!("Consider adding {} more positions", 10 - num_holdings));
        }
        if num_sectors < 5 {
            recommendations.push(format!("Add exposure to {} more sectors", 5 - num_sectors));
        }
        if max_position > 25.0 {
            recommendations.push(format!(
                "Reduce largest position from {}% to under 25%",
                round1(max_position)
            ));
        }
        if recommendations.is_empty() {
            recommendations.push("Portfolio is well-diversified".to_string());
        }

        let data = json!({
            "diversification_score": round1(total_score),
            "grade": grade,
            "assessment": assessment,
            "portfolio_stats": {
                "number_of_holdings": num_holdings,
                "number_of_sectors": num_sectors,
                "largest_position_pct": round1(max_position),
                "largest_sector_pct": round1(max_sector),
                "effective_positions": round1(effective_positions),
                "hhi": (hhi * 10000.0).round() / 10000.0,
            },
            "recommendations": recommendations,
            "timestamp": Utc::now().to_rfc3339(),
        });

        Ok(ToolOutput {
            success: true,
            data,
            error: None,
        })
    }
}
