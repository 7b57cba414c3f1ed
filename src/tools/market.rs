//! Market data tools
//!
//! Simulated quotes, index summaries, price history and news. Data is
//! deterministic per symbol so repeated reads differ only in timestamps.

use crate::models::ToolOutput;
use crate::tools::{FieldSpec, InputSchema, Tool};
use crate::Result;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Known symbols with fixed quote data.
const MOCK_QUOTES: &[(&str, f64, f64, u64)] = &[
    ("AAPL", 178.50, 2.35, 58_000_000),
    ("GOOGL", 141.20, -0.80, 22_000_000),
    ("MSFT", 378.90, 4.20, 25_000_000),
    ("AMZN", 178.25, 1.50, 45_000_000),
    ("NVDA", 495.50, 12.30, 52_000_000),
    ("TSLA", 248.75, -5.25, 98_000_000),
    ("META", 505.30, 8.40, 18_000_000),
    ("JPM", 195.80, 1.20, 12_000_000),
    ("V", 280.45, 2.10, 8_000_000),
    ("JNJ", 158.30, -0.45, 7_500_000),
];

fn seed_from(symbol: &str) -> u64 {
    let digest = Sha256::digest(symbol.as_bytes());
    u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Deterministic pseudo-random step in [0, 1).
fn next_unit(seed: &mut u64) -> f64 {
    *seed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    (*seed >> 33) as f64 / (1u64 << 31) as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Quote for a symbol: table lookup for known names, derived otherwise.
fn quote(symbol: &str) -> (f64, f64, u64, bool) {
    for (name, price, change, volume) in MOCK_QUOTES {
        if *name == symbol {
            return (*price, *change, *volume, true);
        }
    }

    let mut seed = seed_from(symbol);
    let price = 50.0 + next_unit(&mut seed) * 450.0;
    let change = next_unit(&mut seed) * 20.0 - 10.0;
    let volume = 1_000_000 + (next_unit(&mut seed) * 99_000_000.0) as u64;
    (round2(price), round2(change), volume, false)
}

//
// ================= get_stock_price =================
//

pub struct GetStockPriceTool;

#[async_trait::async_trait]
impl Tool for GetStockPriceTool {
    fn name(&self) -> &'static str {
        "get_stock_price"
    }

    fn description(&self) -> &'static str {
        "Get current price, change and volume for a stock symbol"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![FieldSpec::string("symbol")])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let symbol = arguments
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();

        let (price, change, volume, known) = quote(&symbol);

        let mut data = json!({
            "symbol": symbol,
            "price": price,
            "change": change,
            "change_percent": round2(change / price * 100.0),
            "volume": volume,
            "timestamp": Utc::now().to_rfc3339(),
            "status": "success",
        });
        if !known {
            data["note"] = json!("Data simulated for demonstration");
        }

        Ok(ToolOutput {
            success: true,
            data,
            error: None,
        })
    }
}

//
// ================= get_market_summary =================
//

pub struct GetMarketSummaryTool;

#[async_trait::async_trait]
impl Tool for GetMarketSummaryTool {
    fn name(&self) -> &'static str {
        "get_market_summary"
    }

    fn description(&self) -> &'static str {
        "Get overall market indices, sentiment and sector performance"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::default()
    }

    async fn execute(&self, _arguments: &Value) -> Result<ToolOutput> {
        let data = json!({
            "indices": {
                "S&P 500": {"value": 5021.84, "change": 25.30, "change_pct": 0.51, "status": "up"},
                "NASDAQ": {"value": 15990.66, "change": 145.80, "change_pct": 0.92, "status": "up"},
                "DOW": {"value": 38996.39, "change": -45.20, "change_pct": -0.12, "status": "down"},
                "Russell 2000": {"value": 2052.30, "change": 12.45, "change_pct": 0.61, "status": "up"},
            },
            "market_sentiment": "bullish",
            "volatility_index": 13.45,
            "fear_greed_index": 68,
            "sector_performance": {
                "Technology": 1.25,
                "Healthcare": 0.45,
                "Financials": 0.32,
                "Consumer Discretionary": 0.88,
                "Energy": -0.75,
                "Utilities": -0.22,
                "Communication Services": 0.95,
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
// ================= get_stock_history =================
//

pub struct GetStockHistoryTool;

fn period_days(period: &str) -> i64 {
    match period {
        "1W" => 7,
        "1M" => 30,
        "3M" => 90,
        "6M" => 180,
        "1Y" => 365,
        "5Y" => 1825,
        _ => 30,
    }
}

#[async_trait::async_trait]
impl Tool for GetStockHistoryTool {
    fn name(&self) -> &'static str {
        "get_stock_history"
    }

    fn description(&self) -> &'static str {
        "Get historical price data and statistics for a stock"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::string("symbol"),
            FieldSpec::string("period").optional(),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let symbol = arguments
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();
        let period = arguments
            .get("period")
            .and_then(Value::as_str)
            .unwrap_or("1M")
            .to_string();

        let days = period_days(&period);
        let mut seed = seed_from(&symbol);
        let mut price = 100.0 + next_unit(&mut seed) * 300.0;
        let now = Utc::now();

        let mut history = Vec::with_capacity(days as usize);
        let mut high = f64::MIN;
        let mut low = f64::MAX;
        let mut sum = 0.0;
        let first = price;

        for i in 0..days {
            let date = (now - Duration::days(days - i)).format("%Y-%m-%d").to_string();
            let step = (next_unit(&mut seed) * 0.065 - 0.03) * price;
            price = (price + step).max(10.0);
            high = high.max(price);
            low = low.min(price);
            sum += price;
            let volume = 5_000_000 + (next_unit(&mut seed) * 75_000_000.0) as u64;
            history.push(json!({
                "date": date,
                "close": round2(price),
                "volume": volume,
            }));
        }

        let period_return = (price - first) / first * 100.0;
        let tail = history.split_off(history.len().saturating_sub(10));

        let data = json!({
            "symbol": symbol,
            "period": period,
            "data_points": days,
            "history": tail,
            "statistics": {
                "period_high": round2(high),
                "period_low": round2(low),
                "period_avg": round2(sum / days as f64),
                "period_return": round2(period_return),
                "volatility": round2(15.0 + next_unit(&mut seed) * 30.0),
            },
            "timestamp": now.to_rfc3339(),
        });

        Ok(ToolOutput {
            success: true,
            data,
            error: None,
        })
    }
}

//
// ================= search_market_news =================
//

pub struct SearchMarketNewsTool;

#[async_trait::async_trait]
impl Tool for SearchMarketNewsTool {
    fn name(&self) -> &'static str {
        "search_market_news"
    }

    fn description(&self) -> &'static str {
        "Search market news and sentiment for a query"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            FieldSpec::string("query"),
            FieldSpec::integer("max_results").optional().min(1.0).max(10.0),
        ])
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(5) as usize;

        let now = Utc::now();
        let templates: [(&str, &str, &str, f64); 5] = [
            ("Market Analysis: {} Shows Strong Momentum", "Financial Times", "positive", 0.95),
            ("What Investors Need to Know About {}", "Bloomberg", "neutral", 0.88),
            ("Breaking: New Developments in {}", "Reuters", "positive", 0.82),
            ("Expert Opinion: {} Faces Challenges", "Wall Street Journal", "negative", 0.75),
            ("Long-term Outlook for {}", "CNBC", "positive", 0.70),
        ];

        let articles: Vec<Value> = templates
            .iter()
            .take(max_results)
            .enumerate()
            .map(|(i, (title, source, sentiment, relevance))| {
                json!({
                    "title": title.replace("{}", query),
                    "source": source,
                    "date": (now - Duration::days(i as i64)).format("%Y-%m-%d").to_string(),
                    "sentiment": sentiment,
                    "relevance_score": relevance,
                })
            })
            .collect();

        let data = json!({
            "query": query,
            "results_count": articles.len(),
            "articles": articles,
            "overall_sentiment": "mixed",
            "timestamp": now.to_rfc3339(),
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
    async fn test_known_symbol_quote() {
        let output = GetStockPriceTool
            .execute(&json!({"symbol": "aapl"}))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.data["symbol"], json!("AAPL"));
        assert_eq!(output.data["price"], json!(178.50));
        assert!(output.data.get("note").is_none());
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_deterministic() {
        let first = GetStockPriceTool
            .execute(&json!({"symbol": "ZZZZ"}))
            .await
            .unwrap();
        let second = GetStockPriceTool
            .execute(&json!({"symbol": "ZZZZ"}))
            .await
            .unwrap();

        // Identical payload apart from the time-varying timestamp.
        assert_eq!(first.data["price"], second.data["price"]);
        assert_eq!(first.data["volume"], second.data["volume"]);
        assert_eq!(first.data["note"], json!("Data simulated for demonstration"));
    }

    #[tokio::test]
    async fn test_history_statistics() {
        let output = GetStockHistoryTool
            .execute(&json!({"symbol": "MSFT", "period": "3M"}))
            .await
            .unwrap();

        assert_eq!(output.data["data_points"], json!(90));
        assert_eq!(output.data["history"].as_array().unwrap().len(), 10);
        let stats = &output.data["statistics"];
        assert!(stats["period_high"].as_f64().unwrap() >= stats["period_low"].as_f64().unwrap());
    }

    #[tokio::test]
    async fn test_news_respects_max_results() {
        let output = SearchMarketNewsTool
            .execute(&json!({"query": "AAPL earnings", "max_results": 2}))
            .await
            .unwrap();

        assert_eq!(output.data["results_count"], json!(2));
        let first_title = output.data["articles"][0]["title"].as_str().unwrap();
        assert!(first_title.contains("AAPL earnings"));
    }
}
