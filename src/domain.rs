use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    Scalper,
    DipBuyer,
    Momentum,
    Rotation,
    Paper,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Scalper => "scalper",
            StrategyKind::DipBuyer => "dipBuyer",
            StrategyKind::Momentum => "momentum",
            StrategyKind::Rotation => "rotation",
            StrategyKind::Paper => "paper",
        }
    }
}

/// A priced route from the aggregator.
///
/// Only valid for a short window after `fetched_at`; never carried across ticks.
#[derive(Debug, Clone)]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    /// base units of the input mint
    pub in_amount: u64,
    /// base units of the output mint
    pub out_amount: u64,
    pub price_impact: f64,
    pub route_hops: usize,
    /// Aggregator payload, sent back verbatim when building the swap.
    pub raw: serde_json::Value,
    pub fetched_at: Instant,
}

impl Quote {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() <= max_age
    }
}

/// One attempted execution, real or simulated. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy_id: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Fraction, not percent.
    #[serde(rename = "priceImpactFraction")]
    pub price_impact: f64,
    pub transaction_ref: Option<String>,
    pub success: bool,
    pub simulated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    #[serde(rename = "takeProfitFraction", default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(rename = "stopLossFraction", default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TradeRecord {
    pub fn from_quote(strategy_id: &str, quote: &Quote) -> Self {
        Self {
            timestamp: Utc::now(),
            strategy_id: strategy_id.to_string(),
            input_mint: quote.input_mint.clone(),
            output_mint: quote.output_mint.clone(),
            in_amount: quote.in_amount,
            out_amount: quote.out_amount,
            price_impact: quote.price_impact,
            transaction_ref: None,
            success: false,
            simulated: false,
            wallet: None,
            take_profit: None,
            stop_loss: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub pass: bool,
    /// Observed price impact of the probe, when a route existed.
    pub impact: Option<f64>,
    pub reasons: Vec<String>,
}

impl SafetyVerdict {
    pub fn pass(impact: f64) -> Self {
        Self { pass: true, impact: Some(impact), reasons: vec![] }
    }

    pub fn reject(impact: Option<f64>, reason: impl Into<String>) -> Self {
        Self { pass: false, impact, reasons: vec![reason.into()] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_fetched(at: Instant) -> Quote {
        Quote {
            input_mint: "SOL".into(),
            output_mint: "A".into(),
            in_amount: 1,
            out_amount: 1,
            price_impact: 0.0,
            route_hops: 1,
            raw: serde_json::Value::Null,
            fetched_at: at,
        }
    }

    #[test]
    fn quote_goes_stale_after_window() {
        let window = Duration::from_secs(30);
        assert!(quote_fetched(Instant::now()).is_fresh(window));

        let old = Instant::now().checked_sub(Duration::from_secs(31)).unwrap();
        let stale = quote_fetched(old);
        assert!(!stale.is_fresh(window));
        assert!(stale.age() >= Duration::from_secs(31));
    }

    #[test]
    fn record_keys_use_fraction_names() {
        let mut rec = TradeRecord::from_quote("s", &quote_fetched(Instant::now()));
        rec.take_profit = Some(0.5);
        rec.stop_loss = Some(0.25);
        let serde_json::Value::Object(map) = serde_json::to_value(&rec).unwrap() else {
            panic!("record is not an object");
        };
        for key in ["priceImpactFraction", "takeProfitFraction", "stopLossFraction", "transactionRef"] {
            assert!(map.contains_key(key), "missing {key}");
        }
        for key in ["priceImpact", "takeProfit", "stopLoss", "notes", "wallet"] {
            assert!(!map.contains_key(key), "unexpected {key}");
        }
    }
}
