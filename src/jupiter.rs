use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::domain::Quote;

#[derive(Clone)]
pub struct JupiterClient {
    base_url: String,
    http: Client,
}

impl JupiterClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// `Ok(None)` when the aggregator has no route for the pair.
    pub async fn quote(&self, req: &QuoteRequest) -> Result<Option<Quote>> {
        let url = format!("{}/quote", self.base_url);
        let resp = self.http.get(url).query(req).send().await?;

        // Jupiter answers 400 with COULD_NOT_FIND_ANY_ROUTE / TOKEN_NOT_TRADABLE.
        if resp.status() == StatusCode::BAD_REQUEST {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            if is_no_route_error(&body) {
                return Ok(None);
            }
            return Err(anyhow!("quote rejected: {body}"));
        }

        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_quote(body)
    }

    pub async fn swap(&self, req: &SwapRequest) -> Result<SwapResponse> {
        let url = format!("{}/swap", self.base_url);
        let resp = self
            .http
            .post(url)
            .json(req)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

fn is_no_route_error(body: &serde_json::Value) -> bool {
    let code = body.get("errorCode").and_then(|c| c.as_str()).unwrap_or_default();
    matches!(code, "COULD_NOT_FIND_ANY_ROUTE" | "TOKEN_NOT_TRADABLE" | "NO_ROUTES_FOUND")
}

/// Accepts the v6 object shape as well as the legacy `[route, ...]` / `{data: [...]}` shapes.
pub fn parse_quote(body: serde_json::Value) -> Result<Option<Quote>> {
    let route = match body {
        serde_json::Value::Array(mut routes) => {
            if routes.is_empty() {
                return Ok(None);
            }
            routes.swap_remove(0)
        }
        serde_json::Value::Object(ref map) if map.contains_key("data") => {
            match map.get("data").and_then(|d| d.as_array()).and_then(|d| d.first()) {
                Some(first) => first.clone(),
                None => return Ok(None),
            }
        }
        serde_json::Value::Null => return Ok(None),
        other => other,
    };

    let fields: QuoteFields = serde_json::from_value(route.clone())?;
    let out_amount: u64 = fields.out_amount.parse()?;
    if out_amount == 0 {
        return Ok(None);
    }

    Ok(Some(Quote {
        input_mint: fields.input_mint,
        output_mint: fields.output_mint,
        in_amount: fields.in_amount.parse()?,
        out_amount,
        price_impact: fields.price_impact_pct.as_f64()?,
        route_hops: fields.route_plan.len(),
        raw: route,
        fetched_at: Instant::now(),
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequest {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    /// Amount in the input mint's base units (lamports for SOL)
    pub amount: u64,
    #[serde(rename = "slippageBps")]
    pub slippage_bps: u64,
    #[serde(rename = "swapMode")]
    pub swap_mode: &'static str,
    #[serde(rename = "onlyDirectRoutes", skip_serializing_if = "Option::is_none")]
    pub only_direct_routes: Option<bool>,
}

impl QuoteRequest {
    pub fn exact_in(input_mint: &str, output_mint: &str, amount: u64, slippage_bps: u64) -> Self {
        Self {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            amount,
            slippage_bps,
            swap_mode: "ExactIn",
            only_direct_routes: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuoteFields {
    #[serde(rename = "inputMint")]
    input_mint: String,
    #[serde(rename = "outputMint")]
    output_mint: String,
    #[serde(rename = "inAmount")]
    in_amount: String,
    #[serde(rename = "outAmount")]
    out_amount: String,
    #[serde(rename = "priceImpactPct", default)]
    price_impact_pct: Impact,
    #[serde(rename = "routePlan", default)]
    route_plan: Vec<serde_json::Value>,
}

/// Jupiter sends the impact as a decimal string; older endpoints used a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Impact {
    Text(String),
    Number(f64),
}

impl Default for Impact {
    fn default() -> Self {
        Impact::Number(0.0)
    }
}

impl Impact {
    fn as_f64(&self) -> Result<f64> {
        let v = match self {
            Impact::Text(s) => s.trim().parse::<f64>()?,
            Impact::Number(n) => *n,
        };
        if !v.is_finite() || v < 0.0 {
            return Err(anyhow!("invalid priceImpactPct {v}"));
        }
        Ok(v)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    #[serde(rename = "quoteResponse")]
    pub quote_response: serde_json::Value,

    #[serde(rename = "userPublicKey")]
    pub user_public_key: String,

    /// Recommended: true
    #[serde(rename = "wrapAndUnwrapSol", skip_serializing_if = "Option::is_none")]
    pub wrap_and_unwrap_sol: Option<bool>,

    #[serde(rename = "dynamicComputeUnitLimit", skip_serializing_if = "Option::is_none")]
    pub dynamic_compute_unit_limit: Option<bool>,

    /// If provided, Jupiter will include it in the transaction.
    #[serde(rename = "computeUnitPriceMicroLamports", skip_serializing_if = "Option::is_none")]
    pub compute_unit_price_micro_lamports: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResponse {
    /// base64 encoded VersionedTransaction
    #[serde(rename = "swapTransaction")]
    pub swap_transaction: String,

    #[serde(rename = "lastValidBlockHeight", default)]
    pub last_valid_block_height: Option<u64>,
}

pub fn ensure_slippage_bounds(slippage_bps: u64, max_slippage_bps: u64) -> Result<()> {
    if slippage_bps == 0 {
        return Err(anyhow!("slippage_bps cannot be 0"));
    }
    if slippage_bps > max_slippage_bps {
        return Err(anyhow!(
            "slippage_bps ({slippage_bps}) exceeds max_slippage_bps ({max_slippage_bps})"
        ));
    }
    Ok(())
}
