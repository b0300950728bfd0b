use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::SafetyParams;
use crate::domain::SafetyVerdict;
use crate::gateway::SwapGateway;

/// Pre-trade liquidity/scam heuristic. Must be re-run for every attempt.
#[async_trait]
pub trait SafetyChecker: Send + Sync {
    async fn is_safe_to_buy(&self, gateway: &dyn SwapGateway, output_mint: &str) -> SafetyVerdict;
}

/// Probes a small quote and rejects missing routes, high impact, or dust output.
#[derive(Debug, Clone)]
pub struct ImpactThresholdGuard {
    pub base_mint: String,
    pub slippage_bps: u64,
    pub params: SafetyParams,
}

impl ImpactThresholdGuard {
    pub fn new(base_mint: impl Into<String>, slippage_bps: u64, params: SafetyParams) -> Self {
        Self { base_mint: base_mint.into(), slippage_bps, params }
    }
}

#[async_trait]
impl SafetyChecker for ImpactThresholdGuard {
    async fn is_safe_to_buy(&self, gateway: &dyn SwapGateway, output_mint: &str) -> SafetyVerdict {
        let probe = gateway
            .get_quote(&self.base_mint, output_mint, self.params.probe_amount_lamports, self.slippage_bps)
            .await;

        let quote = match probe {
            Ok(Some(q)) => q,
            Ok(None) => return SafetyVerdict::reject(None, format!("no route for {output_mint}")),
            Err(err) => {
                warn!(error = %err, mint = output_mint, "safety.probe.error");
                return SafetyVerdict::reject(None, format!("probe failed: {err}"));
            }
        };

        if quote.price_impact > self.params.max_impact_fraction {
            return SafetyVerdict::reject(
                Some(quote.price_impact),
                format!(
                    "price impact {:.2}% above {:.2}%",
                    quote.price_impact * 100.0,
                    self.params.max_impact_fraction * 100.0
                ),
            );
        }

        if quote.out_amount < self.params.min_probe_output {
            return SafetyVerdict::reject(
                Some(quote.price_impact),
                format!("probe output {} below {}", quote.out_amount, self.params.min_probe_output),
            );
        }

        debug!(mint = output_mint, impact = quote.price_impact, out = quote.out_amount, "safety.pass");
        SafetyVerdict::pass(quote.price_impact)
    }
}
