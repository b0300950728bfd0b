use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine as _;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::TransactionStatus;
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::domain::Quote;
use crate::jupiter::{ensure_slippage_bounds, JupiterClient, QuoteRequest, SwapRequest};
use crate::wallet::{BalanceSource, TradeSigner};

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Quote and execution boundary toward the aggregator and the chain.
#[async_trait]
pub trait SwapGateway: Send + Sync {
    /// `Ok(None)` is a normal "no route"; `Err` is a transport/decode problem.
    async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u64,
    ) -> Result<Option<Quote>>;

    /// Returns the confirmed signature, or `None` when any step failed.
    async fn execute(&self, quote: &Quote, signer: &dyn TradeSigner) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct ExecutionParams {
    pub max_slippage_bps: u64,
    pub quote_max_age: Duration,
    pub confirm_timeout: Duration,
    pub simulate_before_send: bool,
    pub max_priority_fee_micro_lamports: u64,
}

impl ExecutionParams {
    pub fn from_strategy(cfg: &StrategyConfig) -> Self {
        Self {
            max_slippage_bps: cfg.max_slippage_bps,
            quote_max_age: Duration::from_millis(cfg.quote_max_age_ms),
            confirm_timeout: Duration::from_millis(cfg.confirm_timeout_ms),
            simulate_before_send: cfg.simulate_before_send,
            max_priority_fee_micro_lamports: cfg.max_priority_fee_micro_lamports,
        }
    }
}

pub struct SolanaGateway {
    rpc: RpcClient,
    jup: JupiterClient,
    params: ExecutionParams,
}

impl SolanaGateway {
    pub fn new(rpc_url: String, jupiter_base_url: String, params: ExecutionParams) -> Result<Self> {
        let rpc = RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed());
        let jup = JupiterClient::new(jupiter_base_url)?;
        Ok(Self { rpc, jup, params })
    }

    /// Jupiter swap tx -> sign -> simulateTransaction -> send -> confirm.
    async fn try_execute(&self, quote: &Quote, signer: &dyn TradeSigner) -> Result<String> {
        if !quote.is_fresh(self.params.quote_max_age) {
            return Err(anyhow!(
                "quote is {}ms old (max {}ms), refusing to execute",
                quote.age().as_millis(),
                self.params.quote_max_age.as_millis()
            ));
        }

        // 1) Priority fee (best-effort)
        let compute_unit_price_micro_lamports = match self.dynamic_priority_fee_micro_lamports().await {
            Ok(fee) => Some(fee),
            Err(err) => {
                debug!(error = %err, "gateway.priority_fee.unavailable");
                None
            }
        };

        // 2) Swap tx from Jupiter
        let swap = self
            .jup
            .swap(&SwapRequest {
                quote_response: quote.raw.clone(),
                user_public_key: signer.public_identity().to_string(),
                wrap_and_unwrap_sol: Some(true),
                dynamic_compute_unit_limit: Some(true),
                compute_unit_price_micro_lamports,
            })
            .await
            .map_err(|e| anyhow!("build: {e}"))?;

        let tx_bytes = base64::engine::general_purpose::STANDARD
            .decode(swap.swap_transaction)
            .map_err(|e| anyhow!("build: bad base64: {e}"))?;

        // 3) Sign
        let signed = signer.sign(&tx_bytes).map_err(|e| anyhow!("sign: {e}"))?;
        let vtx: VersionedTransaction =
            bincode::deserialize(&signed).map_err(|e| anyhow!("sign: {e}"))?;

        // 4) simulateTransaction
        if self.params.simulate_before_send {
            let sim = self
                .rpc
                .simulate_transaction_with_config(
                    &vtx,
                    RpcSimulateTransactionConfig {
                        sig_verify: false,
                        replace_recent_blockhash: true,
                        commitment: Some(CommitmentConfig::processed()),
                        ..RpcSimulateTransactionConfig::default()
                    },
                )
                .await
                .map_err(|e| anyhow!("simulate: {e}"))?;

            if let Some(err) = sim.value.err {
                return Err(anyhow!("simulate: {err:?}"));
            }
        }

        // 5) Send
        let sig = self
            .rpc
            .send_transaction_with_config(
                &vtx,
                send_config(self.params.simulate_before_send),
            )
            .await
            .map_err(|e| anyhow!("submit: {e}"))?;

        info!(signature = %sig, "gateway.submitted");

        // 6) Confirm, bounded
        match tokio::time::timeout(
            self.params.confirm_timeout,
            self.await_confirmation(&sig, swap.last_valid_block_height),
        )
        .await
        {
            Ok(res) => res.map_err(|e| anyhow!("confirm: {e}"))?,
            Err(_) => {
                return Err(anyhow!(
                    "confirm: timed out after {}ms ({sig})",
                    self.params.confirm_timeout.as_millis()
                ))
            }
        }

        Ok(sig.to_string())
    }

    async fn await_confirmation(&self, sig: &Signature, last_valid_block_height: Option<u64>) -> Result<()> {
        let commitment = CommitmentConfig::confirmed();
        loop {
            let statuses = self.rpc.get_signature_statuses(&[*sig]).await?;
            if let Some(Some(status)) = statuses.value.first() {
                if settled(status, commitment)? {
                    return Ok(());
                }
            } else if let Some(last_valid) = last_valid_block_height {
                let height = self.rpc.get_block_height().await?;
                if height > last_valid {
                    return Err(anyhow!("blockhash expired at height {height} (last valid {last_valid})"));
                }
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }

    /// Best-effort dynamic priority fee.
    ///
    /// Returns micro-lamports per CU.
    async fn dynamic_priority_fee_micro_lamports(&self) -> Result<u64> {
        // Not all RPCs support getRecentPrioritizationFees.
        let fees = self.rpc.get_recent_prioritization_fees(&[]).await?;
        let Some(p) = fees.iter().map(|f| f.prioritization_fee).max() else {
            return Ok(0);
        };
        Ok(p.clamp(1, self.params.max_priority_fee_micro_lamports.max(1)))
    }
}

/// Preflight is skipped when the tx was already simulated. Rebroadcast is left to the node.
fn send_config(already_simulated: bool) -> RpcSendTransactionConfig {
    RpcSendTransactionConfig {
        skip_preflight: already_simulated,
        preflight_commitment: Some(CommitmentConfig::processed().commitment),
        max_retries: None,
        ..RpcSendTransactionConfig::default()
    }
}

/// `Ok(true)` once the status reaches `commitment`; an on-chain error is terminal.
fn settled(status: &TransactionStatus, commitment: CommitmentConfig) -> Result<bool> {
    if let Some(err) = &status.err {
        return Err(anyhow!("transaction failed on chain: {err:?}"));
    }
    Ok(status.satisfies_commitment(commitment))
}

#[async_trait]
impl SwapGateway for SolanaGateway {
    async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u64,
    ) -> Result<Option<Quote>> {
        ensure_slippage_bounds(slippage_bps, self.params.max_slippage_bps)?;
        self.jup
            .quote(&QuoteRequest::exact_in(input_mint, output_mint, amount, slippage_bps))
            .await
    }

    async fn execute(&self, quote: &Quote, signer: &dyn TradeSigner) -> Option<String> {
        info!(
            input = %quote.input_mint,
            output = %quote.output_mint,
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            signer = %signer.public_identity(),
            "gateway.execute"
        );
        match self.try_execute(quote, signer).await {
            Ok(sig) => {
                info!(signature = %sig, "gateway.execute.confirmed");
                Some(sig)
            }
            Err(err) => {
                warn!(error = %err, output = %quote.output_mint, "gateway.execute.failed");
                None
            }
        }
    }
}

#[async_trait]
impl BalanceSource for SolanaGateway {
    async fn balance_of(&self, owner: &Pubkey) -> Result<u64> {
        Ok(self.rpc.get_balance(owner).await?)
    }
}
