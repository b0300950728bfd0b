use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::StrategyKind;
use crate::error::ConfigError;

/// Process-wide settings read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // RPC
    pub rpc_http_url: String,

    // Execution
    pub jupiter_base_url: String,

    // Alerts
    pub slack_webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Persistence
    pub ledger_dir: PathBuf,
    pub heartbeat_log_path: Option<PathBuf>,

    // Runtime
    pub log_json: bool,
    /// Forces dry-run on every strategy when set.
    pub force_dry_run: Option<bool>,
}

fn env_bool(key: &str, default: bool) -> bool {
    env_bool_opt(key).unwrap_or(default)
}

fn env_bool_opt(key: &str) -> Option<bool> {
    match std::env::var(key).ok().map(|s| s.trim().to_lowercase()) {
        None => None,
        Some(v) if v.is_empty() => None,
        Some(v) if v == "1" || v == "true" || v == "yes" || v == "y" || v == "on" => Some(true),
        Some(v) if v == "0" || v == "false" || v == "no" || v == "n" || v == "off" => Some(false),
        Some(_) => None,
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let rpc_http_url = env_nonempty("SOLANA_RPC_URL")
            .unwrap_or_else(|| "https://api.mainnet-beta.solana.com".to_string());
        let jupiter_base_url = env_nonempty("JUPITER_BASE_URL")
            .unwrap_or_else(|| "https://api.jup.ag/swap/v1".to_string());

        let slack_webhook_url = env_nonempty("SLACK_WEBHOOK_URL");
        let telegram_bot_token = env_nonempty("TELEGRAM_BOT_TOKEN");
        let telegram_chat_id = env_nonempty("TELEGRAM_CHAT_ID");

        let ledger_dir = env_nonempty("LEDGER_DIR").unwrap_or_else(|| "./logs".to_string()).into();
        let heartbeat_log_path = env_nonempty("HEARTBEAT_LOG").map(PathBuf::from);

        Self {
            rpc_http_url,
            jupiter_base_url,
            slack_webhook_url,
            telegram_bot_token,
            telegram_chat_id,
            ledger_dir,
            heartbeat_log_path,
            log_json: env_bool("LOG_JSON", false),
            force_dry_run: env_bool_opt("DRY_RUN"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RotationPolicy {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SafetyParams {
    pub probe_amount_lamports: u64,
    pub max_impact_fraction: f64,
    /// Minimum probe output, in base units of the target mint.
    pub min_probe_output: u64,
}

impl Default for SafetyParams {
    fn default() -> Self {
        Self {
            probe_amount_lamports: 5_000_000,
            max_impact_fraction: 0.05,
            min_probe_output: 5_000_000,
        }
    }
}

/// Strategy config file as written by the operator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawStrategyConfig {
    strategy_id: Option<String>,
    kind: Option<StrategyKind>,
    input_mint: Option<String>,
    output_mint: Option<String>,
    #[serde(default)]
    monitored_tokens: Vec<String>,
    slippage_fraction: Option<f64>,
    max_slippage_bps: Option<u64>,
    position_size_lamports: Option<u64>,
    tick_interval_ms: Option<u64>,
    cooldown_ms: Option<u64>,
    max_daily_volume_lamports: Option<u64>,
    halt_on_failures: Option<u32>,
    max_open_trades: Option<usize>,
    min_balance_lamports: Option<u64>,
    dry_run: Option<bool>,
    take_profit_fraction: Option<f64>,
    stop_loss_fraction: Option<f64>,
    #[serde(default)]
    wallet_keys: Vec<String>,
    wallet_dir: Option<PathBuf>,
    rotation: Option<RotationPolicy>,
    count_no_route_as_failure: Option<bool>,
    quote_max_age_ms: Option<u64>,
    confirm_timeout_ms: Option<u64>,
    simulate_before_send: Option<bool>,
    max_priority_fee_micro_lamports: Option<u64>,
    safety: Option<SafetyParams>,
    ledger_retention: Option<usize>,
    daily_reset_timezone: Option<String>,
}

/// Validated, immutable configuration for one strategy run.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub strategy_id: String,
    pub kind: StrategyKind,
    pub input_mint: String,
    /// Output mint first (if any), then monitored tokens, deduplicated.
    pub targets: Vec<String>,
    pub slippage_fraction: f64,
    pub max_slippage_bps: u64,
    pub position_size_lamports: u64,
    pub tick_interval_ms: u64,
    pub cooldown_ms: u64,
    pub max_daily_volume_lamports: u64,
    /// 0 disables the halt.
    pub halt_on_failures: u32,
    pub max_open_trades: Option<usize>,
    pub min_balance_lamports: u64,
    pub dry_run: bool,
    pub take_profit_fraction: Option<f64>,
    pub stop_loss_fraction: Option<f64>,
    pub wallet_keys: Vec<String>,
    pub wallet_dir: Option<PathBuf>,
    pub rotation: RotationPolicy,
    pub count_no_route_as_failure: bool,
    pub quote_max_age_ms: u64,
    pub confirm_timeout_ms: u64,
    pub simulate_before_send: bool,
    pub max_priority_fee_micro_lamports: u64,
    pub safety: SafetyParams,
    pub ledger_retention: Option<usize>,
    pub daily_reset_timezone: Option<String>,
}

impl StrategyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_json(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path: path.to_path_buf(), source },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let parsed: RawStrategyConfig = serde_json::from_str(raw)
            .map_err(|source| ConfigError::Parse { path: PathBuf::from("<inline>"), source })?;
        Self::validate(parsed)
    }

    fn validate(raw: RawStrategyConfig) -> Result<Self, ConfigError> {
        let strategy_id = raw
            .strategy_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("strategyId"))?;
        if strategy_id.contains(['/', '\\']) || strategy_id.starts_with('.') {
            return Err(ConfigError::Invalid {
                field: "strategyId",
                message: "must be usable as a file name".into(),
            });
        }

        let input_mint = raw
            .input_mint
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("inputMint"))?;

        let mut targets: Vec<String> = Vec::new();
        for mint in raw.output_mint.into_iter().chain(raw.monitored_tokens) {
            let mint = mint.trim().to_string();
            if !mint.is_empty() && !targets.contains(&mint) {
                targets.push(mint);
            }
        }
        if targets.is_empty() {
            return Err(ConfigError::Missing("outputMint or monitoredTokens"));
        }

        let position_size_lamports = raw
            .position_size_lamports
            .ok_or(ConfigError::Missing("positionSizeLamports"))?;
        if position_size_lamports == 0 {
            return Err(ConfigError::Invalid {
                field: "positionSizeLamports",
                message: "must be > 0".into(),
            });
        }

        if raw.wallet_keys.is_empty() && raw.wallet_dir.is_none() {
            return Err(ConfigError::Missing("walletKeys or walletDir"));
        }

        let slippage_fraction = raw.slippage_fraction.unwrap_or(0.01);
        let max_slippage_bps = raw.max_slippage_bps.unwrap_or(300);
        let slippage_bps = fraction_to_bps(slippage_fraction);
        if !(slippage_fraction > 0.0) || slippage_bps == 0 || slippage_bps > max_slippage_bps {
            return Err(ConfigError::Invalid {
                field: "slippageFraction",
                message: format!("{slippage_fraction} must map to 1..={max_slippage_bps} bps"),
            });
        }

        let tick_interval_ms = raw.tick_interval_ms.unwrap_or(60_000);
        if tick_interval_ms == 0 {
            return Err(ConfigError::Invalid { field: "tickIntervalMs", message: "must be > 0".into() });
        }

        let safety = raw.safety.unwrap_or_default();
        if !(safety.max_impact_fraction >= 0.0) || safety.probe_amount_lamports == 0 {
            return Err(ConfigError::Invalid {
                field: "safety",
                message: "probeAmountLamports must be > 0 and maxImpactFraction >= 0".into(),
            });
        }

        for (field, v) in [
            ("takeProfitFraction", raw.take_profit_fraction),
            ("stopLossFraction", raw.stop_loss_fraction),
        ] {
            if let Some(v) = v {
                if !(v > 0.0) {
                    return Err(ConfigError::Invalid { field, message: format!("{v} must be > 0") });
                }
            }
        }

        if let Some(tz) = raw.daily_reset_timezone.as_deref() {
            if tz.parse::<chrono_tz::Tz>().is_err() {
                return Err(ConfigError::Invalid {
                    field: "dailyResetTimezone",
                    message: format!("unknown timezone {tz}"),
                });
            }
        }

        Ok(Self {
            strategy_id,
            kind: raw.kind.unwrap_or(StrategyKind::Scalper),
            input_mint,
            targets,
            slippage_fraction,
            max_slippage_bps,
            position_size_lamports,
            tick_interval_ms,
            cooldown_ms: raw.cooldown_ms.unwrap_or(0),
            max_daily_volume_lamports: raw.max_daily_volume_lamports.unwrap_or(u64::MAX),
            halt_on_failures: raw.halt_on_failures.unwrap_or(3),
            max_open_trades: raw.max_open_trades,
            min_balance_lamports: raw.min_balance_lamports.unwrap_or(10_000_000),
            dry_run: raw.dry_run.unwrap_or(true),
            take_profit_fraction: raw.take_profit_fraction,
            stop_loss_fraction: raw.stop_loss_fraction,
            wallet_keys: raw.wallet_keys,
            wallet_dir: raw.wallet_dir,
            rotation: raw.rotation.unwrap_or_default(),
            count_no_route_as_failure: raw.count_no_route_as_failure.unwrap_or(false),
            quote_max_age_ms: raw.quote_max_age_ms.unwrap_or(30_000),
            confirm_timeout_ms: raw.confirm_timeout_ms.unwrap_or(60_000),
            simulate_before_send: raw.simulate_before_send.unwrap_or(true),
            max_priority_fee_micro_lamports: raw.max_priority_fee_micro_lamports.unwrap_or(50_000),
            safety,
            ledger_retention: raw.ledger_retention.filter(|n| *n > 0),
            daily_reset_timezone: raw.daily_reset_timezone,
        })
    }

    pub fn slippage_bps(&self) -> u64 {
        fraction_to_bps(self.slippage_fraction)
    }
}

/// 0.01 => 100 bps
pub fn fraction_to_bps(fraction: f64) -> u64 {
    if !fraction.is_finite() || fraction <= 0.0 {
        return 0;
    }
    (fraction * 10_000.0).round() as u64
}
