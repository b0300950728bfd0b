use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use solana_autotrader::config::{Config, StrategyConfig};
use solana_autotrader::engine::{self, EngineDeps, StrategyEngine};
use solana_autotrader::gateway::{ExecutionParams, SolanaGateway};
use solana_autotrader::ledger::TradeLedger;
use solana_autotrader::logger;
use solana_autotrader::notifier::{Notifier, Notify};
use solana_autotrader::safety::ImpactThresholdGuard;
use solana_autotrader::signal::StaticTargets;
use solana_autotrader::wallet::{KeySource, WalletPool};

#[derive(Debug, Parser)]
#[command(name = "autotrader", about = "Risk-gated swap loop over the Jupiter aggregator")]
struct Cli {
    /// Strategy config (JSON)
    #[arg(long, short)]
    config: PathBuf,

    /// Print the ledger summary for the strategy and exit
    #[arg(long)]
    summary: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load local .env if present (no-op in prod/systemd envs)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let env = Config::from_env();
    logger::init_tracing(env.log_json);

    let mut cfg = match StrategyConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, path = %cli.config.display(), "config.invalid");
            std::process::exit(2);
        }
    };
    if let Some(dry_run) = env.force_dry_run {
        cfg.dry_run = dry_run;
    }
    info!(strategy = %cfg.strategy_id, kind = cfg.kind.as_str(), dry_run = cfg.dry_run, "boot");

    let ledger = TradeLedger::new(&env.ledger_dir, &cfg.strategy_id, cfg.ledger_retention);
    if cli.summary {
        let summary = ledger.summary()?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let gateway = Arc::new(SolanaGateway::new(
        env.rpc_http_url.clone(),
        env.jupiter_base_url.clone(),
        ExecutionParams::from_strategy(&cfg),
    )?);

    let mut sources: Vec<KeySource> = cfg.wallet_keys.iter().cloned().map(KeySource::Inline).collect();
    if let Some(dir) = &cfg.wallet_dir {
        sources.push(KeySource::Dir(dir.clone()));
    }
    let pool = match WalletPool::load(&sources, cfg.rotation, gateway.clone()) {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "config.wallets");
            std::process::exit(2);
        }
    };

    let notifier: Arc<dyn Notify> = Arc::new(Notifier::new(
        env.slack_webhook_url.clone(),
        env.telegram_bot_token.clone(),
        env.telegram_chat_id.clone(),
    ));

    let deps = EngineDeps {
        gateway: gateway.clone(),
        pool,
        safety: Box::new(ImpactThresholdGuard::new(
            cfg.input_mint.clone(),
            cfg.slippage_bps(),
            cfg.safety.clone(),
        )),
        signals: Box::new(StaticTargets::new(cfg.targets.clone())),
        ledger: ledger.clone(),
        notifier: notifier.clone(),
        heartbeat_log_path: env.heartbeat_log_path.clone(),
    };

    let ledger_for_summary = ledger;
    let handle = engine::start(StrategyEngine::new(cfg, deps));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, letting the current tick finish");
    let status = handle.stop().await;
    info!(?status, "shutdown complete");
    match ledger_for_summary.summary() {
        Ok(summary) => {
            info!(?summary, "ledger.summary");
            if let Err(err) = notifier.alert(&summary.alert_text(&status.strategy_id)).await {
                warn!(error = %err, "notifier.summary.failed");
            }
        }
        Err(err) => error!(error = %err, "ledger.summary.failed"),
    }

    Ok(())
}
