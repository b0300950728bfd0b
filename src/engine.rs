use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StrategyConfig;
use crate::domain::TradeRecord;
use crate::error::SkipReason;
use crate::gateway::SwapGateway;
use crate::ledger::TradeLedger;
use crate::logger;
use crate::notifier::{fire_and_forget, Notify};
use crate::risk::{OpenPosition, RiskParams, RiskState};
use crate::safety::SafetyChecker;
use crate::signal::SignalSource;
use crate::time;
use crate::wallet::WalletPool;

/// Collaborators a run is built from. Each run owns its own set.
pub struct EngineDeps {
    pub gateway: Arc<dyn SwapGateway>,
    pub pool: WalletPool,
    pub safety: Box<dyn SafetyChecker>,
    pub signals: Box<dyn SignalSource>,
    pub ledger: TradeLedger,
    pub notifier: Arc<dyn Notify>,
    pub heartbeat_log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Skipped(SkipReason),
    Simulated(TradeRecord),
    Executed(TradeRecord),
    Failed(TradeRecord),
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    /// The halt check short-circuited the whole tick.
    pub halted: bool,
    pub attempts: Vec<(String, AttemptOutcome)>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunStatus {
    pub strategy_id: String,
    pub running: bool,
    pub halted: bool,
    pub today_volume: u64,
    pub consecutive_failures: u32,
    pub open_positions: usize,
    pub ticks: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// All mutable state of one strategy run.
pub struct StrategyEngine {
    cfg: StrategyConfig,
    params: RiskParams,
    risk: RiskState,
    gateway: Arc<dyn SwapGateway>,
    pool: WalletPool,
    safety: Box<dyn SafetyChecker>,
    signals: Box<dyn SignalSource>,
    ledger: TradeLedger,
    notifier: Arc<dyn Notify>,
    heartbeat_log_path: Option<PathBuf>,
    ticks: u64,
    last_tick_at: Option<DateTime<Utc>>,
}

impl StrategyEngine {
    pub fn new(cfg: StrategyConfig, deps: EngineDeps) -> Self {
        let params = RiskParams::from_strategy(&cfg);
        let day_key = params
            .daily_reset_timezone
            .as_deref()
            .and_then(|tz| time::day_key(tz).ok());
        Self {
            cfg,
            params,
            risk: RiskState::new(day_key),
            gateway: deps.gateway,
            pool: deps.pool,
            safety: deps.safety,
            signals: deps.signals,
            ledger: deps.ledger,
            notifier: deps.notifier,
            heartbeat_log_path: deps.heartbeat_log_path,
            ticks: 0,
            last_tick_at: None,
        }
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    /// Releases the open slot held by `mint`, if any.
    pub fn close_position(&mut self, mint: &str) -> Option<OpenPosition> {
        let closed = self.risk.close_position(mint);
        if let Some(pos) = &closed {
            info!(strategy = %self.cfg.strategy_id, mint, simulated = pos.simulated, "risk.position.closed");
        }
        closed
    }

    pub fn status(&self, running: bool) -> RunStatus {
        RunStatus {
            strategy_id: self.cfg.strategy_id.clone(),
            running,
            halted: self.risk.is_halted(),
            today_volume: self.risk.today_volume,
            consecutive_failures: self.risk.consecutive_failures,
            open_positions: self.risk.open_positions.len(),
            ticks: self.ticks,
            last_tick_at: self.last_tick_at,
        }
    }

    /// One tick with the error boundary: an unexpected error is logged and counted as a failure.
    pub async fn run_tick(&mut self) -> TickReport {
        self.ticks += 1;
        let tick = self.ticks;
        let report = match self.tick(tick).await {
            Ok(report) => report,
            Err(err) => {
                error!(strategy = %self.cfg.strategy_id, tick, error = %err, "engine.tick.error");
                if self.risk.record_failure(&self.params) {
                    self.on_halt();
                }
                TickReport { tick, error: Some(err.to_string()), ..Default::default() }
            }
        };
        self.last_tick_at = Some(Utc::now());
        self.heartbeat(tick);
        report
    }

    async fn tick(&mut self, tick: u64) -> Result<TickReport> {
        let mut report = TickReport { tick, ..Default::default() };

        if let Some(tz) = self.params.daily_reset_timezone.as_deref() {
            match time::day_key(tz) {
                Ok(key) => {
                    if self.risk.roll_day(&key) {
                        info!(strategy = %self.cfg.strategy_id, day = %key, "risk.daily_rollover");
                    }
                }
                Err(err) => warn!(error = %err, "risk.day_key.failed"),
            }
        }

        if self.risk.is_halted() {
            debug!(strategy = %self.cfg.strategy_id, tick, "engine.tick.halted");
            report.halted = true;
            return Ok(report);
        }

        for mint in self.signals.exits().await? {
            self.close_position(&mint);
        }

        let candidates = self.signals.candidates().await?;
        debug!(
            strategy = %self.cfg.strategy_id,
            tick,
            source = self.signals.name(),
            candidates = candidates.len(),
            "engine.tick"
        );

        for mint in candidates {
            let outcome = self.attempt(&mint).await?;
            if let AttemptOutcome::Skipped(reason) = &outcome {
                info!(strategy = %self.cfg.strategy_id, mint = %mint, reason = reason.label(), detail = %reason, "risk.gated");
            }
            report.attempts.push((mint, outcome));
            if self.risk.is_halted() {
                break;
            }
        }
        Ok(report)
    }

    /// Risk gates -> safety -> quote -> execute or dry-run -> ledger -> notify.
    async fn attempt(&mut self, mint: &str) -> Result<AttemptOutcome> {
        let now = time::now_ms();
        if let Err(reason) = self.risk.gate_cadence(&self.params, mint, now) {
            return Ok(AttemptOutcome::Skipped(reason));
        }

        let wallet = self.pool.next()?;
        let balance = self.pool.balance_of(wallet).await?;
        if let Err(reason) = self.risk.gate_capital(&self.params, balance) {
            return Ok(AttemptOutcome::Skipped(reason));
        }

        let verdict = self.safety.is_safe_to_buy(self.gateway.as_ref(), mint).await;
        if !verdict.pass {
            return Ok(AttemptOutcome::Skipped(SkipReason::SafetyRejected {
                mint: mint.to_string(),
                reasons: verdict.reasons.join("; "),
            }));
        }

        let quote = match self
            .gateway
            .get_quote(&self.cfg.input_mint, mint, self.params.position_size_lamports, self.cfg.slippage_bps())
            .await
        {
            Ok(Some(q)) => q,
            Ok(None) => return Ok(self.no_route(mint)),
            Err(err) => {
                warn!(mint, error = %err, "gateway.quote.error");
                return Ok(self.no_route(mint));
            }
        };

        let mut record = TradeRecord::from_quote(&self.cfg.strategy_id, &quote);
        record.wallet = Some(wallet.pubkey().to_string());
        record.take_profit = self.cfg.take_profit_fraction;
        record.stop_loss = self.cfg.stop_loss_fraction;

        let position = OpenPosition {
            mint: mint.to_string(),
            entry_in_amount: quote.in_amount,
            entry_out_amount: quote.out_amount,
            opened_at_ms: now,
            take_profit_pct: self.cfg.take_profit_fraction,
            stop_loss_pct: self.cfg.stop_loss_fraction,
            simulated: self.cfg.dry_run,
        };

        let outcome = if self.cfg.dry_run {
            record.success = true;
            record.simulated = true;
            self.risk.record_success(&self.params, position);
            info!(
                strategy = %self.cfg.strategy_id,
                mint,
                in_amount = quote.in_amount,
                out_amount = quote.out_amount,
                "engine.dry_run"
            );
            AttemptOutcome::Simulated(record.clone())
        } else {
            match self.gateway.execute(&quote, wallet).await {
                Some(sig) => {
                    record.success = true;
                    record.transaction_ref = Some(sig);
                    self.risk.record_success(&self.params, position);
                    AttemptOutcome::Executed(record.clone())
                }
                None => {
                    record.notes = Some("execution failed".into());
                    let halted_now = self.risk.record_failure(&self.params);
                    warn!(
                        strategy = %self.cfg.strategy_id,
                        mint,
                        failures = self.risk.consecutive_failures,
                        "engine.execute.failed"
                    );
                    if halted_now {
                        self.on_halt();
                    }
                    AttemptOutcome::Failed(record.clone())
                }
            }
        };

        self.persist(record.clone()).await;
        fire_and_forget(&self.notifier, trade_alert(&record));
        Ok(outcome)
    }

    fn no_route(&mut self, mint: &str) -> AttemptOutcome {
        if self.params.count_no_route_as_failure && self.risk.record_failure(&self.params) {
            self.on_halt();
        }
        AttemptOutcome::Skipped(SkipReason::NoRouteAvailable { mint: mint.to_string() })
    }

    async fn persist(&self, record: TradeRecord) {
        if let Err(err) = self.ledger.append_async(record).await {
            error!(strategy = %self.cfg.strategy_id, path = %self.ledger.path().display(), error = %err, "ledger.append.failed");
        }
    }

    fn on_halt(&self) {
        error!(
            strategy = %self.cfg.strategy_id,
            failures = self.risk.consecutive_failures,
            threshold = self.params.halt_on_failures,
            "risk.halted"
        );
        fire_and_forget(
            &self.notifier,
            format!(
                "*{}* halted after {} consecutive failures; restart required",
                self.cfg.strategy_id, self.risk.consecutive_failures
            ),
        );
    }

    fn heartbeat(&self, tick: u64) {
        let Some(path) = self.heartbeat_log_path.as_deref() else {
            return;
        };
        let line = logger::heartbeat_line(&self.cfg.strategy_id, tick, self.risk.is_halted());
        if let Err(err) = logger::append_line(path, &line) {
            warn!(error = %err, "engine.heartbeat.failed");
        }
    }
}

fn trade_alert(record: &TradeRecord) -> String {
    let status = match (record.simulated, record.success) {
        (true, _) => "simulated",
        (false, true) => "executed",
        (false, false) => "FAILED",
    };
    let tx = record.transaction_ref.as_deref().unwrap_or("-");
    format!(
        "*{}* swap {status}: {} -> {} in={} out={} tx={tx}",
        record.strategy_id, record.input_mint, record.output_mint, record.in_amount, record.out_amount
    )
}

/// Handle to a running strategy loop.
pub struct RunHandle {
    cancel: CancellationToken,
    status_rx: watch::Receiver<RunStatus>,
    join: JoinHandle<()>,
}

impl RunHandle {
    pub fn status(&self) -> RunStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_rx.clone()
    }

    /// Stops scheduling; an in-flight tick is allowed to finish.
    pub async fn stop(self) -> RunStatus {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            error!(error = %err, "engine.loop.join_failed");
        }
        let status = self.status_rx.borrow().clone();
        status
    }
}

/// Spawns the run loop. The next tick is scheduled `tick_interval_ms` after the previous one completes.
pub fn start(engine: StrategyEngine) -> RunHandle {
    let cancel = CancellationToken::new();
    let (status_tx, status_rx) = watch::channel(engine.status(true));
    let join = tokio::spawn(run_loop(engine, status_tx, cancel.clone()));
    RunHandle { cancel, status_rx, join }
}

async fn run_loop(mut engine: StrategyEngine, status_tx: watch::Sender<RunStatus>, cancel: CancellationToken) {
    let interval = Duration::from_millis(engine.cfg.tick_interval_ms);
    info!(
        strategy = %engine.cfg.strategy_id,
        kind = engine.cfg.kind.as_str(),
        dry_run = engine.cfg.dry_run,
        wallets = engine.pool.len(),
        interval_ms = engine.cfg.tick_interval_ms,
        "engine.start"
    );

    while !cancel.is_cancelled() {
        let report = engine.run_tick().await;
        debug!(tick = report.tick, attempts = report.attempts.len(), halted = report.halted, "engine.tick.done");
        let _ = status_tx.send(engine.status(true));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    let _ = status_tx.send(engine.status(false));
    info!(strategy = %engine.cfg.strategy_id, ticks = engine.ticks, "engine.stopped");
}
