use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::error::SkipReason;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskParams {
    pub position_size_lamports: u64,
    pub cooldown_ms: u64,
    pub max_daily_volume_lamports: u64,
    /// 0 => never halt
    pub halt_on_failures: u32,
    pub max_open_trades: Option<usize>,
    /// Operating floor covering network fees.
    pub min_balance_lamports: u64,
    pub count_no_route_as_failure: bool,
    /// When set, `today_volume` rolls over at midnight in this timezone.
    pub daily_reset_timezone: Option<String>,
}

impl RiskParams {
    pub fn from_strategy(cfg: &StrategyConfig) -> Self {
        Self {
            position_size_lamports: cfg.position_size_lamports,
            cooldown_ms: cfg.cooldown_ms,
            max_daily_volume_lamports: cfg.max_daily_volume_lamports,
            halt_on_failures: cfg.halt_on_failures,
            max_open_trades: cfg.max_open_trades,
            min_balance_lamports: cfg.min_balance_lamports,
            count_no_route_as_failure: cfg.count_no_route_as_failure,
            daily_reset_timezone: cfg.daily_reset_timezone.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BotMode {
    Trading,
    /// Terminal until the process restarts.
    Halted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenPosition {
    pub mint: String,
    pub entry_in_amount: u64,
    pub entry_out_amount: u64,
    pub opened_at_ms: i64,
    pub take_profit_pct: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub simulated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub mode: BotMode,
    pub today_volume: u64,
    pub consecutive_failures: u32,
    pub last_entry_ms: HashMap<String, i64>,
    pub open_positions: Vec<OpenPosition>,
    pub day_key: Option<String>,
}

impl Default for RiskState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RiskState {
    pub fn new(day_key: Option<String>) -> Self {
        Self {
            mode: BotMode::Trading,
            today_volume: 0,
            consecutive_failures: 0,
            last_entry_ms: HashMap::new(),
            open_positions: vec![],
            day_key,
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.mode, BotMode::Halted)
    }

    /// Resets the daily volume when the calendar day changed. Returns true on rollover.
    pub fn roll_day(&mut self, day_key: &str) -> bool {
        match self.day_key.as_deref() {
            Some(current) if current == day_key => false,
            Some(_) => {
                self.day_key = Some(day_key.to_string());
                self.today_volume = 0;
                true
            }
            None => {
                self.day_key = Some(day_key.to_string());
                false
            }
        }
    }

    /// Gates 1-2: halt, then per-token cooldown.
    pub fn gate_cadence(&self, params: &RiskParams, mint: &str, now_ms: i64) -> Result<(), SkipReason> {
        if self.is_halted() {
            return Err(SkipReason::Halted { failures: self.consecutive_failures });
        }
        if let Some(last) = self.last_entry_ms.get(mint) {
            let elapsed = now_ms.saturating_sub(*last).max(0) as u64;
            if elapsed < params.cooldown_ms {
                return Err(SkipReason::Cooldown {
                    mint: mint.to_string(),
                    remaining_ms: params.cooldown_ms - elapsed,
                });
            }
        }
        Ok(())
    }

    /// Gates 3-5: balance floor, daily cap, open-position cap.
    pub fn gate_capital(&self, params: &RiskParams, balance_lamports: u64) -> Result<(), SkipReason> {
        if balance_lamports < params.min_balance_lamports {
            return Err(SkipReason::BalanceInsufficient {
                balance: balance_lamports,
                floor: params.min_balance_lamports,
            });
        }
        let size = params.position_size_lamports;
        if self.today_volume.saturating_add(size) > params.max_daily_volume_lamports {
            return Err(SkipReason::DailyCapExceeded {
                today: self.today_volume,
                size,
                cap: params.max_daily_volume_lamports,
            });
        }
        if let Some(max) = params.max_open_trades {
            if self.open_positions.len() >= max {
                return Err(SkipReason::OpenPositionCap { open: self.open_positions.len(), max });
            }
        }
        Ok(())
    }

    /// Books an entry (real or simulated): volume, cooldown stamp, open position.
    ///
    /// Without an open-position cap only the latest entry per mint is kept.
    pub fn record_entry(&mut self, params: &RiskParams, position: OpenPosition) {
        self.today_volume = self.today_volume.saturating_add(params.position_size_lamports);
        self.last_entry_ms.insert(position.mint.clone(), position.opened_at_ms);
        if params.max_open_trades.is_none() {
            self.open_positions.retain(|p| p.mint != position.mint);
        }
        self.open_positions.push(position);
    }

    pub fn record_success(&mut self, params: &RiskParams, position: OpenPosition) {
        self.consecutive_failures = 0;
        self.record_entry(params, position);
    }

    /// Returns true when this failure tripped the halt.
    pub fn record_failure(&mut self, params: &RiskParams) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if params.halt_on_failures > 0
            && self.consecutive_failures >= params.halt_on_failures
            && !self.is_halted()
        {
            self.mode = BotMode::Halted;
            return true;
        }
        false
    }

    /// Called by the signal side when a position is exited elsewhere.
    pub fn close_position(&mut self, mint: &str) -> Option<OpenPosition> {
        let idx = self.open_positions.iter().position(|p| p.mint == mint)?;
        Some(self.open_positions.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RiskParams {
        RiskParams {
            position_size_lamports: 15_000_000,
            cooldown_ms: 0,
            max_daily_volume_lamports: 20_000_000,
            halt_on_failures: 3,
            max_open_trades: None,
            min_balance_lamports: 10_000_000,
            count_no_route_as_failure: false,
            daily_reset_timezone: None,
        }
    }

    fn position(mint: &str, at: i64) -> OpenPosition {
        OpenPosition {
            mint: mint.into(),
            entry_in_amount: 15_000_000,
            entry_out_amount: 1,
            opened_at_ms: at,
            take_profit_pct: None,
            stop_loss_pct: None,
            simulated: false,
        }
    }

    #[test]
    fn daily_cap_blocks_second_entry() {
        let p = params();
        let mut st = RiskState::default();
        assert!(st.gate_capital(&p, 1_000_000_000).is_ok());
        st.record_success(&p, position("A", 0));
        assert_eq!(st.today_volume, 15_000_000);

        let err = st.gate_capital(&p, 1_000_000_000).unwrap_err();
        assert_eq!(err, SkipReason::DailyCapExceeded { today: 15_000_000, size: 15_000_000, cap: 20_000_000 });
    }

    #[test]
    fn cooldown_is_per_token() {
        let p = RiskParams { cooldown_ms: 60_000, ..params() };
        let mut st = RiskState::default();
        st.record_success(&p, position("A", 1_000));

        assert!(matches!(
            st.gate_cadence(&p, "A", 31_000),
            Err(SkipReason::Cooldown { remaining_ms: 30_000, .. })
        ));
        assert!(st.gate_cadence(&p, "B", 31_000).is_ok());
        assert!(st.gate_cadence(&p, "A", 61_000).is_ok());
    }

    #[test]
    fn balance_floor_checked_before_cap() {
        let p = params();
        let mut st = RiskState::default();
        st.today_volume = 20_000_000;
        assert!(matches!(st.gate_capital(&p, 9_999_999), Err(SkipReason::BalanceInsufficient { .. })));
    }

    #[test]
    fn halt_after_threshold_and_not_self_clearing() {
        let p = params();
        let mut st = RiskState::default();
        assert!(!st.record_failure(&p));
        assert!(!st.record_failure(&p));
        assert!(st.record_failure(&p));
        assert!(st.is_halted());
        assert!(matches!(st.gate_cadence(&p, "A", 0), Err(SkipReason::Halted { failures: 3 })));

        // further failures don't re-trip, and nothing but a new state clears it
        assert!(!st.record_failure(&p));
        st.roll_day("2030-01-01");
        assert!(st.is_halted());
    }

    #[test]
    fn success_resets_failure_streak() {
        let p = RiskParams { max_daily_volume_lamports: u64::MAX, ..params() };
        let mut st = RiskState::default();
        st.record_failure(&p);
        st.record_failure(&p);
        st.record_success(&p, position("A", 0));
        assert_eq!(st.consecutive_failures, 0);
        st.record_failure(&p);
        st.record_failure(&p);
        assert!(!st.is_halted());
    }

    #[test]
    fn zero_threshold_never_halts() {
        let p = RiskParams { halt_on_failures: 0, ..params() };
        let mut st = RiskState::default();
        for _ in 0..10 {
            assert!(!st.record_failure(&p));
        }
        assert!(!st.is_halted());
    }

    #[test]
    fn open_position_cap_and_close() {
        let p = RiskParams { max_open_trades: Some(1), max_daily_volume_lamports: u64::MAX, ..params() };
        let mut st = RiskState::default();
        st.record_success(&p, position("A", 0));
        assert!(matches!(st.gate_capital(&p, u64::MAX), Err(SkipReason::OpenPositionCap { open: 1, max: 1 })));
        assert_eq!(st.close_position("A").map(|p| p.mint), Some("A".to_string()));
        assert!(st.close_position("A").is_none());
        assert!(st.gate_capital(&p, u64::MAX).is_ok());
    }

    #[test]
    fn uncapped_positions_stay_one_per_mint() {
        let p = RiskParams { max_daily_volume_lamports: u64::MAX, ..params() };
        let mut st = RiskState::default();
        for at in 0..5 {
            st.record_entry(&p, position("A", at));
        }
        st.record_entry(&p, position("B", 9));
        assert_eq!(st.open_positions.len(), 2);
        assert_eq!(st.open_positions[0].opened_at_ms, 4);
        assert_eq!(st.today_volume, 6 * 15_000_000);
    }

    #[test]
    fn day_rollover_resets_volume_only() {
        let p = params();
        let mut st = RiskState::new(Some("2030-01-01".into()));
        st.record_success(&p, position("A", 0));
        st.record_failure(&p);
        assert!(!st.roll_day("2030-01-01"));
        assert_eq!(st.today_volume, 15_000_000);
        assert!(st.roll_day("2030-01-02"));
        assert_eq!(st.today_volume, 0);
        assert_eq!(st.consecutive_failures, 1);
        assert_eq!(st.last_entry_ms.get("A"), Some(&0));
    }
}
