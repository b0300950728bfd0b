use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::TradeRecord;
use crate::error::LedgerError;

/// Per-strategy append-only JSON-lines trade log.
#[derive(Debug, Clone)]
pub struct TradeLedger {
    path: PathBuf,
    retention: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub real: usize,
    pub simulated: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub in_amount_total: u64,
    pub out_amount_total: u64,
}

impl LedgerSummary {
    pub fn alert_text(&self, strategy_id: &str) -> String {
        format!(
            "*{strategy_id}* summary: {} trades ({} real, {} simulated), {} ok / {} failed, in={} out={}",
            self.total,
            self.real,
            self.simulated,
            self.succeeded,
            self.failed,
            self.in_amount_total,
            self.out_amount_total
        )
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io { path: path.to_path_buf(), source }
}

impl TradeLedger {
    pub fn new(dir: impl AsRef<Path>, strategy_id: &str, retention: Option<usize>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{strategy_id}.jsonl")),
            retention,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends and fsyncs one record, then trims if a retention bound is set.
    pub fn append(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut f = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err(&self.path))?;

        // A torn previous write leaves no trailing newline; start fresh so it stays isolated.
        if !ends_with_newline(&mut f).map_err(io_err(&self.path))? {
            f.write_all(b"\n").map_err(io_err(&self.path))?;
        }
        f.write_all(&line).map_err(io_err(&self.path))?;
        f.sync_data().map_err(io_err(&self.path))?;
        drop(f);

        if let Some(keep) = self.retention {
            self.trim(keep)?;
        }
        Ok(())
    }

    /// Full history in write order. Unparseable lines are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<TradeRecord>, LedgerError> {
        let f = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_err(&self.path)(e)),
        };

        let mut out = Vec::new();
        for (lineno, line) in BufReader::new(f).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(err) => {
                    warn!(path = %self.path.display(), line = lineno + 1, error = %err, "ledger.read.invalid_line");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(&line) {
                Ok(rec) => out.push(rec),
                Err(err) => {
                    warn!(path = %self.path.display(), line = lineno + 1, error = %err, "ledger.read.invalid_line")
                }
            }
        }
        Ok(out)
    }

    pub fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        Ok(summarize(&self.read_all()?))
    }

    /// Rewrites the store via temp file + rename so readers never see a half-trimmed file.
    fn trim(&self, keep: usize) -> Result<(), LedgerError> {
        let records = self.read_all()?;
        if records.len() <= keep {
            return Ok(());
        }
        let tail = &records[records.len() - keep..];

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut f = File::create(&tmp).map_err(io_err(&tmp))?;
            for rec in tail {
                let mut line = serde_json::to_vec(rec)?;
                line.push(b'\n');
                f.write_all(&line).map_err(io_err(&tmp))?;
            }
            f.sync_all().map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!(path = %self.path.display(), dropped = records.len() - keep, "ledger.trimmed");
        Ok(())
    }

    pub async fn append_async(&self, record: TradeRecord) -> Result<(), LedgerError> {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || ledger.append(&record))
            .await
            .map_err(|e| LedgerError::Join(e.to_string()))?
    }

    pub async fn read_all_async(&self) -> Result<Vec<TradeRecord>, LedgerError> {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || ledger.read_all())
            .await
            .map_err(|e| LedgerError::Join(e.to_string()))?
    }
}

fn ends_with_newline(f: &mut File) -> std::io::Result<bool> {
    let len = f.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    f.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    f.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

pub fn summarize(records: &[TradeRecord]) -> LedgerSummary {
    let mut s = LedgerSummary { total: records.len(), ..Default::default() };
    for r in records {
        if r.simulated {
            s.simulated += 1;
        } else {
            s.real += 1;
        }
        if r.success {
            s.succeeded += 1;
            s.in_amount_total = s.in_amount_total.saturating_add(r.in_amount);
            s.out_amount_total = s.out_amount_total.saturating_add(r.out_amount);
        } else {
            s.failed += 1;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(n: u64, success: bool, simulated: bool) -> TradeRecord {
        TradeRecord {
            timestamp: Utc::now(),
            strategy_id: "s".into(),
            input_mint: "SOL".into(),
            output_mint: "USDC".into(),
            in_amount: n,
            out_amount: n * 2,
            price_impact: 0.25,
            transaction_ref: if success && !simulated { Some(format!("sig{n}")) } else { None },
            success,
            simulated,
            wallet: None,
            take_profit: None,
            stop_loss: None,
            notes: None,
        }
    }

    #[test]
    fn reads_back_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path(), "s", None);
        assert!(ledger.read_all().unwrap().is_empty());

        let written: Vec<_> = (1..=5).map(|n| record(n, true, false)).collect();
        for (i, r) in written.iter().enumerate() {
            ledger.append(r).unwrap();
            assert_eq!(ledger.read_all().unwrap(), written[..=i].to_vec());
        }
    }

    #[test]
    fn torn_trailing_write_is_ignored_and_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path(), "s", None);
        ledger.append(&record(1, true, false)).unwrap();
        ledger.append(&record(2, true, false)).unwrap();

        let mut f = OpenOptions::new().append(true).open(ledger.path()).unwrap();
        f.write_all(br#"{"timestamp":"2030-01-01T00:00:00Z","strategyId":"s","inpu"#).unwrap();
        drop(f);

        let after_crash = ledger.read_all().unwrap();
        assert_eq!(after_crash.len(), 2);

        ledger.append(&record(3, false, false)).unwrap();
        let recovered = ledger.read_all().unwrap();
        assert_eq!(recovered.iter().map(|r| r.in_amount).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn stored_lines_use_fraction_keys() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path(), "s", None);
        let mut rec = record(1, true, false);
        rec.take_profit = Some(0.5);
        ledger.append(&rec).unwrap();

        let raw = fs::read_to_string(ledger.path()).unwrap();
        let line: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(line["priceImpactFraction"], serde_json::json!(0.25));
        assert_eq!(line["takeProfitFraction"], serde_json::json!(0.5));
        assert!(line.get("priceImpact").is_none());
    }

    #[test]
    fn retention_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path(), "s", Some(3));
        for n in 1..=5 {
            ledger.append(&record(n, true, false)).unwrap();
        }
        let kept: Vec<u64> = ledger.read_all().unwrap().iter().map(|r| r.in_amount).collect();
        assert_eq!(kept, vec![3, 4, 5]);
        assert!(!ledger.path().with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn separate_strategies_use_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = TradeLedger::new(dir.path(), "a", None);
        let b = TradeLedger::new(dir.path(), "b", None);
        a.append(&record(1, true, false)).unwrap();
        assert_eq!(a.read_all().unwrap().len(), 1);
        assert!(b.read_all().unwrap().is_empty());
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path().join("nested/logs"), "s", None);
        ledger.append(&record(1, true, true)).unwrap();
        assert_eq!(ledger.read_all().unwrap().len(), 1);
    }

    #[test]
    fn summary_splits_real_and_simulated() {
        let s = summarize(&[record(1, true, false), record(2, false, false), record(3, true, true)]);
        assert_eq!(s.total, 3);
        assert_eq!(s.real, 2);
        assert_eq!(s.simulated, 1);
        assert_eq!(s.succeeded, 2);
        assert_eq!(s.failed, 1);
        assert_eq!(s.in_amount_total, 4);
        assert_eq!(s.out_amount_total, 8);
        assert_eq!(
            s.alert_text("s"),
            "*s* summary: 3 trades (2 real, 1 simulated), 2 ok / 1 failed, in=4 out=8"
        );
    }

    #[tokio::test]
    async fn async_wrappers_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path(), "s", None);
        ledger.append_async(record(7, true, true)).await.unwrap();
        assert_eq!(ledger.read_all_async().await.unwrap()[0].in_amount, 7);
    }
}
