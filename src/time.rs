use anyhow::{anyhow, Result};
use chrono::Datelike;

/// Returns YYYY-MM-DD in the given timezone.
pub fn day_key(tz: &str) -> Result<String> {
    let tz: chrono_tz::Tz = tz.parse().map_err(|_| anyhow!("invalid tz: {tz}"))?;
    let now = chrono::Utc::now().with_timezone(&tz);
    Ok(format!("{:04}-{:02}-{:02}", now.year(), now.month(), now.day()))
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
