use std::path::Path;
use std::{fs::OpenOptions, io::Write};

use anyhow::Result;
use chrono::{DateTime, Local};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; defaults to `info`.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let res = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = res {
        eprintln!("tracing already initialised: {err}");
    }
}

pub fn append_line(path: impl AsRef<Path>, line: &str) -> Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{line}")?;
    Ok(())
}

pub fn heartbeat_line(strategy_id: &str, tick: u64, halted: bool) -> String {
    let now: DateTime<Local> = Local::now();
    format!("{} heartbeat strategy={strategy_id} tick={tick} halted={halted}", now.to_rfc3339())
}
