use anyhow::Result;
use async_trait::async_trait;

/// Supplies the mints worth trying this tick. Entry signals live behind this trait.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn candidates(&mut self) -> Result<Vec<String>>;

    /// Mints whose positions were exited elsewhere; their open slots are released.
    async fn exits(&mut self) -> Result<Vec<String>> {
        Ok(vec![])
    }
}

/// Proposes every configured target each tick (fixed-interval scalping).
#[derive(Debug, Clone)]
pub struct StaticTargets {
    targets: Vec<String>,
}

impl StaticTargets {
    pub fn new(targets: Vec<String>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl SignalSource for StaticTargets {
    fn name(&self) -> &'static str {
        "static_targets"
    }

    async fn candidates(&mut self) -> Result<Vec<String>> {
        Ok(self.targets.clone())
    }
}
