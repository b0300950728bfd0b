use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use tracing::{info, warn};

use crate::config::RotationPolicy;
use crate::error::{ConfigError, WalletError};

const SECRET_KEY_LEN: usize = 64;

/// Signing capability handed to the gateway. Callers never see key material.
pub trait TradeSigner: Send + Sync {
    fn public_identity(&self) -> Pubkey;

    /// Signs a bincode-serialized `VersionedTransaction` and returns it re-serialized.
    fn sign(&self, unsigned_tx: &[u8]) -> Result<Vec<u8>, WalletError>;
}

/// Live balance lookup, in lamports.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance_of(&self, owner: &Pubkey) -> Result<u64>;
}

pub struct Wallet {
    keypair: Keypair,
}

impl Wallet {
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet").field("pubkey", &self.pubkey()).finish()
    }
}

impl TradeSigner for Wallet {
    fn public_identity(&self) -> Pubkey {
        self.pubkey()
    }

    fn sign(&self, unsigned_tx: &[u8]) -> Result<Vec<u8>, WalletError> {
        let vtx: VersionedTransaction =
            bincode::deserialize(unsigned_tx).map_err(|e| WalletError::Decode(e.to_string()))?;
        let signed = VersionedTransaction::try_new(vtx.message, &[&self.keypair])
            .map_err(|e| WalletError::Sign(e.to_string()))?;
        bincode::serialize(&signed).map_err(|e| WalletError::Sign(e.to_string()))
    }
}

/// Where encoded secret keys come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    Inline(String),
    /// Every `*.txt` / `*.json` file in the directory holds one key.
    Dir(PathBuf),
}

/// Accepts base58 or a JSON byte array (Solana CLI keypair file).
pub fn decode_secret(index: usize, encoded: &str) -> Result<Keypair, WalletError> {
    let encoded = encoded.trim();
    let bytes = if encoded.starts_with('[') {
        serde_json::from_str::<Vec<u8>>(encoded).ok()
    } else {
        bs58::decode(encoded).into_vec().ok()
    };
    bytes
        .filter(|b| b.len() == SECRET_KEY_LEN)
        .and_then(|b| Keypair::from_bytes(&b).ok())
        .ok_or(WalletError::KeyFormat { index, expected: SECRET_KEY_LEN })
}

fn read_key_dir(dir: &Path) -> Result<Vec<String>, WalletError> {
    let source = |source| WalletError::Source { path: dir.to_path_buf(), source };
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(source)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && matches!(p.extension().and_then(|e| e.to_str()), Some("txt") | Some("json"))
        })
        .collect();
    files.sort();

    let mut out = Vec::with_capacity(files.len());
    for path in files {
        let raw = std::fs::read_to_string(&path)
            .map_err(|source| WalletError::Source { path: path.clone(), source })?;
        out.push(raw);
    }
    Ok(out)
}

pub struct WalletPool {
    wallets: Vec<Wallet>,
    policy: RotationPolicy,
    cursor: AtomicUsize,
    balances: Arc<dyn BalanceSource>,
}

impl WalletPool {
    pub fn new(wallets: Vec<Wallet>, policy: RotationPolicy, balances: Arc<dyn BalanceSource>) -> Self {
        Self { wallets, policy, cursor: AtomicUsize::new(0), balances }
    }

    /// Decodes every source; bad keys are logged and skipped.
    pub fn load(
        sources: &[KeySource],
        policy: RotationPolicy,
        balances: Arc<dyn BalanceSource>,
    ) -> Result<Self, ConfigError> {
        let mut encoded = Vec::new();
        for src in sources {
            match src {
                KeySource::Inline(s) => encoded.push(s.clone()),
                KeySource::Dir(dir) => match read_key_dir(dir) {
                    Ok(keys) => encoded.extend(keys),
                    Err(err) => warn!(error = %err, "wallet.source.unreadable"),
                },
            }
        }

        let mut wallets = Vec::with_capacity(encoded.len());
        for (index, key) in encoded.iter().enumerate() {
            match decode_secret(index, key) {
                Ok(kp) => wallets.push(Wallet::from_keypair(kp)),
                Err(err) => warn!(error = %err, "wallet.key.rejected"),
            }
        }

        if wallets.is_empty() {
            return Err(ConfigError::NoUsableKeys { attempted: encoded.len() });
        }

        info!(count = wallets.len(), ?policy, "wallet.pool.loaded");
        Ok(Self::new(wallets, policy, balances))
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Picks the signer for this cycle.
    pub fn next(&self) -> Result<&Wallet, WalletError> {
        if self.wallets.is_empty() {
            return Err(WalletError::NoWalletLoaded);
        }
        let idx = match self.policy {
            RotationPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % self.wallets.len(),
            RotationPolicy::Random => rand::thread_rng().gen_range(0..self.wallets.len()),
        };
        Ok(&self.wallets[idx])
    }

    pub async fn balance_of(&self, wallet: &Wallet) -> Result<u64> {
        if self.wallets.is_empty() {
            return Err(WalletError::NoWalletLoaded.into());
        }
        self.balances.balance_of(&wallet.pubkey()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::hash::Hash;
    use solana_sdk::message::{v0, VersionedMessage};
    use solana_sdk::system_instruction;

    struct FixedBalance(u64);

    #[async_trait]
    impl BalanceSource for FixedBalance {
        async fn balance_of(&self, _owner: &Pubkey) -> Result<u64> {
            Ok(self.0)
        }
    }

    fn pool(n: usize, policy: RotationPolicy) -> WalletPool {
        let wallets = (0..n).map(|_| Wallet::from_keypair(Keypair::new())).collect();
        WalletPool::new(wallets, policy, Arc::new(FixedBalance(42)))
    }

    #[test]
    fn round_robin_wraps_in_order() {
        let pool = pool(3, RotationPolicy::RoundRobin);
        let keys: Vec<Pubkey> = pool.wallets.iter().map(|w| w.pubkey()).collect();
        let picked: Vec<Pubkey> = (0..4).map(|_| pool.next().unwrap().pubkey()).collect();
        assert_eq!(picked, vec![keys[0], keys[1], keys[2], keys[0]]);
    }

    #[test]
    fn random_stays_within_pool() {
        let pool = pool(2, RotationPolicy::Random);
        let keys: Vec<Pubkey> = pool.wallets.iter().map(|w| w.pubkey()).collect();
        for _ in 0..50 {
            assert!(keys.contains(&pool.next().unwrap().pubkey()));
        }
    }

    #[tokio::test]
    async fn empty_pool_fails_every_call() {
        let pool = pool(0, RotationPolicy::RoundRobin);
        assert!(matches!(pool.next(), Err(WalletError::NoWalletLoaded)));
        let stray = Wallet::from_keypair(Keypair::new());
        assert!(pool.balance_of(&stray).await.is_err());
    }

    #[tokio::test]
    async fn balance_goes_through_source() {
        let pool = pool(1, RotationPolicy::RoundRobin);
        let w = pool.next().unwrap();
        assert_eq!(pool.balance_of(w).await.unwrap(), 42);
    }

    #[test]
    fn decodes_both_encodings() {
        let kp = Keypair::new();
        let b58 = bs58::encode(kp.to_bytes()).into_string();
        let json = serde_json::to_string(&kp.to_bytes().to_vec()).unwrap();

        assert_eq!(decode_secret(0, &b58).unwrap().pubkey(), kp.pubkey());
        assert_eq!(decode_secret(1, &format!(" {json}\n")).unwrap().pubkey(), kp.pubkey());
    }

    #[test]
    fn rejects_wrong_length_and_garbage() {
        let short = bs58::encode([7u8; 32]).into_string();
        assert!(matches!(decode_secret(0, &short), Err(WalletError::KeyFormat { index: 0, .. })));
        assert!(matches!(decode_secret(3, "not-base58-0OIl"), Err(WalletError::KeyFormat { index: 3, .. })));
        assert!(matches!(decode_secret(4, "[1,2,3]"), Err(WalletError::KeyFormat { index: 4, .. })));
    }

    #[test]
    fn load_skips_bad_keys_and_fails_when_none_decode() {
        let good = bs58::encode(Keypair::new().to_bytes()).into_string();
        let sources = vec![KeySource::Inline("junk".into()), KeySource::Inline(good)];
        let pool = WalletPool::load(&sources, RotationPolicy::RoundRobin, Arc::new(FixedBalance(0))).unwrap();
        assert_eq!(pool.len(), 1);

        let err = WalletPool::load(
            &[KeySource::Inline("junk".into())],
            RotationPolicy::RoundRobin,
            Arc::new(FixedBalance(0)),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::NoUsableKeys { attempted: 1 }));
    }

    #[test]
    fn load_reads_key_directory() {
        let dir = tempfile::tempdir().unwrap();
        let a = Keypair::new();
        let b = Keypair::new();
        std::fs::write(dir.path().join("a.txt"), bs58::encode(a.to_bytes()).into_string()).unwrap();
        std::fs::write(dir.path().join("b.json"), serde_json::to_string(&b.to_bytes().to_vec()).unwrap()).unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let pool = WalletPool::load(
            &[KeySource::Dir(dir.path().to_path_buf())],
            RotationPolicy::RoundRobin,
            Arc::new(FixedBalance(0)),
        )
        .unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.next().unwrap().pubkey(), a.pubkey());
        assert_eq!(pool.next().unwrap().pubkey(), b.pubkey());
    }

    #[test]
    fn sign_fills_payer_signature() {
        let wallet = Wallet::from_keypair(Keypair::new());
        let payer = wallet.pubkey();
        let ix = system_instruction::transfer(&payer, &Pubkey::new_unique(), 1);
        let msg = v0::Message::try_compile(&payer, &[ix], &[], Hash::new_unique()).unwrap();
        let unsigned = VersionedTransaction {
            signatures: vec![Default::default()],
            message: VersionedMessage::V0(msg),
        };
        let bytes = bincode::serialize(&unsigned).unwrap();

        let signed: VersionedTransaction = bincode::deserialize(&wallet.sign(&bytes).unwrap()).unwrap();
        assert!(signed.verify_with_results().iter().all(|ok| *ok));
    }
}
