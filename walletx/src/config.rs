//! Configuration.
//!
//! All sections have defaults, so an empty JSON object is a valid
//! configuration file:
//!
//! ```json
//! {
//!   "registry":  { "scan_depth": 5 },
//!   "reconcile": {
//!     "time_window_secs": 10,
//!     "overrides": { "solana": { "time_window_secs": 3 } }
//!   },
//!   "rpc_urls":  { "base": { "testnet": "https://base-sepolia.g.alchemy.com/v2/KEY" } }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::{Chain, Network, rpc_url_from_env};
use crate::error::{ConfigError, ConfigResult};
use crate::ledger::{FuzzyMatch, Tolerance};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletxConfig {
    /// Wallet registry settings.
    pub registry: RegistryConfig,
    /// Local ledger settings.
    pub ledger: LedgerConfig,
    /// Reconciliation settings.
    pub reconcile: ReconcileConfig,
    /// HTTP client settings for remote sources.
    pub http: HttpClientConfig,
    /// RPC endpoints per chain and network.
    pub rpc_urls: HashMap<Chain, HashMap<Network, String>>,
}

impl WalletxConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.registry.event_capacity == 0 {
            return Err(ConfigError::invalid("registry.event_capacity must be positive"));
        }
        check_epsilon("ledger.amount_epsilon", self.ledger.amount_epsilon)?;
        check_epsilon("reconcile.amount_epsilon", self.reconcile.amount_epsilon)?;
        for (chain, o) in &self.reconcile.overrides {
            if let Some(epsilon) = o.amount_epsilon {
                check_epsilon(&format!("reconcile.overrides.{chain}.amount_epsilon"), epsilon)?;
            }
        }
        if self.reconcile.remote_timeout_secs == 0 {
            return Err(ConfigError::invalid("reconcile.remote_timeout_secs must be positive"));
        }
        if self.http.timeout_secs == Some(0) {
            return Err(ConfigError::invalid("http.timeout_secs must be positive"));
        }
        for (chain, urls) in &self.rpc_urls {
            for (network, url) in urls {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::invalid(format!(
                        "rpc_urls.{chain}.{network} must be an http(s) URL"
                    )));
                }
            }
        }
        Ok(())
    }

    /// RPC URL for a chain's network: the config file first, then
    /// `WALLETX_<CHAIN>_<NETWORK>_RPC_URL`.
    #[must_use]
    pub fn resolve_rpc_url(&self, chain: Chain, network: Network) -> Option<String> {
        self.rpc_urls
            .get(&chain)
            .and_then(|urls| urls.get(&network))
            .cloned()
            .or_else(|| rpc_url_from_env(chain, network))
    }
}

fn check_epsilon(field: &str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(format!(
            "{field} must be a finite non-negative number"
        )))
    }
}

/// Loads and validates a JSON configuration file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`], [`ConfigError::Parse`] or [`ConfigError::Invalid`].
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<WalletxConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: WalletxConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Wallet registry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Extra account indices probed for activity after a mnemonic import.
    pub scan_depth: u32,
    /// Capacity of the registry event broadcast channel.
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            scan_depth: 0,
            event_capacity: 64,
        }
    }
}

/// Local ledger settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Amount tolerance for deduplicating id-less entries.
    pub amount_epsilon: f64,
    /// Time window for deduplicating id-less entries, seconds.
    pub match_window_secs: u64,
    /// Entries kept per partition; `0` keeps everything.
    pub max_entries: usize,
}

impl LedgerConfig {
    /// The store's fuzzy-match tolerance.
    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        Tolerance {
            amount_epsilon: self.amount_epsilon,
            time_window_secs: self.match_window_secs,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            amount_epsilon: Tolerance::STORE.amount_epsilon,
            match_window_secs: Tolerance::STORE.time_window_secs,
            max_entries: 0,
        }
    }
}

/// Per-chain tolerance override. Unset fields fall back to the global value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceOverride {
    /// Amount tolerance.
    pub amount_epsilon: Option<f64>,
    /// Time window, seconds.
    pub time_window_secs: Option<u64>,
}

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Amount tolerance for fuzzy matching.
    pub amount_epsilon: f64,
    /// Time window for fuzzy matching, seconds.
    pub time_window_secs: u64,
    /// When fuzzy matching applies.
    pub fuzzy_match: FuzzyMatch,
    /// Upper bound on a remote fetch, seconds.
    pub remote_timeout_secs: u64,
    /// Entries per view when the caller does not choose; `0` is unlimited.
    pub default_limit: usize,
    /// Per-chain tolerance overrides.
    pub overrides: HashMap<Chain, ToleranceOverride>,
}

impl ReconcileConfig {
    /// Tolerance for a chain, with its override applied.
    #[must_use]
    pub fn tolerance_for(&self, chain: Chain) -> Tolerance {
        let o = self.overrides.get(&chain).copied().unwrap_or_default();
        Tolerance {
            amount_epsilon: o.amount_epsilon.unwrap_or(self.amount_epsilon),
            time_window_secs: o.time_window_secs.unwrap_or(self.time_window_secs),
        }
    }

    /// Remote fetch timeout.
    #[must_use]
    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            amount_epsilon: Tolerance::RECONCILE.amount_epsilon,
            time_window_secs: Tolerance::RECONCILE.time_window_secs,
            fuzzy_match: FuzzyMatch::default(),
            remote_timeout_secs: 10,
            default_limit: 50,
            overrides: HashMap::new(),
        }
    }
}

/// Shared HTTP client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// User agent string.
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(30),
            user_agent: Some(concat!("walletx/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl HttpClientConfig {
    /// Build a reqwest client with this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the client cannot be built.
    pub fn build_client(&self) -> ConfigResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        if let Some(ref user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        builder
            .build()
            .map_err(|e| ConfigError::invalid(format!("http client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WalletxConfig::default();
        assert_eq!(config.registry.scan_depth, 0);
        assert_eq!(config.ledger.match_window_secs, 5);
        assert_eq!(config.ledger.max_entries, 0);
        assert_eq!(config.reconcile.time_window_secs, 10);
        assert_eq!(config.reconcile.remote_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconcile.fuzzy_match, FuzzyMatch::Always);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_json_is_default() {
        let config: WalletxConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, WalletxConfig::default());
    }

    #[test]
    fn test_partial_json_and_overrides() {
        let config: WalletxConfig = serde_json::from_str(
            r#"{
                "registry": { "scan_depth": 5 },
                "reconcile": {
                    "fuzzy_match": "missing_id",
                    "overrides": { "solana": { "time_window_secs": 3 } }
                },
                "rpc_urls": { "base": { "testnet": "https://example.invalid/rpc" } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.registry.scan_depth, 5);
        assert_eq!(config.registry.event_capacity, 64);
        assert_eq!(config.reconcile.fuzzy_match, FuzzyMatch::MissingId);

        let sol = config.reconcile.tolerance_for(Chain::Solana);
        assert_eq!(sol.time_window_secs, 3);
        assert!((sol.amount_epsilon - 1e-5).abs() < f64::EPSILON);
        assert_eq!(config.reconcile.tolerance_for(Chain::Base).time_window_secs, 10);

        assert_eq!(
            config.resolve_rpc_url(Chain::Base, Network::Testnet).as_deref(),
            Some("https://example.invalid/rpc")
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = WalletxConfig::default();
        config.reconcile.amount_epsilon = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = WalletxConfig::default();
        config.reconcile.remote_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = WalletxConfig::default();
        config
            .rpc_urls
            .entry(Chain::Ethereum)
            .or_default()
            .insert(Network::Mainnet, "ftp://nope".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walletx.json");
        std::fs::write(&path, r#"{ "ledger": { "max_entries": 50 } }"#).unwrap();
        assert_eq!(load_config(&path).unwrap().ledger.max_entries, 50);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));

        assert!(matches!(
            load_config(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_build_client() {
        HttpClientConfig::default().build_client().unwrap();
    }
}
