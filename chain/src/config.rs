//! Top-level node configuration.
//!
//! This module aggregates configuration for:
//!
//! - which level this node runs (`LEVEL`) and its proof/hash/encryption scheme,
//! - the broadcast processor (`BROADCAST`, `BROADCAST_INTERVAL`),
//! - DC1-HMAC rate limiting (`RATE_LIMIT`),
//! - this chain's identity (`INTERNAL_ID`) and deployment stage (`STAGE`),
//! - the Prometheus metrics exporter.
//!
//! `NodeConfig::from_env` reads the environment variables §6 defines;
//! `Default` gives sane values for local development and tests.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{SupportedEncryption, SupportedHash};
use crate::types::ProofScheme;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Deployment stage; `dev` relaxes nothing on its own but is surfaced to
/// logging and the matchmaking client so they can choose dev endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prod,
    Dev,
}

impl std::str::FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prod" => Ok(Stage::Prod),
            "dev" => Ok(Stage::Dev),
            other => Err(ConfigError::Invalid { name: "STAGE", value: other.to_string() }),
        }
    }
}

/// A best-effort webhook the node posts to when a block reaches a
/// verification milestone (§6 `VERIFICATION_NOTIFICATION`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationNotificationConfig {
    pub url: String,
    #[serde(default)]
    pub level: Option<u8>,
}

/// Metrics exporter configuration.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9898".parse().expect("hard-coded metrics listen address should parse"),
        }
    }
}

/// Top-level configuration for a single-level chain node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub level: u8,
    pub proof_scheme: ProofScheme,
    pub hash: SupportedHash,
    pub encryption: SupportedEncryption,
    pub broadcast_enabled: bool,
    pub broadcast_interval: Duration,
    /// L1-only: how many chains matchmaking must assign at each level
    /// before a new claim is considered fully staffed (§4.4).
    pub level_requirements: [u32; 4],
    pub rate_limit: u32,
    /// Leading-zero-bit threshold for the `work` proof scheme (§4.1); unused
    /// under `trust`.
    pub pow_complexity: u8,
    pub internal_id: String,
    pub stage: Stage,
    pub verification_notification: Option<VerificationNotificationConfig>,
    pub metrics: MetricsConfig,
    /// This chain's own externally-reachable base URL, carried in its
    /// registration so peers know where to send it work (§4.4).
    pub own_url: String,
    /// Base URL of the matchmaking service.
    pub matchmaking_url: String,
    pub matchmaking_timeout: Duration,
    /// The matchmaking service's own `dc_id`, used to bootstrap the DC1-HMAC
    /// shared key this node signs matchmaking requests with (§4.5).
    pub matchmaking_dc_id: String,
    /// L5-only: the anchored public-chain wallet address (§4.4).
    pub wallet: Option<String>,
    /// L5-only: the public-chain network that wallet anchors to (e.g. `btc-mainnet`).
    pub network: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            level: 1,
            proof_scheme: ProofScheme::Trust,
            hash: SupportedHash::Blake2b,
            encryption: SupportedEncryption::Secp256k1,
            broadcast_enabled: false,
            broadcast_interval: Duration::from_secs(1),
            level_requirements: [1, 1, 1, 1],
            rate_limit: 100,
            pow_complexity: 0,
            internal_id: "local-dev-chain".to_string(),
            stage: Stage::Dev,
            verification_notification: None,
            metrics: MetricsConfig::default(),
            own_url: "http://localhost:8080".to_string(),
            matchmaking_url: "http://localhost:8090".to_string(),
            matchmaking_timeout: Duration::from_secs(5),
            matchmaking_dc_id: "matchmaking".to_string(),
            wallet: None,
            network: None,
        }
    }
}

impl NodeConfig {
    /// Reads `NodeConfig` from the process environment per §6's variable
    /// names. Every field but `LEVEL` and `INTERNAL_ID` falls back to a
    /// development-friendly default when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let level = env_required("LEVEL")?;
        let level: u8 = level.parse().map_err(|_| ConfigError::Invalid { name: "LEVEL", value: level })?;
        if !(1..=5).contains(&level) {
            return Err(ConfigError::Invalid { name: "LEVEL", value: level.to_string() });
        }

        let proof_scheme = match env_or("PROOF_SCHEME", "trust").as_str() {
            "trust" => ProofScheme::Trust,
            "work" => ProofScheme::Work,
            other => return Err(ConfigError::Invalid { name: "PROOF_SCHEME", value: other.to_string() }),
        };

        let hash = match env_or("HASH", "blake2b").as_str() {
            "blake2b" => SupportedHash::Blake2b,
            "sha256" => SupportedHash::Sha256,
            "sha3_256" => SupportedHash::Sha3_256,
            other => return Err(ConfigError::Invalid { name: "HASH", value: other.to_string() }),
        };

        let encryption = match env_or("ENCRYPTION", "secp256k1").as_str() {
            "secp256k1" => SupportedEncryption::Secp256k1,
            other => return Err(ConfigError::Invalid { name: "ENCRYPTION", value: other.to_string() }),
        };

        let broadcast_enabled = match env_or("BROADCAST", "false").as_str() {
            "true" => true,
            "false" => false,
            other => return Err(ConfigError::Invalid { name: "BROADCAST", value: other.to_string() }),
        };

        let broadcast_interval_secs: u64 = env_or("BROADCAST_INTERVAL", "1")
            .parse()
            .map_err(|_| ConfigError::Invalid { name: "BROADCAST_INTERVAL", value: env_or("BROADCAST_INTERVAL", "1") })?;

        let mut level_requirements = [1u32, 1, 1, 1];
        const LEVEL_REQUIREMENT_VARS: [&str; 4] = ["NUM_L2", "NUM_L3", "NUM_L4", "NUM_L5"];
        for (i, name) in LEVEL_REQUIREMENT_VARS.into_iter().enumerate() {
            if let Ok(raw) = std::env::var(name) {
                level_requirements[i] =
                    raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw })?;
            }
        }

        let rate_limit: u32 = env_or("RATE_LIMIT", "100")
            .parse()
            .map_err(|_| ConfigError::Invalid { name: "RATE_LIMIT", value: env_or("RATE_LIMIT", "100") })?;

        let pow_complexity: u8 = env_or("POW_COMPLEXITY", "0")
            .parse()
            .map_err(|_| ConfigError::Invalid { name: "POW_COMPLEXITY", value: env_or("POW_COMPLEXITY", "0") })?;

        let internal_id = env_required("INTERNAL_ID")?;
        let stage: Stage = env_or("STAGE", "dev").parse()?;

        let verification_notification = match std::env::var("VERIFICATION_NOTIFICATION") {
            Ok(raw) if !raw.is_empty() => Some(
                serde_json::from_str(&raw)
                    .map_err(|_| ConfigError::Invalid { name: "VERIFICATION_NOTIFICATION", value: raw })?,
            ),
            _ => None,
        };

        let own_url = env_required("OWN_URL")?;
        let matchmaking_url = env_required("MATCHMAKING_URL")?;
        let matchmaking_dc_id = env_required("MATCHMAKING_DC_ID")?;
        let matchmaking_timeout_secs: u64 = env_or("MATCHMAKING_TIMEOUT_SECS", "5")
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "MATCHMAKING_TIMEOUT_SECS",
                value: env_or("MATCHMAKING_TIMEOUT_SECS", "5"),
            })?;
        let wallet = std::env::var("WALLET").ok().filter(|v| !v.is_empty());
        let network = std::env::var("NETWORK").ok().filter(|v| !v.is_empty());

        Ok(Self {
            level,
            proof_scheme,
            hash,
            encryption,
            broadcast_enabled,
            broadcast_interval: Duration::from_secs(broadcast_interval_secs),
            level_requirements,
            rate_limit,
            pow_complexity,
            internal_id,
            stage,
            verification_notification,
            metrics: MetricsConfig::default(),
            own_url,
            matchmaking_url,
            matchmaking_timeout: Duration::from_secs(matchmaking_timeout_secs),
            matchmaking_dc_id,
            wallet,
            network,
        })
    }
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn env_or(name: &'static str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
