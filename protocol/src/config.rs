//! # Gateway Configuration & Constants
//!
//! Every deadline and limit the submission layer uses lives here. The
//! defaults mirror what peers in a permissioned network tolerate in practice:
//! endorsement is the slow phase (chaincode runs on every endorsing peer),
//! ordering is quick, and commit can take a full block cycle or several.
//!
//! The structs in this module are plain values. Reading them from disk or the
//! environment is the process entry point's job; the core only validates.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Phase Deadlines
// ---------------------------------------------------------------------------

/// Deadline for collecting endorsements from the peers the policy requires.
pub const DEFAULT_ENDORSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for handing an endorsed transaction to the ordering service.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for the commit notification. Expiry does NOT mean failure; the
/// transaction may still land in a later block.
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for read-only evaluation (single endorsement round, no commit).
pub const DEFAULT_EVALUATE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Connection Cache
// ---------------------------------------------------------------------------

/// Upper bound on cached per-user connections. One channel per active user
/// adds up quickly on a busy registrar's office.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Connections unused for longer than this are closed by the idle sweeper.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How often the idle sweeper wakes up.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Privacy Partition
// ---------------------------------------------------------------------------

/// Restricted collection that holds full transcripts.
pub const TRANSCRIPT_COLLECTION: &str = "transcriptCollection";

/// Transient-map entry carrying the canonical private payload.
pub const PRIVATE_DATA_TRANSIENT_KEY: &str = "private_data";

/// Field of the endorsement result that echoes the stored content hash.
pub const HASH_ANCHOR_FIELD: &str = "transcriptHash";

/// Length of the random nonce mixed into every transaction id.
pub const PROPOSAL_NONCE_LENGTH: usize = 24;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A configuration value that cannot be used as given.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Config Structs
// ---------------------------------------------------------------------------

/// Independent deadline per network phase of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    #[serde(with = "millis")]
    pub endorse: Duration,
    #[serde(with = "millis")]
    pub submit: Duration,
    #[serde(with = "millis")]
    pub commit: Duration,
    #[serde(with = "millis")]
    pub evaluate: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            endorse: DEFAULT_ENDORSE_TIMEOUT,
            submit: DEFAULT_SUBMIT_TIMEOUT,
            commit: DEFAULT_COMMIT_TIMEOUT,
            evaluate: DEFAULT_EVALUATE_TIMEOUT,
        }
    }
}

/// Limits for the per-user connection cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_connections: usize,
    #[serde(with = "millis")]
    pub idle_timeout: Duration,
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Where the peer lives and how to trust it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Peer RPC address, e.g. `grpcs://peer0.registrar.example.edu:7051`.
    pub address: String,
    /// Overrides the TLS server name when the address is an IP or alias.
    #[serde(default)]
    pub server_name_override: Option<String>,
    /// PEM bundle of the TLS root certificate(s) the peer presents.
    #[serde(default, skip_serializing)]
    pub tls_root_pem: Option<Vec<u8>>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            server_name_override: None,
            tls_root_pem: None,
        }
    }

    pub fn with_tls_root(mut self, pem: Vec<u8>) -> Self {
        self.tls_root_pem = Some(pem);
        self
    }
}

/// Everything the connection manager needs at startup, as plain values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub endpoint: Endpoint,
    /// Organization (membership service provider) id of the operator.
    pub msp_id: String,
    /// Default ledger channel.
    pub channel_name: String,
    /// Default chaincode on that channel.
    pub chaincode_name: String,
    #[serde(default)]
    pub timeouts: PhaseTimeouts,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl GatewayConfig {
    pub fn new(
        endpoint: Endpoint,
        msp_id: impl Into<String>,
        channel_name: impl Into<String>,
        chaincode_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            msp_id: msp_id.into(),
            channel_name: channel_name.into(),
            chaincode_name: chaincode_name.into(),
            timeouts: PhaseTimeouts::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Rejects configs that would only fail later, at the first request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.address.trim().is_empty() {
            return Err(ConfigError::Missing("endpoint.address"));
        }
        if self.msp_id.trim().is_empty() {
            return Err(ConfigError::Missing("msp_id"));
        }
        if self.channel_name.trim().is_empty() {
            return Err(ConfigError::Missing("channel_name"));
        }
        if self.chaincode_name.trim().is_empty() {
            return Err(ConfigError::Missing("chaincode_name"));
        }

        let phases = [
            ("timeouts.endorse", self.timeouts.endorse),
            ("timeouts.submit", self.timeouts.submit),
            ("timeouts.commit", self.timeouts.commit),
            ("timeouts.evaluate", self.timeouts.evaluate),
        ];
        for (field, value) in phases {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "deadline must be greater than zero".to_string(),
                });
            }
        }

        if self.cache.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.max_connections",
                reason: "cache must hold at least one connection".to_string(),
            });
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "cache.sweep_interval",
                reason: "sweep interval must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// `Duration` as integer milliseconds, which reads better in TOML than
/// serde's default `{ secs, nanos }` table.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
