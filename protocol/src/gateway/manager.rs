//! # Connection Manager
//!
//! Owns the operator's default connection and the per-owner
//! [`ConnectionCache`]. Constructed once by the process entry point and
//! shared as `Arc<ConnectionManager>`; torn down with
//! [`disconnect`](ConnectionManager::disconnect).
//!
//! The default connection never goes through the cache, so idle sweeps do
//! not touch it. If its channel closes, or a call on it fails with a
//! connection-class error, the next request reopens it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::cache::{CachedConnection, ConnectionCache};
use super::handle::ContractHandle;
use crate::config::{GatewayConfig, PhaseTimeouts};
use crate::error::GatewayError;
use crate::identity::Identity;
use crate::ledger::Connector;

pub struct ConnectionManager {
    config: GatewayConfig,
    operator: Identity,
    default: RwLock<Option<CachedConnection>>,
    reconnect: tokio::sync::Mutex<()>,
    cache: ConnectionCache,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Validates the config and opens the default connection as `operator`.
    pub async fn connect(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        operator: Identity,
    ) -> Result<Arc<Self>, GatewayError> {
        config.validate()?;

        let cache = ConnectionCache::new(connector, config.endpoint.clone(), &config.cache);
        let default = cache.open(&operator).await?;

        info!(
            endpoint = %config.endpoint.address,
            msp = %config.msp_id,
            channel = %config.channel_name,
            chaincode = %config.chaincode_name,
            operator = %operator.owner_id(),
            "connection manager ready"
        );

        Ok(Arc::new(Self {
            config,
            operator,
            default: RwLock::new(Some(default)),
            reconnect: tokio::sync::Mutex::new(()),
            cache,
            closed: AtomicBool::new(false),
        }))
    }

    /// A handle for `channel_name`/`chaincode_name`, acting as `identity` or
    /// as the operator when `identity` is `None`.
    pub async fn contract_handle(
        &self,
        channel_name: &str,
        chaincode_name: &str,
        identity: Option<&Identity>,
    ) -> Result<ContractHandle, GatewayError> {
        self.ensure_connected()?;

        let conn = match identity {
            Some(identity) => self.cache.get_or_create(identity).await?,
            None => self.default_connection().await?,
        };

        Ok(ContractHandle::new(
            channel_name,
            chaincode_name,
            conn.channel,
            conn.session,
        )
        .with_stale_flag(conn.stale))
    }

    /// Handle for the configured default channel and chaincode.
    pub async fn default_contract(
        &self,
        identity: Option<&Identity>,
    ) -> Result<ContractHandle, GatewayError> {
        let channel = self.config.channel_name.clone();
        let chaincode = self.config.chaincode_name.clone();
        self.contract_handle(&channel, &chaincode, identity).await
    }

    async fn default_connection(&self) -> Result<CachedConnection, GatewayError> {
        let current = self.default.read().clone();
        if let Some(conn) = current.filter(CachedConnection::is_usable) {
            return Ok(conn);
        }

        let _guard = self.reconnect.lock().await;
        self.ensure_connected()?;
        let current = self.default.read().clone();
        if let Some(conn) = current.filter(CachedConnection::is_usable) {
            return Ok(conn);
        }

        warn!(operator = %self.operator.owner_id(), "default connection lost, reopening");
        let conn = self.cache.open(&self.operator).await?;
        if self.closed.load(Ordering::SeqCst) {
            conn.channel.close().await;
            return Err(disconnected());
        }
        *self.default.write() = Some(conn.clone());
        Ok(conn)
    }

    /// Closes cached connections idle for longer than `max_age`. The default
    /// connection is never evicted.
    pub async fn evict_idle(&self, max_age: Duration) -> usize {
        self.cache.evict_idle(max_age).await
    }

    /// Closes the default connection and every cached one. Idempotent.
    /// Requests still in flight fail with a connection error.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("connection manager already disconnected");
            return;
        }

        let default = self.default.write().take();
        if let Some(conn) = default {
            conn.channel.close().await;
        }
        let closed = self.cache.close_all().await;
        info!(cached_closed = closed, "connection manager disconnected");
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// `true` while the default connection is open and not stale.
    pub fn default_connection_up(&self) -> bool {
        self.default
            .read()
            .as_ref()
            .map_or(false, CachedConnection::is_usable)
    }

    pub fn cached_connections(&self) -> usize {
        self.cache.len()
    }

    pub fn connections_evicted(&self) -> u64 {
        self.cache.evicted_total()
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn timeouts(&self) -> PhaseTimeouts {
        self.config.timeouts
    }

    fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(disconnected());
        }
        Ok(())
    }
}

fn disconnected() -> GatewayError {
    GatewayError::Connection("connection manager is disconnected".to_string())
}
