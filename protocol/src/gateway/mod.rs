//! # Gateway
//!
//! The submission layer proper:
//!
//! - **cache** — per-owner connection cache with idle eviction.
//! - **manager** — default operator connection plus the cache.
//! - **handle** — contract handles and signing sessions.
//! - **orchestrator** — the build / endorse / submit / commit-wait protocol.
//! - **privacy** — transient private data anchored by content hash.
//! - **sweeper** — background idle eviction.
//!
//! [`LedgerGateway`] ties them together behind the inbound interface:
//! callers name an identity reference, a target and a function; the gateway
//! resolves the identity, finds or opens its connection, and runs the
//! transaction.

pub mod cache;
pub mod handle;
pub mod manager;
pub mod orchestrator;
pub mod privacy;
pub mod sweeper;

use std::sync::Arc;

use tracing::instrument;

use crate::error::GatewayError;
use crate::identity::{Identity, IdentityStore};
use crate::ledger::TransientMap;

pub use cache::{CachedConnection, ConnectionCache, IdleCache};
pub use handle::{ContractHandle, LedgerSession};
pub use manager::ConnectionManager;
pub use orchestrator::{
    BuiltTransaction, CommitResult, EndorsedTransaction, SubmittedTransaction, TransactionOrchestrator,
    TransactionState, TransactionStateMachine,
};
pub use privacy::{private_payload, PrivateFields, PrivateSubmitResult};
pub use sweeper::IdleSweeper;

/// Inbound entry point: identity references in, classified results out.
#[derive(Clone)]
pub struct LedgerGateway {
    manager: Arc<ConnectionManager>,
    identities: Arc<dyn IdentityStore>,
    orchestrator: TransactionOrchestrator,
}

impl LedgerGateway {
    pub fn new(manager: Arc<ConnectionManager>, identities: Arc<dyn IdentityStore>) -> Self {
        let orchestrator = TransactionOrchestrator::new(manager.timeouts());
        Self {
            manager,
            identities,
            orchestrator,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn orchestrator(&self) -> &TransactionOrchestrator {
        &self.orchestrator
    }

    async fn resolve(&self, identity_ref: &str) -> Result<Identity, GatewayError> {
        Ok(self.identities.resolve(identity_ref).await?)
    }

    async fn handle(
        &self,
        identity_ref: &str,
        channel: &str,
        chaincode: &str,
    ) -> Result<ContractHandle, GatewayError> {
        let identity = self.resolve(identity_ref).await?;
        self.manager
            .contract_handle(channel, chaincode, Some(&identity))
            .await
    }

    /// Submits a transaction as `identity_ref` and waits for its commit.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, args, transient))]
    pub async fn submit(
        &self,
        identity_ref: &str,
        channel: &str,
        chaincode: &str,
        function: &str,
        args: Vec<String>,
        transient: Option<TransientMap>,
    ) -> Result<CommitResult, GatewayError> {
        let handle = self.handle(identity_ref, channel, chaincode).await?;
        self.orchestrator
            .submit(&handle, function, args, transient)
            .await
    }

    /// Read-only query as `identity_ref`.
    #[instrument(skip(self, args))]
    pub async fn evaluate(
        &self,
        identity_ref: &str,
        channel: &str,
        chaincode: &str,
        function: &str,
        args: Vec<String>,
    ) -> Result<Vec<u8>, GatewayError> {
        let handle = self.handle(identity_ref, channel, chaincode).await?;
        self.orchestrator.evaluate(&handle, function, args).await
    }

    /// Submits with `private_fields` kept off the public ledger.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, args, private_fields))]
    pub async fn submit_private(
        &self,
        identity_ref: &str,
        channel: &str,
        chaincode: &str,
        function: &str,
        args: Vec<String>,
        private_fields: &PrivateFields,
    ) -> Result<PrivateSubmitResult, GatewayError> {
        let handle = self.handle(identity_ref, channel, chaincode).await?;
        self.orchestrator
            .submit_private(&handle, function, args, private_fields)
            .await
    }
}
