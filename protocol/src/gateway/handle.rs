//! Contract handles: a channel plus a signing session, bound to one
//! ledger channel / chaincode pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::crypto::{CryptoError, SigningIdentity};
use crate::error::GatewayError;
use crate::identity::{Identity, OwnerId};
use crate::ledger::{
    Creator, Envelope, LedgerChannel, Proposal, ProposalResponse, SignedProposal, TransientMap,
};

/// The signing half of a connection: who we are and how we sign.
#[derive(Debug, Clone)]
pub struct LedgerSession {
    signing: SigningIdentity,
    creator: Creator,
}

impl LedgerSession {
    /// Checks that the identity's key belongs to its certificate and builds
    /// the creator record peers will see.
    pub fn from_identity(identity: &Identity) -> Result<Self, CryptoError> {
        let signing = identity.signing_identity()?;
        let creator = Creator {
            msp_id: identity.msp_id().to_string(),
            owner_id: identity.owner_id().clone(),
            role: identity.role().clone(),
            certificate_pem: identity.certificate_pem().to_vec(),
        };
        Ok(Self { signing, creator })
    }

    pub fn creator(&self) -> &Creator {
        &self.creator
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.creator.owner_id
    }

    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.signing.sign(digest)
    }
}

/// Shared marker for a connection that hit a transport fault. Once set it
/// stays set; the owner of the connection replaces it on next lookup.
#[derive(Debug, Clone, Default)]
pub struct StaleFlag(Arc<AtomicBool>);

impl StaleFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where a transaction goes and who sends it. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    channel_name: String,
    chaincode_name: String,
    channel: Arc<dyn LedgerChannel>,
    session: LedgerSession,
    stale: StaleFlag,
}

impl ContractHandle {
    pub fn new(
        channel_name: impl Into<String>,
        chaincode_name: impl Into<String>,
        channel: Arc<dyn LedgerChannel>,
        session: LedgerSession,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            chaincode_name: chaincode_name.into(),
            channel,
            session,
            stale: StaleFlag::default(),
        }
    }

    /// Reports transport faults on this handle through `flag`.
    pub fn with_stale_flag(mut self, flag: StaleFlag) -> Self {
        self.stale = flag;
        self
    }

    /// Marks the underlying connection for replacement.
    pub fn mark_stale(&self) {
        if !self.stale.is_set() {
            debug!(owner = %self.owner_id(), "connection marked stale");
        }
        self.stale.mark();
    }

    pub fn is_stale(&self) -> bool {
        self.stale.is_set()
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn chaincode_name(&self) -> &str {
        &self.chaincode_name
    }

    pub fn owner_id(&self) -> &OwnerId {
        self.session.owner_id()
    }

    pub fn channel(&self) -> &Arc<dyn LedgerChannel> {
        &self.channel
    }

    pub fn session(&self) -> &LedgerSession {
        &self.session
    }

    /// A fresh, signed proposal for `function_name`. Every call yields a
    /// new transaction id.
    pub fn sign_proposal(
        &self,
        function_name: &str,
        public_arguments: Vec<String>,
        transient: TransientMap,
    ) -> Result<SignedProposal, GatewayError> {
        if function_name.trim().is_empty() {
            return Err(GatewayError::Validation(
                "function name must not be empty".to_string(),
            ));
        }

        let proposal = Proposal::new(
            self.channel_name.clone(),
            self.chaincode_name.clone(),
            function_name,
            public_arguments,
            transient,
            self.session.creator().clone(),
        );
        let signature = self.session.sign(&proposal.digest())?;
        Ok(SignedProposal {
            proposal,
            signature,
        })
    }

    /// Wraps endorsed results into a signed envelope for ordering. Transient
    /// data stays behind.
    pub fn seal(
        &self,
        proposal: &Proposal,
        response: ProposalResponse,
    ) -> Result<Envelope, GatewayError> {
        let mut envelope = Envelope {
            transaction_id: proposal.transaction_id().to_string(),
            channel_name: proposal.channel_name().to_string(),
            chaincode_name: proposal.chaincode_name().to_string(),
            function_name: proposal.function_name().to_string(),
            public_arguments: proposal.public_arguments().to_vec(),
            creator: proposal.creator().clone(),
            response_payload: response.payload,
            rwset: response.rwset,
            endorsements: response.endorsements,
            signature: Vec::new(),
        };
        envelope.signature = self.session.sign(&envelope.digest())?;
        Ok(envelope)
    }
}
