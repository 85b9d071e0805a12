//! The RPC transport seam.
//!
//! The ledger network (peers, ordering service, state database) is an
//! external system. The gateway talks to it through two traits:
//!
//! - [`Connector`] opens a TLS-secured channel to a peer endpoint on behalf
//!   of one creator identity.
//! - [`LedgerChannel`] is that open channel: endorse, evaluate, submit to
//!   ordering, ask for commit status, close.
//!
//! Failures come back as [`TransportError`], a structured description of
//! what the remote side reported. Turning those into something a caller can
//! act on is the error classifier's job (`crate::error`).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::proposal::{Creator, SignedProposal};
use crate::config::Endpoint;
use crate::crypto::hash::sha256_array;

// ---------------------------------------------------------------------------
// Validation Codes
// ---------------------------------------------------------------------------

/// Outcome the committing peers assign to a transaction in its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxValidationCode {
    Valid,
    MvccReadConflict,
    PhantomReadConflict,
    DuplicateTxId,
    EndorsementPolicyFailure,
    BadCreatorSignature,
    InvalidOther,
}

impl TxValidationCode {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

impl fmt::Display for TxValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Valid => "VALID",
            Self::MvccReadConflict => "MVCC_READ_CONFLICT",
            Self::PhantomReadConflict => "PHANTOM_READ_CONFLICT",
            Self::DuplicateTxId => "DUPLICATE_TXID",
            Self::EndorsementPolicyFailure => "ENDORSEMENT_POLICY_FAILURE",
            Self::BadCreatorSignature => "BAD_CREATOR_SIGNATURE",
            Self::InvalidOther => "INVALID_OTHER_REASON",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Transport Errors
// ---------------------------------------------------------------------------

/// What the network reported when a call did not succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    /// The peer or orderer could not be reached.
    #[error("UNAVAILABLE: {0}")]
    Unavailable(String),

    /// The remote side gave up before answering.
    #[error("DEADLINE_EXCEEDED: {0}")]
    DeadlineExceeded(String),

    /// The local channel was closed (disconnect, eviction).
    #[error("channel closed")]
    Closed,

    /// The chaincode ran and returned an error response.
    #[error("chaincode response {status}, {message}")]
    Chaincode { status: u16, message: String },

    /// Fewer organizations endorsed than the policy demands.
    #[error("ENDORSEMENT_POLICY_FAILURE: {received} of {required} required endorsements")]
    EndorsementPolicy { required: usize, received: usize },

    /// The transaction reached a block but was marked invalid.
    #[error("transaction {transaction_id} failed to commit with status code {code}")]
    Invalidated {
        transaction_id: String,
        code: TxValidationCode,
    },

    /// The peer does not know the transaction id asked about.
    #[error("transaction {0} not found")]
    UnknownTransaction(String),

    /// The request was refused before execution (bad signature, malformed).
    #[error("proposal rejected: {0}")]
    Rejected(String),

    /// Anything the transport cannot describe more precisely.
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Wire Types
// ---------------------------------------------------------------------------

/// A key read during simulation and the version it had.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRead {
    pub key: String,
    pub version: Option<u64>,
}

/// A key written (or deleted, when `value` is `None`) during simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWrite {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

/// A prefix scan performed during simulation and what it saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRead {
    pub prefix: String,
    pub reads: Vec<KeyRead>,
}

/// Only the hashes of private writes ever leave the endorsing peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateWriteHash {
    pub collection: String,
    pub key_hash: String,
    pub value_hash: String,
}

/// Simulation results, as endorsed and as later written to a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadWriteSet {
    pub reads: Vec<KeyRead>,
    pub range_reads: Vec<RangeRead>,
    pub writes: Vec<KeyWrite>,
    pub private_writes: Vec<PrivateWriteHash>,
}

/// One organization's signature over a proposal response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    pub msp_id: String,
    pub signature: Vec<u8>,
}

/// What endorsing peers hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalResponse {
    pub payload: Vec<u8>,
    pub rwset: ReadWriteSet,
    pub endorsements: Vec<Endorsement>,
}

impl ProposalResponse {
    /// Digest each endorser signs: payload and read/write set.
    pub fn digest(transaction_id: &str, payload: &[u8], rwset: &ReadWriteSet) -> [u8; 32] {
        let mut buf = Vec::with_capacity(64 + payload.len());
        buf.extend_from_slice(transaction_id.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(payload);
        // Serializing plain structs and strings into a Vec cannot fail.
        buf.extend_from_slice(&serde_json::to_vec(rwset).unwrap_or_default());
        sha256_array(&buf)
    }
}

/// The endorsed transaction sent to ordering. Carries no transient data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub transaction_id: String,
    pub channel_name: String,
    pub chaincode_name: String,
    pub function_name: String,
    pub public_arguments: Vec<String>,
    pub creator: Creator,
    pub response_payload: Vec<u8>,
    pub rwset: ReadWriteSet,
    pub endorsements: Vec<Endorsement>,
    pub signature: Vec<u8>,
}

impl Envelope {
    /// Digest the creator signs before handing the envelope to ordering.
    pub fn digest(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(self.transaction_id.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&ProposalResponse::digest(
            &self.transaction_id,
            &self.response_payload,
            &self.rwset,
        ));
        for e in &self.endorsements {
            buf.extend_from_slice(e.msp_id.as_bytes());
            buf.push(0x00);
            buf.extend_from_slice(&e.signature);
        }
        sha256_array(&buf)
    }
}

/// Result of asking a peer about a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub code: TxValidationCode,
    pub block_number: u64,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An open, authenticated channel to a peer.
#[async_trait]
pub trait LedgerChannel: Send + Sync + fmt::Debug {
    /// Runs the proposal on the endorsing peers and collects their responses.
    async fn endorse(&self, proposal: &SignedProposal) -> Result<ProposalResponse, TransportError>;

    /// Runs the proposal on one peer without collecting endorsements for commit.
    async fn evaluate(&self, proposal: &SignedProposal) -> Result<Vec<u8>, TransportError>;

    /// Hands an endorsed transaction to the ordering service.
    async fn submit(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Blocks until the transaction's commit status is known.
    async fn commit_status(&self, transaction_id: &str) -> Result<CommitStatus, TransportError>;

    /// Releases the channel. Calls made after this fail with
    /// [`TransportError::Closed`].
    async fn close(&self);

    /// `true` after [`close`](Self::close), or when the transport noticed the
    /// connection is gone.
    fn is_closed(&self) -> bool;
}

/// Opens channels. One call, one underlying connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        creator: &Creator,
    ) -> Result<Arc<dyn LedgerChannel>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_codes_render_wire_names() {
        assert_eq!(
            TxValidationCode::MvccReadConflict.to_string(),
            "MVCC_READ_CONFLICT"
        );
        assert_eq!(TxValidationCode::DuplicateTxId.to_string(), "DUPLICATE_TXID");
        assert!(TxValidationCode::Valid.is_valid());
        assert!(!TxValidationCode::PhantomReadConflict.is_valid());
    }

    #[test]
    fn invalidated_error_mentions_code() {
        let err = TransportError::Invalidated {
            transaction_id: "abc".into(),
            code: TxValidationCode::MvccReadConflict,
        };
        assert!(err.to_string().contains("MVCC_READ_CONFLICT"));
    }

    #[test]
    fn response_digest_covers_payload() {
        let rwset = ReadWriteSet::default();
        assert_ne!(
            ProposalResponse::digest("tx", b"a", &rwset),
            ProposalResponse::digest("tx", b"b", &rwset)
        );
    }
}
