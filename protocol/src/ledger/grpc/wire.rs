//! Protobuf messages of the `certa.ledger.LedgerPeer` service.
//!
//! Read/write sets cross the wire as the same JSON the endorsers sign, so a
//! response digest computed on either side matches.

use std::collections::BTreeMap;

use bytes::Bytes;
use tonic::{Code, Status};

use crate::config::PROPOSAL_NONCE_LENGTH;
use crate::identity::Role;
use crate::ledger::proposal::{Creator, Proposal, SignedProposal};
use crate::ledger::transport::{
    CommitStatus, Endorsement, Envelope, ProposalResponse, ReadWriteSet, TransportError,
    TxValidationCode,
};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreatorMessage {
    #[prost(string, tag = "1")]
    pub msp_id: String,
    #[prost(string, tag = "2")]
    pub owner_id: String,
    #[prost(string, tag = "3")]
    pub role: String,
    #[prost(bytes = "vec", tag = "4")]
    pub certificate_pem: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProposalMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub nonce: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
    #[prost(string, tag = "3")]
    pub channel_name: String,
    #[prost(string, tag = "4")]
    pub chaincode_name: String,
    #[prost(string, tag = "5")]
    pub function_name: String,
    #[prost(string, repeated, tag = "6")]
    pub public_arguments: Vec<String>,
    /// Endorser-only data. Never copied into an envelope.
    #[prost(btree_map = "string, bytes", tag = "7")]
    pub transient: BTreeMap<String, Vec<u8>>,
    #[prost(message, optional, tag = "8")]
    pub creator: Option<CreatorMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedProposalMessage {
    #[prost(message, optional, tag = "1")]
    pub proposal: Option<ProposalMessage>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EndorsementMessage {
    #[prost(string, tag = "1")]
    pub msp_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EndorseReply {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub rwset: Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    pub endorsements: Vec<EndorsementMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EvaluateReply {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EnvelopeMessage {
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    #[prost(string, tag = "2")]
    pub channel_name: String,
    #[prost(string, tag = "3")]
    pub chaincode_name: String,
    #[prost(string, tag = "4")]
    pub function_name: String,
    #[prost(string, repeated, tag = "5")]
    pub public_arguments: Vec<String>,
    #[prost(message, optional, tag = "6")]
    pub creator: Option<CreatorMessage>,
    #[prost(bytes = "vec", tag = "7")]
    pub response_payload: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub rwset: Vec<u8>,
    #[prost(message, repeated, tag = "9")]
    pub endorsements: Vec<EndorsementMessage>,
    #[prost(bytes = "vec", tag = "10")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubmitReply {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CommitStatusRequest {
    #[prost(string, tag = "1")]
    pub transaction_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CommitStatusReply {
    #[prost(enumeration = "ValidationCode", tag = "1")]
    pub code: i32,
    #[prost(uint64, tag = "2")]
    pub block_number: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ValidationCode {
    Valid = 0,
    MvccReadConflict = 1,
    PhantomReadConflict = 2,
    DuplicateTxId = 3,
    EndorsementPolicyFailure = 4,
    BadCreatorSignature = 5,
    InvalidOther = 6,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn malformed(what: &str, detail: impl std::fmt::Display) -> Status {
    Status::invalid_argument(format!("malformed {what}: {detail}"))
}

impl From<&Creator> for CreatorMessage {
    fn from(creator: &Creator) -> Self {
        Self {
            msp_id: creator.msp_id.clone(),
            owner_id: creator.owner_id.to_string(),
            role: creator.role.to_string(),
            certificate_pem: creator.certificate_pem.clone(),
        }
    }
}

impl From<CreatorMessage> for Creator {
    fn from(msg: CreatorMessage) -> Self {
        let role = msg
            .role
            .parse::<Role>()
            .unwrap_or_else(|_| Role::Other(msg.role.clone()));
        Self {
            msp_id: msg.msp_id,
            owner_id: msg.owner_id.into(),
            role,
            certificate_pem: msg.certificate_pem,
        }
    }
}

impl From<&SignedProposal> for SignedProposalMessage {
    fn from(signed: &SignedProposal) -> Self {
        let p = &signed.proposal;
        Self {
            proposal: Some(ProposalMessage {
                nonce: p.nonce().to_vec(),
                timestamp_ms: p.timestamp_ms(),
                channel_name: p.channel_name().to_string(),
                chaincode_name: p.chaincode_name().to_string(),
                function_name: p.function_name().to_string(),
                public_arguments: p.public_arguments().to_vec(),
                transient: p.transient().clone(),
                creator: Some(p.creator().into()),
            }),
            signature: signed.signature.clone(),
        }
    }
}

impl TryFrom<SignedProposalMessage> for SignedProposal {
    type Error = Status;

    fn try_from(msg: SignedProposalMessage) -> Result<Self, Status> {
        let p = msg
            .proposal
            .ok_or_else(|| malformed("proposal", "missing body"))?;
        let nonce = <[u8; PROPOSAL_NONCE_LENGTH]>::try_from(p.nonce.as_slice()).map_err(|_| {
            malformed(
                "proposal",
                format!("nonce is {} bytes, expected {PROPOSAL_NONCE_LENGTH}", p.nonce.len()),
            )
        })?;
        let creator = p
            .creator
            .ok_or_else(|| malformed("proposal", "missing creator"))?;

        Ok(SignedProposal {
            proposal: Proposal::with_nonce(
                p.channel_name,
                p.chaincode_name,
                p.function_name,
                p.public_arguments,
                p.transient,
                creator.into(),
                nonce,
                p.timestamp_ms,
            ),
            signature: msg.signature,
        })
    }
}

fn endorsement_messages(endorsements: &[Endorsement]) -> Vec<EndorsementMessage> {
    endorsements
        .iter()
        .map(|e| EndorsementMessage {
            msp_id: e.msp_id.clone(),
            signature: e.signature.clone(),
        })
        .collect()
}

fn endorsements_from(messages: Vec<EndorsementMessage>) -> Vec<Endorsement> {
    messages
        .into_iter()
        .map(|e| Endorsement {
            msp_id: e.msp_id,
            signature: e.signature,
        })
        .collect()
}

impl TryFrom<&ProposalResponse> for EndorseReply {
    type Error = Status;

    fn try_from(response: &ProposalResponse) -> Result<Self, Status> {
        let rwset = serde_json::to_vec(&response.rwset)
            .map_err(|e| Status::internal(format!("failed to encode read/write set: {e}")))?;
        Ok(Self {
            payload: response.payload.clone(),
            rwset,
            endorsements: endorsement_messages(&response.endorsements),
        })
    }
}

impl TryFrom<EndorseReply> for ProposalResponse {
    type Error = TransportError;

    fn try_from(reply: EndorseReply) -> Result<Self, TransportError> {
        let rwset: ReadWriteSet = serde_json::from_slice(&reply.rwset)
            .map_err(|e| TransportError::Other(format!("peer sent a malformed read/write set: {e}")))?;
        Ok(Self {
            payload: reply.payload,
            rwset,
            endorsements: endorsements_from(reply.endorsements),
        })
    }
}

impl TryFrom<&Envelope> for EnvelopeMessage {
    type Error = TransportError;

    fn try_from(envelope: &Envelope) -> Result<Self, TransportError> {
        let rwset = serde_json::to_vec(&envelope.rwset)
            .map_err(|e| TransportError::Other(format!("failed to encode read/write set: {e}")))?;
        Ok(Self {
            transaction_id: envelope.transaction_id.clone(),
            channel_name: envelope.channel_name.clone(),
            chaincode_name: envelope.chaincode_name.clone(),
            function_name: envelope.function_name.clone(),
            public_arguments: envelope.public_arguments.clone(),
            creator: Some((&envelope.creator).into()),
            response_payload: envelope.response_payload.clone(),
            rwset,
            endorsements: endorsement_messages(&envelope.endorsements),
            signature: envelope.signature.clone(),
        })
    }
}

impl TryFrom<EnvelopeMessage> for Envelope {
    type Error = Status;

    fn try_from(msg: EnvelopeMessage) -> Result<Self, Status> {
        let creator = msg
            .creator
            .ok_or_else(|| malformed("envelope", "missing creator"))?;
        let rwset = serde_json::from_slice(&msg.rwset).map_err(|e| malformed("envelope", e))?;
        Ok(Self {
            transaction_id: msg.transaction_id,
            channel_name: msg.channel_name,
            chaincode_name: msg.chaincode_name,
            function_name: msg.function_name,
            public_arguments: msg.public_arguments,
            creator: creator.into(),
            response_payload: msg.response_payload,
            rwset,
            endorsements: endorsements_from(msg.endorsements),
            signature: msg.signature,
        })
    }
}

impl From<TxValidationCode> for ValidationCode {
    fn from(code: TxValidationCode) -> Self {
        match code {
            TxValidationCode::Valid => Self::Valid,
            TxValidationCode::MvccReadConflict => Self::MvccReadConflict,
            TxValidationCode::PhantomReadConflict => Self::PhantomReadConflict,
            TxValidationCode::DuplicateTxId => Self::DuplicateTxId,
            TxValidationCode::EndorsementPolicyFailure => Self::EndorsementPolicyFailure,
            TxValidationCode::BadCreatorSignature => Self::BadCreatorSignature,
            TxValidationCode::InvalidOther => Self::InvalidOther,
        }
    }
}

impl From<ValidationCode> for TxValidationCode {
    fn from(code: ValidationCode) -> Self {
        match code {
            ValidationCode::Valid => Self::Valid,
            ValidationCode::MvccReadConflict => Self::MvccReadConflict,
            ValidationCode::PhantomReadConflict => Self::PhantomReadConflict,
            ValidationCode::DuplicateTxId => Self::DuplicateTxId,
            ValidationCode::EndorsementPolicyFailure => Self::EndorsementPolicyFailure,
            ValidationCode::BadCreatorSignature => Self::BadCreatorSignature,
            ValidationCode::InvalidOther => Self::InvalidOther,
        }
    }
}

impl From<CommitStatus> for CommitStatusReply {
    fn from(status: CommitStatus) -> Self {
        Self {
            code: ValidationCode::from(status.code) as i32,
            block_number: status.block_number,
        }
    }
}

impl TryFrom<CommitStatusReply> for CommitStatus {
    type Error = TransportError;

    fn try_from(reply: CommitStatusReply) -> Result<Self, TransportError> {
        let code = ValidationCode::try_from(reply.code).map_err(|_| {
            TransportError::Other(format!("peer sent unknown validation code {}", reply.code))
        })?;
        Ok(Self {
            code: code.into(),
            block_number: reply.block_number,
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Encodes `err` as a status. The full error rides in the details so the
/// client gets back exactly what the peer reported.
pub fn status_from_error(err: &TransportError) -> Status {
    let code = match err {
        TransportError::Unavailable(_) => Code::Unavailable,
        TransportError::DeadlineExceeded(_) => Code::DeadlineExceeded,
        TransportError::Closed => Code::Cancelled,
        TransportError::Chaincode { .. } | TransportError::Invalidated { .. } => Code::Aborted,
        TransportError::EndorsementPolicy { .. } => Code::FailedPrecondition,
        TransportError::UnknownTransaction(_) => Code::NotFound,
        TransportError::Rejected(_) => Code::PermissionDenied,
        TransportError::Other(_) => Code::Unknown,
    };
    let details = serde_json::to_vec(err).unwrap_or_default();
    Status::with_details(code, err.to_string(), Bytes::from(details))
}

/// Decodes a status from the peer, or from tonic itself when the call never
/// reached the peer.
pub fn error_from_status(status: &Status) -> TransportError {
    if let Ok(err) = serde_json::from_slice::<TransportError>(status.details()) {
        return err;
    }
    let message = status.message().to_string();
    match status.code() {
        Code::Unavailable | Code::Cancelled => TransportError::Unavailable(message),
        Code::DeadlineExceeded => TransportError::DeadlineExceeded(message),
        Code::PermissionDenied | Code::Unauthenticated | Code::InvalidArgument => {
            TransportError::Rejected(message)
        }
        Code::NotFound => TransportError::UnknownTransaction(message),
        code => TransportError::Other(format!("{code}: {message}")),
    }
}
