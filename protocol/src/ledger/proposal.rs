//! Transaction proposals.
//!
//! A [`Proposal`] is built fresh for every submission attempt and is
//! immutable afterwards. Its transaction id is
//! `hex(sha256(signable_bytes))`, where the signable bytes start with a
//! random nonce and cover the creator, target, function and public
//! arguments. The id is therefore stable across endorse, submit and
//! commit-wait of one attempt, and different for every new attempt.
//!
//! Transient fields travel next to the proposal, never inside the signable
//! bytes. They reach the endorsing peers and nothing else: not the orderer,
//! not the block, not the transaction id.

use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::PROPOSAL_NONCE_LENGTH;
use crate::crypto::hash::{sha256_array, sha256_hex};
use crate::identity::{OwnerId, Role};

/// Out-of-band proposal data: name → bytes.
pub type TransientMap = BTreeMap<String, Vec<u8>>;

/// Who is asking. Embedded in every proposal and envelope so peers can
/// verify the signature and chaincode can make access decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub msp_id: String,
    pub owner_id: OwnerId,
    pub role: Role,
    pub certificate_pem: Vec<u8>,
}

impl Creator {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.msp_id.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.owner_id.as_str().as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.role.as_str().as_bytes());
        buf.push(0x00);
        write_len_prefixed(buf, &self.certificate_pem);
    }
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// An unsigned transaction proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    transaction_id: String,
    nonce: [u8; PROPOSAL_NONCE_LENGTH],
    timestamp_ms: u64,
    channel_name: String,
    chaincode_name: String,
    function_name: String,
    public_arguments: Vec<String>,
    transient: TransientMap,
    creator: Creator,
}

impl Proposal {
    /// Builds a proposal with a fresh random nonce and the current time.
    pub fn new(
        channel_name: impl Into<String>,
        chaincode_name: impl Into<String>,
        function_name: impl Into<String>,
        public_arguments: Vec<String>,
        transient: TransientMap,
        creator: Creator,
    ) -> Self {
        let mut nonce = [0u8; PROPOSAL_NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let timestamp_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;

        Self::with_nonce(
            channel_name,
            chaincode_name,
            function_name,
            public_arguments,
            transient,
            creator,
            nonce,
            timestamp_ms,
        )
    }

    /// Builds a proposal from an explicit nonce and timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn with_nonce(
        channel_name: impl Into<String>,
        chaincode_name: impl Into<String>,
        function_name: impl Into<String>,
        public_arguments: Vec<String>,
        transient: TransientMap,
        creator: Creator,
        nonce: [u8; PROPOSAL_NONCE_LENGTH],
        timestamp_ms: u64,
    ) -> Self {
        let mut proposal = Self {
            transaction_id: String::new(),
            nonce,
            timestamp_ms,
            channel_name: channel_name.into(),
            chaincode_name: chaincode_name.into(),
            function_name: function_name.into(),
            public_arguments,
            transient,
            creator,
        };
        proposal.transaction_id = proposal.compute_transaction_id();
        proposal
    }

    /// Canonical bytes that are signed and hashed into the transaction id.
    ///
    /// Layout: nonce, timestamp (u64 LE), creator, channel, chaincode,
    /// function, then each public argument length-prefixed. Transient data
    /// is excluded.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256 + self.creator.certificate_pem.len());

        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        self.creator.write_to(&mut buf);

        buf.extend_from_slice(self.channel_name.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.chaincode_name.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.function_name.as_bytes());
        buf.push(0x00);

        buf.extend_from_slice(&(self.public_arguments.len() as u32).to_le_bytes());
        for arg in &self.public_arguments {
            write_len_prefixed(&mut buf, arg.as_bytes());
        }

        buf
    }

    /// SHA-256 of the signable bytes; what signers sign.
    pub fn digest(&self) -> [u8; 32] {
        sha256_array(&self.signable_bytes())
    }

    /// Recomputes the transaction id from the current contents.
    pub fn compute_transaction_id(&self) -> String {
        sha256_hex(&self.signable_bytes())
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn nonce(&self) -> &[u8; PROPOSAL_NONCE_LENGTH] {
        &self.nonce
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn chaincode_name(&self) -> &str {
        &self.chaincode_name
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn public_arguments(&self) -> &[String] {
        &self.public_arguments
    }

    pub fn transient(&self) -> &TransientMap {
        &self.transient
    }

    pub fn creator(&self) -> &Creator {
        &self.creator
    }
}

/// A proposal plus the creator's signature over [`Proposal::digest`].
#[derive(Debug, Clone)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signature: Vec<u8>,
}
