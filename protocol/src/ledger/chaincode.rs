//! Chaincode execution surface.
//!
//! A [`Chaincode`] is the program endorsing peers run against a proposal.
//! It sees the world through a [`ChaincodeStub`]: committed state reads,
//! buffered writes, private collections, the transient map and the caller's
//! identity. The stub records every read version and every write so the
//! peer can return a [`ReadWriteSet`] for commit-time validation.
//!
//! Reads always see committed state. Writes made during the same
//! simulation are not visible to later reads in that simulation.

use std::collections::BTreeMap;

use thiserror::Error;

use super::proposal::{Proposal, TransientMap};
use super::transport::{KeyRead, KeyWrite, PrivateWriteHash, RangeRead, ReadWriteSet};
use crate::crypto::certificate::{ATTR_ENROLLMENT_ID, ATTR_ROLE};
use crate::crypto::hash::sha256_hex;
use crate::crypto::{Certificate, CryptoError};
use crate::identity::{OwnerId, Role};

/// An error response from chaincode. Peers turn this into a failed
/// endorsement carrying the same status and message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ChaincodeError {
    pub status: u16,
    pub message: String,
}

impl ChaincodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Program executed by endorsing peers.
pub trait Chaincode: Send + Sync {
    fn invoke(&self, stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError>;
}

/// The authenticated caller, as chaincode sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub msp_id: String,
    pub owner_id: OwnerId,
    pub role: Role,
}

impl ClientIdentity {
    /// Reads owner and role from the enrollment attributes of a certificate
    /// the peer has already chained to `msp_id`'s root.
    pub fn from_certificate(msp_id: &str, cert: &Certificate) -> Result<Self, CryptoError> {
        let attribute = |name: &str| {
            cert.attribute(name).ok_or_else(|| {
                CryptoError::UntrustedCertificate(format!(
                    "{} carries no {name} attribute",
                    cert.subject()
                ))
            })
        };
        let owner_id = OwnerId::new(attribute(ATTR_ENROLLMENT_ID)?);
        let role = match attribute(ATTR_ROLE)?.parse() {
            Ok(role) => role,
            Err(never) => match never {},
        };
        Ok(Self {
            msp_id: msp_id.to_string(),
            owner_id,
            role,
        })
    }
}

/// Read access to committed state, implemented by the peer.
pub trait StateReader {
    /// Value and version of a public key.
    fn get(&self, key: &str) -> Option<(Vec<u8>, u64)>;

    /// All public keys starting with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>, u64)>;

    /// Value of a key in a private collection.
    fn get_private(&self, collection: &str, key: &str) -> Option<Vec<u8>>;
}

/// A private write, held by the endorsing peer and never sent to ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateWrite {
    pub collection: String,
    pub key: String,
    pub value: Vec<u8>,
}

/// Everything a simulation produced.
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    pub rwset: ReadWriteSet,
    pub private_writes: Vec<PrivateWrite>,
}

pub struct ChaincodeStub<'a> {
    proposal: &'a Proposal,
    client: ClientIdentity,
    state: &'a dyn StateReader,
    reads: BTreeMap<String, Option<u64>>,
    range_reads: Vec<RangeRead>,
    writes: BTreeMap<String, Option<Vec<u8>>>,
    private_writes: BTreeMap<(String, String), Vec<u8>>,
}

impl<'a> ChaincodeStub<'a> {
    /// `client` is the caller as authenticated by the peer.
    pub fn new(proposal: &'a Proposal, state: &'a dyn StateReader, client: ClientIdentity) -> Self {
        Self {
            proposal,
            client,
            state,
            reads: BTreeMap::new(),
            range_reads: Vec::new(),
            writes: BTreeMap::new(),
            private_writes: BTreeMap::new(),
        }
    }

    pub fn function(&self) -> &str {
        self.proposal.function_name()
    }

    pub fn args(&self) -> &[String] {
        self.proposal.public_arguments()
    }

    pub fn transient(&self) -> &TransientMap {
        self.proposal.transient()
    }

    pub fn client(&self) -> &ClientIdentity {
        &self.client
    }

    pub fn tx_id(&self) -> &str {
        self.proposal.transaction_id()
    }

    /// Proposal creation time, milliseconds since the Unix epoch.
    pub fn tx_timestamp_ms(&self) -> u64 {
        self.proposal.timestamp_ms()
    }

    pub fn get_state(&mut self, key: &str) -> Option<Vec<u8>> {
        let found = self.state.get(key);
        self.reads
            .entry(key.to_string())
            .or_insert_with(|| found.as_ref().map(|(_, v)| *v));
        found.map(|(value, _)| value)
    }

    pub fn put_state(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.writes.insert(key.into(), Some(value));
    }

    pub fn del_state(&mut self, key: impl Into<String>) {
        self.writes.insert(key.into(), None);
    }

    /// Prefix scan. The scanned key set is validated again at commit, so a
    /// concurrent insert under the same prefix invalidates this transaction.
    pub fn get_state_by_prefix(&mut self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let rows = self.state.scan_prefix(prefix);
        self.range_reads.push(RangeRead {
            prefix: prefix.to_string(),
            reads: rows
                .iter()
                .map(|(key, _, version)| KeyRead {
                    key: key.clone(),
                    version: Some(*version),
                })
                .collect(),
        });
        rows.into_iter().map(|(key, value, _)| (key, value)).collect()
    }

    pub fn get_private_data(&self, collection: &str, key: &str) -> Option<Vec<u8>> {
        self.state.get_private(collection, key)
    }

    pub fn put_private_data(&mut self, collection: impl Into<String>, key: impl Into<String>, value: Vec<u8>) {
        self.private_writes
            .insert((collection.into(), key.into()), value);
    }

    /// Finishes the simulation. Private values leave only as hashes in the
    /// read/write set; the values themselves go back separately.
    pub fn into_simulation(self) -> Simulation {
        let private_hashes = self
            .private_writes
            .iter()
            .map(|((collection, key), value)| PrivateWriteHash {
                collection: collection.clone(),
                key_hash: sha256_hex(key.as_bytes()),
                value_hash: sha256_hex(value),
            })
            .collect();

        Simulation {
            rwset: ReadWriteSet {
                reads: self
                    .reads
                    .into_iter()
                    .map(|(key, version)| KeyRead { key, version })
                    .collect(),
                range_reads: self.range_reads,
                writes: self
                    .writes
                    .into_iter()
                    .map(|(key, value)| KeyWrite { key, value })
                    .collect(),
                private_writes: private_hashes,
            },
            private_writes: self
                .private_writes
                .into_iter()
                .map(|((collection, key), value)| PrivateWrite {
                    collection,
                    key,
                    value,
                })
                .collect(),
        }
    }
}
