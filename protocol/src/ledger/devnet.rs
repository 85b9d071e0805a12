//! # Devnet Ledger
//!
//! A single-process permissioned ledger that speaks the [`LedgerChannel`]
//! protocol. It backs the integration tests and `certa-node --devnet`.
//!
//! What it models:
//!
//! - N organizations, each with its own endorsing key, and an N-of-M
//!   endorsement policy.
//! - Per-MSP root certificates. A creator's certificate must chain to the
//!   root of the MSP it names, and chaincode sees the owner and role from
//!   the certificate's enrollment attributes. Proposal and envelope
//!   signatures are checked against that certificate.
//! - Commit-time validation: endorsement count, MVCC read versions, phantom
//!   reads on prefix scans, duplicate transaction ids. Invalid transactions
//!   still land in a block, flagged with their validation code.
//! - Private collections. Private values stay with the endorsing peer until
//!   the transaction commits and never appear in a block. Values from
//!   endorsements that are never ordered are dropped after a TTL.
//! - Fault injection: endorsement latency, offline organizations, peer and
//!   orderer outages, commit latency, connect latency.
//!
//! What it does not model: consensus, gossip, persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::chaincode::{
    Chaincode, ChaincodeStub, ClientIdentity, PrivateWrite, Simulation, StateReader,
};
use super::proposal::{Creator, SignedProposal};
use super::transport::{
    CommitStatus, Connector, Endorsement, Envelope, KeyRead, LedgerChannel, ProposalResponse,
    ReadWriteSet, TransportError, TxValidationCode,
};
use crate::config::Endpoint;
use crate::crypto::{Certificate, CryptoError};
use crate::identity::OwnerId;

/// How long private writes wait for their transaction to be ordered.
pub const DEFAULT_PRIVATE_DATA_TTL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Network shape of a devnet.
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    /// Organization ids, each running one endorsing peer.
    pub organizations: Vec<String>,
    /// How many distinct organizations must endorse a transaction.
    pub required_endorsements: usize,
    /// Root certificate of each client MSP. Creators from other MSPs are
    /// rejected.
    pub msp_roots: HashMap<String, Certificate>,
    /// Lifetime of private writes held for an endorsed transaction.
    pub private_data_ttl: Duration,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            organizations: vec!["RegistrarMSP".to_string(), "UniversityMSP".to_string()],
            required_endorsements: 2,
            msp_roots: HashMap::new(),
            private_data_ttl: DEFAULT_PRIVATE_DATA_TTL,
        }
    }
}

impl DevnetConfig {
    /// Trusts `root_pem` as the CA of `msp_id`.
    pub fn with_msp_root(mut self, msp_id: impl Into<String>, root_pem: &[u8]) -> Result<Self, CryptoError> {
        self.msp_roots
            .insert(msp_id.into(), Certificate::from_pem(root_pem)?);
        Ok(self)
    }
}

#[derive(Debug, Default)]
struct Faults {
    endorsement_delay: Duration,
    commit_delay: Duration,
    connect_delay: Duration,
    offline_orgs: HashSet<String>,
    peer_down: bool,
    orderer_down: bool,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

type Namespace = (String, String);

#[derive(Debug, Default)]
struct World {
    public: BTreeMap<String, (Vec<u8>, u64)>,
    private: BTreeMap<(String, String), Vec<u8>>,
}

impl World {
    fn version(&self, key: &str) -> Option<u64> {
        self.public.get(key).map(|(_, v)| *v)
    }
}

impl StateReader for World {
    fn get(&self, key: &str) -> Option<(Vec<u8>, u64)> {
        self.public.get(key).cloned()
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>, u64)> {
        self.public
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, ver))| (k.clone(), v.clone(), *ver))
            .collect()
    }

    fn get_private(&self, collection: &str, key: &str) -> Option<Vec<u8>> {
        self.private
            .get(&(collection.to_string(), key.to_string()))
            .cloned()
    }
}

/// One committed transaction. Each block holds exactly one.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub number: u64,
    pub transaction_id: String,
    pub channel_name: String,
    pub chaincode_name: String,
    pub function_name: String,
    pub public_arguments: Vec<String>,
    pub creator: Creator,
    pub validation_code: TxValidationCode,
    pub rwset: ReadWriteSet,
}

struct PendingPrivate {
    namespace: Namespace,
    writes: Vec<PrivateWrite>,
    endorsed_at: Instant,
}

struct Inner {
    config: DevnetConfig,
    org_keys: HashMap<String, SigningKey>,
    chaincodes: RwLock<HashMap<Namespace, Arc<dyn Chaincode>>>,
    worlds: RwLock<HashMap<Namespace, World>>,
    pending_private: Mutex<HashMap<String, PendingPrivate>>,
    blocks: RwLock<Vec<Block>>,
    statuses: Mutex<HashMap<String, CommitStatus>>,
    faults: Mutex<Faults>,
    channels_opened: AtomicUsize,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Handle to a devnet. Clones share the same ledger.
#[derive(Clone)]
pub struct DevnetLedger {
    inner: Arc<Inner>,
}

impl fmt::Debug for DevnetLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevnetLedger")
            .field("organizations", &self.inner.config.organizations)
            .field("required_endorsements", &self.inner.config.required_endorsements)
            .field("block_height", &self.block_height())
            .finish_non_exhaustive()
    }
}

impl Default for DevnetLedger {
    fn default() -> Self {
        Self::new(DevnetConfig::default())
    }
}

impl DevnetLedger {
    pub fn new(config: DevnetConfig) -> Self {
        let org_keys = config
            .organizations
            .iter()
            .map(|org| (org.clone(), SigningKey::generate(&mut rand::rngs::OsRng)))
            .collect();

        info!(
            organizations = config.organizations.len(),
            required = config.required_endorsements,
            msps = config.msp_roots.len(),
            "devnet ledger started"
        );

        Self {
            inner: Arc::new(Inner {
                config,
                org_keys,
                chaincodes: RwLock::new(HashMap::new()),
                worlds: RwLock::new(HashMap::new()),
                pending_private: Mutex::new(HashMap::new()),
                blocks: RwLock::new(Vec::new()),
                statuses: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                channels_opened: AtomicUsize::new(0),
            }),
        }
    }

    /// Deploys `chaincode` under `name` on `channel`.
    pub fn install(&self, channel: &str, name: &str, chaincode: Arc<dyn Chaincode>) {
        self.inner
            .chaincodes
            .write()
            .insert((channel.to_string(), name.to_string()), chaincode);
    }

    // -- fault injection ----------------------------------------------------

    /// Every endorsement (and evaluation) waits this long before answering.
    pub fn set_endorsement_delay(&self, delay: Duration) {
        self.inner.faults.lock().endorsement_delay = delay;
    }

    /// Commit status answers arrive this long after being asked for.
    pub fn set_commit_delay(&self, delay: Duration) {
        self.inner.faults.lock().commit_delay = delay;
    }

    /// Opening a channel takes this long.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner.faults.lock().connect_delay = delay;
    }

    /// An offline organization does not endorse.
    pub fn set_org_online(&self, org: &str, online: bool) {
        let mut faults = self.inner.faults.lock();
        if online {
            faults.offline_orgs.remove(org);
        } else {
            faults.offline_orgs.insert(org.to_string());
        }
    }

    /// While the peer is down, connects and peer calls fail with `Unavailable`.
    pub fn set_peer_available(&self, available: bool) {
        self.inner.faults.lock().peer_down = !available;
    }

    /// While the orderer is down, submissions fail with `Unavailable`.
    pub fn set_orderer_available(&self, available: bool) {
        self.inner.faults.lock().orderer_down = !available;
    }

    // -- inspection ---------------------------------------------------------

    /// Number of channels opened through the [`Connector`] impl.
    pub fn channels_opened(&self) -> usize {
        self.inner.channels_opened.load(Ordering::SeqCst)
    }

    /// Private write sets still waiting for their transaction. Expired ones
    /// are dropped first.
    pub fn pending_private_count(&self) -> usize {
        let mut pending = self.inner.pending_private.lock();
        self.expire_private(&mut pending);
        pending.len()
    }

    pub fn block_height(&self) -> u64 {
        self.inner.blocks.read().len() as u64
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.inner.blocks.read().clone()
    }

    pub fn public_state(&self, channel: &str, chaincode: &str, key: &str) -> Option<Vec<u8>> {
        self.inner
            .worlds
            .read()
            .get(&(channel.to_string(), chaincode.to_string()))
            .and_then(|w| w.get(key))
            .map(|(value, _)| value)
    }

    pub fn private_state(
        &self,
        channel: &str,
        chaincode: &str,
        collection: &str,
        key: &str,
    ) -> Option<Vec<u8>> {
        self.inner
            .worlds
            .read()
            .get(&(channel.to_string(), chaincode.to_string()))
            .and_then(|w| w.get_private(collection, key))
    }

    // -- peer ---------------------------------------------------------------

    fn check_peer(&self) -> Result<(), TransportError> {
        if self.inner.faults.lock().peer_down {
            return Err(TransportError::Unavailable(
                "failed to connect to peer: connection refused".to_string(),
            ));
        }
        Ok(())
    }

    /// Chains the creator's certificate to its MSP root and reads who it
    /// really is from the certificate. A creator whose declared owner or
    /// role disagrees with its certificate is rejected.
    fn authenticate(&self, creator: &Creator) -> Result<(Certificate, ClientIdentity), TransportError> {
        let rejected = |reason: String| TransportError::Rejected(reason);

        let root = self
            .inner
            .config
            .msp_roots
            .get(&creator.msp_id)
            .ok_or_else(|| rejected(format!("creator MSP {} is not a member of this network", creator.msp_id)))?;
        let cert = Certificate::from_pem(&creator.certificate_pem)
            .map_err(|e| rejected(format!("creator certificate: {e}")))?;
        root.verify_issued(&cert)
            .map_err(|e| rejected(format!("creator certificate: {e}")))?;

        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        if cert.is_expired_at(now) {
            return Err(rejected(format!("creator certificate {} has expired", cert.subject())));
        }

        let client = ClientIdentity::from_certificate(&creator.msp_id, &cert)
            .map_err(|e| rejected(format!("creator certificate: {e}")))?;
        if client.owner_id != creator.owner_id || client.role != creator.role {
            return Err(rejected(format!(
                "creator claims {} ({}) but its certificate enrolls {} ({})",
                creator.owner_id, creator.role, client.owner_id, client.role
            )));
        }
        Ok((cert, client))
    }

    fn verify_proposal(&self, signed: &SignedProposal) -> Result<ClientIdentity, TransportError> {
        let proposal = &signed.proposal;
        if proposal.compute_transaction_id() != proposal.transaction_id() {
            return Err(TransportError::Rejected(
                "transaction id does not match proposal contents".to_string(),
            ));
        }
        let (cert, client) = self.authenticate(proposal.creator())?;
        cert.verify(&proposal.digest(), &signed.signature)
            .map_err(|_| TransportError::Rejected("invalid creator signature".to_string()))?;
        Ok(client)
    }

    fn expire_private(&self, pending: &mut HashMap<String, PendingPrivate>) {
        let ttl = self.inner.config.private_data_ttl;
        let now = Instant::now();
        let before = pending.len();
        pending.retain(|_, p| now.saturating_duration_since(p.endorsed_at) <= ttl);
        let dropped = before - pending.len();
        if dropped > 0 {
            debug!(dropped, remaining = pending.len(), "dropped private writes of unordered endorsements");
        }
    }


    /// Runs the chaincode against committed state. Returns the simulation
    /// and the response payload.
    async fn simulate(
        &self,
        signed: &SignedProposal,
    ) -> Result<(Simulation, Vec<u8>), TransportError> {
        self.check_peer()?;
        let client = self.verify_proposal(signed)?;

        let delay = self.inner.faults.lock().endorsement_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        // Outages that started while the request was in flight still count.
        self.check_peer()?;

        let proposal = &signed.proposal;
        let namespace = (
            proposal.channel_name().to_string(),
            proposal.chaincode_name().to_string(),
        );
        let chaincode = self.inner.chaincodes.read().get(&namespace).cloned();
        let Some(chaincode) = chaincode else {
            return Err(TransportError::Chaincode {
                status: 500,
                message: format!(
                    "chaincode {} not found on channel {}",
                    namespace.1, namespace.0
                ),
            });
        };

        let result = {
            let worlds = self.inner.worlds.read();
            let empty = World::default();
            let world = worlds.get(&namespace).unwrap_or(&empty);
            let mut stub = ChaincodeStub::new(proposal, world, client);
            chaincode
                .invoke(&mut stub)
                .map(|payload| (stub.into_simulation(), payload))
        };

        result.map_err(|e| {
            debug!(tx_id = %proposal.transaction_id(), status = e.status, "chaincode returned error");
            TransportError::Chaincode {
                status: e.status,
                message: e.message,
            }
        })
    }

    async fn endorse_proposal(
        &self,
        signed: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        let (simulation, payload) = self.simulate(signed).await?;
        let proposal = &signed.proposal;
        let tx_id = proposal.transaction_id();

        let online: Vec<String> = {
            let faults = self.inner.faults.lock();
            self.inner
                .config
                .organizations
                .iter()
                .filter(|org| !faults.offline_orgs.contains(*org))
                .cloned()
                .collect()
        };
        let required = self.inner.config.required_endorsements;
        if online.len() < required {
            return Err(TransportError::EndorsementPolicy {
                required,
                received: online.len(),
            });
        }

        let digest = ProposalResponse::digest(tx_id, &payload, &simulation.rwset);
        let endorsements = online
            .iter()
            .filter_map(|org| {
                self.inner.org_keys.get(org).map(|key| Endorsement {
                    msp_id: org.clone(),
                    signature: key.sign(&digest).to_bytes().to_vec(),
                })
            })
            .collect();

        if !simulation.private_writes.is_empty() {
            let mut pending = self.inner.pending_private.lock();
            self.expire_private(&mut pending);
            pending.insert(
                tx_id.to_string(),
                PendingPrivate {
                    namespace: (
                        proposal.channel_name().to_string(),
                        proposal.chaincode_name().to_string(),
                    ),
                    writes: simulation.private_writes,
                    endorsed_at: Instant::now(),
                },
            );
        }

        debug!(tx_id, endorsers = online.len(), "proposal endorsed");
        Ok(ProposalResponse {
            payload,
            rwset: simulation.rwset,
            endorsements,
        })
    }

    // -- orderer + committer -------------------------------------------------

    /// Orders the envelope into its own block and validates it. Invalid
    /// transactions are still recorded; only their writes are dropped.
    fn order(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.inner.faults.lock().orderer_down {
            return Err(TransportError::Unavailable(
                "failed to send transaction to orderer: connection refused".to_string(),
            ));
        }

        let (cert, _) = self.authenticate(&envelope.creator)?;
        cert.verify(&envelope.digest(), &envelope.signature)
            .map_err(|_| TransportError::Rejected("invalid envelope signature".to_string()))?;

        let tx_id = envelope.transaction_id.clone();
        let mut statuses = self.inner.statuses.lock();
        if statuses.contains_key(&tx_id) {
            return Err(TransportError::Invalidated {
                transaction_id: tx_id,
                code: TxValidationCode::DuplicateTxId,
            });
        }

        let namespace = (
            envelope.channel_name.clone(),
            envelope.chaincode_name.clone(),
        );
        let pending = {
            let mut pending = self.inner.pending_private.lock();
            self.expire_private(&mut pending);
            pending
                .remove(&tx_id)
                .filter(|p| p.namespace == namespace)
        };

        let mut worlds = self.inner.worlds.write();
        let world = worlds.entry(namespace.clone()).or_default();
        let mut code = self.validate(world, envelope);
        if code.is_valid() && !envelope.rwset.private_writes.is_empty() && pending.is_none() {
            // The hashes would anchor data this peer no longer holds.
            warn!(tx_id = %tx_id, "private writes expired before ordering");
            code = TxValidationCode::InvalidOther;
        }

        let mut blocks = self.inner.blocks.write();
        let number = blocks.len() as u64 + 1;

        if code.is_valid() {
            for write in &envelope.rwset.writes {
                match &write.value {
                    Some(value) => {
                        world.public.insert(write.key.clone(), (value.clone(), number));
                    }
                    None => {
                        world.public.remove(&write.key);
                    }
                }
            }
            if let Some(pending) = pending {
                for write in pending.writes {
                    world.private.insert((write.collection, write.key), write.value);
                }
            }
        }

        blocks.push(Block {
            number,
            transaction_id: tx_id.clone(),
            channel_name: envelope.channel_name.clone(),
            chaincode_name: envelope.chaincode_name.clone(),
            function_name: envelope.function_name.clone(),
            public_arguments: envelope.public_arguments.clone(),
            creator: envelope.creator.clone(),
            validation_code: code,
            rwset: envelope.rwset.clone(),
        });
        statuses.insert(
            tx_id.clone(),
            CommitStatus {
                code,
                block_number: number,
            },
        );

        info!(tx_id = %tx_id, block = number, code = %code, "transaction committed");
        Ok(())
    }

    fn validate(&self, world: &World, envelope: &Envelope) -> TxValidationCode {
        let digest = ProposalResponse::digest(
            &envelope.transaction_id,
            &envelope.response_payload,
            &envelope.rwset,
        );
        let endorsed: HashSet<&str> = envelope
            .endorsements
            .iter()
            .filter(|e| {
                let Some(key) = self.inner.org_keys.get(&e.msp_id) else {
                    return false;
                };
                ed25519_dalek::Signature::from_slice(&e.signature)
                    .map(|sig| key.verifying_key().verify(&digest, &sig).is_ok())
                    .unwrap_or(false)
            })
            .map(|e| e.msp_id.as_str())
            .collect();
        if endorsed.len() < self.inner.config.required_endorsements {
            return TxValidationCode::EndorsementPolicyFailure;
        }

        for read in &envelope.rwset.reads {
            if world.version(&read.key) != read.version {
                return TxValidationCode::MvccReadConflict;
            }
        }

        for range in &envelope.rwset.range_reads {
            let current: Vec<KeyRead> = world
                .scan_prefix(&range.prefix)
                .into_iter()
                .map(|(key, _, version)| KeyRead {
                    key,
                    version: Some(version),
                })
                .collect();
            if current != range.reads {
                return TxValidationCode::PhantomReadConflict;
            }
        }

        TxValidationCode::Valid
    }

    async fn status_of(&self, transaction_id: &str) -> Result<CommitStatus, TransportError> {
        self.check_peer()?;
        let delay = self.inner.faults.lock().commit_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner
            .statuses
            .lock()
            .get(transaction_id)
            .copied()
            .ok_or_else(|| TransportError::UnknownTransaction(transaction_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A channel into a [`DevnetLedger`], opened for one owner.
#[derive(Debug)]
pub struct DevnetChannel {
    ledger: DevnetLedger,
    owner_id: OwnerId,
    closed: AtomicBool,
}

impl DevnetChannel {
    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerChannel for DevnetChannel {
    async fn endorse(&self, proposal: &SignedProposal) -> Result<ProposalResponse, TransportError> {
        self.ensure_open()?;
        let response = self.ledger.endorse_proposal(proposal).await?;
        // Closed while the peers were working.
        self.ensure_open()?;
        Ok(response)
    }

    async fn evaluate(&self, proposal: &SignedProposal) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        let (_, payload) = self.ledger.simulate(proposal).await?;
        self.ensure_open()?;
        Ok(payload)
    }

    async fn submit(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.ledger.order(envelope)
    }

    async fn commit_status(&self, transaction_id: &str) -> Result<CommitStatus, TransportError> {
        self.ensure_open()?;
        let status = self.ledger.status_of(transaction_id).await?;
        self.ensure_open()?;
        Ok(status)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(owner = %self.owner_id, "devnet channel closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for DevnetLedger {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        creator: &Creator,
    ) -> Result<Arc<dyn LedgerChannel>, TransportError> {
        self.check_peer()?;

        let delay = self.inner.faults.lock().connect_delay;
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        let opened = self.inner.channels_opened.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            endpoint = %endpoint.address,
            owner = %creator.owner_id,
            opened,
            "devnet channel opened"
        );

        Ok(Arc::new(DevnetChannel {
            ledger: self.clone(),
            owner_id: creator.owner_id.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}
