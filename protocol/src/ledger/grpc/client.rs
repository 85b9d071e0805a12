use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint as TonicEndpoint};
use tracing::debug;

use super::proto::ledger_peer_client::LedgerPeerClient;
use super::wire::{
    error_from_status, CommitStatusRequest, EnvelopeMessage, SignedProposalMessage,
};
use crate::config::Endpoint;
use crate::identity::OwnerId;
use crate::ledger::proposal::{Creator, SignedProposal};
use crate::ledger::transport::{
    CommitStatus, Connector, Envelope, LedgerChannel, ProposalResponse, TransportError,
};

/// Plaintext peer addresses.
pub const GRPC_SCHEME: &str = "grpc://";
/// TLS peer addresses.
pub const GRPCS_SCHEME: &str = "grpcs://";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Flattens an error and its sources; tonic's top-level messages are terse.
fn describe(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens one tonic channel per [`connect`](Connector::connect) call.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    connect_timeout: Duration,
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl GrpcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `true` when `address` names a gRPC peer.
    pub fn handles(address: &str) -> bool {
        address.starts_with(GRPC_SCHEME) || address.starts_with(GRPCS_SCHEME)
    }

    fn tonic_endpoint(&self, endpoint: &Endpoint) -> Result<TonicEndpoint, TransportError> {
        let address = endpoint.address.trim();
        let (uri, tls) = if let Some(rest) = address.strip_prefix(GRPCS_SCHEME) {
            (format!("https://{rest}"), true)
        } else if let Some(rest) = address.strip_prefix(GRPC_SCHEME) {
            (format!("http://{rest}"), false)
        } else {
            return Err(TransportError::Other(format!(
                "unsupported endpoint {address}: expected {GRPC_SCHEME} or {GRPCS_SCHEME}"
            )));
        };

        let mut builder = Channel::from_shared(uri)
            .map_err(|e| TransportError::Other(format!("invalid endpoint {address}: {e}")))?
            .connect_timeout(self.connect_timeout);

        if tls {
            let root = endpoint.tls_root_pem.as_ref().ok_or_else(|| {
                TransportError::Other(format!("{address} uses TLS but no TLS root is configured"))
            })?;
            let mut config = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(root));
            if let Some(name) = &endpoint.server_name_override {
                config = config.domain_name(name.clone());
            }
            builder = builder.tls_config(config).map_err(|e| {
                TransportError::Other(format!("invalid TLS settings for {address}: {}", describe(&e)))
            })?;
        }
        Ok(builder)
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        creator: &Creator,
    ) -> Result<Arc<dyn LedgerChannel>, TransportError> {
        let channel = self
            .tonic_endpoint(endpoint)?
            .connect()
            .await
            .map_err(|e| TransportError::Unavailable(format!("{}: {}", endpoint.address, describe(&e))))?;

        debug!(
            endpoint = %endpoint.address,
            owner = %creator.owner_id,
            tls = endpoint.address.starts_with(GRPCS_SCHEME),
            "gRPC channel opened"
        );
        Ok(Arc::new(GrpcChannel {
            address: endpoint.address.clone(),
            owner_id: creator.owner_id.clone(),
            client: RwLock::new(Some(LedgerPeerClient::new(channel))),
        }))
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A connected peer. Closing drops the underlying HTTP/2 connection once
/// in-flight calls finish with it.
#[derive(Debug)]
pub struct GrpcChannel {
    address: String,
    owner_id: OwnerId,
    client: RwLock<Option<LedgerPeerClient<Channel>>>,
}

impl GrpcChannel {
    fn client(&self) -> Result<LedgerPeerClient<Channel>, TransportError> {
        self.client.read().clone().ok_or(TransportError::Closed)
    }

    /// Closed while the call was on the wire.
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerChannel for GrpcChannel {
    async fn endorse(&self, proposal: &SignedProposal) -> Result<ProposalResponse, TransportError> {
        let mut client = self.client()?;
        let reply = client
            .endorse(SignedProposalMessage::from(proposal))
            .await
            .map_err(|s| error_from_status(&s))?
            .into_inner();
        self.ensure_open()?;
        ProposalResponse::try_from(reply)
    }

    async fn evaluate(&self, proposal: &SignedProposal) -> Result<Vec<u8>, TransportError> {
        let mut client = self.client()?;
        let reply = client
            .evaluate(SignedProposalMessage::from(proposal))
            .await
            .map_err(|s| error_from_status(&s))?
            .into_inner();
        self.ensure_open()?;
        Ok(reply.payload)
    }

    async fn submit(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut client = self.client()?;
        client
            .submit(EnvelopeMessage::try_from(envelope)?)
            .await
            .map_err(|s| error_from_status(&s))?;
        Ok(())
    }

    async fn commit_status(&self, transaction_id: &str) -> Result<CommitStatus, TransportError> {
        let mut client = self.client()?;
        let reply = client
            .commit_status(CommitStatusRequest {
                transaction_id: transaction_id.to_string(),
            })
            .await
            .map_err(|s| error_from_status(&s))?
            .into_inner();
        self.ensure_open()?;
        CommitStatus::try_from(reply)
    }

    async fn close(&self) {
        if self.client.write().take().is_some() {
            debug!(endpoint = %self.address, owner = %self.owner_id, "gRPC channel closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes_map_to_http_uris() {
        let connector = GrpcConnector::new();
        let plain = connector
            .tonic_endpoint(&Endpoint::new("grpc://peer0.registrar.example.edu:7051"))
            .unwrap();
        assert_eq!(plain.uri().scheme_str(), Some("http"));
        assert_eq!(plain.uri().port_u16(), Some(7051));

        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let root = rcgen::CertificateParams::new(vec!["tlsca.registrar.example.edu".into()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let tls = connector
            .tonic_endpoint(
                &Endpoint::new("grpcs://peer0.registrar.example.edu:7051")
                    .with_tls_root(root.pem().into_bytes()),
            )
            .unwrap();
        assert_eq!(tls.uri().scheme_str(), Some("https"));
    }

    #[test]
    fn tls_endpoint_needs_a_root() {
        let Err(err) = GrpcConnector::new().tonic_endpoint(&Endpoint::new("grpcs://peer0:7051")) else {
            panic!("TLS endpoint without a root was accepted");
        };
        assert!(err.to_string().contains("no TLS root"), "{err}");
    }

    #[test]
    fn other_schemes_are_refused() {
        assert!(GrpcConnector::new()
            .tonic_endpoint(&Endpoint::new("devnet://peer0:7051"))
            .is_err());
        assert!(GrpcConnector::handles("grpcs://peer0:7051"));
        assert!(!GrpcConnector::handles("devnet://peer0:7051"));
    }
}
