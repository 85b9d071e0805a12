//! The gRPC transport against an in-process TLS peer backed by a devnet.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use certa_protocol::config::Endpoint;
use certa_protocol::gateway::PrivateFields;
use certa_protocol::identity::{Identity, Role};
use certa_protocol::ledger::{
    Connector, Creator, DevnetLedger, GrpcConnector, LedgerChannel, LedgerPeerService, TransportError,
};
use certa_protocol::{ConnectionManager, ErrorKind, TransactionOrchestrator};
use common::{config, devnet, enrollment_params, identity, CHAINCODE, CHANNEL, MSP};
use serde_json::json;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Identity as TlsIdentity, Server, ServerTlsConfig};

const PEER_HOST: &str = "peer0.registrar.example.edu";

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// A TLS CA and a server certificate for [`PEER_HOST`] issued by it.
struct PeerTls {
    root_pem: String,
    cert_pem: String,
    key_pem: String,
}

fn peer_tls() -> PeerTls {
    let ca_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "tlsca.registrar.example.edu");
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let cert = rcgen::CertificateParams::new(vec![PEER_HOST.to_string()])
        .unwrap()
        .signed_by(&key, &ca, &ca_key)
        .unwrap();

    PeerTls {
        root_pem: ca.pem(),
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    }
}

/// Serves `ledger` over TLS on a loopback port.
async fn serve(ledger: &DevnetLedger, tls: &PeerTls) -> SocketAddr {
    let peer = identity("peer0", Role::Admin);
    let creator = Creator {
        msp_id: MSP.to_string(),
        owner_id: peer.owner_id().clone(),
        role: Role::Admin,
        certificate_pem: peer.certificate_pem().to_vec(),
    };
    let channel = ledger
        .connect(&Endpoint::new(format!("devnet://{PEER_HOST}:7051")), &creator)
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .tls_config(ServerTlsConfig::new().identity(TlsIdentity::from_pem(&tls.cert_pem, &tls.key_pem)))
        .unwrap()
        .add_service(LedgerPeerService::new(channel).into_server())
        .serve_with_incoming(TcpListenerStream::new(listener));
    tokio::spawn(server);
    addr
}

/// Gateway config pointing at `addr` by IP, verified as [`PEER_HOST`].
fn grpcs_config(addr: SocketAddr, root_pem: &str) -> certa_protocol::config::GatewayConfig {
    let mut config = config();
    config.endpoint = Endpoint::new(format!("grpcs://{addr}")).with_tls_root(root_pem.as_bytes().to_vec());
    config.endpoint.server_name_override = Some(PEER_HOST.to_string());
    config
}

async fn connect(addr: SocketAddr, root_pem: &str) -> Arc<ConnectionManager> {
    ConnectionManager::connect(
        grpcs_config(addr, root_pem),
        Arc::new(GrpcConnector::new()),
        identity("operator", Role::Admin),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn submit_commits_over_tls() {
    let ledger = devnet();
    let tls = peer_tls();
    let addr = serve(&ledger, &tls).await;

    let manager = connect(addr, &tls.root_pem).await;
    let handle = manager.contract_handle(CHANNEL, CHAINCODE, None).await.unwrap();
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let result = orchestrator
        .submit(&handle, "Incr", args(&["visits"]), None)
        .await
        .unwrap();
    assert!(result.committed);
    assert_eq!(result.result_payload, b"1");
    assert_eq!(result.block_number, Some(1));
    assert_eq!(
        ledger.public_state(CHANNEL, CHAINCODE, "visits"),
        Some(b"1".to_vec())
    );

    let value = orchestrator
        .evaluate(&handle, "Get", args(&["visits"]))
        .await
        .unwrap();
    assert_eq!(value, b"1");
}

#[tokio::test]
async fn private_fields_reach_the_peer_but_not_the_block() {
    let ledger = devnet();
    let tls = peer_tls();
    let addr = serve(&ledger, &tls).await;

    let manager = connect(addr, &tls.root_pem).await;
    let handle = manager.contract_handle(CHANNEL, CHAINCODE, None).await.unwrap();
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let fields: PrivateFields = serde_json::from_value(json!({ "gpa": "3.6" })).unwrap();
    let result = orchestrator
        .submit_private(&handle, "Anchor", args(&["S1"]), &fields)
        .await
        .unwrap();
    assert!(result.committed);

    let stored = ledger.private_state(CHANNEL, CHAINCODE, "vault", "S1").unwrap();
    assert_eq!(certa_protocol::crypto::sha256_hex(&stored), result.hash);
    let log = serde_json::to_string(&ledger.blocks()).unwrap();
    assert!(!log.contains("3.6"));
}

#[tokio::test]
async fn peer_errors_classify_as_they_do_in_process() {
    let ledger = devnet();
    let tls = peer_tls();
    let addr = serve(&ledger, &tls).await;

    let manager = connect(addr, &tls.root_pem).await;
    let handle = manager.contract_handle(CHANNEL, CHAINCODE, None).await.unwrap();
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let err = orchestrator
        .evaluate(&handle, "Get", args(&["nothing"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    ledger.set_org_online("UniversityMSP", false);
    let err = orchestrator
        .submit(&handle, "Put", args(&["k", "v"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Endorsement);
    assert_eq!(ledger.block_height(), 0);
}

#[tokio::test]
async fn self_enrolled_creator_is_rejected_by_the_remote_peer() {
    let ledger = devnet();
    let tls = peer_tls();
    let addr = serve(&ledger, &tls).await;

    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let cert = enrollment_params("mallory", "admin").self_signed(&key).unwrap();
    let mallory = Identity::new(
        "mallory",
        MSP,
        cert.pem().into_bytes(),
        key.serialize_pem().into_bytes(),
        Role::Admin,
    );

    let manager = connect(addr, &tls.root_pem).await;
    let handle = manager
        .contract_handle(CHANNEL, CHAINCODE, Some(&mallory))
        .await
        .unwrap();
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let err = orchestrator
        .submit(&handle, "Put", args(&["k", "v"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.message().contains("creator certificate"), "{err}");
    assert_eq!(ledger.block_height(), 0);
}

#[tokio::test]
async fn untrusted_tls_root_cannot_connect() {
    let ledger = devnet();
    let tls = peer_tls();
    let addr = serve(&ledger, &tls).await;

    let stranger = peer_tls();
    let connected = ConnectionManager::connect(
        grpcs_config(addr, &stranger.root_pem),
        Arc::new(GrpcConnector::new()),
        identity("operator", Role::Admin),
    )
    .await;
    let Err(err) = connected else {
        panic!("connected to a peer whose TLS root was not trusted");
    };
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn closed_channel_refuses_calls() {
    let ledger = devnet();
    let tls = peer_tls();
    let addr = serve(&ledger, &tls).await;

    let operator = identity("operator", Role::Admin);
    let creator = Creator {
        msp_id: MSP.to_string(),
        owner_id: operator.owner_id().clone(),
        role: Role::Admin,
        certificate_pem: operator.certificate_pem().to_vec(),
    };
    let channel = GrpcConnector::new()
        .connect(&grpcs_config(addr, &tls.root_pem).endpoint, &creator)
        .await
        .unwrap();
    assert!(!channel.is_closed());

    channel.close().await;
    assert!(channel.is_closed());
    let err = channel.commit_status("abc").await.unwrap_err();
    assert_eq!(err, TransportError::Closed);
}
