//! Shared fixtures: identities enrolled by a test membership CA and a small
//! key/value chaincode on a devnet that trusts that CA.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use certa_protocol::config::{Endpoint, GatewayConfig, PRIVATE_DATA_TRANSIENT_KEY};
use certa_protocol::crypto::certificate::{ATTR_ENROLLMENT_ID, ATTR_ROLE, OID_ENROLLMENT_ATTRIBUTES};
use certa_protocol::crypto::sha256_hex;
use certa_protocol::identity::{Identity, Role};
use certa_protocol::ledger::{Chaincode, ChaincodeError, ChaincodeStub, DevnetConfig, DevnetLedger};
use certa_protocol::ConnectionManager;

pub const CHANNEL: &str = "academic";
pub const CHAINCODE: &str = "kv";
pub const MSP: &str = "RegistrarMSP";

struct TestCa {
    key: rcgen::KeyPair,
    cert: rcgen::Certificate,
}

fn ca() -> &'static TestCa {
    static CA: OnceLock<TestCa> = OnceLock::new();
    CA.get_or_init(|| {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "ca.registrar.example.edu");
        let cert = params.self_signed(&key).unwrap();
        TestCa { key, cert }
    })
}

/// PEM of the CA every fixture identity is enrolled by.
pub fn ca_pem() -> String {
    ca().cert.pem()
}

/// Leaf parameters carrying `owner` and `role` as enrollment attributes.
pub fn enrollment_params(owner: &str, role: &str) -> rcgen::CertificateParams {
    let mut params =
        rcgen::CertificateParams::new(vec![format!("{owner}.registrar.example.edu")]).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, owner.to_string());
    let attrs = serde_json::json!({ "attrs": { ATTR_ENROLLMENT_ID: owner, ATTR_ROLE: role } });
    let oid: Vec<u64> = OID_ENROLLMENT_ATTRIBUTES.arcs().map(u64::from).collect();
    params.custom_extensions.push(rcgen::CustomExtension::from_oid_content(
        &oid,
        attrs.to_string().into_bytes(),
    ));
    params
}

/// An identity backed by a fresh P-256 key and a certificate from the test CA.
pub fn identity(owner: &str, role: Role) -> Identity {
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let cert = enrollment_params(owner, role.as_str())
        .signed_by(&key, &ca().cert, &ca().key)
        .unwrap();
    Identity::new(
        owner,
        MSP,
        cert.pem().into_bytes(),
        key.serialize_pem().into_bytes(),
        role,
    )
}

/// `Put(k, v)`, `Get(k)`, `Incr(k)`, `Anchor(k)` stores `private_data`
/// privately and echoes its hash, `Misanchor(k)` echoes a wrong hash.
pub struct KvChaincode;

impl Chaincode for KvChaincode {
    fn invoke(&self, stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        let args = stub.args().to_vec();
        let arg = |i: usize| {
            args.get(i)
                .cloned()
                .ok_or_else(|| ChaincodeError::with_status(400, format!("argument {i} is required")))
        };

        match stub.function() {
            "Put" => {
                stub.put_state(arg(0)?, arg(1)?.into_bytes());
                Ok(Vec::new())
            }
            "Get" => {
                let key = arg(0)?;
                stub.get_state(&key)
                    .ok_or_else(|| ChaincodeError::new(format!("key {key} does not exist")))
            }
            "Incr" => {
                let key = arg(0)?;
                let next = stub
                    .get_state(&key)
                    .and_then(|v| String::from_utf8(v).ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(0)
                    + 1;
                stub.put_state(key, next.to_string().into_bytes());
                Ok(next.to_string().into_bytes())
            }
            "Anchor" | "Misanchor" => {
                let key = arg(0)?;
                let data = stub
                    .transient()
                    .get(PRIVATE_DATA_TRANSIENT_KEY)
                    .cloned()
                    .ok_or_else(|| ChaincodeError::with_status(400, "private_data is required"))?;
                let hash = if stub.function() == "Anchor" {
                    sha256_hex(&data)
                } else {
                    sha256_hex(b"something else")
                };
                stub.put_private_data("vault", key.clone(), data);
                let meta = serde_json::json!({ "key": key, "transcriptHash": hash });
                stub.put_state(format!("META_{key}"), meta.to_string().into_bytes());
                Ok(meta.to_string().into_bytes())
            }
            other => Err(ChaincodeError::with_status(400, format!("unknown function {other}"))),
        }
    }
}

pub fn devnet() -> DevnetLedger {
    let config = DevnetConfig::default()
        .with_msp_root(MSP, ca_pem().as_bytes())
        .unwrap();
    let ledger = DevnetLedger::new(config);
    ledger.install(CHANNEL, CHAINCODE, Arc::new(KvChaincode));
    ledger
}

pub fn config() -> GatewayConfig {
    let mut config = GatewayConfig::new(
        Endpoint::new("devnet://peer0.registrar.example.edu:7051"),
        MSP,
        CHANNEL,
        CHAINCODE,
    );
    config.timeouts.endorse = Duration::from_secs(15);
    config.timeouts.submit = Duration::from_secs(5);
    config.timeouts.commit = Duration::from_secs(60);
    config
}

pub async fn manager(ledger: &DevnetLedger, config: GatewayConfig) -> Arc<ConnectionManager> {
    ConnectionManager::connect(config, Arc::new(ledger.clone()), identity("operator", Role::Admin))
        .await
        .unwrap()
}
