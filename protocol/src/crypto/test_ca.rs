//! Throwaway membership CAs for unit tests.

use super::certificate::{ATTR_ENROLLMENT_ID, ATTR_ROLE, OID_ENROLLMENT_ATTRIBUTES};

/// A P-256 root that issues leaf certificates with enrollment attributes.
pub(crate) struct TestCa {
    key: rcgen::KeyPair,
    cert: rcgen::Certificate,
}

impl TestCa {
    pub(crate) fn new(name: &str) -> Self {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, format!("ca.{name}"));
        let cert = params.self_signed(&key).unwrap();
        Self { key, cert }
    }

    pub(crate) fn pem(&self) -> String {
        self.cert.pem()
    }

    /// Certificate and PKCS#8 key PEMs for `owner` enrolled as `role`.
    pub(crate) fn issue(&self, owner: &str, role: &str) -> (String, String) {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let params = leaf_params(owner, role);
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert.pem(), key.serialize_pem())
    }
}

pub(crate) fn leaf_params(owner: &str, role: &str) -> rcgen::CertificateParams {
    let mut params = rcgen::CertificateParams::new(vec![format!("{owner}.example.edu")]).unwrap();
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
