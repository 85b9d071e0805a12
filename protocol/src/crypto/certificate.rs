//! X.509 certificates: parsing, signature verification, issuer checks,
//! enrollment attributes, and the certificate/private-key consistency check
//! behind [`SigningIdentity`].
//!
//! Membership CAs stamp enrollment attributes into a non-critical extension
//! ([`OID_ENROLLMENT_ATTRIBUTES`]) whose value is a JSON document:
//!
//! ```json
//! {"attrs":{"hf.EnrollmentID":"S1","role":"student"}}
//! ```
//!
//! Those attributes, not anything the caller declares, decide who a
//! certificate holder is.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use pkcs8::spki::SubjectPublicKeyInfoRef;
use pkcs8::{DecodePublicKey, ObjectIdentifier};
use serde::Deserialize;
use sha2::Sha256;
use signature::hazmat::PrehashVerifier;
use x509_cert::der::{DecodePem, Encode};

use super::hash::sha256_array;
use super::signer::{algorithm_from_identifier, CryptoError, KeyAlgorithm, Signer, OID_ED25519};

/// Extension holding the CA-issued enrollment attributes.
pub const OID_ENROLLMENT_ATTRIBUTES: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.3.4.5.6.7.8.1");

/// Attribute naming the enrolled owner.
pub const ATTR_ENROLLMENT_ID: &str = "hf.EnrollmentID";

/// Attribute carrying the holder's role.
pub const ATTR_ROLE: &str = "role";

/// `ecdsa-with-SHA256` (RFC 5758).
const OID_ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

/// `sha256WithRSAEncryption` (RFC 4055).
const OID_SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

#[derive(Debug, Default, Deserialize)]
struct AttributeDocument {
    #[serde(default)]
    attrs: BTreeMap<String, String>,
}

/// A parsed PEM certificate plus the bits the gateway cares about.
#[derive(Clone)]
pub struct Certificate {
    pem: Vec<u8>,
    subject: String,
    issuer: String,
    algorithm: KeyAlgorithm,
    spki_der: Vec<u8>,
    not_after_unix: u64,
    tbs_der: Vec<u8>,
    signature_algorithm: ObjectIdentifier,
    signature: Vec<u8>,
    attributes: BTreeMap<String, String>,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .field("not_after_unix", &self.not_after_unix)
            .finish()
    }
}

impl Certificate {
    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        let cert = x509_cert::Certificate::from_pem(pem)
            .map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;

        let tbs = &cert.tbs_certificate;
        let spki_der = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;
        let algorithm = algorithm_of_spki(&spki_der)?;
        let tbs_der = tbs
            .to_der()
            .map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;
        let signature = cert
            .signature
            .as_bytes()
            .ok_or_else(|| CryptoError::MalformedCertificate("signature has unused bits".into()))?
            .to_vec();

        let mut attributes = BTreeMap::new();
        for ext in tbs.extensions.iter().flatten() {
            if ext.extn_id == OID_ENROLLMENT_ATTRIBUTES {
                let doc: AttributeDocument = serde_json::from_slice(ext.extn_value.as_bytes())
                    .map_err(|e| {
                        CryptoError::MalformedCertificate(format!("enrollment attributes: {e}"))
                    })?;
                attributes = doc.attrs;
            }
        }

        Ok(Self {
            pem: pem.to_vec(),
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            algorithm,
            spki_der,
            not_after_unix: tbs.validity.not_after.to_unix_duration().as_secs(),
            tbs_der,
            signature_algorithm: cert.signature_algorithm.oid,
            signature,
            attributes,
        })
    }

    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// RFC 4514 rendering of the subject, e.g. `CN=alice,O=Registrar`.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// An enrollment attribute, if the issuing CA set it.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.spki_der
    }

    pub fn is_expired_at(&self, unix_secs: u64) -> bool {
        unix_secs > self.not_after_unix
    }

    /// Verifies a signature the way [`Signer::sign`] produces it.
    pub fn verify(&self, digest: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        let bad = |e: signature::Error| CryptoError::SigningFailed(e.to_string());
        let bad_key = |e: pkcs8::spki::Error| CryptoError::MalformedCertificate(e.to_string());

        match self.algorithm {
            KeyAlgorithm::EcdsaP256 => {
                let vk = p256::ecdsa::VerifyingKey::from_public_key_der(&self.spki_der)
                    .map_err(bad_key)?;
                let sig = p256::ecdsa::Signature::from_der(sig).map_err(bad)?;
                vk.verify_prehash(digest, &sig).map_err(bad)
            }
            KeyAlgorithm::Rsa => {
                let pk = rsa::RsaPublicKey::from_public_key_der(&self.spki_der).map_err(bad_key)?;
                let vk = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(pk);
                let sig = rsa::pkcs1v15::Signature::try_from(sig).map_err(bad)?;
                vk.verify_prehash(digest, &sig).map_err(bad)
            }
            KeyAlgorithm::Ed25519 => self.verify_ed25519(digest, sig),
        }
    }

    /// Checks that `child` was signed by this certificate's key and names it
    /// as issuer. SHA-256 based ECDSA and RSA signatures and Ed25519 are
    /// understood.
    pub fn verify_issued(&self, child: &Certificate) -> Result<(), CryptoError> {
        if child.issuer != self.subject {
            return Err(CryptoError::UntrustedCertificate(format!(
                "{} is issued by {}, not {}",
                child.subject, child.issuer, self.subject
            )));
        }

        let expected = match self.algorithm {
            KeyAlgorithm::EcdsaP256 => OID_ECDSA_WITH_SHA256,
            KeyAlgorithm::Rsa => OID_SHA256_WITH_RSA,
            KeyAlgorithm::Ed25519 => OID_ED25519,
        };
        if child.signature_algorithm != expected {
            return Err(CryptoError::UntrustedCertificate(format!(
                "signature algorithm {} does not match issuer key {}",
                child.signature_algorithm, self.algorithm
            )));
        }

        let verified = match self.algorithm {
            KeyAlgorithm::Ed25519 => self.verify_ed25519(&child.tbs_der, &child.signature),
            _ => self.verify(&sha256_array(&child.tbs_der), &child.signature),
        };
        verified.map_err(|_| {
            CryptoError::UntrustedCertificate(format!(
                "signature on {} does not verify against {}",
                child.subject, self.subject
            ))
        })
    }

    fn verify_ed25519(&self, message: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_public_key_der(&self.spki_der)
            .map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;
        let sig = ed25519_dalek::Signature::from_slice(sig)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        signature::Verifier::verify(&vk, message, &sig)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }
}

fn algorithm_of_spki(der: &[u8]) -> Result<KeyAlgorithm, CryptoError> {
    let spki = SubjectPublicKeyInfoRef::try_from(der)
        .map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;
    algorithm_from_identifier(&spki.algorithm)
}

/// A certificate and the signer for its private key, checked to belong
/// together.
///
/// This is the unit a connection session is built from. It is cheap to clone
/// and safe to hand to concurrent requests.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    certificate: Certificate,
    signer: Arc<Signer>,
}

impl SigningIdentity {
    /// Loads both halves and rejects pairs whose public keys differ.
    pub fn new(certificate_pem: &[u8], private_key_pem: &[u8]) -> Result<Self, CryptoError> {
        let signer = Signer::from_pem(private_key_pem)?;
        let certificate = Certificate::from_pem(certificate_pem)?;

        if signer.algorithm() != certificate.algorithm()
            || signer.public_key_der()? != certificate.public_key_der()
        {
            return Err(CryptoError::KeyMismatch);
        }

        Ok(Self {
            certificate,
            signer: Arc::new(signer),
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.signer.algorithm()
    }

    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.signer.sign(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_ca::{leaf_params, TestCa};

    fn self_signed(alg: &'static rcgen::SignatureAlgorithm) -> (String, String) {
        let key = rcgen::KeyPair::generate_for(alg).unwrap();
        let params = rcgen::CertificateParams::new(vec!["peer0.registrar.example.edu".into()])
            .unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn parses_p256_certificate() {
        let (cert_pem, _) = self_signed(&rcgen::PKCS_ECDSA_P256_SHA256);
        let cert = Certificate::from_pem(cert_pem.as_bytes()).unwrap();
        assert_eq!(cert.algorithm(), KeyAlgorithm::EcdsaP256);
        assert!(!cert.is_expired_at(0));
    }

    #[test]
    fn parses_ed25519_certificate() {
        let (cert_pem, _) = self_signed(&rcgen::PKCS_ED25519);
        let cert = Certificate::from_pem(cert_pem.as_bytes()).unwrap();
        assert_eq!(cert.algorithm(), KeyAlgorithm::Ed25519);
    }

    #[test]
    fn rejects_non_certificate_pem() {
        let err = Certificate::from_pem(b"-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n")
            .unwrap_err();
        assert!(matches!(err, CryptoError::MalformedCertificate(_)));
    }

    #[test]
    fn identity_signs_and_certificate_verifies() {
        for alg in [&rcgen::PKCS_ECDSA_P256_SHA256, &rcgen::PKCS_ED25519] {
            let (cert_pem, key_pem) = self_signed(alg);
            let identity = SigningIdentity::new(cert_pem.as_bytes(), key_pem.as_bytes()).unwrap();

            let digest = sha256_array(b"proposal bytes");
            let sig = identity.sign(&digest).unwrap();
            identity.certificate().verify(&digest, &sig).unwrap();

            let other = sha256_array(b"tampered bytes");
            assert!(identity.certificate().verify(&other, &sig).is_err());
        }
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let (cert_pem, _) = self_signed(&rcgen::PKCS_ECDSA_P256_SHA256);
        let (_, other_key) = self_signed(&rcgen::PKCS_ECDSA_P256_SHA256);
        let err = SigningIdentity::new(cert_pem.as_bytes(), other_key.as_bytes()).unwrap_err();
        assert_eq!(err, CryptoError::KeyMismatch);
    }

    #[test]
    fn cross_family_pair_is_rejected() {
        let (cert_pem, _) = self_signed(&rcgen::PKCS_ECDSA_P256_SHA256);
        let (_, ed_key) = self_signed(&rcgen::PKCS_ED25519);
        let err = SigningIdentity::new(cert_pem.as_bytes(), ed_key.as_bytes()).unwrap_err();
        assert_eq!(err, CryptoError::KeyMismatch);
    }

    #[test]
    fn rsa_identity_signs_and_certificate_verifies() {
        use pkcs8::EncodePrivateKey;

        let rsa_key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let key_pem = rsa_key.to_pkcs8_pem(pkcs8::LineEnding::LF).unwrap();
        let key = rcgen::KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256).unwrap();
        let cert = rcgen::CertificateParams::new(vec!["registrar.example.edu".into()])
            .unwrap()
            .self_signed(&key)
            .unwrap();

        let identity = SigningIdentity::new(cert.pem().as_bytes(), key_pem.as_bytes()).unwrap();
        assert_eq!(identity.algorithm(), KeyAlgorithm::Rsa);
        assert_eq!(identity.certificate().algorithm(), KeyAlgorithm::Rsa);

        let digest = sha256_array(b"degree D1 for S1");
        let sig = identity.sign(&digest).unwrap();
        identity.certificate().verify(&digest, &sig).unwrap();

        let tampered = sha256_array(b"degree D1 for S2");
        assert!(identity.certificate().verify(&tampered, &sig).is_err());
    }

    #[test]
    fn issued_certificate_carries_enrollment_attributes() {
        let ca = TestCa::new("registrar");
        let (cert_pem, _) = ca.issue("S1", "student");
        let cert = Certificate::from_pem(cert_pem.as_bytes()).unwrap();

        assert_eq!(cert.attribute(ATTR_ENROLLMENT_ID), Some("S1"));
        assert_eq!(cert.attribute(ATTR_ROLE), Some("student"));
        assert_eq!(cert.attribute("hf.Affiliation"), None);
    }

    #[test]
    fn root_verifies_its_own_leaves_only() {
        let registrar = TestCa::new("registrar");
        let university = TestCa::new("university");
        let root = Certificate::from_pem(registrar.pem().as_bytes()).unwrap();

        let (ours, _) = registrar.issue("S1", "student");
        let (theirs, _) = university.issue("S1", "student");
        root.verify_issued(&Certificate::from_pem(ours.as_bytes()).unwrap())
            .unwrap();

        let err = root
            .verify_issued(&Certificate::from_pem(theirs.as_bytes()).unwrap())
            .unwrap_err();
        assert!(matches!(err, CryptoError::UntrustedCertificate(_)));
    }

    #[test]
    fn self_signed_lookalike_is_not_issued() {
        let registrar = TestCa::new("registrar");
        let root = Certificate::from_pem(registrar.pem().as_bytes()).unwrap();

        // Same issuer name as the real root, signed by its own key.
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = leaf_params("mallory", "admin");
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "ca.registrar");
        let forged = params.self_signed(&key).unwrap();

        let err = root
            .verify_issued(&Certificate::from_pem(forged.pem().as_bytes()).unwrap())
            .unwrap_err();
        assert!(matches!(err, CryptoError::UntrustedCertificate(_)));
    }
}
