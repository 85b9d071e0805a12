//! # Signer Factory
//!
//! Turns a PEM private key into something that can sign a digest, without
//! the caller ever branching on what kind of key it is. Membership services
//! in the wild hand out ECDSA P-256 keys (the overwhelming majority), RSA
//! keys (older enterprise CAs) and, occasionally, Ed25519 keys.
//!
//! Recognized encodings:
//!
//! | PEM label          | Format  | Families                   |
//! |--------------------|---------|----------------------------|
//! | `PRIVATE KEY`      | PKCS#8  | ECDSA P-256, RSA, Ed25519  |
//! | `EC PRIVATE KEY`   | SEC1    | ECDSA P-256                |
//! | `RSA PRIVATE KEY`  | PKCS#1  | RSA                        |
//!
//! Anything else is [`CryptoError::UnsupportedKey`]. That is a configuration
//! problem, not something to retry.
//!
//! Signatures are produced over a SHA-256 *digest*: ECDSA signs the prehash
//! and emits DER with a low-S value (peers reject high-S signatures), RSA
//! uses PKCS#1 v1.5 over the prehash, and Ed25519 signs the 32 digest bytes
//! as its message.

use std::fmt;

use pkcs8::der::pem;
use pkcs8::{AlgorithmIdentifierRef, DecodePrivateKey, EncodePublicKey, ObjectIdentifier};
use rsa::pkcs1::DecodeRsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use signature::hazmat::PrehashSigner;
use signature::SignatureEncoding;
use thiserror::Error;

/// `id-ecPublicKey` (RFC 5480).
pub(crate) const OID_EC_PUBLIC_KEY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// `prime256v1` / `secp256r1` named curve.
pub(crate) const OID_PRIME256V1: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// `rsaEncryption` (PKCS#1).
pub(crate) const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// `id-Ed25519` (RFC 8410).
pub(crate) const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Errors from key and certificate handling.
///
/// Messages never include key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("private key does not match certificate public key")]
    KeyMismatch,

    #[error("untrusted certificate: {0}")]
    UntrustedCertificate(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// The key families the factory understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    EcdsaP256,
    Rsa,
    Ed25519,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EcdsaP256 => write!(f, "ECDSA-P256"),
            Self::Rsa => write!(f, "RSA"),
            Self::Ed25519 => write!(f, "Ed25519"),
        }
    }
}

/// Maps an X.509/PKCS#8 algorithm identifier onto a supported family.
pub(crate) fn algorithm_from_identifier(
    id: &AlgorithmIdentifierRef<'_>,
) -> Result<KeyAlgorithm, CryptoError> {
    if id.oid == OID_EC_PUBLIC_KEY {
        let curve = id
            .parameters_oid()
            .map_err(|_| CryptoError::UnsupportedKey("EC key without named curve".into()))?;
        if curve == OID_PRIME256V1 {
            Ok(KeyAlgorithm::EcdsaP256)
        } else {
            Err(CryptoError::UnsupportedKey(format!("EC curve {}", curve)))
        }
    } else if id.oid == OID_RSA_ENCRYPTION {
        Ok(KeyAlgorithm::Rsa)
    } else if id.oid == OID_ED25519 {
        Ok(KeyAlgorithm::Ed25519)
    } else {
        Err(CryptoError::UnsupportedKey(format!("algorithm {}", id.oid)))
    }
}

enum SignerKey {
    EcdsaP256(p256::ecdsa::SigningKey),
    Rsa {
        signing: rsa::pkcs1v15::SigningKey<Sha256>,
        public: rsa::RsaPublicKey,
    },
    Ed25519(ed25519_dalek::SigningKey),
}

/// A signing function bound to one private key.
///
/// Deliberately not `Clone`, `Serialize` or `Debug`-transparent: a signer
/// lives inside a connection session and nowhere else.
pub struct Signer {
    key: SignerKey,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Builds a signer from PEM-encoded private key bytes.
    pub fn from_pem(key_pem: &[u8]) -> Result<Self, CryptoError> {
        let (label, der) = pem::decode_vec(key_pem)
            .map_err(|_| CryptoError::UnsupportedKey("not a PEM document".into()))?;

        let key = match label {
            "PRIVATE KEY" => Self::decode_pkcs8(&der)?,
            "EC PRIVATE KEY" => {
                let secret = p256::SecretKey::from_sec1_der(&der).map_err(|_| {
                    CryptoError::UnsupportedKey("SEC1 key is not on the P-256 curve".into())
                })?;
                SignerKey::EcdsaP256(p256::ecdsa::SigningKey::from(secret))
            }
            "RSA PRIVATE KEY" => {
                let private = rsa::RsaPrivateKey::from_pkcs1_der(&der)
                    .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
                Self::rsa_key(private)
            }
            other => {
                return Err(CryptoError::UnsupportedKey(format!(
                    "unrecognized PEM label {:?}",
                    other
                )))
            }
        };

        Ok(Self { key })
    }

    fn decode_pkcs8(der: &[u8]) -> Result<SignerKey, CryptoError> {
        let info = pkcs8::PrivateKeyInfo::try_from(der)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;

        match algorithm_from_identifier(&info.algorithm)? {
            KeyAlgorithm::EcdsaP256 => p256::ecdsa::SigningKey::from_pkcs8_der(der)
                .map(SignerKey::EcdsaP256)
                .map_err(|e| CryptoError::MalformedKey(e.to_string())),
            KeyAlgorithm::Rsa => rsa::RsaPrivateKey::from_pkcs8_der(der)
                .map(Self::rsa_key)
                .map_err(|e| CryptoError::MalformedKey(e.to_string())),
            KeyAlgorithm::Ed25519 => ed25519_dalek::SigningKey::from_pkcs8_der(der)
                .map(SignerKey::Ed25519)
                .map_err(|e| CryptoError::MalformedKey(e.to_string())),
        }
    }

    fn rsa_key(private: rsa::RsaPrivateKey) -> SignerKey {
        let public = rsa::RsaPublicKey::from(&private);
        SignerKey::Rsa {
            signing: rsa::pkcs1v15::SigningKey::<Sha256>::new(private),
            public,
        }
    }

    /// Which family this signer belongs to.
    pub fn algorithm(&self) -> KeyAlgorithm {
        match &self.key {
            SignerKey::EcdsaP256(_) => KeyAlgorithm::EcdsaP256,
            SignerKey::Rsa { .. } => KeyAlgorithm::Rsa,
            SignerKey::Ed25519(_) => KeyAlgorithm::Ed25519,
        }
    }

    /// Signs a SHA-256 digest.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.key {
            SignerKey::EcdsaP256(key) => {
                let sig: p256::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                let sig = sig.normalize_s().unwrap_or(sig);
                Ok(sig.to_der().as_bytes().to_vec())
            }
            SignerKey::Rsa { signing, .. } => {
                let sig: rsa::pkcs1v15::Signature = signing
                    .sign_prehash(digest)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                Ok(sig.to_vec())
            }
            SignerKey::Ed25519(key) => {
                let sig: ed25519_dalek::Signature = signature::Signer::sign(key, digest);
                Ok(sig.to_bytes().to_vec())
            }
        }
    }

    /// DER `SubjectPublicKeyInfo` of the matching public key.
    pub fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        let doc = match &self.key {
            SignerKey::EcdsaP256(key) => key.verifying_key().to_public_key_der(),
            SignerKey::Rsa { public, .. } => public.to_public_key_der(),
            SignerKey::Ed25519(key) => key.verifying_key().to_public_key_der(),
        }
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }
}
