//! # Identity Module
//!
//! Every request to the ledger is made *as someone*: a registrar operator
//! issuing degrees, or a student reading their own transcript. An
//! [`Identity`] is that someone: an owner id plus the organization that
//! vouches for them, their certificate and private key, and a role attribute.
//!
//! Identities are owned by an external credential store (see
//! [`IdentityStore`]). The gateway only keeps transient in-memory copies, and
//! only while a connection for that owner is alive.
//!
//! ## Invariants
//!
//! - `certificate` and `private_key` belong to the same key pair. Checked
//!   when a signing session is built ([`Identity::signing_identity`]).
//! - `role` is fixed at issuance. There is no setter.
//! - The private key never shows up in `Debug` output and is zeroized on drop.

mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::crypto::{CryptoError, SigningIdentity};

pub use store::{IdentityError, IdentityStore, InMemoryIdentityStore};

// ---------------------------------------------------------------------------
// OwnerId
// ---------------------------------------------------------------------------

/// Stable identifier of the person or service an identity belongs to.
///
/// For students this is the student id (`S1`, `2024-00417`, ...), which is
/// how chaincode decides whether a caller may read a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The role attribute carried by an identity's certificate enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Registrar staff: may issue, revoke and update records.
    Admin,
    /// A student: may read their own records.
    Student,
    /// Any attribute value the gateway does not interpret.
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Student => "student",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "student" => Self::Student,
            _ => Self::Other(s.to_string()),
        })
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.parse() {
            Ok(role) => Ok(role),
            Err(never) => match never {},
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A caller's credentials, as handed over by the credential store.
#[derive(Clone)]
pub struct Identity {
    owner_id: OwnerId,
    msp_id: String,
    certificate_pem: Vec<u8>,
    private_key_pem: Zeroizing<Vec<u8>>,
    role: Role,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("owner_id", &self.owner_id)
            .field("msp_id", &self.msp_id)
            .field("role", &self.role)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl Identity {
    pub fn new(
        owner_id: impl Into<OwnerId>,
        msp_id: impl Into<String>,
        certificate_pem: impl Into<Vec<u8>>,
        private_key_pem: impl Into<Vec<u8>>,
        role: Role,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            msp_id: msp_id.into(),
            certificate_pem: certificate_pem.into(),
            private_key_pem: Zeroizing::new(private_key_pem.into()),
            role,
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn certificate_pem(&self) -> &[u8] {
        &self.certificate_pem
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Builds the signing half of a session, verifying that the key matches
    /// the certificate.
    pub fn signing_identity(&self) -> Result<SigningIdentity, CryptoError> {
        SigningIdentity::new(&self.certificate_pem, &self.private_key_pem)
    }
}
