//! # Error Classifier
//!
//! Every failure that leaves the submission layer is exactly one
//! [`GatewayError`]. The set is closed, and each kind maps to a single
//! caller action:
//!
//! | Kind             | Caller action                   |
//! |------------------|---------------------------------|
//! | `Validation`     | fix input, do not retry         |
//! | `NotFound`       | treat as empty / 404            |
//! | `Conflict`       | retry with a fresh proposal     |
//! | `Endorsement`    | operational alert, rare retry   |
//! | `Connection`     | retry with backoff              |
//! | `UnsupportedKey` | fatal configuration error       |
//! | `Internal`       | unrecognized, original message kept |
//!
//! [`classify`] is the canonical path: it matches on the structured
//! [`TransportError`]. Chaincode responses only carry a status and free
//! text, so [`classify_message`] recognizes the failure signatures peers
//! and chaincode actually emit.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::identity::IdentityError;
use crate::ledger::{TransportError, TxValidationCode};

/// The kind of a [`GatewayError`], without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Endorsement,
    Connection,
    UnsupportedKey,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::Conflict => "ConflictError",
            Self::Endorsement => "EndorsementError",
            Self::Connection => "ConnectionError",
            Self::UnsupportedKey => "UnsupportedKeyError",
            Self::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

/// A classified failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("endorsement error: {0}")]
    Endorsement(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Endorsement(_) => ErrorKind::Endorsement,
            Self::Connection(_) => ErrorKind::Connection,
            Self::UnsupportedKey(_) => ErrorKind::UnsupportedKey,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Endorsement(m)
            | Self::Connection(m)
            | Self::UnsupportedKey(m)
            | Self::Internal(m) => m,
        }
    }

    /// Whether a caller-driven retry (with a new proposal) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Connection)
    }

    fn with_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::Endorsement => Self::Endorsement(message),
            ErrorKind::Connection => Self::Connection(message),
            ErrorKind::UnsupportedKey => Self::UnsupportedKey(message),
            ErrorKind::Internal => Self::Internal(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Maps a structured transport failure to its kind.
pub fn classify(err: TransportError) -> GatewayError {
    let classified = match err {
        TransportError::Unavailable(_) | TransportError::DeadlineExceeded(_) | TransportError::Closed => {
            GatewayError::Connection(err.to_string())
        }
        TransportError::EndorsementPolicy { .. } => GatewayError::Endorsement(err.to_string()),
        TransportError::Invalidated { code, .. } => {
            let message = err.to_string();
            match code {
                TxValidationCode::MvccReadConflict
                | TxValidationCode::PhantomReadConflict
                | TxValidationCode::DuplicateTxId => GatewayError::Conflict(message),
                TxValidationCode::EndorsementPolicyFailure => GatewayError::Endorsement(message),
                TxValidationCode::BadCreatorSignature => GatewayError::Validation(message),
                TxValidationCode::Valid | TxValidationCode::InvalidOther => {
                    GatewayError::Internal(message)
                }
            }
        }
        TransportError::UnknownTransaction(_) => GatewayError::NotFound(err.to_string()),
        TransportError::Rejected(_) => GatewayError::Validation(err.to_string()),
        TransportError::Chaincode { status, message } => match kind_of_message(&message) {
            Some(kind) => GatewayError::with_kind(kind, message),
            None if status == 404 => GatewayError::NotFound(message),
            None if (400..500).contains(&status) => GatewayError::Validation(message),
            None => GatewayError::Internal(message),
        },
        TransportError::Other(message) => classify_message(&message),
    };

    warn!(kind = %classified.kind(), error = %classified.message(), "ledger call failed");
    classified
}

/// Maps a bare error message to its kind by known failure signatures.
/// Unrecognized messages become [`GatewayError::Internal`] unchanged.
pub fn classify_message(message: &str) -> GatewayError {
    let kind = kind_of_message(message).unwrap_or(ErrorKind::Internal);
    GatewayError::with_kind(kind, message.to_string())
}

/// Checked in order; the first matching group wins.
const SIGNATURES: &[(ErrorKind, &[&str])] = &[
    (ErrorKind::UnsupportedKey, &["unsupported key", "unknown key algorithm"]),
    (
        ErrorKind::Conflict,
        &[
            "mvcc_read_conflict",
            "phantom_read_conflict",
            "duplicate_txid",
            "duplicate transaction",
            "read conflict",
        ],
    ),
    (
        ErrorKind::Endorsement,
        &["endorsement_policy_failure", "endorsement policy", "endorsement failure"],
    ),
    (
        ErrorKind::Connection,
        &[
            "unavailable",
            "deadline_exceeded",
            "deadline exceeded",
            "connection refused",
            "failed to connect",
            "channel closed",
            "timed out",
            "timeout",
        ],
    ),
    (ErrorKind::NotFound, &["does not exist", "not found"]),
    (
        ErrorKind::Validation,
        &[
            "already exists",
            "already revoked",
            "access denied",
            "forbidden",
            "unauthorized",
            "hash mismatch",
            "invalid",
            "malformed",
            "missing",
            "required",
        ],
    ),
];

fn kind_of_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_ascii_lowercase();
    SIGNATURES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(kind, _)| *kind)
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        classify(err)
    }
}

impl From<CryptoError> for GatewayError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnsupportedKey(_) => Self::UnsupportedKey(err.to_string()),
            CryptoError::SigningFailed(_) => Self::Internal(err.to_string()),
            _ => Self::Validation(err.to_string()),
        }
    }
}

impl From<IdentityError> for GatewayError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotFound(_) | IdentityError::AlreadyRegistered(_) => {
                Self::Validation(err.to_string())
            }
            IdentityError::Backend(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_faults_are_connection_errors() {
        for err in [
            TransportError::Unavailable("peer down".into()),
            TransportError::DeadlineExceeded("slow".into()),
            TransportError::Closed,
        ] {
            assert_eq!(classify(err).kind(), ErrorKind::Connection);
        }
    }

    #[test]
    fn test_commit_conflicts_are_retryable() {
        for code in [
            TxValidationCode::MvccReadConflict,
            TxValidationCode::PhantomReadConflict,
            TxValidationCode::DuplicateTxId,
        ] {
            let err = classify(TransportError::Invalidated {
                transaction_id: "t".into(),
                code,
            });
            assert_eq!(err.kind(), ErrorKind::Conflict);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_policy_failure_is_endorsement_error() {
        let err = classify(TransportError::EndorsementPolicy {
            required: 2,
            received: 1,
        });
        assert_eq!(err.kind(), ErrorKind::Endorsement);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_chaincode_messages_classified_by_signature() {
        let cases = [
            ("degree D1 already exists", ErrorKind::Validation),
            ("degree D1 is already revoked", ErrorKind::Validation),
            ("degree D9 does not exist", ErrorKind::NotFound),
            ("access denied: caller may not read S1", ErrorKind::Validation),
        ];
        for (message, kind) in cases {
            let err = classify(TransportError::Chaincode {
                status: 500,
                message: message.into(),
            });
            assert_eq!(err.kind(), kind, "{message}");
            assert_eq!(err.message(), message);
        }
    }

    #[test]
    fn test_chaincode_status_used_when_message_unknown() {
        let err = classify(TransportError::Chaincode {
            status: 404,
            message: "nothing here".into(),
        });
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = classify(TransportError::Chaincode {
            status: 500,
            message: "segfault in shim".into(),
        });
        assert_eq!(err, GatewayError::Internal("segfault in shim".into()));
    }

    #[test]
    fn test_message_classifier_is_case_insensitive() {
        assert_eq!(
            classify_message("Transaction failed with MVCC_READ_CONFLICT").kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            classify_message("14 UNAVAILABLE: No connection established").kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            classify_message("ENDORSEMENT_POLICY_FAILURE").kind(),
            ErrorKind::Endorsement
        );
    }

    #[test]
    fn test_unrecognized_message_is_internal_and_kept() {
        let err = classify_message("the flux capacitor overheated");
        assert_eq!(err, GatewayError::Internal("the flux capacitor overheated".into()));
    }

    #[test]
    fn test_crypto_errors_map_to_key_kinds() {
        let err: GatewayError = CryptoError::UnsupportedKey("DSA".into()).into();
        assert_eq!(err.kind(), ErrorKind::UnsupportedKey);

        let err: GatewayError = CryptoError::KeyMismatch.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_kind_display_uses_taxonomy_names() {
        assert_eq!(ErrorKind::Conflict.to_string(), "ConflictError");
        assert_eq!(ErrorKind::UnsupportedKey.to_string(), "UnsupportedKeyError");
    }
}
