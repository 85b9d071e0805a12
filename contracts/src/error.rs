//! Chaincode-side errors. Their messages are what callers eventually
//! classify, so the wording is part of the contract.

use certa_protocol::ledger::ChaincodeError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("degree {0} is already revoked")]
    AlreadyRevoked(String),

    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("corrupt record under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl ContractError {
    /// Response status peers report alongside the message.
    pub fn status(&self) -> u16 {
        match self {
            Self::AlreadyExists { .. } | Self::AlreadyRevoked(_) => 409,
            Self::NotFound { .. } => 404,
            Self::AccessDenied(_) => 403,
            Self::InvalidArgument(_) | Self::UnknownFunction(_) => 400,
            Self::Corrupt { .. } => 500,
        }
    }
}

impl From<ContractError> for ChaincodeError {
    fn from(err: ContractError) -> Self {
        ChaincodeError::with_status(err.status(), err.to_string())
    }
}
