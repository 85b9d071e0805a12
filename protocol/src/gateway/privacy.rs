//! # Privacy Partition
//!
//! Sensitive fields never ride in public arguments. They are serialized
//! canonically, sent as the `private_data` transient entry, and stored by
//! chaincode in a restricted collection. The public ledger gets only their
//! SHA-256.
//!
//! The hash is computed here, before anything leaves the process, and the
//! endorsement result must echo the same value in its `transcriptHash`
//! field. A mismatch means the private bytes were altered somewhere between
//! this process and the chaincode; the endorsed transaction is dropped
//! before submission and the caller gets a validation error.

use serde_json::{Map, Value};
use tracing::{info, warn};

use super::handle::ContractHandle;
use super::orchestrator::TransactionOrchestrator;
use crate::config::{HASH_ANCHOR_FIELD, PRIVATE_DATA_TRANSIENT_KEY};
use crate::crypto::hash::{canonical_json, sha256_hex};
use crate::error::GatewayError;
use crate::ledger::TransientMap;

/// Private field name → JSON value.
pub type PrivateFields = Map<String, Value>;

/// Outcome of [`TransactionOrchestrator::submit_private`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateSubmitResult {
    pub transaction_id: String,
    /// Hex SHA-256 of the canonical private payload.
    pub hash: String,
    pub committed: bool,
    pub result_payload: Vec<u8>,
}

/// Canonical bytes and hex hash of a private field map.
pub fn private_payload(fields: &PrivateFields) -> Result<(Vec<u8>, String), GatewayError> {
    if fields.is_empty() {
        return Err(GatewayError::Validation(
            "private fields must not be empty".to_string(),
        ));
    }
    let bytes = canonical_json(&Value::Object(fields.clone()));
    let hash = sha256_hex(&bytes);
    Ok((bytes, hash))
}

/// Pulls the echoed hash out of an endorsement payload.
fn endorsed_hash(payload: &[u8]) -> Result<String, GatewayError> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| {
        GatewayError::Validation(format!("endorsement result is not JSON: {e}"))
    })?;
    value
        .get(HASH_ANCHOR_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GatewayError::Validation(format!(
                "endorsement result has no {HASH_ANCHOR_FIELD} field"
            ))
        })
}

impl TransactionOrchestrator {
    /// Submits `function_name` with `private_fields` as transient data and
    /// checks the endorsed content hash before ordering.
    pub async fn submit_private(
        &self,
        handle: &ContractHandle,
        function_name: &str,
        public_arguments: Vec<String>,
        private_fields: &PrivateFields,
    ) -> Result<PrivateSubmitResult, GatewayError> {
        let (bytes, hash) = private_payload(private_fields)?;

        let mut transient = TransientMap::new();
        transient.insert(PRIVATE_DATA_TRANSIENT_KEY.to_string(), bytes);

        let built = self.propose(handle, function_name, public_arguments, transient)?;
        let endorsed = self.endorse(built).await?;

        let echoed = endorsed_hash(endorsed.payload())?;
        if echoed != hash {
            warn!(
                tx_id = %endorsed.transaction_id(),
                local = %hash,
                endorsed = %echoed,
                "private data hash mismatch, abandoning transaction"
            );
            return Err(GatewayError::Validation(format!(
                "private data hash mismatch: computed {hash}, endorsed {echoed}"
            )));
        }

        let submitted = self.submit_endorsed(endorsed).await?;
        let result = self.wait_for_commit(submitted).await?;

        info!(
            tx_id = %result.transaction_id,
            hash = %hash,
            committed = result.committed,
            "private data anchored"
        );
        Ok(PrivateSubmitResult {
            transaction_id: result.transaction_id,
            hash,
            committed: result.committed,
            result_payload: result.result_payload,
        })
    }
}
