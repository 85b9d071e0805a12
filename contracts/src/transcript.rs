//! # Transcript Records
//!
//! A transcript is split in two. The full record (grades, GPA, personal
//! details) goes to the restricted transcript collection and never touches
//! the public world state. The public side keeps only [`PublicMetadata`]:
//! who updated it, when, and the SHA-256 of the private payload exactly as
//! the submitter sent it.

use certa_protocol::crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ContractError;

/// `docType` of every transcript metadata record.
pub const METADATA_DOC_TYPE: &str = "transcript-metadata";

/// World-state key of a student's transcript metadata.
pub fn metadata_key(student_id: &str) -> String {
    format!("TRANSCRIPT_META_{student_id}")
}

/// Publicly visible half of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicMetadata {
    pub student_id: String,
    pub updated_at: String,
    pub updated_by: String,
    pub transcript_hash: String,
    pub doc_type: String,
}

/// Restricted half of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateRecord {
    pub student_id: String,
    pub transcript: Value,
    pub gpa: Value,
    pub personal_info: Value,
    pub updated_at: String,
    pub updated_by: String,
}

/// The two halves produced by one transcript update.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptUpdate {
    pub metadata: PublicMetadata,
    pub record: PrivateRecord,
}

impl TranscriptUpdate {
    /// Splits `private_data` (the raw transient bytes) into a private record
    /// and its public anchor. The hash covers the bytes as received.
    pub fn from_private_data(
        student_id: &str,
        private_data: &[u8],
        updated_by: &str,
        updated_at: String,
    ) -> Result<Self, ContractError> {
        if student_id.trim().is_empty() {
            return Err(ContractError::InvalidArgument("studentId is required".into()));
        }

        let fields: Map<String, Value> = match serde_json::from_slice(private_data) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(ContractError::InvalidArgument(
                    "private_data must be a JSON object".into(),
                ))
            }
            Err(e) => {
                return Err(ContractError::InvalidArgument(format!(
                    "private_data is not valid JSON: {e}"
                )))
            }
        };

        // Older clients send the course list as `grades`.
        let transcript = fields
            .get("transcript")
            .or_else(|| fields.get("grades"))
            .cloned()
            .unwrap_or(Value::Null);

        let record = PrivateRecord {
            student_id: student_id.to_string(),
            transcript,
            gpa: fields.get("gpa").cloned().unwrap_or(Value::Null),
            personal_info: fields.get("personalInfo").cloned().unwrap_or(Value::Null),
            updated_at: updated_at.clone(),
            updated_by: updated_by.to_string(),
        };

        let metadata = PublicMetadata {
            student_id: student_id.to_string(),
            updated_at,
            updated_by: updated_by.to_string(),
            transcript_hash: sha256_hex(private_data),
            doc_type: METADATA_DOC_TYPE.to_string(),
        };

        Ok(Self { metadata, record })
    }
}
