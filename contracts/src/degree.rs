//! # Degree Records
//!
//! Degrees are public. Each one lives under `DEGREE_{degreeId}` and moves
//! through a two-state lifecycle:
//!
//! ```text
//! ACTIVE ──revoke──▶ REVOKED
//! ```
//!
//! Revocation is final. There is no path back to `ACTIVE`.

use serde::{Deserialize, Serialize};

use crate::error::ContractError;

/// `docType` of every degree record.
pub const DEGREE_DOC_TYPE: &str = "degree";

const DEGREE_KEY_PREFIX: &str = "DEGREE_";

/// World-state key of a degree.
pub fn degree_key(degree_id: &str) -> String {
    format!("{DEGREE_KEY_PREFIX}{degree_id}")
}

/// Prefix shared by all degree keys.
pub fn degree_key_prefix() -> &'static str {
    DEGREE_KEY_PREFIX
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DegreeStatus {
    Active,
    Revoked,
}

impl std::fmt::Display for DegreeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegreeStatus::Active => write!(f, "ACTIVE"),
            DegreeStatus::Revoked => write!(f, "REVOKED"),
        }
    }
}

/// What an issuer sends to `IssueDegree`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegreeRequest {
    pub degree_id: String,
    pub student_id: String,
    pub degree_type: String,
    pub student_name: String,
    pub university: String,
    pub major: String,
    pub classification: String,
    pub issue_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_hash: Option<String>,
}

impl DegreeRequest {
    pub fn validate(&self) -> Result<(), ContractError> {
        let required = [
            ("degreeId", &self.degree_id),
            ("studentId", &self.student_id),
            ("degreeType", &self.degree_type),
            ("studentName", &self.student_name),
            ("university", &self.university),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ContractError::InvalidArgument(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// A degree as stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Degree {
    pub degree_id: String,
    pub student_id: String,
    pub degree_type: String,
    pub student_name: String,
    pub university: String,
    pub major: String,
    pub classification: String,
    pub issue_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_hash: Option<String>,
    pub status: DegreeStatus,
    /// RFC 3339 time of the last state change.
    pub timestamp: String,
    pub doc_type: String,
}

impl Degree {
    /// A freshly issued, active degree.
    pub fn issue(request: DegreeRequest, timestamp: String) -> Result<Self, ContractError> {
        request.validate()?;
        Ok(Self {
            degree_id: request.degree_id,
            student_id: request.student_id,
            degree_type: request.degree_type,
            student_name: request.student_name,
            university: request.university,
            major: request.major,
            classification: request.classification,
            issue_date: request.issue_date,
            transcript_hash: request.transcript_hash,
            status: DegreeStatus::Active,
            timestamp,
            doc_type: DEGREE_DOC_TYPE.to_string(),
        })
    }

    /// ACTIVE → REVOKED. A second revocation is refused.
    pub fn revoke(&mut self, timestamp: String) -> Result<(), ContractError> {
        match self.status {
            DegreeStatus::Active => {
                self.status = DegreeStatus::Revoked;
                self.timestamp = timestamp;
                Ok(())
            }
            DegreeStatus::Revoked => Err(ContractError::AlreadyRevoked(self.degree_id.clone())),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DegreeStatus::Active
    }

    /// Active and anchored to exactly this transcript hash.
    pub fn verify(&self, transcript_hash: &str) -> bool {
        self.is_active() && self.transcript_hash.as_deref() == Some(transcript_hash)
    }
}

/// Answer to `VerifyDegree`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub degree_id: String,
    pub valid: bool,
    pub status: DegreeStatus,
}

impl Verification {
    pub fn of(degree: &Degree, transcript_hash: &str) -> Self {
        Self {
            degree_id: degree.degree_id.clone(),
            valid: degree.verify(transcript_hash),
            status: degree.status,
        }
    }
}
