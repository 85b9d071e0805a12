//! # Academic Records Chaincode
//!
//! Function dispatch, access rules and persistence for degrees and
//! transcripts. Every function returns JSON bytes.
//!
//! | Function | Args | Role |
//! |---|---|---|
//! | `IssueDegree` | degree JSON | admin |
//! | `RevokeDegree` | degreeId | admin |
//! | `QueryDegree` | degreeId | any |
//! | `QueryDegreesByStudent` | studentId | any |
//! | `VerifyDegree` | degreeId, transcriptHash | any |
//! | `UpdateTranscript` | studentId + transient `private_data` | admin |
//! | `QueryTranscript` | studentId | admin or that student |
//! | `QueryTranscriptMetadata` | studentId | any |

use chrono::{TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use certa_protocol::config::{PRIVATE_DATA_TRANSIENT_KEY, TRANSCRIPT_COLLECTION};
use certa_protocol::identity::Role;
use certa_protocol::ledger::{Chaincode, ChaincodeError, ChaincodeStub};

use crate::degree::{degree_key, degree_key_prefix, Degree, DegreeRequest, Verification};
use crate::error::ContractError;
use crate::transcript::{metadata_key, PrivateRecord, PublicMetadata, TranscriptUpdate};

/// Installed on the `academic` channel under the name [`AcademicRecordsContract::NAME`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AcademicRecordsContract;

impl AcademicRecordsContract {
    pub const NAME: &'static str = "academic-records";
}

impl Chaincode for AcademicRecordsContract {
    fn invoke(&self, stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        let function = stub.function().to_string();
        debug!(tx_id = %stub.tx_id(), function = %function, "academic records invoke");

        let result = match function.as_str() {
            "IssueDegree" => issue_degree(stub),
            "RevokeDegree" => revoke_degree(stub),
            "QueryDegree" => query_degree(stub),
            "QueryDegreesByStudent" => query_degrees_by_student(stub),
            "VerifyDegree" => verify_degree(stub),
            "UpdateTranscript" => update_transcript(stub),
            "QueryTranscript" => query_transcript(stub),
            "QueryTranscriptMetadata" => query_transcript_metadata(stub),
            other => Err(ContractError::UnknownFunction(other.to_string())),
        };
        result.map_err(ChaincodeError::from)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arg(stub: &ChaincodeStub<'_>, index: usize, name: &str) -> Result<String, ContractError> {
    stub.args()
        .get(index)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ContractError::InvalidArgument(format!("{name} is required")))
}

fn require_admin(stub: &ChaincodeStub<'_>, action: &str) -> Result<(), ContractError> {
    if stub.client().role == Role::Admin {
        Ok(())
    } else {
        Err(ContractError::AccessDenied(format!(
            "{} may not {action}",
            stub.client().owner_id
        )))
    }
}

/// Transaction time as RFC 3339, identical on every endorsing peer.
fn tx_time(stub: &ChaincodeStub<'_>) -> Result<String, ContractError> {
    let ms = i64::try_from(stub.tx_timestamp_ms())
        .map_err(|_| ContractError::InvalidArgument("transaction timestamp out of range".into()))?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339())
        .ok_or_else(|| ContractError::InvalidArgument("transaction timestamp out of range".into()))
}

fn to_json<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, ContractError> {
    serde_json::to_vec(value).map_err(|e| ContractError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn load_degree(stub: &mut ChaincodeStub<'_>, degree_id: &str) -> Result<Degree, ContractError> {
    let key = degree_key(degree_id);
    let bytes = stub.get_state(&key).ok_or_else(|| ContractError::NotFound {
        kind: "degree",
        id: degree_id.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ContractError::Corrupt {
        key,
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Degrees
// ---------------------------------------------------------------------------

fn issue_degree(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ContractError> {
    require_admin(stub, "issue degrees")?;
    let raw = arg(stub, 0, "degree")?;
    let request: DegreeRequest = serde_json::from_str(&raw)
        .map_err(|e| ContractError::InvalidArgument(format!("degree JSON: {e}")))?;

    let key = degree_key(&request.degree_id);
    if stub.get_state(&key).is_some() {
        return Err(ContractError::AlreadyExists {
            kind: "degree",
            id: request.degree_id,
        });
    }

    let degree = Degree::issue(request, tx_time(stub)?)?;
    let bytes = to_json(&key, &degree)?;
    stub.put_state(key, bytes.clone());
    Ok(bytes)
}

fn revoke_degree(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ContractError> {
    require_admin(stub, "revoke degrees")?;
    let degree_id = arg(stub, 0, "degreeId")?;
    let mut degree = load_degree(stub, &degree_id)?;
    degree.revoke(tx_time(stub)?)?;

    let key = degree_key(&degree_id);
    let bytes = to_json(&key, &degree)?;
    stub.put_state(key, bytes.clone());
    Ok(bytes)
}

fn query_degree(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ContractError> {
    let degree_id = arg(stub, 0, "degreeId")?;
    let degree = load_degree(stub, &degree_id)?;
    to_json(&degree_key(&degree_id), &degree)
}

fn query_degrees_by_student(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ContractError> {
    let student_id = arg(stub, 0, "studentId")?;
    let mut degrees = Vec::new();
    for (key, bytes) in stub.get_state_by_prefix(degree_key_prefix()) {
        let degree: Degree = serde_json::from_slice(&bytes).map_err(|e| ContractError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        if degree.student_id == student_id {
            degrees.push(degree);
        }
    }
    to_json(degree_key_prefix(), &degrees)
}

fn verify_degree(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ContractError> {
    let degree_id = arg(stub, 0, "degreeId")?;
    let transcript_hash = arg(stub, 1, "transcriptHash")?;
    let degree = load_degree(stub, &degree_id)?;

    to_json(&degree_key(&degree_id), &Verification::of(&degree, &transcript_hash))
}

// ---------------------------------------------------------------------------
// Transcripts
// ---------------------------------------------------------------------------

fn update_transcript(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ContractError> {
    require_admin(stub, "update transcripts")?;
    let student_id = arg(stub, 0, "studentId")?;
    let private_data = stub
        .transient()
        .get(PRIVATE_DATA_TRANSIENT_KEY)
        .cloned()
        .ok_or_else(|| {
            ContractError::InvalidArgument(format!("transient {PRIVATE_DATA_TRANSIENT_KEY} is required"))
        })?;

    let updated_by = stub.client().owner_id.to_string();
    let update = TranscriptUpdate::from_private_data(&student_id, &private_data, &updated_by, tx_time(stub)?)?;

    let record = to_json(&student_id, &update.record)?;
    stub.put_private_data(TRANSCRIPT_COLLECTION, student_id.clone(), record);

    let key = metadata_key(&student_id);
    let metadata = to_json(&key, &update.metadata)?;
    stub.put_state(key, metadata.clone());
    Ok(metadata)
}

fn query_transcript(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ContractError> {
    let student_id = arg(stub, 0, "studentId")?;
    let client = stub.client();
    let allowed = client.role == Role::Admin
        || (client.role == Role::Student && client.owner_id.as_str() == student_id);
    if !allowed {
        return Err(ContractError::AccessDenied(format!(
            "{} may not read the transcript of {student_id}",
            client.owner_id
        )));
    }

    let bytes = stub
        .get_private_data(TRANSCRIPT_COLLECTION, &student_id)
        .ok_or_else(|| ContractError::NotFound {
            kind: "transcript",
            id: student_id.clone(),
        })?;
    let record: PrivateRecord = serde_json::from_slice(&bytes).map_err(|e| ContractError::Corrupt {
        key: student_id.clone(),
        reason: e.to_string(),
    })?;
    to_json(&student_id, &record)
}

fn query_transcript_metadata(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ContractError> {
    let student_id = arg(stub, 0, "studentId")?;
    let key = metadata_key(&student_id);
    let bytes = stub.get_state(&key).ok_or_else(|| ContractError::NotFound {
        kind: "transcript",
        id: student_id.clone(),
    })?;
    let metadata: PublicMetadata = serde_json::from_slice(&bytes).map_err(|e| ContractError::Corrupt {
        key: key.clone(),
        reason: e.to_string(),
    })?;
    to_json(&key, &metadata)
}
