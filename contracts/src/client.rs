//! Typed calls into [`AcademicRecordsContract`] through a [`LedgerGateway`].
//!
//! [`AcademicRecordsContract`]: crate::AcademicRecordsContract

use serde::de::DeserializeOwned;

use certa_protocol::gateway::{CommitResult, PrivateFields, PrivateSubmitResult};
use certa_protocol::{GatewayError, LedgerGateway};

use crate::degree::{Degree, DegreeRequest, Verification};
use crate::transcript::{PrivateRecord, PublicMetadata};

#[derive(Clone)]
pub struct RecordsClient {
    gateway: LedgerGateway,
    channel: String,
    chaincode: String,
}

impl RecordsClient {
    pub fn new(gateway: LedgerGateway, channel: impl Into<String>, chaincode: impl Into<String>) -> Self {
        Self {
            gateway,
            channel: channel.into(),
            chaincode: chaincode.into(),
        }
    }

    pub fn gateway(&self) -> &LedgerGateway {
        &self.gateway
    }

    async fn submit(
        &self,
        identity_ref: &str,
        function: &str,
        args: Vec<String>,
    ) -> Result<CommitResult, GatewayError> {
        self.gateway
            .submit(identity_ref, &self.channel, &self.chaincode, function, args, None)
            .await
    }

    async fn query<T: DeserializeOwned>(
        &self,
        identity_ref: &str,
        function: &str,
        args: Vec<String>,
    ) -> Result<T, GatewayError> {
        let payload = self
            .gateway
            .evaluate(identity_ref, &self.channel, &self.chaincode, function, args)
            .await?;
        serde_json::from_slice(&payload)
            .map_err(|e| GatewayError::Internal(format!("{function} returned unreadable JSON: {e}")))
    }

    // -- degrees --

    pub async fn issue_degree(
        &self,
        identity_ref: &str,
        request: &DegreeRequest,
    ) -> Result<CommitResult, GatewayError> {
        let json = serde_json::to_string(request)
            .map_err(|e| GatewayError::Validation(format!("degree request: {e}")))?;
        self.submit(identity_ref, "IssueDegree", vec![json]).await
    }

    pub async fn revoke_degree(&self, identity_ref: &str, degree_id: &str) -> Result<CommitResult, GatewayError> {
        self.submit(identity_ref, "RevokeDegree", vec![degree_id.to_string()])
            .await
    }

    pub async fn query_degree(&self, identity_ref: &str, degree_id: &str) -> Result<Degree, GatewayError> {
        self.query(identity_ref, "QueryDegree", vec![degree_id.to_string()])
            .await
    }

    pub async fn degrees_by_student(&self, identity_ref: &str, student_id: &str) -> Result<Vec<Degree>, GatewayError> {
        self.query(identity_ref, "QueryDegreesByStudent", vec![student_id.to_string()])
            .await
    }

    pub async fn verify_degree(
        &self,
        identity_ref: &str,
        degree_id: &str,
        transcript_hash: &str,
    ) -> Result<Verification, GatewayError> {
        self.query(
            identity_ref,
            "VerifyDegree",
            vec![degree_id.to_string(), transcript_hash.to_string()],
        )
        .await
    }

    // -- transcripts --

    /// Stores `fields` privately for `student_id` and anchors their hash.
    pub async fn update_transcript(
        &self,
        identity_ref: &str,
        student_id: &str,
        fields: &PrivateFields,
    ) -> Result<PrivateSubmitResult, GatewayError> {
        self.gateway
            .submit_private(
                identity_ref,
                &self.channel,
                &self.chaincode,
                "UpdateTranscript",
                vec![student_id.to_string()],
                fields,
            )
            .await
    }

    pub async fn query_transcript(&self, identity_ref: &str, student_id: &str) -> Result<PrivateRecord, GatewayError> {
        self.query(identity_ref, "QueryTranscript", vec![student_id.to_string()])
            .await
    }

    pub async fn transcript_metadata(
        &self,
        identity_ref: &str,
        student_id: &str,
    ) -> Result<PublicMetadata, GatewayError> {
        self.query(identity_ref, "QueryTranscriptMetadata", vec![student_id.to_string()])
            .await
    }
}
