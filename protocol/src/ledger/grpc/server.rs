use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use super::proto::ledger_peer_server::{LedgerPeer, LedgerPeerServer};
use super::wire::{
    status_from_error, CommitStatusReply, CommitStatusRequest, EndorseReply, EnvelopeMessage,
    EvaluateReply, SignedProposalMessage, SubmitReply,
};
use crate::ledger::proposal::SignedProposal;
use crate::ledger::transport::{Envelope, LedgerChannel};

/// Serves a [`LedgerChannel`] as `certa.ledger.LedgerPeer`.
///
/// Creators are taken from each request, so one channel serves every
/// client.
#[derive(Debug, Clone)]
pub struct LedgerPeerService {
    channel: Arc<dyn LedgerChannel>,
}

impl LedgerPeerService {
    pub fn new(channel: Arc<dyn LedgerChannel>) -> Self {
        Self { channel }
    }

    /// The tower service to mount on a `tonic::transport::Server`.
    pub fn into_server(self) -> LedgerPeerServer<Self> {
        LedgerPeerServer::new(self)
    }
}

#[tonic::async_trait]
impl LedgerPeer for LedgerPeerService {
    async fn endorse(
        &self,
        request: Request<SignedProposalMessage>,
    ) -> Result<Response<EndorseReply>, Status> {
        let signed = SignedProposal::try_from(request.into_inner())?;
        debug!(tx_id = %signed.proposal.transaction_id(), "endorse request");
        let response = self
            .channel
            .endorse(&signed)
            .await
            .map_err(|e| status_from_error(&e))?;
        Ok(Response::new(EndorseReply::try_from(&response)?))
    }

    async fn evaluate(
        &self,
        request: Request<SignedProposalMessage>,
    ) -> Result<Response<EvaluateReply>, Status> {
        let signed = SignedProposal::try_from(request.into_inner())?;
        debug!(tx_id = %signed.proposal.transaction_id(), "evaluate request");
        let payload = self
            .channel
            .evaluate(&signed)
            .await
            .map_err(|e| status_from_error(&e))?;
        Ok(Response::new(EvaluateReply { payload }))
    }

    async fn submit(
        &self,
        request: Request<EnvelopeMessage>,
    ) -> Result<Response<SubmitReply>, Status> {
        let envelope = Envelope::try_from(request.into_inner())?;
        debug!(tx_id = %envelope.transaction_id, "submit request");
        self.channel
            .submit(&envelope)
            .await
            .map_err(|e| status_from_error(&e))?;
        Ok(Response::new(SubmitReply {}))
    }

    async fn commit_status(
        &self,
        request: Request<CommitStatusRequest>,
    ) -> Result<Response<CommitStatusReply>, Status> {
        let transaction_id = request.into_inner().transaction_id;
        let status = self
            .channel
            .commit_status(&transaction_id)
            .await
            .map_err(|e| status_from_error(&e))?;
        Ok(Response::new(status.into()))
    }
}
