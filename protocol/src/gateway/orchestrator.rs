//! # Transaction Orchestrator
//!
//! Drives a transaction through its phases:
//!
//! ```text
//! Built ──endorse──▶ Endorsed ──submit──▶ Submitted ──commit-wait──▶ Committed
//!   │                   │                    │
//!   └───────────────────┴────────────────────┴──────────────▶ Failed(kind)
//! ```
//!
//! Each phase has its own deadline ([`PhaseTimeouts`]):
//!
//! - endorsement deadline ⇒ [`GatewayError::Endorsement`]
//! - submission deadline ⇒ [`GatewayError::Connection`]
//! - commit-wait deadline ⇒ `Ok(CommitResult { committed: false, .. })`.
//!   The outcome is unknown, not failed: the transaction may still commit.
//!
//! Phases are typed: [`BuiltTransaction`], [`EndorsedTransaction`] and
//! [`SubmittedTransaction`] are consumed by the next phase, so a phase cannot
//! run twice on the same attempt. Nothing here retries a transaction. A
//! retry is the caller's decision and always starts from a new proposal with
//! a new transaction id.
//!
//! A connection-class failure marks the handle's connection stale, so the
//! manager hands out a fresh channel on the next lookup.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::handle::ContractHandle;
use crate::config::PhaseTimeouts;
use crate::error::{classify, ErrorKind, GatewayError};
use crate::ledger::{Proposal, ProposalResponse, SignedProposal, TransientMap, TransportError};

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub transaction_id: String,
    /// Chaincode response from endorsement; the caller interprets it.
    pub result_payload: Vec<u8>,
    /// `false` when the commit-wait deadline passed without a verdict.
    pub committed: bool,
    pub block_number: Option<u64>,
}

// ---------------------------------------------------------------------------
// State Machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Built,
    Endorsed,
    Submitted,
    /// Terminal: valid in a block.
    Committed,
    /// Terminal: the phase that was running failed with this kind.
    Failed(ErrorKind),
}

/// Tracks one transaction attempt. Terminal states are immutable and
/// out-of-order transitions are ignored.
#[derive(Debug, Clone)]
pub struct TransactionStateMachine {
    transaction_id: String,
    state: TransactionState,
}

impl TransactionStateMachine {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            state: TransactionState::Built,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn mark_endorsed(&mut self) {
        self.advance(TransactionState::Built, TransactionState::Endorsed);
    }

    pub fn mark_submitted(&mut self) {
        self.advance(TransactionState::Endorsed, TransactionState::Submitted);
    }

    pub fn mark_committed(&mut self) {
        self.advance(TransactionState::Submitted, TransactionState::Committed);
    }

    pub fn mark_failed(&mut self, kind: ErrorKind) {
        if !self.is_terminal() {
            debug!(tx_id = %self.transaction_id, from = ?self.state, %kind, "transaction failed");
            self.state = TransactionState::Failed(kind);
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TransactionState::Committed | TransactionState::Failed(_)
        )
    }

    fn advance(&mut self, from: TransactionState, to: TransactionState) {
        if self.state == from {
            debug!(tx_id = %self.transaction_id, ?from, ?to, "transaction state");
            self.state = to;
        }
    }
}

// ---------------------------------------------------------------------------
// Phase Values
// ---------------------------------------------------------------------------

/// A signed proposal that has not been sent anywhere yet.
#[derive(Debug)]
pub struct BuiltTransaction {
    handle: ContractHandle,
    signed: SignedProposal,
    machine: TransactionStateMachine,
}

impl BuiltTransaction {
    pub fn transaction_id(&self) -> &str {
        self.signed.proposal.transaction_id()
    }

    pub fn proposal(&self) -> &Proposal {
        &self.signed.proposal
    }

    pub fn state(&self) -> TransactionState {
        self.machine.state()
    }
}

/// Endorsed by enough peers to be submitted. Dropping it abandons the
/// transaction without touching the ledger.
#[derive(Debug)]
pub struct EndorsedTransaction {
    handle: ContractHandle,
    proposal: Proposal,
    response: ProposalResponse,
    machine: TransactionStateMachine,
}

impl EndorsedTransaction {
    pub fn transaction_id(&self) -> &str {
        self.proposal.transaction_id()
    }

    /// The chaincode response the endorsers agreed on.
    pub fn payload(&self) -> &[u8] {
        &self.response.payload
    }

    pub fn endorsers(&self) -> impl Iterator<Item = &str> {
        self.response.endorsements.iter().map(|e| e.msp_id.as_str())
    }

    pub fn state(&self) -> TransactionState {
        self.machine.state()
    }
}

/// Accepted by ordering; its commit verdict is pending.
#[derive(Debug)]
pub struct SubmittedTransaction {
    handle: ContractHandle,
    transaction_id: String,
    payload: Vec<u8>,
    machine: TransactionStateMachine,
}

impl SubmittedTransaction {
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn state(&self) -> TransactionState {
        self.machine.state()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TransactionOrchestrator {
    timeouts: PhaseTimeouts,
}

impl Default for TransactionOrchestrator {
    fn default() -> Self {
        Self::new(PhaseTimeouts::default())
    }
}

impl TransactionOrchestrator {
    pub fn new(timeouts: PhaseTimeouts) -> Self {
        Self { timeouts }
    }

    pub fn timeouts(&self) -> &PhaseTimeouts {
        &self.timeouts
    }

    /// Builds and signs a proposal. `transient` travels to the endorsers only.
    pub fn propose(
        &self,
        handle: &ContractHandle,
        function_name: &str,
        public_arguments: Vec<String>,
        transient: TransientMap,
    ) -> Result<BuiltTransaction, GatewayError> {
        let signed = handle.sign_proposal(function_name, public_arguments, transient)?;
        let machine = TransactionStateMachine::new(signed.proposal.transaction_id());
        debug!(
            tx_id = %machine.transaction_id(),
            function = function_name,
            owner = %handle.owner_id(),
            "proposal built"
        );
        Ok(BuiltTransaction {
            handle: handle.clone(),
            signed,
            machine,
        })
    }

    /// Collects endorsements. Missing the deadline is an endorsement failure.
    pub async fn endorse(&self, built: BuiltTransaction) -> Result<EndorsedTransaction, GatewayError> {
        let BuiltTransaction {
            handle,
            signed,
            mut machine,
        } = built;

        let deadline = self.timeouts.endorse;
        let outcome = timeout(deadline, handle.channel().endorse(&signed)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(fail(&handle, &mut machine, classify(e))),
            Err(_) => {
                return Err(fail(
                    &handle,
                    &mut machine,
                    GatewayError::Endorsement(deadline_message("endorsement", deadline)),
                ))
            }
        };

        machine.mark_endorsed();
        Ok(EndorsedTransaction {
            handle,
            proposal: signed.proposal,
            response,
            machine,
        })
    }

    /// Hands the endorsed transaction to ordering.
    pub async fn submit_endorsed(
        &self,
        endorsed: EndorsedTransaction,
    ) -> Result<SubmittedTransaction, GatewayError> {
        let EndorsedTransaction {
            handle,
            proposal,
            response,
            mut machine,
        } = endorsed;

        let payload = response.payload.clone();
        let envelope = match handle.seal(&proposal, response) {
            Ok(envelope) => envelope,
            Err(e) => return Err(fail(&handle, &mut machine, e)),
        };

        let deadline = self.timeouts.submit;
        match timeout(deadline, handle.channel().submit(&envelope)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(fail(&handle, &mut machine, classify(e))),
            Err(_) => {
                return Err(fail(
                    &handle,
                    &mut machine,
                    GatewayError::Connection(deadline_message("submission to ordering", deadline)),
                ))
            }
        }

        machine.mark_submitted();
        Ok(SubmittedTransaction {
            handle,
            transaction_id: envelope.transaction_id,
            payload,
            machine,
        })
    }

    /// Waits for the commit verdict. An invalid verdict is an error; no
    /// verdict before the deadline is `committed: false`.
    pub async fn wait_for_commit(
        &self,
        submitted: SubmittedTransaction,
    ) -> Result<CommitResult, GatewayError> {
        let SubmittedTransaction {
            handle,
            transaction_id,
            payload,
            mut machine,
        } = submitted;

        let deadline = self.timeouts.commit;
        let status = match timeout(deadline, handle.channel().commit_status(&transaction_id)).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(fail(&handle, &mut machine, classify(e))),
            Err(_) => {
                warn!(
                    tx_id = %transaction_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "commit status unknown at deadline"
                );
                return Ok(CommitResult {
                    transaction_id,
                    result_payload: payload,
                    committed: false,
                    block_number: None,
                });
            }
        };

        if !status.code.is_valid() {
            let err = classify(TransportError::Invalidated {
                transaction_id: transaction_id.clone(),
                code: status.code,
            });
            return Err(fail(&handle, &mut machine, err));
        }

        machine.mark_committed();
        info!(tx_id = %transaction_id, block = status.block_number, "transaction committed");
        Ok(CommitResult {
            transaction_id,
            result_payload: payload,
            committed: true,
            block_number: Some(status.block_number),
        })
    }

    /// All four phases in order.
    pub async fn submit(
        &self,
        handle: &ContractHandle,
        function_name: &str,
        public_arguments: Vec<String>,
        transient: Option<TransientMap>,
    ) -> Result<CommitResult, GatewayError> {
        let built = self.propose(
            handle,
            function_name,
            public_arguments,
            transient.unwrap_or_default(),
        )?;
        let endorsed = self.endorse(built).await?;
        let submitted = self.submit_endorsed(endorsed).await?;
        self.wait_for_commit(submitted).await
    }

    /// Read-only call: one endorsement round, nothing is ordered or committed.
    pub async fn evaluate(
        &self,
        handle: &ContractHandle,
        function_name: &str,
        public_arguments: Vec<String>,
    ) -> Result<Vec<u8>, GatewayError> {
        let signed = handle.sign_proposal(function_name, public_arguments, TransientMap::new())?;
        let tx_id = signed.proposal.transaction_id().to_string();

        let deadline = self.timeouts.evaluate;
        match timeout(deadline, handle.channel().evaluate(&signed)).await {
            Ok(Ok(payload)) => {
                debug!(tx_id = %tx_id, function = function_name, bytes = payload.len(), "evaluated");
                Ok(payload)
            }
            Ok(Err(e)) => Err(faulted(handle, classify(e))),
            Err(_) => Err(faulted(
                handle,
                GatewayError::Connection(deadline_message("evaluation", deadline)),
            )),
        }
    }
}

fn fail(
    handle: &ContractHandle,
    machine: &mut TransactionStateMachine,
    err: GatewayError,
) -> GatewayError {
    machine.mark_failed(err.kind());
    warn!(tx_id = %machine.transaction_id(), kind = %err.kind(), error = %err, "transaction failed");
    faulted(handle, err)
}

fn faulted(handle: &ContractHandle, err: GatewayError) -> GatewayError {
    if err.kind() == ErrorKind::Connection {
        handle.mark_stale();
    }
    err
}

fn deadline_message(phase: &str, deadline: Duration) -> String {
    format!("{phase} timed out after {} ms", deadline.as_millis())
}
