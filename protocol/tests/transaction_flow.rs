//! Submit / evaluate / private submission through the full stack.

mod common;

use std::sync::Arc;
use std::time::Duration;

use certa_protocol::gateway::{PrivateFields, TransactionState};
use certa_protocol::identity::{Identity, InMemoryIdentityStore, Role};
use certa_protocol::{ErrorKind, LedgerGateway, TransactionOrchestrator};
use common::{config, devnet, enrollment_params, identity, manager, CHAINCODE, CHANNEL, MSP};
use serde_json::json;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn operator_handle(
    ledger: &certa_protocol::ledger::DevnetLedger,
) -> (Arc<certa_protocol::ConnectionManager>, certa_protocol::ContractHandle) {
    let manager = manager(ledger, config()).await;
    let handle = manager.contract_handle(CHANNEL, CHAINCODE, None).await.unwrap();
    (manager, handle)
}

#[tokio::test]
async fn submit_commits_and_returns_payload() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let result = orchestrator
        .submit(&handle, "Incr", args(&["visits"]), None)
        .await
        .unwrap();

    assert!(result.committed);
    assert_eq!(result.result_payload, b"1");
    assert_eq!(result.transaction_id.len(), 64);
    assert_eq!(result.block_number, Some(1));
    assert_eq!(
        ledger.public_state(CHANNEL, CHAINCODE, "visits"),
        Some(b"1".to_vec())
    );
}

#[tokio::test]
async fn phases_advance_the_state_machine() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let built = orchestrator
        .propose(&handle, "Put", args(&["k", "v"]), Default::default())
        .unwrap();
    let tx_id = built.transaction_id().to_string();
    assert_eq!(built.state(), TransactionState::Built);

    let endorsed = orchestrator.endorse(built).await.unwrap();
    assert_eq!(endorsed.state(), TransactionState::Endorsed);
    assert_eq!(endorsed.transaction_id(), tx_id);
    assert_eq!(endorsed.endorsers().count(), 2);

    let submitted = orchestrator.submit_endorsed(endorsed).await.unwrap();
    assert_eq!(submitted.state(), TransactionState::Submitted);
    assert_eq!(submitted.transaction_id(), tx_id);

    let result = orchestrator.wait_for_commit(submitted).await.unwrap();
    assert_eq!(result.transaction_id, tx_id);
    assert!(result.committed);
}

#[tokio::test]
async fn abandoned_endorsement_leaves_ledger_untouched() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let built = orchestrator
        .propose(&handle, "Put", args(&["ghost", "boo"]), Default::default())
        .unwrap();
    drop(orchestrator.endorse(built).await.unwrap());

    assert_eq!(ledger.block_height(), 0);
    assert_eq!(ledger.public_state(CHANNEL, CHAINCODE, "ghost"), None);
}

#[tokio::test(start_paused = true)]
async fn endorsement_deadline_is_endorsement_error() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());
    ledger.set_endorsement_delay(Duration::from_secs(20));

    let err = orchestrator
        .submit(&handle, "Put", args(&["D1", "x"]), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Endorsement);
    assert_eq!(ledger.block_height(), 0);
    assert_eq!(ledger.public_state(CHANNEL, CHAINCODE, "D1"), None);
}

#[tokio::test]
async fn unmet_policy_is_endorsement_error() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    ledger.set_org_online("UniversityMSP", false);

    let err = TransactionOrchestrator::new(manager.timeouts())
        .submit(&handle, "Put", args(&["k", "v"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Endorsement);
}

#[tokio::test]
async fn orderer_outage_is_connection_error() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    ledger.set_orderer_available(false);

    let err = TransactionOrchestrator::new(manager.timeouts())
        .submit(&handle, "Put", args(&["k", "v"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.is_retryable());
    assert_eq!(ledger.block_height(), 0);
}

#[tokio::test(start_paused = true)]
async fn commit_deadline_is_indeterminate_not_failed() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    ledger.set_commit_delay(Duration::from_secs(120));

    let result = TransactionOrchestrator::new(manager.timeouts())
        .submit(&handle, "Put", args(&["late", "v"]), None)
        .await
        .unwrap();

    assert!(!result.committed);
    assert_eq!(result.block_number, None);
    // It did commit; the answer just came too late.
    assert_eq!(
        ledger.public_state(CHANNEL, CHAINCODE, "late"),
        Some(b"v".to_vec())
    );
}

#[tokio::test]
async fn mvcc_conflict_surfaces_without_retry() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let first = orchestrator
        .propose(&handle, "Incr", args(&["n"]), Default::default())
        .unwrap();
    let second = orchestrator
        .propose(&handle, "Incr", args(&["n"]), Default::default())
        .unwrap();
    assert_ne!(first.transaction_id(), second.transaction_id());

    let first = orchestrator.endorse(first).await.unwrap();
    let second = orchestrator.endorse(second).await.unwrap();

    let first = orchestrator.submit_endorsed(first).await.unwrap();
    orchestrator.wait_for_commit(first).await.unwrap();

    let second = orchestrator.submit_endorsed(second).await.unwrap();
    let err = orchestrator.wait_for_commit(second).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.message().contains("MVCC_READ_CONFLICT"));
    // Exactly two blocks: no hidden resubmission.
    assert_eq!(ledger.block_height(), 2);
    assert_eq!(ledger.public_state(CHANNEL, CHAINCODE, "n"), Some(b"1".to_vec()));
}

#[tokio::test]
async fn evaluate_reads_without_committing() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    orchestrator
        .submit(&handle, "Put", args(&["color", "blue"]), None)
        .await
        .unwrap();
    let height = ledger.block_height();

    let value = orchestrator.evaluate(&handle, "Get", args(&["color"])).await.unwrap();
    assert_eq!(value, b"blue");
    assert_eq!(ledger.block_height(), height);

    let err = orchestrator
        .evaluate(&handle, "Get", args(&["nothing"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn disconnect_fails_in_flight_handles_cleanly() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());
    ledger.set_endorsement_delay(Duration::from_secs(2));

    let in_flight = tokio::spawn(async move {
        orchestrator
            .submit(&handle, "Put", args(&["k", "v"]), None)
            .await
    });
    // Peers are still working on the proposal.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!in_flight.is_finished());

    manager.disconnect().await;
    let err = in_flight.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(ledger.block_height(), 0);
    assert_eq!(ledger.public_state(CHANNEL, CHAINCODE, "k"), None);
}

#[tokio::test]
async fn disconnect_fails_handles_used_afterwards() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    manager.disconnect().await;
    let err = orchestrator
        .submit(&handle, "Put", args(&["k", "v"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn submit_private_anchors_hash_and_hides_payload() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let fields: PrivateFields = serde_json::from_value(json!({
        "gpa": "3.6",
        "grades": { "CS101": "A", "MA201": "B+" }
    }))
    .unwrap();

    let result = orchestrator
        .submit_private(&handle, "Anchor", args(&["S1"]), &fields)
        .await
        .unwrap();
    assert!(result.committed);

    let meta: serde_json::Value =
        serde_json::from_slice(&ledger.public_state(CHANNEL, CHAINCODE, "META_S1").unwrap())
            .unwrap();
    assert_eq!(meta["transcriptHash"], result.hash);

    let stored = ledger.private_state(CHANNEL, CHAINCODE, "vault", "S1").unwrap();
    assert_eq!(certa_protocol::crypto::sha256_hex(&stored), result.hash);

    let log = serde_json::to_string(&ledger.blocks()).unwrap();
    assert!(!log.contains("3.6"));
    assert!(!log.contains("MA201"));
}

#[tokio::test]
async fn tampered_hash_is_validation_error_and_abandoned() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let orchestrator = TransactionOrchestrator::new(manager.timeouts());

    let fields: PrivateFields = serde_json::from_value(json!({ "gpa": "2.1" })).unwrap();
    let err = orchestrator
        .submit_private(&handle, "Misanchor", args(&["S2"]), &fields)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.message().contains("hash mismatch"));
    assert_eq!(ledger.block_height(), 0);
    assert_eq!(ledger.private_state(CHANNEL, CHAINCODE, "vault", "S2"), None);
}

#[tokio::test]
async fn gateway_resolves_identity_references() {
    let ledger = devnet();
    let manager = manager(&ledger, config()).await;
    let store = Arc::new(InMemoryIdentityStore::new());
    store.register(identity("S1", Role::Student)).unwrap();
    let gateway = LedgerGateway::new(manager.clone(), store);

    gateway
        .submit("S1", CHANNEL, CHAINCODE, "Put", args(&["k", "v"]), None)
        .await
        .unwrap();
    let value = gateway
        .evaluate("S1", CHANNEL, CHAINCODE, "Get", args(&["k"]))
        .await
        .unwrap();
    assert_eq!(value, b"v");
    assert_eq!(manager.cached_connections(), 1);

    let err = gateway
        .evaluate("nobody", CHANNEL, CHAINCODE, "Get", args(&["k"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn empty_function_name_is_rejected_locally() {
    let ledger = devnet();
    let (manager, handle) = operator_handle(&ledger).await;
    let err = TransactionOrchestrator::new(manager.timeouts())
        .submit(&handle, " ", vec![], None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn self_enrolled_identity_is_rejected_by_peers() {
    let ledger = devnet();
    let (manager, _) = operator_handle(&ledger).await;

    // Carries the right attributes, but no CA of the network signed it.
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let cert = enrollment_params("mallory", "admin").self_signed(&key).unwrap();
    let mallory = Identity::new(
        "mallory",
        MSP,
        cert.pem().into_bytes(),
        key.serialize_pem().into_bytes(),
        Role::Admin,
    );

    let handle = manager
        .contract_handle(CHANNEL, CHAINCODE, Some(&mallory))
        .await
        .unwrap();
    let err = TransactionOrchestrator::new(manager.timeouts())
        .submit(&handle, "Put", args(&["k", "v"]), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.message().contains("creator certificate"), "{err}");
    assert_eq!(ledger.block_height(), 0);
}
