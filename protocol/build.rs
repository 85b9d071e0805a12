//! Generates the `certa.ledger.LedgerPeer` client and server stubs.
//!
//! The messages are hand-written prost types in `src/ledger/grpc/wire.rs`,
//! so no `.proto` file or `protoc` is involved.

use tonic_build::manual::{Builder, Method, Service};

const WIRE: &str = "crate::ledger::grpc::wire";

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("{WIRE}::{input}"))
        .output_type(format!("{WIRE}::{output}"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let service = Service::builder()
        .name("LedgerPeer")
        .package("certa.ledger")
        .method(unary("endorse", "Endorse", "SignedProposalMessage", "EndorseReply"))
        .method(unary("evaluate", "Evaluate", "SignedProposalMessage", "EvaluateReply"))
        .method(unary("submit", "Submit", "EnvelopeMessage", "SubmitReply"))
        .method(unary(
            "commit_status",
            "CommitStatus",
            "CommitStatusRequest",
            "CommitStatusReply",
        ))
        .build();

    Builder::new().compile(&[service]);
}
