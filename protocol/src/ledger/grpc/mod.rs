//! # gRPC Transport
//!
//! The network implementation of the transport seam. Peers expose one
//! unary service, `certa.ledger.LedgerPeer`, with `Endorse`, `Evaluate`,
//! `Submit` and `CommitStatus`.
//!
//! - [`GrpcConnector`] opens a tonic channel per creator. `grpcs://`
//!   addresses use TLS with the endpoint's root bundle and optional server
//!   name override, `grpc://` addresses are plaintext.
//! - [`LedgerPeerService`] serves any [`LedgerChannel`](super::LedgerChannel)
//!   over the same service, which is how a devnet is exposed to other
//!   processes.
//!
//! Transport errors travel in the status details and are decoded back into
//! the same [`TransportError`](super::TransportError) on the client.

mod client;
mod server;
pub mod wire;

/// Generated client and server stubs.
#[allow(clippy::all)]
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/certa.ledger.LedgerPeer.rs"));
}

pub use client::{GrpcChannel, GrpcConnector, GRPCS_SCHEME, GRPC_SCHEME};
pub use server::LedgerPeerService;
