//! # Ledger Interface
//!
//! Everything the gateway knows about the ledger network:
//!
//! - **proposal** — transaction proposals, creators, transaction ids.
//! - **transport** — the [`Connector`] / [`LedgerChannel`] seam and the wire
//!   types that cross it.
//! - **chaincode** — the program interface endorsing peers execute.
//! - **devnet** — an in-process ledger implementing the transport seam.
//! - **grpc** — the network implementation of the seam over tonic.

pub mod chaincode;
pub mod devnet;
pub mod grpc;
pub mod proposal;
pub mod transport;

pub use chaincode::{Chaincode, ChaincodeError, ChaincodeStub, ClientIdentity};
pub use devnet::{DevnetConfig, DevnetLedger};
pub use grpc::{GrpcConnector, LedgerPeerService};
pub use proposal::{Creator, Proposal, SignedProposal, TransientMap};
pub use transport::{
    CommitStatus, Connector, Endorsement, Envelope, LedgerChannel, ProposalResponse,
    ReadWriteSet, TransportError, TxValidationCode,
};
