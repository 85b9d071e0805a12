// Copyright (c) 2026 Certa Ledger Team. MIT License.
// See LICENSE for details.

//! # Certa Protocol — Ledger Submission Layer
//!
//! Certa issues and queries academic credentials on a permissioned ledger.
//! Degrees are public; grades and GPA are not. This crate is the piece that
//! sits between an application ("issue a degree", "update a transcript") and
//! the ledger peers: it turns an intent into a correctly sequenced,
//! identity-scoped, multi-phase transaction and tells the caller, in a small
//! closed vocabulary, what went wrong when something does.
//!
//! ## Architecture
//!
//! - **config** — Phase deadlines, cache limits and the plain-value gateway config.
//! - **crypto** — SHA-256, canonical JSON, PEM signers (ECDSA P-256, RSA, Ed25519)
//!   and X.509 certificate checks.
//! - **identity** — Per-user identities and the credential store seam.
//! - **ledger** — Proposals, the RPC transport seam, the chaincode stub, an
//!   in-process devnet ledger and the tonic gRPC transport.
//! - **gateway** — Connection cache, connection manager, the transaction
//!   orchestrator and the privacy partition protocol.
//! - **error** — The error classifier every failure passes through.
//!
//! ## Flow
//!
//! ```text
//! caller ──► LedgerGateway ──► ConnectionManager ──► ContractHandle
//!                 │                                       │
//!                 └──► TransactionOrchestrator ◄──────────┘
//!                        Built → Endorsed → Submitted → Committed | Failed(kind)
//! ```
//!
//! Nothing in this crate reads files. Credentials and TLS roots arrive as PEM
//! bytes, and the network arrives through the
//! [`ledger::transport::Connector`] trait: [`ledger::GrpcConnector`] for real
//! peers, [`ledger::DevnetLedger`] in process.

pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod ledger;

pub use error::{ErrorKind, GatewayError};
pub use gateway::{ConnectionManager, ContractHandle, LedgerGateway, TransactionOrchestrator};
pub use identity::{Identity, OwnerId, Role};
