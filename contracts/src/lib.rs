// Copyright (c) 2026 Certa Ledger Team. MIT License.
// See LICENSE for details.

//! # Certa Academic Records Chaincode
//!
//! The program ledger peers execute for the `academic` channel, plus a typed
//! client for calling it through the gateway:
//!
//! - **Degrees** — public credential records with an ACTIVE → REVOKED
//!   lifecycle.
//! - **Transcripts** — grades and GPA kept in a restricted collection, with
//!   only a SHA-256 anchor in public state.
//! - **Client** — [`RecordsClient`] wraps [`certa_protocol::LedgerGateway`]
//!   with one method per chaincode function.
//!
//! ## Design Principles
//!
//! 1. Lifecycle states are enum variants, and revocation is one-way.
//! 2. Private transcript fields never appear in public state or in
//!    function arguments; they arrive through the transient map only.
//! 3. Every write is gated on the caller's role, which peers read from the
//!    enrollment attributes of a certificate chained to the caller's MSP root.
//! 4. Error messages carry stable phrases ("already exists", "does not
//!    exist", "access denied") that callers classify.

pub mod client;
pub mod contract;
pub mod degree;
pub mod error;
pub mod transcript;

pub use client::RecordsClient;
pub use contract::AcademicRecordsContract;
pub use degree::{Degree, DegreeRequest, DegreeStatus, Verification};
pub use error::ContractError;
pub use transcript::{PrivateRecord, PublicMetadata};
