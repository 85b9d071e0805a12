//! # Cryptographic Primitives for Certa
//!
//! Everything that touches key material or digests flows through here:
//!
//! - **hash** — SHA-256 and the canonical JSON encoding used for hash anchors.
//! - **signer** — the signer factory: PEM private key in, `sign(digest)` out,
//!   whatever the key family.
//! - **certificate** — X.509 parsing, verification, and the check that a
//!   private key actually belongs to the certificate it ships with.
//!
//! Key bytes are never logged and never appear in error messages.

pub mod certificate;
pub mod hash;
pub mod signer;

#[cfg(test)]
pub(crate) mod test_ca;

pub use certificate::{Certificate, SigningIdentity};
pub use hash::{canonical_json, canonical_json_of, sha256, sha256_array, sha256_hex};
pub use signer::{CryptoError, KeyAlgorithm, Signer};
