//! Verification of Google One Tap ID tokens
//!
//! Google Identity Services hands the browser a compact signed ID token. A backend that receives
//! that token as a bearer credential must independently check it: the signature against the
//! provider's currently published key set, the issuer, the audience (the application's client ID),
//! and the expiry.
//!
//! This crate provides the pieces needed for that check:
//!
//! * [`codec`] decodes a token's claims without verifying them, for use on the client side where
//!   the only question is "is there a live session?"
//! * [`CertificateCache`] memoizes the provider's key set behind a single-flight fetch, so that a
//!   burst of concurrent requests shares one outbound request to the key endpoint.
//! * [`Verifier`] performs the full gate sequence and reports one of three outcomes, mapped onto
//!   `200`, `401`, and `403`.
//!
//! ```no_run
//! use onetap::{CertificateCache, ClientId, Verifier};
//!
//! # async fn handle(headers: http::HeaderMap) -> Result<(), Box<dyn std::error::Error>> {
//! let certificates = CertificateCache::google()?;
//! let client_id = ClientId::from_static("1234.apps.googleusercontent.com");
//! let verifier = Verifier::new(client_id, certificates)?;
//!
//! let verification = verifier.verify(&headers).await;
//! match verification.claims() {
//!     Some(claims) => println!("hello, {}", claims.sub()),
//!     None => println!("rejected with {}", verification.status()),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod braids;
pub mod certs;
pub mod claims;
pub mod codec;
pub mod config;
pub mod headers;
pub mod verify;

pub use braids::*;
pub use certs::{CertificateCache, CertificateError, CertificateSet, CertificateSource};
pub use claims::ClaimSet;
pub use config::{ConfigError, VerifierConfig};
pub use headers::AuthorizationSource;
pub use verify::{authenticate, Rejection, Verification, Verifier, VerifyError};

/// The issuer that Google stamps into every ID token it signs
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// Google's published JSON Web Key Set for ID token signing keys
pub const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

#[cfg(test)]
mod test_support;
