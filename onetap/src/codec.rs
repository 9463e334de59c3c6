//! Unverified decoding of ID tokens
//!
//! These functions never fail. A token that cannot be split, decoded, or
//! parsed is reported the same way as no token at all. Nothing here checks
//! a signature; use [`Verifier`][crate::Verifier] where trust matters.

use std::error::Error;

use aliri::{
    jwk::KeyId,
    jwt::{BasicHeaders, CoreHeaders},
    JwtRef,
};
use aliri_base64::Base64Url;
use aliri_clock::{Clock, UnixTime};

use crate::ClaimSet;

/// Decodes the claim set from a compact token without verifying it
pub fn decode(token: Option<&str>) -> Option<ClaimSet> {
    let token = token?;

    let mut segments = token.split('.');
    let payload = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            tracing::trace!("token does not have three segments");
            return None;
        }
    };

    let raw = match Base64Url::from_encoded(payload) {
        Ok(raw) => raw,
        Err(err) => {
            let error: &dyn Error = &err;
            tracing::trace!(error, "token payload is not base64url");
            return None;
        }
    };

    match serde_json::from_slice(raw.as_slice()) {
        Ok(claims) => Some(claims),
        Err(err) => {
            let error: &dyn Error = &err;
            tracing::trace!(error, "token payload is not a claim set");
            None
        }
    }
}

/// Decodes the claim set, treating an expired token as absent
///
/// This is a cheap local filter so that an expired token never surfaces as a
/// signed-in session.
pub fn decode_fresh<C: Clock>(token: Option<&str>, clock: &C) -> Option<ClaimSet> {
    decode_fresh_at(token, clock.now())
}

/// Decodes the claim set, treating a token expired at `now` as absent
pub fn decode_fresh_at(token: Option<&str>, now: UnixTime) -> Option<ClaimSet> {
    decode(token).filter(|claims| {
        let live = claims.is_live_at(now);
        if !live {
            tracing::trace!(exp = claims.expires_at().0, now = now.0, "token has expired");
        }
        live
    })
}

/// Reads the signing key ID from the token's unverified header
pub fn untrusted_key_id(token: &str) -> Option<KeyId> {
    let decomposed = JwtRef::from_str(token)
        .decompose::<BasicHeaders>()
        .ok()?;
    decomposed.kid().map(ToOwned::to_owned)
}
