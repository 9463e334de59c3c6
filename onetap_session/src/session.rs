use std::{fmt, sync::Arc};

use aliri::{Jwt, JwtRef};
use aliri_clock::UnixTime;
use http::{header, HeaderMap, HeaderValue};
use onetap::{codec, ClaimSet};
use tokio::sync::watch;

use crate::{IdentityHooks, SessionStore};

/// The session as derived from the persisted credential
///
/// A token and its claims are either both present or both absent, so a state
/// is signed in exactly when it holds a credential that had not expired when
/// the state was derived.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    active: Option<Active>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Active {
    token: Jwt,
    claims: ClaimSet,
}

impl SessionState {
    /// The signed-out state
    pub const fn signed_out() -> Self {
        Self { active: None }
    }

    /// Derives the state from a raw persisted value as of `now`
    ///
    /// A value that is malformed or already expired yields the signed-out
    /// state.
    pub fn derive_at(raw: Option<&str>, now: UnixTime) -> Self {
        let active = raw.and_then(|raw| {
            codec::decode_fresh_at(Some(raw), now).map(|claims| Active {
                token: Jwt::new(raw.to_owned()),
                claims,
            })
        });
        Self { active }
    }

    /// The current credential
    pub fn token(&self) -> Option<&JwtRef> {
        self.active.as_ref().map(|a| &*a.token)
    }

    /// The unverified claims of the current credential
    pub fn claims(&self) -> Option<&ClaimSet> {
        self.active.as_ref().map(|a| &a.claims)
    }

    /// Whether a live credential is held
    pub fn is_signed_in(&self) -> bool {
        self.active.is_some()
    }

    /// The `authorization` header value carrying the credential
    pub fn authorization(&self) -> Option<HeaderValue> {
        let token = self.token()?;
        let mut value = HeaderValue::try_from(format!("Bearer {}", token.as_str())).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

#[derive(Clone)]
pub(crate) struct Controls {
    pub(crate) store: SessionStore,
    pub(crate) hooks: Arc<dyn IdentityHooks>,
    pub(crate) state: watch::Receiver<SessionState>,
}

impl Controls {
    pub(crate) fn sign_out(&self) -> bool {
        let claims = match self.state.borrow().claims() {
            Some(claims) => claims.clone(),
            None => return false,
        };

        tracing::info!(sub = %claims.sub(), "signing out");
        self.store.write(None);
        self.hooks.signed_out(&claims);
        true
    }
}

/// A snapshot of the session for request and rendering code
#[derive(Clone)]
pub struct Session {
    state: SessionState,
    controls: Controls,
}

impl Session {
    pub(crate) fn new(state: SessionState, controls: Controls) -> Self {
        Self { state, controls }
    }

    /// The session state this snapshot was taken from
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The current credential
    pub fn token(&self) -> Option<&JwtRef> {
        self.state.token()
    }

    /// The unverified claims of the current credential
    pub fn claims(&self) -> Option<&ClaimSet> {
        self.state.claims()
    }

    /// Whether a live credential is held
    pub fn is_signed_in(&self) -> bool {
        self.state.is_signed_in()
    }

    /// Headers to attach to outgoing requests, empty when signed out
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = self.state.authorization() {
            headers.insert(header::AUTHORIZATION, value);
        }
        headers
    }

    /// Clears the credential in every tab
    ///
    /// Acts on the live session rather than this snapshot. Returns `false` if
    /// no one was signed in.
    pub fn sign_out(&self) -> bool {
        self.controls.sign_out()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
