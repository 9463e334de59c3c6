//! Verification of bearer tokens presented to a backend

use std::error::Error;

use aliri::{
    error::JwtVerifyError,
    jwa,
    jwk::KeyId,
    jwt::{self, CoreHeaders, HasAlgorithm},
    JwtRef,
};
use aliri_clock::{Clock, System};
use http::{HeaderValue, StatusCode};
use thiserror::Error;

use crate::{
    headers::bearer_token, AuthorizationSource, CertificateCache, CertificateError, ClaimSet,
    ClientId, ClientIdRef, ConfigError,
};

/// Why a token was not trusted
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The token header does not name its signing key
    #[error("token header does not carry a key ID")]
    MissingKeyId,

    /// No published key has the token's key ID
    #[error("no published key matches the token's key ID")]
    UnknownKeyId(KeyId),

    /// The published keys could not be obtained
    #[error("unable to resolve signing keys")]
    Certificates(#[from] CertificateError),

    /// The token is malformed, badly signed, or carries unacceptable claims
    #[error(transparent)]
    JwtVerifyError(#[from] JwtVerifyError),

    /// The token is not addressed to this client alone
    #[error("token audience is not exactly the client ID")]
    AudienceMismatch,

    /// The token has reached its expiry
    #[error("token has expired")]
    Expired,
}

/// Why a request was turned away
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Rejection {
    /// No credentials were sent
    #[error("No authorization header")]
    MissingAuthorization,

    /// Credentials were sent, but not as a bearer token
    #[error("Authorization header not using Bearer token")]
    NotBearer,

    /// A bearer token was sent, but it is not currently valid
    #[error("Access token invalid, expired, or revoked")]
    InvalidToken,
}

impl Rejection {
    /// The HTTP status for this rejection
    ///
    /// A `401` asks the caller to send credentials; a `403` tells the caller
    /// that the credentials it holds are no good and its session should be
    /// dropped.
    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingAuthorization | Self::NotBearer => StatusCode::UNAUTHORIZED,
            Self::InvalidToken => StatusCode::FORBIDDEN,
        }
    }

    /// A `www-authenticate` challenge describing this rejection
    pub fn challenge(self) -> HeaderValue {
        match self {
            Self::MissingAuthorization => HeaderValue::from_static("Bearer"),
            Self::NotBearer => HeaderValue::from_static(
                r#"Bearer error="invalid_request", error_description="Authorization header not using Bearer token""#,
            ),
            Self::InvalidToken => HeaderValue::from_static(
                r#"Bearer error="invalid_token", error_description="Access token invalid, expired, or revoked""#,
            ),
        }
    }
}

/// The outcome of verifying a request
#[derive(Clone, Debug)]
#[must_use]
pub enum Verification {
    /// The token is trusted
    Verified(ClaimSet),

    /// The request was rejected
    Rejected(Rejection),
}

impl Verification {
    /// The HTTP status for this outcome
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Verified(_) => StatusCode::OK,
            Self::Rejected(rejection) => rejection.status(),
        }
    }

    /// A human-readable reason for a rejection
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::Verified(_) => None,
            Self::Rejected(Rejection::MissingAuthorization) => Some("No authorization header"),
            Self::Rejected(Rejection::NotBearer) => {
                Some("Authorization header not using Bearer token")
            }
            Self::Rejected(Rejection::InvalidToken) => {
                Some("Access token invalid, expired, or revoked")
            }
        }
    }

    /// The verified claims, if the token is trusted
    pub fn claims(&self) -> Option<&ClaimSet> {
        match self {
            Self::Verified(claims) => Some(claims),
            Self::Rejected(_) => None,
        }
    }

    /// Whether the token is trusted
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    /// A `www-authenticate` challenge, for rejections
    pub fn challenge(&self) -> Option<HeaderValue> {
        match self {
            Self::Verified(_) => None,
            Self::Rejected(rejection) => Some(rejection.challenge()),
        }
    }

    /// Converts the outcome into a `Result`
    pub fn into_result(self) -> Result<ClaimSet, Rejection> {
        match self {
            Self::Verified(claims) => Ok(claims),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}

/// Verifies One Tap ID tokens issued to a single client
///
/// A token is trusted only when its signature checks out against a published
/// key, its issuer matches, its audience includes the client ID, and the
/// current time is strictly before its expiry.
#[derive(Clone, Debug)]
pub struct Verifier<C = System> {
    client_id: ClientId,
    issuer: jwt::Issuer,
    algorithms: Vec<jwa::Algorithm>,
    validator: jwt::CoreValidator,
    certificates: CertificateCache,
    clock: C,
}

impl Verifier {
    /// Constructs a verifier for Google-issued tokens with `RS256` signatures
    ///
    /// # Errors
    ///
    /// Returns an error if the client ID is blank.
    pub fn new(
        client_id: impl Into<ClientId>,
        certificates: CertificateCache,
    ) -> Result<Self, ConfigError> {
        let client_id = client_id.into();
        if client_id.as_str().trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }

        let mut verifier = Self {
            client_id,
            issuer: jwt::Issuer::from_static(crate::GOOGLE_ISSUER),
            algorithms: vec![jwa::Algorithm::RS256],
            validator: jwt::CoreValidator::default(),
            certificates,
            clock: System,
        };
        verifier.rebuild_validator();
        Ok(verifier)
    }
}

impl<C: Clock> Verifier<C> {
    /// Uses the given clock to judge expiry
    pub fn with_clock<D: Clock>(self, clock: D) -> Verifier<D> {
        Verifier {
            client_id: self.client_id,
            issuer: self.issuer,
            algorithms: self.algorithms,
            validator: self.validator,
            certificates: self.certificates,
            clock,
        }
    }

    /// Requires tokens to carry the given issuer
    pub fn with_issuer(mut self, issuer: jwt::Issuer) -> Self {
        self.issuer = issuer;
        self.rebuild_validator();
        self
    }

    /// Replaces the set of approved signing algorithms
    ///
    /// # Errors
    ///
    /// Returns an error if no algorithm is given.
    pub fn with_algorithms<I>(mut self, algorithms: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = jwa::Algorithm>,
    {
        self.algorithms = algorithms.into_iter().collect();
        if self.algorithms.is_empty() {
            return Err(ConfigError::NoApprovedAlgorithms);
        }
        self.rebuild_validator();
        Ok(self)
    }

    /// The client ID tokens must be issued to
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The cache of published signing keys
    pub fn certificates(&self) -> &CertificateCache {
        &self.certificates
    }

    fn rebuild_validator(&mut self) {
        // Expiry is checked separately so that a token is dead at its `exp` second.
        self.validator = jwt::CoreValidator::default()
            .ignore_expiration()
            .add_allowed_audience(self.client_id.as_audience())
            .require_issuer(self.issuer.clone())
            .extend_approved_algorithms(self.algorithms.iter().copied());
    }

    /// Verifies the bearer token carried by a request
    pub async fn verify<H>(&self, headers: &H) -> Verification
    where
        H: AuthorizationSource + ?Sized,
    {
        let authorization = match headers.authorization() {
            Some(authorization) if !authorization.trim().is_empty() => authorization,
            _ => {
                tracing::debug!("request has no authorization header");
                return Verification::Rejected(Rejection::MissingAuthorization);
            }
        };

        let token = match bearer_token(&authorization) {
            Some(token) => token,
            None => {
                tracing::debug!("authorization header is not a bearer token");
                return Verification::Rejected(Rejection::NotBearer);
            }
        };

        match self.verify_token(JwtRef::from_str(token)).await {
            Ok(claims) => {
                tracing::trace!(sub = %claims.sub(), "token verified");
                Verification::Verified(claims)
            }
            Err(err) => {
                let error: &dyn Error = &err;
                tracing::debug!(error, "token rejected");
                Verification::Rejected(Rejection::InvalidToken)
            }
        }
    }

    /// Verifies a bare token, reporting why it is not trusted
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key cannot be resolved, or if the
    /// token's signature, algorithm, issuer, audience, or expiry is
    /// unacceptable.
    pub async fn verify_token(&self, token: &JwtRef) -> Result<ClaimSet, VerifyError> {
        let decomposed: jwt::Decomposed = token.decompose()?;

        let key = {
            let kid = decomposed.kid().ok_or(VerifyError::MissingKeyId)?;
            match self.certificates.get_key(kid).await? {
                Some(key) => key,
                None => {
                    tracing::debug!(%kid, alg = %decomposed.alg(), "unable to find matching key");
                    return Err(VerifyError::UnknownKeyId(kid.to_owned()));
                }
            }
        };

        let validated: jwt::Validated<ClaimSet> = decomposed.verify(&key, &self.validator)?;
        let (_, claims) = validated.extract();

        {
            let mut audiences = claims.aud().iter();
            match (audiences.next(), audiences.next()) {
                (Some(aud), None) if aud.as_str() == self.client_id.as_str() => {}
                _ => return Err(VerifyError::AudienceMismatch),
            }
        }

        if !claims.is_live_with_clock(&self.clock) {
            return Err(VerifyError::Expired);
        }

        Ok(claims)
    }
}

/// Verifies a request against a one-off verifier for `client_id`
///
/// # Errors
///
/// Returns an error only if `client_id` is blank. A rejected request is an
/// `Ok` outcome.
pub async fn authenticate<H>(
    client_id: &str,
    headers: &H,
    certificates: &CertificateCache,
) -> Result<Verification, ConfigError>
where
    H: AuthorizationSource + ?Sized,
{
    let verifier = Verifier::new(ClientId::new(client_id.to_owned()), certificates.clone())?;
    Ok(verifier.verify(headers).await)
}
