use aliri::{
    jwa,
    jwk::KeyId,
    jwt::{self, BasicHeaders},
    Jwk, Jwks, Jwt,
};
use aliri_base64::Base64Url;
use aliri_clock::UnixTime;

use async_trait::async_trait;

use crate::{CertificateCache, CertificateError, CertificateSource, ClaimSet, GOOGLE_ISSUER};

pub(crate) const KEY_ID: &str = "test-key";
pub(crate) const CLIENT_ID: &str = "1234.apps.googleusercontent.com";

pub(crate) fn key_with_id(kid: &'static str, secret: &'static [u8]) -> Jwk {
    Jwk::from(jwa::Hmac::new(Base64Url::from_raw(secret.to_vec())))
        .with_algorithm(jwa::Algorithm::HS256)
        .with_key_id(KeyId::from_static(kid))
}

pub(crate) fn key() -> Jwk {
    key_with_id(KEY_ID, b"one tap test signing secret")
}

pub(crate) fn jwks() -> Jwks {
    let mut jwks = Jwks::default();
    jwks.add_key(key());
    jwks
}

pub(crate) fn claims(iat: UnixTime, exp: UnixTime) -> ClaimSet {
    ClaimSet::new(
        jwt::Subject::from_static("110169484474386276334"),
        jwt::Audience::from_static(CLIENT_ID),
        jwt::Issuer::from_static(GOOGLE_ISSUER),
        iat,
        exp,
    )
    .with_email("jane@example.com", true)
    .with_name("Jane Doe", "Jane", "Doe")
}

pub(crate) fn sign(claims: &ClaimSet) -> Jwt {
    sign_with(claims, &key())
}

pub(crate) fn sign_with(claims: &ClaimSet, key: &Jwk) -> Jwt {
    let kid = key.key_id().map(ToOwned::to_owned).unwrap_or_else(|| KeyId::from_static(KEY_ID));
    let headers = BasicHeaders::with_key_id(jwa::Algorithm::HS256, kid);
    Jwt::try_from_parts_with_signature(&headers, claims, key).expect("test token signs")
}

#[derive(Debug)]
pub(crate) struct Unreachable;

#[async_trait]
impl CertificateSource for Unreachable {
    async fn fetch(&self) -> Result<Jwks, CertificateError> {
        Err(CertificateError::Status {
            status: http::StatusCode::SERVICE_UNAVAILABLE,
        })
    }
}

/// A cache primed with the test key that cannot fetch on its own
pub(crate) fn cache() -> CertificateCache {
    let cache = CertificateCache::new(Unreachable);
    cache.set_certificates(jwks());
    cache
}
