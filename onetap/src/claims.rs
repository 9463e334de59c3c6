//! The claims carried by a One Tap ID token

use aliri::jwt::{Audiences, CoreClaims, Issuer, IssuerRef, Subject, SubjectRef};
use aliri_clock::{Clock, UnixTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{ClientId, ClientIdRef};

/// The decoded payload of an ID token
///
/// The subject, audience, issuer, issue time, and expiry are required; a
/// payload missing any of them does not decode. The profile fields are
/// informational and carry no security weight.
///
/// Holding a `ClaimSet` says nothing about whether it can be trusted. Only a
/// claim set returned by [`Verifier`][crate::Verifier] has had its signature,
/// issuer, audience, and expiry checked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    sub: Subject,
    aud: Audiences,
    iss: Issuer,
    iat: UnixTime,
    exp: UnixTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<UnixTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    azp: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(
        default,
        deserialize_with = "bool_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    picture: Option<String>,
}

impl ClaimSet {
    /// Constructs a claim set with the required claims and no profile
    pub fn new(
        sub: impl Into<Subject>,
        aud: impl Into<Audiences>,
        iss: impl Into<Issuer>,
        iat: UnixTime,
        exp: UnixTime,
    ) -> Self {
        Self {
            sub: sub.into(),
            aud: aud.into(),
            iss: iss.into(),
            iat,
            exp,
            nbf: None,
            azp: None,
            jti: None,
            email: None,
            email_verified: None,
            hd: None,
            name: None,
            given_name: None,
            family_name: None,
            picture: None,
        }
    }

    /// The stable identifier of the authenticated principal
    pub fn sub(&self) -> &SubjectRef {
        &self.sub
    }

    /// The audiences the token was issued to
    pub fn aud(&self) -> &Audiences {
        &self.aud
    }

    /// The issuer of the token
    pub fn iss(&self) -> &IssuerRef {
        &self.iss
    }

    /// When the token was issued
    pub fn issued_at(&self) -> UnixTime {
        self.iat
    }

    /// When the token stops being valid
    pub fn expires_at(&self) -> UnixTime {
        self.exp
    }

    /// The client that requested the token, if different from the audience
    pub fn authorized_party(&self) -> Option<&ClientIdRef> {
        self.azp.as_deref()
    }

    /// The user's email address
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Whether the provider has verified the user's email address
    ///
    /// An absent claim is treated as unverified.
    pub fn is_email_verified(&self) -> bool {
        self.email_verified.unwrap_or(false)
    }

    /// The hosted domain of a Google Workspace account
    pub fn hosted_domain(&self) -> Option<&str> {
        self.hd.as_deref()
    }

    /// The user's full display name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The user's given name
    pub fn given_name(&self) -> Option<&str> {
        self.given_name.as_deref()
    }

    /// The user's family name
    pub fn family_name(&self) -> Option<&str> {
        self.family_name.as_deref()
    }

    /// A URL for the user's profile picture
    pub fn picture(&self) -> Option<&str> {
        self.picture.as_deref()
    }

    /// Whether the token is still live at the given time
    ///
    /// A token is live strictly before its expiry; at the expiry second it is
    /// already dead.
    pub fn is_live_at(&self, now: UnixTime) -> bool {
        now < self.exp
    }

    /// Whether the token is still live according to `clock`
    pub fn is_live_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_live_at(clock.now())
    }

    /// Seconds remaining until expiry, or zero if already expired
    pub fn remaining_secs_at(&self, now: UnixTime) -> u64 {
        self.exp.0.saturating_sub(now.0)
    }

    /// Sets the not-before time
    pub fn with_not_before(mut self, nbf: UnixTime) -> Self {
        self.nbf = Some(nbf);
        self
    }

    /// Sets the authorized party
    pub fn with_authorized_party(mut self, azp: impl Into<ClientId>) -> Self {
        self.azp = Some(azp.into());
        self
    }

    /// Sets the token's unique identifier
    pub fn with_token_id(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    /// Sets the email address and whether it has been verified
    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = Some(verified);
        self
    }

    /// Sets the hosted domain
    pub fn with_hosted_domain(mut self, hd: impl Into<String>) -> Self {
        self.hd = Some(hd.into());
        self
    }

    /// Sets the display name fields
    pub fn with_name(
        mut self,
        name: impl Into<String>,
        given_name: impl Into<String>,
        family_name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self.given_name = Some(given_name.into());
        self.family_name = Some(family_name.into());
        self
    }

    /// Sets the profile picture URL
    pub fn with_picture(mut self, picture: impl Into<String>) -> Self {
        self.picture = Some(picture.into());
        self
    }
}

impl CoreClaims for ClaimSet {
    fn nbf(&self) -> Option<UnixTime> {
        self.nbf
    }

    fn exp(&self) -> Option<UnixTime> {
        Some(self.exp)
    }

    fn aud(&self) -> &Audiences {
        &self.aud
    }

    fn iss(&self) -> Option<&IssuerRef> {
        Some(&*self.iss)
    }

    fn sub(&self) -> Option<&SubjectRef> {
        Some(&*self.sub)
    }
}

/// Google has historically sent `email_verified` as both `true` and `"true"`
fn bool_or_string<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Option::<Flag>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Flag::Bool(b)) => Ok(Some(b)),
        Some(Flag::Text(s)) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(Flag::Text(s)) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(Flag::Text(s)) => Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Str(&s),
            &"a boolean",
        )),
    }
}
