//! Verifier configuration

use std::time::Duration;

use aliri::{jwa, jwt};
use serde::Deserialize;
use thiserror::Error;

use crate::{CertificateCache, ClientId, Verifier};

/// A misconfiguration detected at setup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No client ID was provided
    #[error("missing client ID")]
    MissingClientId,

    /// No signing algorithm was approved
    #[error("at least one signing algorithm must be approved")]
    NoApprovedAlgorithms,

    /// The HTTP client for the certificate endpoint could not be built
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    #[error("unable to construct certificate client")]
    CertificateClient(#[from] reqwest::Error),
}

/// Settings for a [`Verifier`]
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config: onetap::VerifierConfig = serde_json::from_str(r#"{
///     "clientId": "1234.apps.googleusercontent.com",
///     "maxAgeSecs": 3600
/// }"#)?;
///
/// assert_eq!(config.issuer.as_str(), onetap::GOOGLE_ISSUER);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierConfig {
    /// The client ID that tokens must be issued to
    pub client_id: ClientId,

    /// The issuer that tokens must carry
    #[serde(default = "default_issuer")]
    pub issuer: jwt::Issuer,

    /// The JWKS endpoint publishing the signing keys
    #[serde(default = "default_certs_url")]
    pub certs_url: String,

    /// The signing algorithms that will be accepted
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<jwa::Algorithm>,

    /// Re-fetch the key set once it is older than this many seconds
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl VerifierConfig {
    /// Default settings for the given client
    pub fn new(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            issuer: default_issuer(),
            certs_url: default_certs_url(),
            algorithms: default_algorithms(),
            max_age_secs: None,
        }
    }

    /// Checks the settings for values that can never verify a token
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.as_str().trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }

        if self.algorithms.is_empty() {
            return Err(ConfigError::NoApprovedAlgorithms);
        }

        Ok(())
    }

    /// The configured maximum age of the key set
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    /// Builds a verifier backed by the configured certificate endpoint
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn build(&self) -> Result<Verifier, ConfigError> {
        self.validate()?;
        let source = crate::certs::RemoteCertificates::new(self.certs_url.clone())?;
        let certificates = CertificateCache::with_max_age(source, self.max_age());
        self.build_with(certificates)
    }

    /// Builds a verifier backed by an existing certificate cache
    pub fn build_with(&self, certificates: CertificateCache) -> Result<Verifier, ConfigError> {
        self.validate()?;
        Ok(Verifier::new(self.client_id.clone(), certificates)?
            .with_issuer(self.issuer.clone())
            .with_algorithms(self.algorithms.iter().copied())?)
    }
}

fn default_issuer() -> jwt::Issuer {
    jwt::Issuer::from_static(crate::GOOGLE_ISSUER)
}

fn default_certs_url() -> String {
    crate::GOOGLE_CERTS_URL.to_owned()
}

fn default_algorithms() -> Vec<jwa::Algorithm> {
    vec![jwa::Algorithm::RS256]
}
