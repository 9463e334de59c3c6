use std::error::Error;

use aliri::Jwks;
use async_trait::async_trait;
use reqwest::Client;

use super::{CertificateError, CertificateSource};

/// Fetches the key set from a JWKS endpoint over HTTP
#[derive(Clone, Debug)]
pub struct RemoteCertificates {
    client: Client,
    url: String,
}

impl RemoteCertificates {
    /// Constructs a source for the key set published at `url`
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("onetap/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(client, url))
    }

    /// Constructs a source using an existing client
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Constructs a source for Google's ID token signing keys
    pub fn google() -> Result<Self, reqwest::Error> {
        Self::new(crate::GOOGLE_CERTS_URL)
    }

    /// The endpoint this source fetches from
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CertificateSource for RemoteCertificates {
    #[tracing::instrument(skip(self), fields(jwks.url = %self.url))]
    async fn fetch(&self) -> Result<Jwks, CertificateError> {
        tracing::debug!("fetching certificates");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(CertificateError::transport)?;

        if let Err(err) = response.error_for_status_ref() {
            let error: &dyn Error = &err;
            tracing::warn!(
                error,
                http.status_code = response.status().as_u16(),
                "certificate fetch failed; unexpected response status",
            );
            return Err(CertificateError::Status {
                status: response.status(),
            });
        }

        response.json::<Jwks>().await.map_err(|err| {
            let error: &dyn Error = &err;
            tracing::warn!(error, "certificate fetch failed; unexpected body");
            CertificateError::malformed(err)
        })
    }
}
