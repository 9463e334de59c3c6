use onetap::{ClientId, ConfigError};
use serde::Deserialize;

use crate::{
    store::DEFAULT_STORAGE_KEY,
    widget::{ButtonOptions, ButtonSize, Context},
    LeadTime,
};

/// Settings for [`OneTap`][crate::OneTap]
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options: onetap_session::OneTapOptions = serde_json::from_str(r#"{
///     "clientId": "1234.apps.googleusercontent.com",
///     "reauthenticate": "2m",
///     "fallback": { "buttonId": "sign-in", "size": "medium" }
/// }"#)?;
///
/// assert!(options.automatic);
/// assert!(options.auto_select());
/// assert_eq!(options.reauthenticate.as_millis(), 120_000);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTapOptions {
    /// The application's client ID
    pub client_id: ClientId,

    /// Prompt whenever no one is signed in
    #[serde(default = "default_automatic")]
    pub automatic: bool,

    /// Sign a returning user in without interaction
    ///
    /// Follows `automatic` when unset.
    #[serde(default)]
    pub auto_select: Option<bool>,

    /// The flow the prompt is presented for
    #[serde(default)]
    pub context: Context,

    /// A button to render when the prompt is unavailable
    #[serde(default)]
    pub fallback: Option<Fallback>,

    /// How long before expiry to prompt for re-authentication
    #[serde(default)]
    pub reauthenticate: LeadTime,

    /// The storage key holding the credential
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

/// A sign-in button rendered in place of the prompt
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fallback {
    /// The ID of the element to render into
    pub button_id: String,

    /// The button size
    #[serde(default)]
    pub size: ButtonSize,
}

impl Fallback {
    pub(crate) fn button_options(&self) -> ButtonOptions {
        ButtonOptions { size: self.size }
    }
}

impl OneTapOptions {
    /// Default settings for the given client
    pub fn new(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            automatic: default_automatic(),
            auto_select: None,
            context: Context::default(),
            fallback: None,
            reauthenticate: LeadTime::default(),
            storage_key: default_storage_key(),
        }
    }

    /// Whether a returning user is signed in without interaction
    pub fn auto_select(&self) -> bool {
        self.auto_select.unwrap_or(self.automatic)
    }

    /// Checks for settings that can never sign anyone in
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.as_str().trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        Ok(())
    }
}

fn default_automatic() -> bool {
    true
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_owned()
}
