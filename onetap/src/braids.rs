use aliri::jwt;
use aliri_braid::braid;

/// An OAuth2 client ID issued by the identity provider
///
/// One Tap tokens carry the client ID of the relying application as their
/// audience.
#[braid(serde)]
pub struct ClientId;

impl ClientIdRef {
    /// The audience that tokens issued to this client must carry
    pub fn as_audience(&self) -> jwt::Audience {
        jwt::Audience::new(self.as_str().to_owned())
    }
}
