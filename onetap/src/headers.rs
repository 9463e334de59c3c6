//! Reading the `Authorization` header from different host request types

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fmt,
    hash::BuildHasher,
};

/// Anything that can produce the value of a request's `Authorization` header
pub trait AuthorizationSource {
    /// The raw header value, if present
    ///
    /// A blank value is treated the same as a missing header.
    fn authorization(&self) -> Option<Cow<'_, str>>;
}

impl<T: AuthorizationSource + ?Sized> AuthorizationSource for &'_ T {
    fn authorization(&self) -> Option<Cow<'_, str>> {
        (**self).authorization()
    }
}

impl AuthorizationSource for http::HeaderMap {
    fn authorization(&self) -> Option<Cow<'_, str>> {
        let value = self.get(http::header::AUTHORIZATION)?;
        Some(String::from_utf8_lossy(value.as_bytes()))
    }
}

impl<B> AuthorizationSource for http::Request<B> {
    fn authorization(&self) -> Option<Cow<'_, str>> {
        self.headers().authorization()
    }
}

fn find_in<'a, I>(entries: I) -> Option<Cow<'a, str>>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    entries
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| Cow::Borrowed(value.as_str()))
}

impl<S: BuildHasher> AuthorizationSource for HashMap<String, String, S> {
    fn authorization(&self) -> Option<Cow<'_, str>> {
        match self.get("authorization") {
            Some(value) => Some(Cow::Borrowed(value)),
            None => find_in(self),
        }
    }
}

impl AuthorizationSource for BTreeMap<String, String> {
    fn authorization(&self) -> Option<Cow<'_, str>> {
        match self.get("authorization") {
            Some(value) => Some(Cow::Borrowed(value)),
            None => find_in(self),
        }
    }
}

/// Adapts a `get(name)` style lookup into an [`AuthorizationSource`]
///
/// ```
/// use onetap::{headers::GetHeader, AuthorizationSource};
///
/// let headers = GetHeader(|name: &str| {
///     (name == "authorization").then(|| "Bearer abc".to_owned())
/// });
/// assert_eq!(headers.authorization().as_deref(), Some("Bearer abc"));
/// ```
pub struct GetHeader<F>(pub F);

impl<F> fmt::Debug for GetHeader<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("GetHeader")
    }
}

impl<F> AuthorizationSource for GetHeader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn authorization(&self) -> Option<Cow<'_, str>> {
        (self.0)("authorization").map(Cow::Owned)
    }
}

/// Extracts the token from a `Bearer` authorization value
///
/// The scheme is matched without regard to case and surrounding whitespace is
/// trimmed from the token. A blank token is no token.
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let authorization = authorization.trim_start();
    let scheme = authorization.get(..7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }

    let token = authorization[7..].trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
