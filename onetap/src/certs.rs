//! The provider's signing key set and a single-flight cache in front of it

use std::{
    collections::HashMap,
    error::Error,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use aliri::{
    jwk::{KeyId, KeyIdRef},
    Jwk, Jwks,
};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use thiserror::Error;

#[cfg(feature = "reqwest")]
mod remote;

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub use remote::RemoteCertificates;

/// An error while fetching the provider's key set
///
/// The error is cheap to clone so that every caller waiting on the same fetch
/// can receive it.
#[derive(Clone, Debug, Error)]
pub enum CertificateError {
    /// The key endpoint responded with a non-success status
    #[error("certificate endpoint responded with {status}")]
    Status {
        /// The status returned by the endpoint
        status: http::StatusCode,
    },

    /// The key endpoint could not be reached
    #[error("unable to reach certificate endpoint")]
    Transport(#[source] Arc<dyn Error + Send + Sync + 'static>),

    /// The key endpoint responded with something other than a key set
    #[error("certificate endpoint returned a malformed key set")]
    Malformed(#[source] Arc<dyn Error + Send + Sync + 'static>),
}

impl CertificateError {
    /// Wraps a transport-level failure
    pub fn transport(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(error))
    }

    /// Wraps a failure to interpret the response
    pub fn malformed(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Malformed(Arc::new(error))
    }
}

/// A source of the provider's full key set
#[async_trait]
pub trait CertificateSource: Send + Sync + 'static {
    /// Fetches the currently published key set
    async fn fetch(&self) -> Result<Jwks, CertificateError>;
}

#[async_trait]
impl<T: CertificateSource + ?Sized> CertificateSource for Arc<T> {
    async fn fetch(&self) -> Result<Jwks, CertificateError> {
        (**self).fetch().await
    }
}

/// A snapshot of the provider's published keys, indexed by key ID
///
/// Keys published without a key ID cannot be selected by a token and are
/// dropped.
#[derive(Clone, Debug, Default)]
pub struct CertificateSet {
    keys: HashMap<KeyId, Jwk>,
}

impl CertificateSet {
    /// Looks up a key by its ID
    pub fn get(&self, kid: &KeyIdRef) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    /// The number of addressable keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no addressable keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl From<Jwks> for CertificateSet {
    fn from(jwks: Jwks) -> Self {
        let mut keys = HashMap::with_capacity(jwks.keys().len());
        for jwk in jwks.keys() {
            match jwk.key_id() {
                Some(kid) => {
                    keys.insert(kid.to_owned(), jwk.clone());
                }
                None => tracing::debug!(
                    jwk.alg = ?jwk.algorithm(),
                    "ignoring published key without a key ID"
                ),
            }
        }
        Self { keys }
    }
}

type FetchResult = Result<Arc<CertificateSet>, CertificateError>;
type InFlight = Shared<BoxFuture<'static, FetchResult>>;

/// A memoizing, single-flight cache of the provider's key set
///
/// The first lookup triggers a fetch. Every lookup that arrives while that
/// fetch is outstanding awaits the same fetch, so a burst of requests produces
/// one outbound request. A successful fetch replaces the cached set in full. A
/// failed fetch clears the cache and is reported to every waiter; the next
/// lookup starts over.
///
/// Without a maximum age the set is served until [`invalidate`] is called.
///
/// Clones share the same cache.
///
/// [`invalidate`]: CertificateCache::invalidate
#[derive(Clone)]
pub struct CertificateCache {
    inner: Arc<Inner>,
}

struct Inner {
    source: Box<dyn CertificateSource>,
    max_age: Option<Duration>,
    current: ArcSwapOption<Loaded>,
    pending: Mutex<Pending>,
}

struct Loaded {
    set: Arc<CertificateSet>,
    fetched_at: Instant,
}

#[derive(Default)]
struct Pending {
    generation: u64,
    fetch: Option<InFlight>,
}

impl fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let keys = self.inner.current.load_full().map(|l| l.set.len());
        f.debug_struct("CertificateCache")
            .field("max_age", &self.inner.max_age)
            .field("keys", &keys)
            .finish()
    }
}

impl CertificateCache {
    /// Constructs an empty cache in front of `source`
    pub fn new(source: impl CertificateSource) -> Self {
        Self::with_max_age(source, None)
    }

    /// Constructs an empty cache that re-fetches once its set is older than
    /// `max_age`
    pub fn with_max_age(source: impl CertificateSource, max_age: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source: Box::new(source),
                max_age,
                current: ArcSwapOption::empty(),
                pending: Mutex::new(Pending::default()),
            }),
        }
    }

    /// Constructs a cache in front of Google's published signing keys
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn google() -> Result<Self, reqwest::Error> {
        Ok(Self::new(RemoteCertificates::google()?))
    }

    /// Resolves the key with the given ID
    ///
    /// An ID missing from a successfully fetched set is `Ok(None)`.
    pub async fn get_key(&self, kid: &KeyIdRef) -> Result<Option<Jwk>, CertificateError> {
        let set = self.certificates().await?;
        Ok(set.get(kid).cloned())
    }

    /// Gets the current key set, fetching it if necessary
    pub async fn certificates(&self) -> Result<Arc<CertificateSet>, CertificateError> {
        if let Some(set) = self.fresh() {
            return Ok(set);
        }

        let (generation, fetch) = {
            let mut pending = self.lock_pending();

            if let Some(set) = self.fresh() {
                return Ok(set);
            }

            match &pending.fetch {
                Some(fetch) => (pending.generation, fetch.clone()),
                None => {
                    pending.generation += 1;
                    let fetch = self.start_fetch();
                    pending.fetch = Some(fetch.clone());
                    (pending.generation, fetch)
                }
            }
        };

        let result = fetch.await;
        self.complete(generation, &result);
        result
    }

    /// Installs a key set directly, replacing whatever was cached
    pub fn set_certificates(&self, jwks: Jwks) {
        let mut pending = self.lock_pending();
        pending.generation += 1;
        pending.fetch = None;
        self.inner.current.store(Some(Arc::new(Loaded {
            set: Arc::new(CertificateSet::from(jwks)),
            fetched_at: Instant::now(),
        })));
    }

    /// Discards the cached set so that the next lookup fetches again
    ///
    /// A fetch already in flight is abandoned by the cache; its waiters still
    /// receive its result.
    pub fn invalidate(&self) {
        let mut pending = self.lock_pending();
        pending.generation += 1;
        pending.fetch = None;
        self.inner.current.store(None);
    }

    fn fresh(&self) -> Option<Arc<CertificateSet>> {
        let loaded = self.inner.current.load_full()?;
        match self.inner.max_age {
            Some(max_age) if loaded.fetched_at.elapsed() >= max_age => {
                tracing::debug!(
                    age = ?loaded.fetched_at.elapsed(),
                    "cached certificates are stale"
                );
                None
            }
            _ => Some(Arc::clone(&loaded.set)),
        }
    }

    fn start_fetch(&self) -> InFlight {
        let inner = Arc::clone(&self.inner);
        async move {
            match inner.source.fetch().await {
                Ok(jwks) => {
                    let set = CertificateSet::from(jwks);
                    tracing::info!(keys = set.len(), "certificates refreshed");
                    Ok(Arc::new(set))
                }
                Err(err) => {
                    let error: &dyn Error = &err;
                    tracing::warn!(error, "certificate fetch failed; cache cleared");
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    fn complete(&self, generation: u64, result: &FetchResult) {
        let mut pending = self.lock_pending();
        if pending.generation != generation || pending.fetch.is_none() {
            return;
        }

        pending.fetch = None;
        match result {
            Ok(set) => self.inner.current.store(Some(Arc::new(Loaded {
                set: Arc::clone(set),
                fetched_at: Instant::now(),
            }))),
            Err(_) => self.inner.current.store(None),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        // Every update is a single assignment; poisoning carries no meaning.
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
