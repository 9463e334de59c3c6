//! Persistence of the current credential and cross-tab change notification
//!
//! An [`Origin`] models everything that shares one storage area: the storage
//! backend itself and a broadcast channel standing in for the browser's
//! `storage` event. Each [`Tab`] opened on the origin is a separate execution
//! context. A write through a [`SessionStore`] persists the value and then
//! publishes it once; subscribers in other tabs see it as a storage change and
//! subscribers in the writing tab see it as a self-notification, so every
//! observer converges on the same value.

use std::{
    collections::HashMap,
    error::Error,
    fmt, io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use thiserror::Error;
use tokio::sync::broadcast;

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// The key under which the credential is persisted unless configured otherwise
pub const DEFAULT_STORAGE_KEY: &str = "google-one-tap-token";

const EVENT_CAPACITY: usize = 64;

/// An error from a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key cannot be represented by this backend
    #[error("storage key {0:?} is not supported by this backend")]
    InvalidKey(String),

    /// The backend failed to read or write
    #[error("storage I/O failed")]
    Io(#[from] io::Error),
}

/// A string key/value storage area shared by every tab of an origin
pub trait Storage: fmt::Debug + Send + Sync + 'static {
    /// Reads the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes any value stored under `key`
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Identifies the tab a change originated in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TabId(u64);

/// A change published to every tab of an origin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
    /// The key that changed
    pub key: String,
    /// The new value, or `None` if cleared
    pub new_value: Option<String>,
    /// The tab that made the change
    pub source: TabId,
}

/// How a change reached a subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeSource {
    /// Written by the subscriber's own tab
    SameTab,
    /// Written by another tab of the same origin
    OtherTab,
}

/// A change observed by a [`Subscription`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// The new value, or `None` if cleared
    pub value: Option<String>,
    /// Where the change came from
    pub source: ChangeSource,
}

/// A storage area and its change channel
///
/// Clones refer to the same origin.
#[derive(Clone)]
pub struct Origin {
    inner: Arc<OriginInner>,
}

struct OriginInner {
    storage: Option<Box<dyn Storage>>,
    events: broadcast::Sender<StorageEvent>,
    next_tab: AtomicU64,
    published: Mutex<HashMap<String, String>>,
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Origin")
            .field("storage", &self.inner.storage)
            .field("subscribers", &self.inner.events.receiver_count())
            .finish()
    }
}

impl Origin {
    /// Constructs an origin backed by `storage`
    pub fn new(storage: impl Storage) -> Self {
        Self::with_storage(Some(Box::new(storage)))
    }

    /// Constructs an origin backed by process memory
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::default())
    }

    /// Constructs an origin with no persistent storage
    ///
    /// Reads always come back empty and writes are discarded, but changes are
    /// still published to subscribers. A subscriber that falls behind recovers
    /// the most recently published value.
    pub fn unavailable() -> Self {
        Self::with_storage(None)
    }

    fn with_storage(storage: Option<Box<dyn Storage>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(OriginInner {
                storage,
                events,
                next_tab: AtomicU64::new(1),
                published: Mutex::default(),
            }),
        }
    }

    /// Opens a new execution context on this origin
    pub fn open_tab(&self) -> Tab {
        let id = TabId(self.inner.next_tab.fetch_add(1, Ordering::Relaxed));
        Tab {
            origin: self.clone(),
            id,
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        let storage = self.inner.storage.as_ref()?;
        match storage.get(key) {
            Ok(value) => value,
            Err(err) => {
                let error: &dyn Error = &err;
                tracing::warn!(key, error, "unable to read from storage");
                None
            }
        }
    }

    fn recover(&self, key: &str) -> Option<String> {
        match &self.inner.storage {
            Some(_) => self.read(key),
            None => self.published().get(key).cloned(),
        }
    }

    fn published(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.inner
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, key: &str, value: Option<&str>) {
        let storage = match &self.inner.storage {
            Some(storage) => storage,
            None => {
                let mut published = self.published();
                match value {
                    Some(value) => published.insert(key.to_owned(), value.to_owned()),
                    None => published.remove(key),
                };
                return;
            }
        };

        let result = match value {
            Some(value) => storage.set(key, value),
            None => storage.remove(key),
        };

        if let Err(err) = result {
            let error: &dyn Error = &err;
            tracing::warn!(key, error, "unable to write to storage");
        }
    }
}

/// One execution context on an [`Origin`], such as a browser tab
#[derive(Clone, Debug)]
pub struct Tab {
    origin: Origin,
    id: TabId,
}

impl Tab {
    /// This tab's identifier
    pub fn id(&self) -> TabId {
        self.id
    }

    /// The origin this tab belongs to
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// A store for the value under `key`, as seen from this tab
    pub fn store(&self, key: impl Into<String>) -> SessionStore {
        SessionStore {
            tab: self.clone(),
            key: key.into(),
        }
    }
}

/// A single named slot holding the raw credential
#[derive(Clone, Debug)]
pub struct SessionStore {
    tab: Tab,
    key: String,
}

impl SessionStore {
    /// The storage key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The tab this store writes from
    pub fn tab(&self) -> &Tab {
        &self.tab
    }

    /// Reads the persisted value
    pub fn read(&self) -> Option<String> {
        self.tab.origin.read(&self.key)
    }

    /// Persists `value`, or clears the slot if `None`, and notifies every tab
    pub fn write(&self, value: Option<&str>) {
        self.tab.origin.persist(&self.key, value);

        let event = StorageEvent {
            key: self.key.clone(),
            new_value: value.map(ToOwned::to_owned),
            source: self.tab.id,
        };

        let receivers = self.tab.origin.inner.events.send(event).unwrap_or(0);
        tracing::trace!(
            key = %self.key,
            cleared = value.is_none(),
            receivers,
            "session value written"
        );
    }

    /// Subscribes to changes of this slot from any tab
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            events: self.tab.origin.inner.events.subscribe(),
            store: self.clone(),
        }
    }
}

/// A stream of changes to one slot
#[derive(Debug)]
pub struct Subscription {
    events: broadcast::Receiver<StorageEvent>,
    store: SessionStore,
}

impl Subscription {
    /// Waits for the next change to the slot
    ///
    /// A subscriber that falls too far behind skips the missed events and
    /// observes the currently stored value instead. Returns `None` only once
    /// the origin can publish no more changes.
    pub async fn changed(&mut self) -> Option<Change> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.key == self.store.key => {
                    let source = if event.source == self.store.tab.id {
                        ChangeSource::SameTab
                    } else {
                        ChangeSource::OtherTab
                    };
                    return Some(Change {
                        value: event.new_value,
                        source,
                    });
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(
                        missed,
                        key = %self.store.key,
                        "session subscriber lagged; recovering the current value"
                    );
                    return Some(Change {
                        value: self.store.tab.origin.recover(&self.store.key),
                        source: ChangeSource::OtherTab,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::Result;

    #[derive(Debug)]
    struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied").into())
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn storage_failures_are_logged_and_still_published() {
        let store = Origin::new(BrokenStorage).open_tab().store(DEFAULT_STORAGE_KEY);
        let mut subscription = store.subscribe();

        store.write(Some("a.b.c"));
        assert_eq!(store.read(), None);
        assert!(logs_contain("unable to write to storage"));
        assert!(logs_contain("unable to read from storage"));

        let change = subscription.changed().await;
        assert_eq!(change.and_then(|c| c.value).as_deref(), Some("a.b.c"));
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = Origin::in_memory().open_tab().store(DEFAULT_STORAGE_KEY);

        assert_eq!(store.read(), None);
        store.write(Some("a.b.c"));
        assert_eq!(store.read().as_deref(), Some("a.b.c"));
        store.write(None);
        assert_eq!(store.read(), None);
    }

    #[test]
    fn unavailable_storage_reads_nothing() {
        let store = Origin::unavailable().open_tab().store(DEFAULT_STORAGE_KEY);
        store.write(Some("a.b.c"));
        assert_eq!(store.read(), None);
    }

    #[tokio::test]
    async fn writes_reach_every_tab() -> Result<()> {
        let origin = Origin::in_memory();
        let writer = origin.open_tab().store(DEFAULT_STORAGE_KEY);
        let other = origin.open_tab().store(DEFAULT_STORAGE_KEY);

        let mut same_tab = writer.subscribe();
        let mut other_tab = other.subscribe();

        writer.write(Some("token"));

        assert_eq!(
            same_tab.changed().await,
            Some(Change {
                value: Some("token".to_owned()),
                source: ChangeSource::SameTab,
            })
        );
        assert_eq!(
            other_tab.changed().await,
            Some(Change {
                value: Some("token".to_owned()),
                source: ChangeSource::OtherTab,
            })
        );
        assert_eq!(other.read().as_deref(), Some("token"));
        Ok(())
    }

    #[tokio::test]
    async fn other_keys_are_ignored() {
        let tab = Origin::in_memory().open_tab();
        let store = tab.store("a");
        let unrelated = tab.store("b");
        let mut subscription = store.subscribe();

        unrelated.write(Some("ignored"));
        store.write(None);

        assert_eq!(subscription.changed().await.map(|c| c.value), Some(None));
    }

    #[tokio::test]
    async fn lagging_subscriber_without_storage_keeps_the_last_value() {
        let store = Origin::unavailable().open_tab().store(DEFAULT_STORAGE_KEY);
        let mut subscription = store.subscribe();

        for i in 0..(EVENT_CAPACITY + 8) {
            store.write(Some(&format!("token-{i}")));
        }

        let change = subscription.changed().await;
        assert_eq!(
            change.and_then(|c| c.value),
            Some(format!("token-{}", EVENT_CAPACITY + 7))
        );
        assert_eq!(store.read(), None);
    }

    #[tokio::test]
    async fn lagging_subscriber_rereads_storage() {
        let store = Origin::in_memory().open_tab().store(DEFAULT_STORAGE_KEY);
        let mut subscription = store.subscribe();

        for i in 0..(EVENT_CAPACITY + 8) {
            store.write(Some(&format!("token-{i}")));
        }

        let change = subscription.changed().await;
        assert_eq!(
            change.and_then(|c| c.value),
            Some(format!("token-{}", EVENT_CAPACITY + 7))
        );
    }
}
