//! The expiry-driven session lifecycle

use std::{
    fmt, future,
    sync::Arc,
    time::{Duration, SystemTime},
};

use aliri_clock::{Clock, System, TestClock, UnixTime};
use onetap::ClaimSet;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant},
};

use crate::{
    session::Controls,
    store::{Change, ChangeSource, Subscription},
    LeadTime, Session, SessionState, SessionStore,
};

/// The capabilities of whatever owns the identity widget
pub trait IdentityHooks: Send + Sync + 'static {
    /// Asks the user to re-authenticate before the session expires
    ///
    /// A successful re-authentication is expected to arrive later as a new
    /// credential written to the store.
    fn reauthenticate(&self);

    /// Notifies that the user explicitly signed out of the given session
    fn signed_out(&self, claims: &ClaimSet) {
        let _ = claims;
    }
}

impl<T: IdentityHooks + ?Sized> IdentityHooks for Arc<T> {
    fn reauthenticate(&self) {
        (**self).reauthenticate()
    }

    fn signed_out(&self, claims: &ClaimSet) {
        (**self).signed_out(claims)
    }
}

/// Hooks that do nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl IdentityHooks for NoHooks {
    fn reauthenticate(&self) {
        tracing::debug!("re-authentication requested, but no identity widget is attached");
    }
}

/// A clock that can also report the time within the current second
///
/// Session expiry is stated in whole seconds, but the sign-out timer is armed
/// against the precise time so that it fires at the start of the expiry
/// second rather than up to a second into it.
pub trait PreciseClock: Clock {
    /// The time elapsed since the Unix epoch
    fn since_epoch(&self) -> Duration {
        Duration::from_secs(self.now().0)
    }
}

impl PreciseClock for System {
    fn since_epoch(&self) -> Duration {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
    }
}

impl PreciseClock for TestClock {}

/// Configures and starts the lifecycle of a session
pub struct SessionController<C = System> {
    store: SessionStore,
    lead_time: LeadTime,
    hooks: Arc<dyn IdentityHooks>,
    clock: C,
}

impl<C: fmt::Debug> fmt::Debug for SessionController<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("store", &self.store)
            .field("lead_time", &self.lead_time)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// A controller for the credential held in `store`
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            lead_time: LeadTime::default(),
            hooks: Arc::new(NoHooks),
            clock: System,
        }
    }
}

impl<C> SessionController<C>
where
    C: PreciseClock + Send + Sync + 'static,
{
    /// How long before expiry to ask for re-authentication
    pub fn with_lead_time(mut self, lead_time: LeadTime) -> Self {
        self.lead_time = lead_time;
        self
    }

    /// The identity widget capabilities to call on
    pub fn with_hooks(mut self, hooks: impl IdentityHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// The clock used to judge expiry
    pub fn with_clock<D>(self, clock: D) -> SessionController<D>
    where
        D: PreciseClock + Send + Sync + 'static,
    {
        SessionController {
            store: self.store,
            lead_time: self.lead_time,
            hooks: self.hooks,
            clock,
        }
    }

    /// Derives the initial state and starts tracking changes in the background
    ///
    /// The returned handle reflects the persisted credential immediately.
    /// Dropping the handle stops the lifecycle and cancels its timers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self) -> SessionHandle {
        let subscription = self.store.subscribe();
        let (tx, _) = watch::channel(SessionState::signed_out());

        let mut lifecycle = Lifecycle {
            store: self.store.clone(),
            subscription,
            state: tx,
            lead_time: self.lead_time,
            hooks: Arc::clone(&self.hooks),
            clock: self.clock,
            current: None,
            timers: Timers::default(),
        };

        lifecycle.transition(self.store.read());
        let rx = lifecycle.state.subscribe();

        let task = tokio::spawn(lifecycle.run());

        SessionHandle {
            controls: Controls {
                store: self.store,
                hooks: self.hooks,
                state: rx.clone(),
            },
            state: rx,
            task,
        }
    }
}

/// A running session lifecycle
pub struct SessionHandle {
    controls: Controls,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &*self.state.borrow())
            .field("store", &self.controls.store)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// The current session state
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A snapshot of the session for request and rendering code
    pub fn session(&self) -> Session {
        Session::new(self.state(), self.controls.clone())
    }

    /// A receiver that observes every state transition
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits for the next state transition
    pub async fn changed(&mut self) -> SessionState {
        if self.state.changed().await.is_err() {
            tracing::trace!("session lifecycle has stopped");
        }
        self.state.borrow_and_update().clone()
    }

    /// Delivers a new credential, as the identity widget does after sign-in
    pub fn set_credential(&self, credential: &str) {
        self.controls.store.write(Some(credential));
    }

    /// Clears the credential in every tab and tells the identity widget
    ///
    /// Returns `false` if no one was signed in.
    pub fn sign_out(&self) -> bool {
        self.controls.sign_out()
    }

    /// The store holding the credential
    pub fn store(&self) -> &SessionStore {
        &self.controls.store
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Timers {
    sign_out: Option<Instant>,
    reauthenticate: Option<Instant>,
}

impl Timers {
    fn arm(claims: &ClaimSet, lead_time: LeadTime, since_epoch: Duration) -> Self {
        let start = Instant::now();
        let remaining = Duration::from_secs(claims.expires_at().0).saturating_sub(since_epoch);

        let reauthenticate = lead_time
            .duration()
            .and_then(|lead| remaining.checked_sub(lead))
            .map(|delay| start + delay);

        Self {
            sign_out: Some(start + remaining),
            reauthenticate,
        }
    }
}

async fn at(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

struct Lifecycle<C> {
    store: SessionStore,
    subscription: Subscription,
    state: watch::Sender<SessionState>,
    lead_time: LeadTime,
    hooks: Arc<dyn IdentityHooks>,
    clock: C,
    current: Option<String>,
    timers: Timers,
}

impl<C: PreciseClock> Lifecycle<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                change = self.subscription.changed() => match change {
                    Some(change) => self.changed(change),
                    None => break,
                },
                () = at(self.timers.sign_out) => self.expired(),
                () = at(self.timers.reauthenticate) => self.reauthenticate(),
            }
        }

        tracing::debug!(key = self.store.key(), "session lifecycle stopped");
    }

    fn changed(&mut self, change: Change) {
        if change.value == self.current {
            tracing::trace!(?change.source, "credential unchanged");
            return;
        }

        if change.source == ChangeSource::OtherTab {
            tracing::debug!("credential changed in another tab");
        }

        self.transition(change.value);
    }

    fn expired(&mut self) {
        tracing::info!("session expired; signing out");
        self.transition(None);
        self.store.write(None);
    }

    fn reauthenticate(&mut self) {
        self.timers.reauthenticate = None;
        tracing::debug!("session nearing expiry; requesting re-authentication");
        self.hooks.reauthenticate();
    }

    fn transition(&mut self, raw: Option<String>) {
        self.timers = Timers::default();

        let since_epoch = self.clock.since_epoch();
        let now = UnixTime(since_epoch.as_secs());
        let state = SessionState::derive_at(raw.as_deref(), now);

        match state.claims() {
            Some(claims) => {
                self.timers = Timers::arm(claims, self.lead_time, since_epoch);
                tracing::debug!(
                    sub = %claims.sub(),
                    exp = claims.expires_at().0,
                    reauthenticate = self.timers.reauthenticate.is_some(),
                    "signed in"
                );
                self.current = raw;
            }
            None if raw.is_some() => {
                tracing::debug!("discarding expired or malformed credential");
                self.current = None;
                self.store.write(None);
            }
            None => {
                tracing::debug!("signed out");
                self.current = None;
            }
        }

        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        store::{Origin, DEFAULT_STORAGE_KEY},
        test_support::{self, SharedClock},
    };

    const START: UnixTime = UnixTime(1_700_000_000);

    #[derive(Debug, Default)]
    struct Recorder {
        reauthentications: Mutex<Vec<Instant>>,
        sign_outs: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn reauthentications(&self) -> Vec<Instant> {
            self.reauthentications.lock().unwrap().clone()
        }

        fn sign_outs(&self) -> Vec<String> {
            self.sign_outs.lock().unwrap().clone()
        }
    }

    impl IdentityHooks for Recorder {
        fn reauthenticate(&self) {
            self.reauthentications.lock().unwrap().push(Instant::now());
        }

        fn signed_out(&self, claims: &ClaimSet) {
            self.sign_outs
                .lock()
                .unwrap()
                .push(claims.sub().as_str().to_owned());
        }
    }

    struct Fixture {
        clock: SharedClock,
        store: SessionStore,
        hooks: Arc<Recorder>,
        started: Instant,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clock: SharedClock::new(START),
                store: Origin::in_memory().open_tab().store(DEFAULT_STORAGE_KEY),
                hooks: Arc::new(Recorder::default()),
                started: Instant::now(),
            }
        }

        fn token_expiring_in(&self, secs: u64) -> String {
            test_support::token("alice", UnixTime(self.clock.now().0 + secs))
        }

        fn spawn(&self, lead_time: LeadTime) -> SessionHandle {
            SessionController::new(self.store.clone())
                .with_lead_time(lead_time)
                .with_hooks(Arc::clone(&self.hooks))
                .with_clock(self.clock.clone())
                .spawn()
        }

        async fn elapse(&self, secs: u64) {
            self.clock.advance(secs);
            time::sleep(Duration::from_secs(secs)).await;
        }

        fn at(&self, secs: u64) -> Instant {
            self.started + Duration::from_secs(secs)
        }
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn prompts_before_expiry_then_signs_out() {
        let fx = Fixture::new();
        fx.store.write(Some(&fx.token_expiring_in(600)));
        let handle = fx.spawn("5m".parse().unwrap());

        assert!(handle.state().is_signed_in());

        fx.elapse(299).await;
        assert!(fx.hooks.reauthentications().is_empty());

        fx.elapse(2).await;
        assert_eq!(fx.hooks.reauthentications(), vec![fx.at(300)]);
        assert!(handle.state().is_signed_in());

        fx.elapse(298).await;
        assert!(handle.state().is_signed_in());

        fx.elapse(2).await;
        assert!(!handle.state().is_signed_in());
        assert_eq!(fx.store.read(), None);
        assert_eq!(fx.hooks.reauthentications().len(), 1);
        assert!(fx.hooks.sign_outs().is_empty());
        assert!(logs_contain("session expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn new_credential_replaces_timers() {
        let fx = Fixture::new();
        fx.store.write(Some(&fx.token_expiring_in(600)));
        let handle = fx.spawn(LeadTime::default());

        fx.elapse(120).await;
        let renewed = fx.token_expiring_in(600);
        handle.set_credential(&renewed);

        fx.elapse(181).await;
        assert!(fx.hooks.reauthentications().is_empty());

        fx.elapse(120).await;
        assert_eq!(fx.hooks.reauthentications(), vec![fx.at(420)]);

        fx.elapse(200).await;
        assert!(handle.state().is_signed_in());
        assert_eq!(
            handle.state().token().map(|t| t.as_str().to_owned()),
            Some(renewed)
        );

        fx.elapse(100).await;
        assert!(!handle.state().is_signed_in());
    }

    #[tokio::test(start_paused = true)]
    async fn other_tab_sign_out_is_observed() {
        let fx = Fixture::new();
        fx.store.write(Some(&fx.token_expiring_in(600)));
        let mut handle = fx.spawn(LeadTime::default());

        let other_tab = fx.store.tab().origin().open_tab().store(DEFAULT_STORAGE_KEY);
        other_tab.write(None);

        let state = handle.changed().await;
        assert!(!state.is_signed_in());

        fx.elapse(700).await;
        assert!(fx.hooks.reauthentications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_sign_out_notifies_widget() {
        let fx = Fixture::new();
        fx.store.write(Some(&fx.token_expiring_in(600)));
        let mut handle = fx.spawn(LeadTime::default());

        let session = handle.session();
        assert!(session.is_signed_in());
        assert!(session.headers().contains_key(http::header::AUTHORIZATION));

        assert!(session.sign_out());
        let state = handle.changed().await;

        assert!(!state.is_signed_in());
        assert_eq!(fx.store.read(), None);
        assert_eq!(fx.hooks.sign_outs(), vec!["alice".to_owned()]);
        assert!(!handle.sign_out());
        assert!(handle.session().headers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_credential_is_discarded_at_startup() {
        let fx = Fixture::new();
        fx.store.write(Some(&test_support::token("alice", START)));

        let handle = fx.spawn(LeadTime::default());

        assert!(!handle.state().is_signed_in());
        assert_eq!(fx.store.read(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_fires_at_the_start_of_the_expiry_second() {
        let fx = Fixture::new();
        fx.clock.advance_millis(750);
        fx.store.write(Some(&test_support::token("alice", UnixTime(START.0 + 600))));
        let handle = fx.spawn(LeadTime::DISABLED);

        time::sleep(Duration::from_millis(599_200)).await;
        assert!(handle.state().is_signed_in());

        time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.state().is_signed_in());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_lead_time_never_prompts() {
        let fx = Fixture::new();
        fx.store.write(Some(&fx.token_expiring_in(600)));
        let handle = fx.spawn(LeadTime::DISABLED);

        fx.elapse(601).await;
        assert!(fx.hooks.reauthentications().is_empty());
        assert!(!handle.state().is_signed_in());
    }

    #[tokio::test(start_paused = true)]
    async fn lead_time_past_expiry_is_skipped() {
        let fx = Fixture::new();
        fx.store.write(Some(&fx.token_expiring_in(60)));
        let handle = fx.spawn(LeadTime::default());

        fx.elapse(61).await;
        assert!(fx.hooks.reauthentications().is_empty());
        assert!(!handle.state().is_signed_in());
    }

    #[tokio::test(start_paused = true)]
    async fn rewriting_same_credential_keeps_timers() {
        let fx = Fixture::new();
        let token = fx.token_expiring_in(600);
        fx.store.write(Some(&token));
        let handle = fx.spawn(LeadTime::default());

        fx.elapse(100).await;
        handle.set_credential(&token);

        fx.elapse(201).await;
        assert_eq!(fx.hooks.reauthentications(), vec![fx.at(300)]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cancels_timers() {
        let fx = Fixture::new();
        let token = fx.token_expiring_in(600);
        fx.store.write(Some(&token));
        let handle = fx.spawn(LeadTime::default());

        drop(handle);
        fx.elapse(700).await;

        assert!(fx.hooks.reauthentications().is_empty());
        assert_eq!(fx.store.read(), Some(token));
    }
}
