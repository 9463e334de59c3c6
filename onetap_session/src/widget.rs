//! A handle to the third-party identity widget that queues calls until it loads
//!
//! The widget script loads asynchronously, but callers want to issue commands
//! such as "prompt" or "cancel" as soon as the session changes. A
//! [`WidgetHandle`] accepts commands at any time. Commands issued before the
//! widget is ready are buffered in issue order and flushed exactly once when
//! the [`ReadySignal`] fires. Later commands run in issue order as they
//! arrive. Commands are always run by a single driver task, so a widget
//! callback that issues further commands never re-enters the widget.

use std::fmt;

use aliri::jwt::SubjectRef;
use onetap::{ClaimSet, ClientId};
use serde::Deserialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};

use crate::{IdentityHooks, SessionStore};

/// The widget has been torn down and accepts no more commands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("identity widget has been torn down")]
pub struct WidgetGone;

/// The flow the prompt is presented for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// Signing in to an existing account
    #[default]
    SignIn,
    /// Creating a new account
    SignUp,
    /// Using the account with the application
    Use,
}

/// The size of the rendered sign-in button
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonSize {
    /// A small button
    Small,
    /// A medium button
    Medium,
    /// A large button
    #[default]
    Large,
}

/// How to render the sign-in button
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ButtonOptions {
    /// The button size
    pub size: ButtonSize,
}

/// A notification about the display state of a prompt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptMoment {
    /// The prompt was shown
    Displayed,
    /// The prompt could not be shown, for the given reason
    NotDisplayed(String),
    /// The prompt was closed without a credential
    Skipped(String),
    /// The prompt was dismissed, for the given reason
    Dismissed(String),
}

/// Receives the prompt's display notifications
pub type MomentListener = Box<dyn FnMut(PromptMoment) + Send>;

/// Where the widget delivers a credential after the user signs in
#[derive(Clone, Debug)]
pub struct CredentialSink {
    store: SessionStore,
}

impl CredentialSink {
    /// A sink that persists credentials into `store`
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Persists a credential, notifying every tab
    pub fn deliver(&self, credential: &str) {
        if credential.is_empty() {
            tracing::debug!("ignoring empty credential");
            return;
        }

        tracing::debug!(key = self.store.key(), "credential received");
        self.store.write(Some(credential));
    }
}

/// Settings the widget is initialized with
#[derive(Clone, Debug)]
pub struct WidgetConfig {
    /// The application's client ID
    pub client_id: ClientId,
    /// Whether to sign a returning user in without interaction
    pub auto_select: bool,
    /// The flow the prompt is presented for
    pub context: Context,
    /// Where to deliver credentials
    pub sink: CredentialSink,
}

/// The capabilities of a third-party identity widget
pub trait IdentityWidget: Send + 'static {
    /// Configures the widget
    fn initialize(&mut self, config: &WidgetConfig);

    /// Shows the sign-in prompt, reporting its display state to `on_moment`
    fn prompt(&mut self, on_moment: MomentListener);

    /// Closes any visible prompt
    fn cancel(&mut self);

    /// Revokes the grant made by `subject`
    fn revoke(&mut self, subject: &SubjectRef);

    /// Stops signing the user in without interaction
    fn disable_auto_select(&mut self);

    /// Renders a sign-in button into the element with the given ID
    fn render_button(&mut self, element_id: &str, options: &ButtonOptions);
}

type Action<W> = Box<dyn FnOnce(&mut W) + Send>;

/// Issues commands to an identity widget that may not have loaded yet
///
/// Clones refer to the same widget.
pub struct WidgetHandle<W> {
    actions: mpsc::UnboundedSender<Action<W>>,
    driver: AbortHandle,
}

impl<W> Clone for WidgetHandle<W> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            driver: self.driver.clone(),
        }
    }
}

impl<W> fmt::Debug for WidgetHandle<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WidgetHandle")
            .field("closed", &self.actions.is_closed())
            .finish()
    }
}

/// Signals that the widget has loaded
pub struct ReadySignal<W> {
    widget: oneshot::Sender<W>,
}

impl<W> fmt::Debug for ReadySignal<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("closed", &self.widget.is_closed())
            .finish()
    }
}

impl<W: IdentityWidget> ReadySignal<W> {
    /// Hands over the loaded widget, flushing every buffered command
    pub fn ready(self, widget: W) {
        if self.widget.send(widget).is_err() {
            tracing::debug!("identity widget loaded after teardown");
        }
    }
}

impl<W: IdentityWidget> WidgetHandle<W> {
    /// Starts a driver for a widget that has not loaded yet
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn() -> (Self, ReadySignal<W>) {
        let (actions, queue) = mpsc::unbounded_channel();
        let (ready, loaded) = oneshot::channel();

        let driver = tokio::spawn(drive(loaded, queue)).abort_handle();

        (Self { actions, driver }, ReadySignal { widget: ready })
    }

    /// Runs `action` against the widget once it is ready
    pub fn with<F>(&self, action: F) -> Result<(), WidgetGone>
    where
        F: FnOnce(&mut W) + Send + 'static,
    {
        self.actions.send(Box::new(action)).map_err(|_| WidgetGone)
    }

    /// Configures the widget
    pub fn initialize(&self, config: WidgetConfig) -> Result<(), WidgetGone> {
        self.with(move |w| w.initialize(&config))
    }

    /// Shows the sign-in prompt
    pub fn prompt(&self, on_moment: MomentListener) -> Result<(), WidgetGone> {
        self.with(move |w| w.prompt(on_moment))
    }

    /// Closes any visible prompt
    pub fn cancel(&self) -> Result<(), WidgetGone> {
        self.with(|w| w.cancel())
    }

    /// Revokes the grant made by `subject`
    pub fn revoke(&self, subject: &SubjectRef) -> Result<(), WidgetGone> {
        let subject = subject.to_owned();
        self.with(move |w| w.revoke(&subject))
    }

    /// Stops signing the user in without interaction
    pub fn disable_auto_select(&self) -> Result<(), WidgetGone> {
        self.with(|w| w.disable_auto_select())
    }

    /// Renders a sign-in button
    pub fn render_button(
        &self,
        element_id: impl Into<String>,
        options: ButtonOptions,
    ) -> Result<(), WidgetGone> {
        let element_id = element_id.into();
        self.with(move |w| w.render_button(&element_id, &options))
    }

    /// Stops the driver, discarding any commands not yet run
    pub fn teardown(&self) {
        self.driver.abort();
    }
}

async fn drive<W: IdentityWidget>(
    loaded: oneshot::Receiver<W>,
    mut queue: mpsc::UnboundedReceiver<Action<W>>,
) {
    let mut widget = match loaded.await {
        Ok(widget) => widget,
        Err(_) => {
            tracing::debug!("identity widget never loaded; discarding queued commands");
            return;
        }
    };

    tracing::debug!("identity widget ready");

    while let Some(action) = queue.recv().await {
        action(&mut widget);
    }
}

impl<W: IdentityWidget> IdentityHooks for WidgetHandle<W> {
    fn reauthenticate(&self) {
        let prompted = self.prompt(Box::new(|moment: PromptMoment| {
            tracing::debug!(?moment, "re-authentication prompt");
        }));

        if prompted.is_err() {
            tracing::debug!("unable to prompt for re-authentication; identity widget is gone");
        }
    }

    fn signed_out(&self, claims: &ClaimSet) {
        let result = self
            .revoke(claims.sub())
            .and_then(|()| self.disable_auto_select());

        if let Err(err) = result {
            let error: &dyn std::error::Error = &err;
            tracing::debug!(error, "unable to revoke grant");
        }
    }
}
