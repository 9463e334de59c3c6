//! Drives the identity widget from the session state

use onetap::ConfigError;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    options::Fallback,
    store::Tab,
    widget::{CredentialSink, IdentityWidget, PromptMoment, WidgetConfig, WidgetGone, WidgetHandle},
    OneTapOptions, Session, SessionController, SessionHandle, SessionState,
};

/// A running One Tap integration for one tab
///
/// Prompts for sign-in while no one is signed in and closes the prompt once
/// someone is. Dropping it stops the session lifecycle and tears down the
/// widget.
#[derive(Debug)]
pub struct OneTap<W: IdentityWidget> {
    session: SessionHandle,
    widget: WidgetHandle<W>,
    flow: JoinHandle<()>,
}

impl<W: IdentityWidget> OneTap<W> {
    /// Initializes the widget and starts tracking the session in `tab`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        options: OneTapOptions,
        tab: &Tab,
        widget: WidgetHandle<W>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;

        let store = tab.store(options.storage_key.clone());

        let config = WidgetConfig {
            client_id: options.client_id.clone(),
            auto_select: options.auto_select(),
            context: options.context,
            sink: CredentialSink::new(store.clone()),
        };
        if widget.initialize(config).is_err() {
            tracing::warn!("identity widget was torn down before initialization");
        }

        let session = SessionController::new(store)
            .with_lead_time(options.reauthenticate)
            .with_hooks(widget.clone())
            .spawn();

        let flow = tokio::spawn(follow(
            session.subscribe(),
            widget.clone(),
            options.automatic,
            options.fallback,
        ));

        Ok(Self {
            session,
            widget,
            flow,
        })
    }

    /// A snapshot of the session
    pub fn session(&self) -> Session {
        self.session.session()
    }

    /// The running session lifecycle
    pub fn handle(&self) -> &SessionHandle {
        &self.session
    }

    /// The identity widget
    pub fn widget(&self) -> &WidgetHandle<W> {
        &self.widget
    }

    /// Signs out in every tab, revoking the grant
    pub fn sign_out(&self) -> bool {
        self.session.sign_out()
    }
}

impl<W: IdentityWidget> Drop for OneTap<W> {
    fn drop(&mut self) {
        self.flow.abort();
        self.widget.teardown();
    }
}

async fn follow<W: IdentityWidget>(
    mut state: watch::Receiver<SessionState>,
    widget: WidgetHandle<W>,
    automatic: bool,
    fallback: Option<Fallback>,
) {
    loop {
        let signed_in = state.borrow_and_update().is_signed_in();

        if let Err(WidgetGone) = present(&widget, signed_in, automatic, fallback.as_ref()) {
            tracing::debug!("identity widget is gone; no longer following the session");
            return;
        }

        if state.changed().await.is_err() {
            return;
        }
    }
}

fn present<W: IdentityWidget>(
    widget: &WidgetHandle<W>,
    signed_in: bool,
    automatic: bool,
    fallback: Option<&Fallback>,
) -> Result<(), WidgetGone> {
    if signed_in {
        return widget.cancel();
    }

    if !automatic {
        return match fallback {
            Some(fallback) => widget.render_button(&fallback.button_id, fallback.button_options()),
            None => Ok(()),
        };
    }

    let inner = widget.clone();
    let fallback = fallback.cloned();
    widget.prompt(Box::new(move |moment: PromptMoment| {
        tracing::debug!(?moment, "sign-in prompt");
        if let (PromptMoment::NotDisplayed(_), Some(fallback)) = (&moment, &fallback) {
            let _ = inner.render_button(&fallback.button_id, fallback.button_options());
        }
    }))
}

#[cfg(test)]
mod tests {
    use aliri_clock::{Clock, System, UnixTime};
    use color_eyre::Result;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::{
        store::{Origin, DEFAULT_STORAGE_KEY},
        test_support::{self, RecordingWidget},
    };

    fn live_token() -> String {
        test_support::token("alice", UnixTime(System.now().0 + 3_600))
    }

    fn options() -> OneTapOptions {
        let mut options = OneTapOptions::new(onetap::ClientId::from_static("client"));
        options.fallback = Some(Fallback {
            button_id: "fallback".to_owned(),
            size: Default::default(),
        });
        options
    }

    async fn expect(calls: &mut UnboundedReceiver<String>, expected: &[&str]) -> Result<()> {
        for call in expected {
            let seen = calls
                .recv()
                .await
                .ok_or_else(|| color_eyre::eyre::eyre!("widget stopped before {call}"))?;
            assert_eq!(seen, *call);
        }
        Ok(())
    }

    fn started(
        options: OneTapOptions,
        tab: &Tab,
        moment: PromptMoment,
    ) -> Result<(OneTap<RecordingWidget>, UnboundedReceiver<String>)> {
        let (handle, ready) = WidgetHandle::spawn();
        let (widget, calls) = RecordingWidget::new(moment);
        let one_tap = OneTap::start(options, tab, handle)?;
        ready.ready(widget);
        Ok((one_tap, calls))
    }

    #[tokio::test]
    async fn prompts_then_falls_back_when_not_displayed() -> Result<()> {
        let tab = Origin::in_memory().open_tab();
        let (one_tap, mut calls) =
            started(options(), &tab, PromptMoment::NotDisplayed("suppressed".into()))?;

        expect(
            &mut calls,
            &["initialize:auto_select=true", "prompt", "render_button:fallback"],
        )
        .await?;
        assert!(!one_tap.session().is_signed_in());
        Ok(())
    }

    #[tokio::test]
    async fn signed_in_cancels_then_sign_out_prompts() -> Result<()> {
        let tab = Origin::in_memory().open_tab();
        tab.store(DEFAULT_STORAGE_KEY).write(Some(&live_token()));

        let (one_tap, mut calls) = started(options(), &tab, PromptMoment::Displayed)?;
        expect(&mut calls, &["initialize:auto_select=true", "cancel"]).await?;

        assert!(one_tap.sign_out());
        expect(
            &mut calls,
            &["revoke:alice", "disable_auto_select", "prompt"],
        )
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_from_another_tab_cancels_the_prompt() -> Result<()> {
        let origin = Origin::in_memory();
        let tab = origin.open_tab();
        let (one_tap, mut calls) = started(options(), &tab, PromptMoment::Displayed)?;
        expect(&mut calls, &["initialize:auto_select=true", "prompt"]).await?;

        origin
            .open_tab()
            .store(DEFAULT_STORAGE_KEY)
            .write(Some(&live_token()));

        expect(&mut calls, &["cancel"]).await?;
        assert!(one_tap.session().is_signed_in());
        Ok(())
    }

    #[tokio::test]
    async fn manual_mode_renders_the_button() -> Result<()> {
        let tab = Origin::in_memory().open_tab();
        let mut options = options();
        options.automatic = false;

        let (_one_tap, mut calls) = started(options, &tab, PromptMoment::Displayed)?;
        expect(
            &mut calls,
            &["initialize:auto_select=false", "render_button:fallback"],
        )
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn blank_client_id_is_a_config_error() {
        let tab = Origin::in_memory().open_tab();
        let (handle, _ready) = WidgetHandle::<RecordingWidget>::spawn();
        let options = OneTapOptions::new(onetap::ClientId::from_static(" "));

        assert!(matches!(
            OneTap::start(options, &tab, handle),
            Err(ConfigError::MissingClientId)
        ));
    }
}
