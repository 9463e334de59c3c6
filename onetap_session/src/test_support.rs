use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use aliri::jwt::SubjectRef;
use aliri_base64::Base64Url;
use aliri_clock::{Clock, UnixTime};
use tokio::sync::mpsc;

use crate::{
    widget::{ButtonOptions, IdentityWidget, MomentListener, PromptMoment, WidgetConfig},
    PreciseClock,
};

/// An unsigned credential for `sub` that expires at `exp`
///
/// The session lifecycle only decodes credentials, so the signature is filler.
pub fn token(sub: &str, exp: UnixTime) -> String {
    let header = Base64Url::from_raw(br#"{"alg":"HS256","kid":"k"}"#.to_vec());
    let payload = serde_json::json!({
        "sub": sub,
        "aud": "client",
        "iss": onetap::GOOGLE_ISSUER,
        "iat": exp.0.saturating_sub(3_600),
        "exp": exp.0,
        "email": format!("{sub}@example.com"),
    });
    let payload = Base64Url::from_raw(payload.to_string().into_bytes());
    format!("{header}.{payload}.c2ln")
}

/// A clock shared between a test and the code under test, in milliseconds
#[derive(Clone, Debug)]
pub struct SharedClock(Arc<AtomicU64>);

impl SharedClock {
    pub fn new(start: UnixTime) -> Self {
        Self(Arc::new(AtomicU64::new(start.0 * 1_000)))
    }

    pub fn advance(&self, secs: u64) {
        self.advance_millis(secs * 1_000);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for SharedClock {
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::SeqCst) / 1_000)
    }
}

impl PreciseClock for SharedClock {
    fn since_epoch(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::SeqCst))
    }
}

/// An identity widget that reports each call it receives
///
/// Prompts immediately report `moment` to their listener.
#[derive(Debug)]
pub struct RecordingWidget {
    calls: mpsc::UnboundedSender<String>,
    moment: PromptMoment,
}

impl RecordingWidget {
    pub fn new(moment: PromptMoment) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Self { calls, moment }, rx)
    }

    fn record(&self, call: impl Into<String>) {
        let _ = self.calls.send(call.into());
    }
}

impl IdentityWidget for RecordingWidget {
    fn initialize(&mut self, config: &WidgetConfig) {
        self.record(format!("initialize:auto_select={}", config.auto_select));
    }

    fn prompt(&mut self, mut on_moment: MomentListener) {
        self.record("prompt");
        on_moment(self.moment.clone());
    }

    fn cancel(&mut self) {
        self.record("cancel");
    }

    fn revoke(&mut self, subject: &SubjectRef) {
        self.record(format!("revoke:{subject}"));
    }

    fn disable_auto_select(&mut self) {
        self.record("disable_auto_select");
    }

    fn render_button(&mut self, element_id: &str, _: &ButtonOptions) {
        self.record(format!("render_button:{element_id}"));
    }
}
