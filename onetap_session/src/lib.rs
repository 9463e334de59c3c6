//! Client-side session handling for Google One Tap
//!
//! The browser half of a One Tap integration keeps the most recent ID token
//! in origin-wide storage and treats "is there a live session?" as a pure
//! function of that token and the clock. This crate models that:
//!
//! * [`SessionStore`] persists the raw token under a single key and notifies
//!   every [`Tab`] of the [`Origin`] when it changes.
//! * [`SessionController`] derives the [`SessionState`] from the stored token,
//!   signs the user out when the token expires, and asks the identity widget
//!   to re-authenticate a configurable [`LeadTime`] beforehand.
//! * [`WidgetHandle`] queues commands for a third-party identity widget until
//!   it has loaded.
//! * [`OneTap`] ties these together, prompting while no one is signed in.
//!
//! Tokens are decoded here but never verified. Anything that grants access
//! must verify the token with [`onetap::Verifier`].
//!
//! ```
//! use onetap_session::{LeadTime, Origin, SessionController};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let tab = Origin::in_memory().open_tab();
//! let session = SessionController::new(tab.store("google-one-tap-token"))
//!     .with_lead_time(LeadTime::DISABLED)
//!     .spawn();
//!
//! assert!(!session.state().is_signed_in());
//! assert!(session.session().headers().is_empty());
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod controller;
mod lead_time;
mod one_tap;
mod options;
mod session;
pub mod store;
pub mod widget;

pub use controller::{IdentityHooks, NoHooks, PreciseClock, SessionController, SessionHandle};
pub use lead_time::{InvalidLeadTime, LeadTime};
pub use one_tap::OneTap;
pub use options::{Fallback, OneTapOptions};
pub use session::{Session, SessionState};
pub use store::{Origin, SessionStore, Tab};
pub use widget::{IdentityWidget, ReadySignal, WidgetHandle};

#[cfg(test)]
mod test_support;
