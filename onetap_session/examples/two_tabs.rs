use std::path::PathBuf;

use aliri_base64::Base64Url;
use aliri_clock::{Clock, System};
use clap::Parser;
use onetap_session::{
    store::{FileStorage, DEFAULT_STORAGE_KEY},
    IdentityHooks, LeadTime, Origin, SessionController,
};

#[derive(Debug, Parser)]
struct Opts {
    /// Directory to persist the session in
    #[arg(short, long, env = "ONE_TAP_SESSION_DIR", default_value = "target/one-tap-session")]
    dir: PathBuf,

    /// Seconds until the demonstration credential expires
    #[arg(short, long, default_value_t = 6)]
    expires_in: u64,

    /// How long before expiry to ask for re-authentication
    #[arg(short, long, default_value = "3s")]
    lead_time: LeadTime,
}

#[derive(Debug)]
struct Announce(&'static str);

impl IdentityHooks for Announce {
    fn reauthenticate(&self) {
        println!("{}: please sign in again soon", self.0);
    }
}

/// Builds an unsigned credential; the client only decodes it
fn credential(expires_in: u64) -> String {
    let now = System.now().0;
    let header = Base64Url::from_raw(br#"{"alg":"RS256","kid":"demo"}"#.to_vec());
    let payload = serde_json::json!({
        "sub": "demo-user",
        "aud": "demo.apps.googleusercontent.com",
        "iss": onetap::GOOGLE_ISSUER,
        "iat": now,
        "exp": now + expires_in,
        "email": "demo@example.com",
    });
    let payload = Base64Url::from_raw(payload.to_string().into_bytes());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let origin = Origin::new(FileStorage::new(&opts.dir)?);

    let mut first = SessionController::new(origin.open_tab().store(DEFAULT_STORAGE_KEY))
        .with_lead_time(opts.lead_time)
        .with_hooks(Announce("first tab"))
        .spawn();
    let mut second = SessionController::new(origin.open_tab().store(DEFAULT_STORAGE_KEY))
        .with_lead_time(opts.lead_time)
        .with_hooks(Announce("second tab"))
        .spawn();

    first.set_credential(&credential(opts.expires_in));

    let state = second.changed().await;
    println!(
        "second tab sees {}",
        state
            .claims()
            .and_then(|c| c.email())
            .unwrap_or("nobody")
    );

    let state = first.changed().await;
    println!("first tab signed in: {}", state.is_signed_in());

    let state = second.changed().await;
    println!("second tab signed in after expiry: {}", state.is_signed_in());

    Ok(())
}
