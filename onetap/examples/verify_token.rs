use aliri::Jwt;
use clap::Parser;
use onetap::{ClientId, Verification, VerifierConfig};

#[derive(Debug, Parser)]
struct Opts {
    /// The OAuth2 client ID the token was issued to
    #[arg(short, long, env = "GOOGLE_CLIENT_ID")]
    client_id: ClientId,

    /// The JWKS endpoint publishing the signing keys
    #[arg(long, env, default_value = onetap::GOOGLE_CERTS_URL)]
    certs_url: String,

    /// Only accept these verified email addresses
    #[arg(short, long = "allow")]
    allowed_emails: Vec<String>,

    /// The ID token to verify
    #[arg(env = "ONE_TAP_TOKEN", hide_env_values = true)]
    token: Jwt,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let mut config = VerifierConfig::new(opts.client_id);
    config.certs_url = opts.certs_url;
    let verifier = config.build()?;

    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::AUTHORIZATION,
        http::HeaderValue::try_from(format!("Bearer {}", opts.token.as_str()))?,
    );

    match verifier.verify(&headers).await {
        Verification::Verified(claims) => {
            let email = claims.email().unwrap_or_default();
            let allowed = opts.allowed_emails.is_empty()
                || (claims.is_email_verified() && opts.allowed_emails.iter().any(|e| e == email));

            if allowed {
                println!("{} ({email}) is signed in", claims.sub());
                println!("{claims:#?}");
            } else {
                println!("{} is authenticated but not authorized", claims.sub());
            }
        }
        rejected => {
            println!(
                "{}: {}",
                rejected.status(),
                rejected.message().unwrap_or_default()
            );
        }
    }

    Ok(())
}
