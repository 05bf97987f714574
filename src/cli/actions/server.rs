use crate::{
    api::{self, Services},
    auth::{AuthService, CredentialHasher, TokenOptions, TokenService},
    cli::telemetry,
    resources::ResourceService,
    store::{MemoryStore, PgStore, Store},
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretSlice;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub bcrypt_cost: u32,
    pub token_issuer: String,
    pub token_expiry_minutes: i64,
    pub token_signing_key: Option<SecretSlice<u8>>,
    pub db_timeout_seconds: u64,
}

/// Where rows live, picked from the DSN scheme.
#[derive(Debug, PartialEq, Eq)]
enum Backend {
    Memory,
    Postgres,
}

fn backend(dsn: &str) -> Result<Backend> {
    let url = Url::parse(dsn).context("invalid --dsn: expected a URL")?;
    match url.scheme() {
        "memory" => Ok(Backend::Memory),
        "postgres" | "postgresql" => Ok(Backend::Postgres),
        scheme => Err(anyhow!("unsupported --dsn scheme: {scheme}")),
    }
}

/// Wire one store into every service that needs it.
fn wire<S: Store + Clone>(
    store: S,
    hasher: CredentialHasher,
    tokens: Arc<TokenService>,
    timeout: Duration,
) -> Services {
    Services {
        auth: Arc::new(AuthService::new(store.clone(), hasher, tokens).with_timeout(timeout)),
        resources: Arc::new(ResourceService::new(store.clone()).with_timeout(timeout)),
        probe: Arc::new(store),
    }
}

/// Validate the configuration and build the services without binding a port.
///
/// # Errors
/// Returns an error for an invalid cost, token setting or DSN, or if the
/// database cannot be reached.
pub async fn build(args: Args) -> Result<Services> {
    let timeout = Duration::from_secs(args.db_timeout_seconds);

    let hasher = CredentialHasher::new(args.bcrypt_cost).context("invalid --bcrypt-cost")?;

    let mut options = TokenOptions::new()
        .with_issuer(args.token_issuer)
        .with_expiry_seconds(args.token_expiry_minutes.saturating_mul(60));
    match args.token_signing_key {
        Some(key) => options = options.with_signing_key(key),
        None => warn!("no signing key configured, tokens will not survive a restart"),
    }
    let tokens = Arc::new(TokenService::new(options).context("invalid token configuration")?);

    let services = match backend(&args.dsn)? {
        Backend::Memory => {
            info!("using the in-memory store");
            wire(MemoryStore::new(), hasher, tokens, timeout)
        }
        Backend::Postgres => {
            let store = PgStore::connect(&args.dsn, timeout)
                .await
                .context("failed to connect to the database")?;
            info!("connected to the database");
            wire(store, hasher, tokens, timeout)
        }
    };

    Ok(services)
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, the database is
/// unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let port = args.port;
    let services = build(args).await?;

    let result = api::new(port, services).await;

    telemetry::shutdown_tracer();

    result
}
