//! Map validated command-line arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, auth, database};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let db_timeout_seconds = matches
        .get_one::<u64>(database::ARG_DB_TIMEOUT_SECONDS)
        .copied()
        .unwrap_or(5);

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        bcrypt_cost: auth_opts.bcrypt_cost,
        token_issuer: auth_opts.token_issuer,
        token_expiry_minutes: auth_opts.token_expiry_minutes,
        token_signing_key: auth_opts.token_signing_key,
        db_timeout_seconds,
    }))
}
