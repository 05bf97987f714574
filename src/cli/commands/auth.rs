//! Credential hashing and session token settings.

use crate::auth::{password, token};
use anyhow::{Context, Result};
use base64ct::{Base64, Encoding};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretSlice;

pub const ARG_BCRYPT_COST: &str = "bcrypt-cost";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_TOKEN_EXPIRY_MINUTES: &str = "token-expiry-minutes";
pub const ARG_TOKEN_SIGNING_KEY: &str = "token-signing-key";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BCRYPT_COST)
                .long(ARG_BCRYPT_COST)
                .help("bcrypt work factor used for new password hashes")
                .env("WEBFORMS_BCRYPT_COST")
                .default_value("10")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim written into and required from session tokens")
                .env("WEBFORMS_TOKEN_ISSUER")
                .default_value(token::DEFAULT_ISSUER),
        )
        .arg(
            Arg::new(ARG_TOKEN_EXPIRY_MINUTES)
                .long(ARG_TOKEN_EXPIRY_MINUTES)
                .help("Session token lifetime in minutes")
                .env("WEBFORMS_TOKEN_EXPIRY_MINUTES")
                .default_value("30")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOKEN_SIGNING_KEY)
                .long(ARG_TOKEN_SIGNING_KEY)
                .help("Base64 HS512 signing key, at least 64 bytes")
                .long_help(
                    "Base64 encoded HS512 signing key of at least 64 bytes. When omitted a random key is generated at startup, so tokens do not survive a restart.",
                )
                .env("WEBFORMS_TOKEN_SIGNING_KEY")
                .hide_env_values(true),
        )
}

#[derive(Debug)]
pub struct Options {
    pub bcrypt_cost: u32,
    pub token_issuer: String,
    pub token_expiry_minutes: i64,
    pub token_signing_key: Option<SecretSlice<u8>>,
}

impl Options {
    /// Read the auth settings from parsed matches.
    ///
    /// # Errors
    /// Returns an error if the signing key is not valid base64.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let bcrypt_cost = matches
            .get_one::<u32>(ARG_BCRYPT_COST)
            .copied()
            .unwrap_or(password::DEFAULT_COST);
        let token_issuer = matches
            .get_one::<String>(ARG_TOKEN_ISSUER)
            .cloned()
            .unwrap_or_else(|| token::DEFAULT_ISSUER.to_string());
        let token_expiry_minutes = matches
            .get_one::<i64>(ARG_TOKEN_EXPIRY_MINUTES)
            .copied()
            .unwrap_or(token::DEFAULT_EXPIRY_SECONDS / 60);
        let token_signing_key = matches
            .get_one::<String>(ARG_TOKEN_SIGNING_KEY)
            .map(|encoded| decode_key(encoded))
            .transpose()?;

        Ok(Self {
            bcrypt_cost,
            token_issuer,
            token_expiry_minutes,
            token_signing_key,
        })
    }
}

fn decode_key(encoded: &str) -> Result<SecretSlice<u8>> {
    let bytes = Base64::decode_vec(encoded.trim())
        .ok()
        .context("invalid --token-signing-key: expected base64")?;
    Ok(SecretSlice::from(bytes))
}
