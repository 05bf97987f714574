//! # Webforms (dynamic forms backend)
//!
//! `webforms` stores forms and their versioned JSON schemas for registered
//! users. Anyone may read forms and schemas; only the user who created a form
//! may change it or its schemas.
//!
//! ## Authentication
//!
//! Passwords are stored as bcrypt hashes. Logging in returns an HS512 signed
//! bearer token carrying the user id as its subject; protected routes accept
//! it in the `Authorization: Bearer` header.
//!
//! ## Ownership
//!
//! Every write to an owned row runs the ownership check and the mutation in
//! one transaction with the row locked, so ownership cannot change between the
//! check and the write. Deleting an account keeps its forms without an owner;
//! nobody can modify them afterwards. Deleting a form deletes its schemas.
//!
//! ## Storage
//!
//! Rows live in `PostgreSQL` (see `sql/schema.sql`) or in a process-local
//! memory store selected with `--dsn memory://`.

pub mod api;
pub mod auth;
pub mod cli;
pub mod resources;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
