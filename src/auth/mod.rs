//! Credentials, session tokens and the account service built on them.

pub mod password;
pub mod service;
pub mod token;

pub use password::{CredentialError, CredentialHasher};
pub use service::{AuthApi, AuthError, AuthService, User};
pub use token::{Claims, TokenError, TokenOptions, TokenService};
