//! Session tokens: compact HS512 JWTs carrying the user id as subject.
//!
//! Verification checks the signature first, then the issuer, the expiry and
//! finally the issued-at claim; the first failing check decides the error.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const ALGORITHM: Algorithm = Algorithm::HS512;
pub const DEFAULT_ISSUER: &str = "dynamic-webforms";
pub const DEFAULT_EXPIRY_SECONDS: i64 = 30 * 60;
pub const MIN_KEY_LEN: usize = 64;
const GENERATED_KEY_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::InvalidSignature,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => Self::InvalidIssuer,
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Malformed,
        }
    }
}

/// Claims of a verified token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// Claims as found on the wire, before any of them has been validated.
#[derive(Deserialize)]
struct UncheckedClaims {
    iss: Option<String>,
    sub: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
    jti: Option<String>,
}

#[derive(Debug)]
pub struct TokenOptions {
    issuer: String,
    expiry_seconds: i64,
    signing_key: Option<SecretSlice<u8>>,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            expiry_seconds: DEFAULT_EXPIRY_SECONDS,
            signing_key: None,
        }
    }
}

impl TokenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_expiry_seconds(mut self, seconds: i64) -> Self {
        self.expiry_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_signing_key(mut self, key: impl Into<SecretSlice<u8>>) -> Self {
        self.signing_key = Some(key.into());
        self
    }
}

#[derive(Debug)]
pub struct TokenService {
    issuer: String,
    expiry_seconds: i64,
    key: SecretSlice<u8>,
}

impl TokenService {
    /// Validate `options` and build the service. Without a signing key a
    /// random 128-byte key is generated; tokens then stop verifying on restart.
    ///
    /// # Errors
    /// Returns [`TokenError::InvalidConfiguration`] for a non-positive expiry,
    /// an empty issuer, or a key that is too short or all zero.
    pub fn new(options: TokenOptions) -> Result<Self, TokenError> {
        if options.expiry_seconds <= 0 {
            return Err(TokenError::InvalidConfiguration(
                "expiry must be greater than zero",
            ));
        }
        if options.issuer.is_empty() {
            return Err(TokenError::InvalidConfiguration("issuer must not be empty"));
        }

        let key = match options.signing_key {
            Some(key) => {
                let bytes = key.expose_secret();
                if bytes.len() < MIN_KEY_LEN {
                    return Err(TokenError::InvalidConfiguration(
                        "signing key must be at least 64 bytes",
                    ));
                }
                if bytes.iter().all(|byte| *byte == 0) {
                    return Err(TokenError::InvalidConfiguration(
                        "signing key must not be all zero",
                    ));
                }
                key
            }
            None => generate_key()?,
        };

        Ok(Self {
            issuer: options.issuer,
            expiry_seconds: options.expiry_seconds,
            key,
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn expiry_seconds(&self) -> i64 {
        self.expiry_seconds
    }

    /// # Errors
    /// Returns [`TokenError::Encoding`] if the token cannot be serialized.
    pub fn issue(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.issue_at(user_id, now_unix_seconds())
    }

    /// Issue a token as if the current time were `now` (UNIX seconds).
    ///
    /// # Errors
    /// Returns [`TokenError::Encoding`] if the token cannot be serialized.
    pub fn issue_at(&self, user_id: Uuid, now: i64) -> Result<String, TokenError> {
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: user_id,
            iat: now,
            exp: now.saturating_add(self.expiry_seconds),
            jti: Uuid::new_v4(),
        };

        encode(
            &Header::new(ALGORITHM),
            &claims,
            &EncodingKey::from_secret(self.key.expose_secret()),
        )
        .map_err(|err| TokenError::Encoding(err.to_string()))
    }

    /// # Errors
    /// See [`TokenService::verify_at`].
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, now_unix_seconds())
    }

    /// Verify `token` against the clock value `now` (UNIX seconds).
    ///
    /// # Errors
    /// - [`TokenError::Malformed`] if the token cannot be split or decoded,
    /// - [`TokenError::InvalidSignature`] for a bad signature or any algorithm but HS512,
    /// - [`TokenError::InvalidIssuer`] if `iss` differs from the configured issuer,
    /// - [`TokenError::Expired`] if `exp` is missing or not after `now`,
    /// - [`TokenError::Malformed`] if `iat`, `sub` or `jti` is missing or invalid.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let claims = decode::<UncheckedClaims>(
            token,
            &DecodingKey::from_secret(self.key.expose_secret()),
            &self.validation(),
        )?
        .claims;

        let iss = claims.iss.ok_or(TokenError::InvalidIssuer)?;
        if iss != self.issuer {
            return Err(TokenError::InvalidIssuer);
        }
        let exp = claims.exp.ok_or(TokenError::Expired)?;
        if exp <= now {
            return Err(TokenError::Expired);
        }
        let iat = claims.iat.ok_or(TokenError::Malformed)?;
        let sub = parse_uuid(claims.sub.as_deref())?;
        let jti = parse_uuid(claims.jti.as_deref())?;

        Ok(Claims {
            iss,
            sub,
            iat,
            exp,
            jti,
        })
    }

    /// Signature, algorithm and issuer are checked by `jsonwebtoken`; the
    /// remaining claims are checked in `verify_at` against the caller's clock.
    fn validation(&self) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["iss"]);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation
    }
}

fn generate_key() -> Result<SecretSlice<u8>, TokenError> {
    let mut key = vec![0u8; GENERATED_KEY_LEN];
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|_| TokenError::InvalidConfiguration("failed to generate signing key"))?;
    Ok(SecretSlice::from(key))
}

fn now_unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

fn parse_uuid(value: Option<&str>) -> Result<Uuid, TokenError> {
    value
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or(TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64ct::{Base64UrlUnpadded, Encoding};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn key(fill: u8) -> Vec<u8> {
        (0..MIN_KEY_LEN).map(|i| fill.wrapping_add(i as u8)).collect()
    }

    fn service(fill: u8) -> Result<TokenService, TokenError> {
        TokenService::new(TokenOptions::new().with_signing_key(key(fill)))
    }

    /// Sign arbitrary claims with `service`'s key under `alg`.
    fn forge(
        service: &TokenService,
        alg: Algorithm,
        claims: &serde_json::Value,
    ) -> Result<String, TokenError> {
        encode(
            &Header::new(alg),
            claims,
            &EncodingKey::from_secret(service.key.expose_secret()),
        )
        .map_err(|err| TokenError::Encoding(err.to_string()))
    }

    #[test]
    fn issue_and_verify() -> Result<(), TokenError> {
        let service = service(1)?;
        let user = Uuid::new_v4();
        let token = service.issue_at(user, NOW)?;

        let claims = service.verify_at(&token, NOW + 1)?;
        assert_eq!(claims.sub, user);
        assert_eq!(claims.iss, DEFAULT_ISSUER);
        assert_eq!(claims.iat, NOW);
        assert_eq!(claims.exp, NOW + DEFAULT_EXPIRY_SECONDS);
        Ok(())
    }

    #[test]
    fn expiry_boundary() -> Result<(), TokenError> {
        let service = TokenService::new(
            TokenOptions::new()
                .with_signing_key(key(2))
                .with_expiry_seconds(60),
        )?;
        let token = service.issue_at(Uuid::new_v4(), NOW)?;

        assert!(service.verify_at(&token, NOW + 59).is_ok());
        assert_eq!(service.verify_at(&token, NOW + 60), Err(TokenError::Expired));
        assert_eq!(service.verify_at(&token, NOW + 61), Err(TokenError::Expired));
        Ok(())
    }

    #[test]
    fn tokens_for_one_user_differ() -> Result<(), TokenError> {
        let service = service(3)?;
        let user = Uuid::new_v4();
        let first = service.issue_at(user, NOW)?;
        let second = service.issue_at(user, NOW)?;
        assert_ne!(first, second);
        assert_ne!(
            service.verify_at(&first, NOW)?.jti,
            service.verify_at(&second, NOW)?.jti
        );
        Ok(())
    }

    #[test]
    fn other_key_is_rejected() -> Result<(), TokenError> {
        let k1 = service(4)?;
        let k2 = service(5)?;
        let token = k1.issue_at(Uuid::new_v4(), NOW)?;
        assert_eq!(k2.verify_at(&token, NOW), Err(TokenError::InvalidSignature));
        Ok(())
    }

    #[test]
    fn tampered_payload_is_rejected() -> Result<(), TokenError> {
        let service = service(6)?;
        let token = service.issue_at(Uuid::new_v4(), NOW)?;
        let parts: Vec<&str> = token.split('.').collect();
        let other = service.issue_at(Uuid::new_v4(), NOW)?;
        let other_claims = other.split('.').nth(1).unwrap_or_default();
        let spliced = format!("{}.{}.{}", parts[0], other_claims, parts[2]);
        assert_eq!(
            service.verify_at(&spliced, NOW),
            Err(TokenError::InvalidSignature)
        );
        Ok(())
    }

    #[test]
    fn other_algorithms_are_rejected() -> Result<(), TokenError> {
        let service = service(7)?;
        let claims = json!({
            "iss": DEFAULT_ISSUER,
            "sub": Uuid::new_v4(),
            "iat": NOW,
            "exp": NOW + 60,
            "jti": Uuid::new_v4(),
        });
        for alg in [Algorithm::HS256, Algorithm::HS384] {
            let token = forge(&service, alg, &claims)?;
            assert_eq!(
                service.verify_at(&token, NOW),
                Err(TokenError::InvalidSignature)
            );
        }

        // An RS256 header over an HMAC signature.
        let token = forge(&service, ALGORITHM, &claims)?;
        let rs256 = Base64UrlUnpadded::encode_string(br#"{"alg":"RS256","typ":"JWT"}"#);
        let swapped = format!("{rs256}{}", &token[token.find('.').unwrap_or(0)..]);
        assert_eq!(
            service.verify_at(&swapped, NOW),
            Err(TokenError::InvalidSignature)
        );

        // "none" is not an algorithm the decoder knows.
        let unsigned = Base64UrlUnpadded::encode_string(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = token.split('.').nth(1).unwrap_or_default();
        assert_eq!(
            service.verify_at(&format!("{unsigned}.{payload}."), NOW),
            Err(TokenError::Malformed)
        );
        Ok(())
    }

    #[test]
    fn issuer_is_checked_before_expiry() -> Result<(), TokenError> {
        let issuer_a = TokenService::new(
            TokenOptions::new()
                .with_signing_key(key(8))
                .with_issuer("issuer-a"),
        )?;
        let issuer_b = TokenService::new(
            TokenOptions::new()
                .with_signing_key(key(8))
                .with_issuer("issuer-b"),
        )?;
        let token = issuer_a.issue_at(Uuid::new_v4(), NOW)?;
        assert_eq!(
            issuer_b.verify_at(&token, NOW + DEFAULT_EXPIRY_SECONDS * 2),
            Err(TokenError::InvalidIssuer)
        );
        Ok(())
    }

    #[test]
    fn missing_claims() -> Result<(), TokenError> {
        let service = service(9)?;
        let sub = Uuid::new_v4();
        let jti = Uuid::new_v4();
        let exp = NOW + 60;

        let no_exp = json!({ "iss": DEFAULT_ISSUER, "sub": sub, "iat": NOW, "jti": jti });
        assert_eq!(
            service.verify_at(&forge(&service, ALGORITHM, &no_exp)?, NOW),
            Err(TokenError::Expired)
        );

        let no_iat = json!({ "iss": DEFAULT_ISSUER, "sub": sub, "exp": exp, "jti": jti });
        assert_eq!(
            service.verify_at(&forge(&service, ALGORITHM, &no_iat)?, NOW),
            Err(TokenError::Malformed)
        );

        let bad_sub = json!({
            "iss": DEFAULT_ISSUER,
            "sub": "alice",
            "iat": NOW,
            "exp": exp,
            "jti": jti,
        });
        assert_eq!(
            service.verify_at(&forge(&service, ALGORITHM, &bad_sub)?, NOW),
            Err(TokenError::Malformed)
        );

        let no_iss = json!({ "sub": sub, "iat": NOW, "exp": exp, "jti": jti });
        assert_eq!(
            service.verify_at(&forge(&service, ALGORITHM, &no_iss)?, NOW),
            Err(TokenError::InvalidIssuer)
        );

        let no_iss_no_exp = json!({ "sub": sub, "iat": NOW, "jti": jti });
        assert_eq!(
            service.verify_at(&forge(&service, ALGORITHM, &no_iss_no_exp)?, NOW),
            Err(TokenError::InvalidIssuer)
        );
        Ok(())
    }

    #[test]
    fn garbage_never_panics() -> Result<(), TokenError> {
        let service = service(10)?;
        for token in ["", ".", "..", "a.b.c", "a.b.c.d", "ü.ö.ä", "eyJ.eyJ.###"] {
            assert!(service.verify_at(token, NOW).is_err());
        }
        Ok(())
    }

    #[test]
    fn configuration_is_validated() {
        assert_eq!(
            TokenService::new(TokenOptions::new().with_expiry_seconds(0)).err(),
            Some(TokenError::InvalidConfiguration(
                "expiry must be greater than zero"
            ))
        );
        assert!(TokenService::new(TokenOptions::new().with_expiry_seconds(-5)).is_err());
        assert!(TokenService::new(TokenOptions::new().with_signing_key(vec![7_u8; 63])).is_err());
        assert!(TokenService::new(TokenOptions::new().with_signing_key(vec![0_u8; 64])).is_err());
        assert!(TokenService::new(TokenOptions::new().with_issuer("")).is_err());
    }

    #[test]
    fn generated_key_round_trips() -> Result<(), TokenError> {
        let service = TokenService::new(TokenOptions::default())?;
        let user = Uuid::new_v4();
        let token = service.issue(user)?;
        assert_eq!(service.verify(&token)?.sub, user);
        assert_eq!(service.key.expose_secret().len(), GENERATED_KEY_LEN);
        Ok(())
    }
}
