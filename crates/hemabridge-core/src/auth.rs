//! Credentials, bearer tokens and login throttling.
//!
//! Passwords are stored as argon2id PHC strings. Sessions are stateless
//! HS256 JWTs carrying the user id, username and role; the signing secret is
//! held in a [`SecretString`] and never logged.
//!
//! # Login throttle
//!
//! [`LoginThrottle`] keeps a sliding window of failed attempts per username.
//! Once `max_failures` failures fall inside the window, further attempts are
//! rejected with [`AuthError::Throttled`] until the oldest failure ages out.
//! A successful login clears the username's history.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::Role;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Errors from authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Unknown username or wrong password.
    #[error("incorrect username or password")]
    InvalidCredentials,

    /// The token is malformed, forged or carries unusable claims.
    #[error("could not validate credentials")]
    InvalidToken,

    /// The token's `exp` has passed.
    #[error("token has expired")]
    TokenExpired,

    /// The account exists but is deactivated.
    #[error("account is inactive")]
    InactiveAccount,

    /// Too many failed logins for this username.
    #[error("too many failed login attempts; retry in {retry_after_secs}s")]
    Throttled {
        /// Seconds until the next attempt is admitted.
        retry_after_secs: u64,
    },

    /// The signing secret is empty.
    #[error("token secret must not be empty")]
    EmptySecret,

    /// Password hashing failed.
    #[error("password hashing failed: {message}")]
    Hashing {
        /// Underlying error text.
        message: String,
    },

    /// Token encoding failed.
    #[error("token encoding failed: {message}")]
    Encoding {
        /// Underlying error text.
        message: String,
    },
}

/// Hashes `plain` with argon2id and a random salt.
///
/// # Errors
///
/// Returns [`AuthError::Hashing`] if argon2 rejects the input.
pub fn hash_password(plain: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| AuthError::Hashing {
            message: error.to_string(),
        })
}

/// Checks `plain` against a stored PHC string. A malformed hash never
/// verifies.
#[must_use]
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a decimal string.
    pub sub: String,
    /// Username at issue time.
    pub username: String,
    /// Role at issue time.
    pub role: Role,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

impl Claims {
    /// Parses `sub` back into a user id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] when `sub` is not an integer.
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::InvalidToken)
    }
}

/// A freshly issued bearer token.
#[derive(Debug)]
pub struct AccessToken {
    /// The encoded JWT.
    pub token: SecretString,
    /// Expiry (unix seconds).
    pub expires_at: i64,
}

/// Issues and verifies HS256 bearer tokens.
pub struct TokenIssuer {
    secret: SecretString,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenIssuer {
    /// Creates an issuer.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EmptySecret`] for an empty or blank secret.
    pub fn new(secret: SecretString, ttl: Duration) -> Result<Self, AuthError> {
        if secret.expose_secret().trim().is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self { secret, ttl })
    }

    /// Token lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a token for the given user, valid from now for the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encoding`] if signing fails.
    pub fn issue(
        &self,
        user_id: i64,
        username: &str,
        role: Role,
    ) -> Result<AccessToken, AuthError> {
        self.issue_at(user_id, username, role, chrono::Utc::now().timestamp())
    }

    fn issue_at(
        &self,
        user_id: i64,
        username: &str,
        role: Role,
        now: i64,
    ) -> Result<AccessToken, AuthError> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            role,
            iat: now,
            exp: now.saturating_add(ttl),
        };
        let key = EncodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(
            |error| AuthError::Encoding {
                message: error.to_string(),
            },
        )?;
        Ok(AccessToken {
            token: SecretString::from(token),
            expires_at: claims.exp,
        })
    }

    /// Verifies signature and expiry and returns the claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] for an expired token and
    /// [`AuthError::InvalidToken`] for anything else that fails validation.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation).map_err(|error| {
            match error.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            }
        })?;
        data.claims.user_id()?;
        Ok(data.claims)
    }
}

/// Login throttle settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Failures tolerated inside the window.
    pub max_failures: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window_secs: 300,
        }
    }
}

/// Sliding-window throttle of failed logins, keyed by username.
#[derive(Debug)]
pub struct LoginThrottle {
    config: ThrottleConfig,
    failures: RwLock<HashMap<String, Vec<Instant>>>,
}

impl LoginThrottle {
    /// Creates an empty throttle.
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            failures: RwLock::new(HashMap::new()),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    /// Rejects the attempt if `username` is currently throttled.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Throttled`] with the wait until the oldest
    /// counted failure leaves the window.
    pub fn check(&self, username: &str) -> Result<(), AuthError> {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window()).unwrap_or(now);
        let failures = self
            .failures
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let Some(attempts) = failures.get(username) else {
            return Ok(());
        };
        let recent: Vec<&Instant> = attempts.iter().filter(|&&t| t > cutoff).collect();
        if recent.len() < self.config.max_failures as usize {
            return Ok(());
        }

        let oldest = recent.iter().min().map_or(now, |t| **t);
        let retry_after = self.window().saturating_sub(now.duration_since(oldest));
        tracing::warn!(
            username,
            failures = recent.len(),
            max = self.config.max_failures,
            "login throttled"
        );
        Err(AuthError::Throttled {
            retry_after_secs: retry_after.as_secs().max(1),
        })
    }

    /// Records a failed attempt.
    pub fn record_failure(&self, username: &str) {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window()).unwrap_or(now);
        let mut failures = self
            .failures
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let attempts = failures.entry(username.to_string()).or_default();
        attempts.retain(|&t| t > cutoff);
        attempts.push(now);
    }

    /// Forgets the username's failures after a successful login.
    pub fn clear(&self, username: &str) {
        self.failures
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(username);
    }

    /// Drops usernames with no failures inside the window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window()).unwrap_or(now);
        self.failures
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|_, attempts| {
                attempts.retain(|&t| t > cutoff);
                !attempts.is_empty()
            });
    }

    /// Number of usernames currently tracked.
    #[must_use]
    pub fn tracked_usernames(&self) -> usize {
        self.failures
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SecretString::from("unit-test-secret".to_string()), DEFAULT_TOKEN_TTL)
            .unwrap()
    }

    #[test]
    fn test_hash_then_verify() {
        let hash = hash_password("patient123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("patient123", &hash));
        assert!(!verify_password("patient124", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn test_token_round_trip_carries_claims() {
        let issuer = issuer();
        let token = issuer.issue(7, "alice", Role::Doctor).unwrap();
        let claims = issuer.verify(token.token.expose_secret()).unwrap();
        assert_eq!(claims.user_id(), Ok(7));
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, Role::Doctor);
        assert_eq!(claims.exp - claims.iat, 30 * 60);
        assert_eq!(token.expires_at, claims.exp);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let issuer = issuer();
        let issued_long_ago = chrono::Utc::now().timestamp() - 2 * 60 * 60;
        let token = issuer
            .issue_at(1, "bob", Role::Patient, issued_long_ago)
            .unwrap();
        assert_eq!(
            issuer.verify(token.token.expose_secret()),
            Err(AuthError::TokenExpired)
        );
    }

    #[test]
    fn test_foreign_signature_is_invalid() {
        let other = TokenIssuer::new(SecretString::from("other".to_string()), DEFAULT_TOKEN_TTL)
            .unwrap();
        let token = other.issue(1, "bob", Role::Patient).unwrap();
        assert_eq!(
            issuer().verify(token.token.expose_secret()),
            Err(AuthError::InvalidToken)
        );
        assert_eq!(issuer().verify("garbage"), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_empty_secret_is_refused() {
        let result = TokenIssuer::new(SecretString::from("  ".to_string()), DEFAULT_TOKEN_TTL);
        assert!(matches!(result, Err(AuthError::EmptySecret)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", issuer());
        assert!(!rendered.contains("unit-test-secret"));
    }

    #[test]
    fn test_throttle_after_max_failures() {
        let throttle = LoginThrottle::new(ThrottleConfig {
            max_failures: 3,
            window_secs: 60,
        });
        for _ in 0..3 {
            assert!(throttle.check("mallory").is_ok());
            throttle.record_failure("mallory");
        }
        assert!(matches!(
            throttle.check("mallory"),
            Err(AuthError::Throttled { retry_after_secs }) if retry_after_secs <= 60
        ));
        assert!(throttle.check("alice").is_ok());
    }

    #[test]
    fn test_success_clears_failures() {
        let throttle = LoginThrottle::new(ThrottleConfig {
            max_failures: 2,
            window_secs: 60,
        });
        throttle.record_failure("alice");
        throttle.record_failure("alice");
        assert!(throttle.check("alice").is_err());
        throttle.clear("alice");
        assert!(throttle.check("alice").is_ok());
        assert_eq!(throttle.tracked_usernames(), 0);
    }

    #[test]
    fn test_window_expiration_and_cleanup() {
        let throttle = LoginThrottle::new(ThrottleConfig {
            max_failures: 1,
            window_secs: 1,
        });
        throttle.record_failure("carol");
        assert!(throttle.check("carol").is_err());

        thread::sleep(Duration::from_millis(1100));

        assert!(throttle.check("carol").is_ok());
        throttle.cleanup();
        assert_eq!(throttle.tracked_usernames(), 0);
    }
}
