//! Token configuration
//!
//! The signing secret and token lifetime are handed to every call that needs
//! them; nothing here is global.

use chrono::Duration;
use std::fmt;
use thiserror::Error;

/// Default token lifetime: three days
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("signing secret must not be empty")]
    EmptySecret,

    #[error("invalid token ttl '{0}': expected a positive number of seconds")]
    InvalidTtl(String),
}

/// HMAC key used to sign and verify tokens
#[derive(Clone)]
pub struct SigningSecret {
    key: Vec<u8>,
}

impl SigningSecret {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningSecret([REDACTED])")
    }
}

/// Secret and lifetime used when issuing and validating tokens
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub signing_secret: SigningSecret,
    pub token_ttl: Duration,
}

impl AuthConfig {
    pub fn new(signing_secret: SigningSecret, token_ttl: Duration) -> Self {
        Self {
            signing_secret,
            token_ttl,
        }
    }

    /// Read `WARDEN_SECRET` and `WARDEN_TOKEN_TTL` (seconds)
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret =
            std::env::var("WARDEN_SECRET").map_err(|_| ConfigError::Missing("WARDEN_SECRET"))?;

        let ttl = match std::env::var("WARDEN_TOKEN_TTL") {
            Ok(raw) => parse_ttl(&raw)?,
            Err(_) => Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        };

        Ok(Self::new(SigningSecret::new(secret)?, ttl))
    }

    pub fn secret(&self) -> &[u8] {
        self.signing_secret.as_bytes()
    }
}

/// Parse a positive number of seconds
pub fn parse_ttl(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<i64>() {
        Ok(secs) if secs > 0 => Duration::try_seconds(secs)
            .ok_or_else(|| ConfigError::InvalidTtl(raw.to_string())),
        _ => Err(ConfigError::InvalidTtl(raw.to_string())),
    }
}
