//! Bearer token extraction
//!
//! Transports hand over the raw `Authorization` header value; this strips the
//! `Bearer ` prefix. An absent header and an empty token are both "missing",
//! which callers report differently from an invalid token.

use thiserror::Error;

pub const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing bearer token")]
pub struct MissingToken;

/// Extract the token from an `Authorization` header value
pub fn extract_bearer(header: Option<&str>) -> Result<&str, MissingToken> {
    let header = header.ok_or(MissingToken)?;
    let token = header.strip_prefix(BEARER_PREFIX).unwrap_or(header).trim();

    if token.is_empty() {
        return Err(MissingToken);
    }

    Ok(token)
}
