//! Signed token codec
//!
//! Tokens use the compact `header.payload.signature` form, each segment
//! base64url-encoded without padding and signed with HMAC-SHA2.
//!
//! Claims:
//! - `sub`: numeric subject id
//! - `scope`: `ActivateEmail` or `UserAccess`
//! - `exp`: expiry as a Unix timestamp (seconds)

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of the identity a token was issued to
pub type SubjectId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unexpected signing algorithm '{0}'")]
    AlgorithmMismatch(String),

    #[error("invalid token signature")]
    SignatureInvalid,

    #[error("invalid token claims: {0}")]
    InvalidClaims(String),

    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },

    #[error("token scope '{actual}' does not satisfy required scope '{expected}'")]
    ScopeMismatch {
        expected: TokenScope,
        actual: TokenScope,
    },

    #[error("token encode error: {0}")]
    Encoding(String),
}

impl TokenError {
    /// Whether the token was structurally or cryptographically invalid, as
    /// opposed to a well-formed token that is merely expired or mis-scoped.
    pub fn is_tampered(&self) -> bool {
        matches!(
            self,
            TokenError::Malformed(_)
                | TokenError::AlgorithmMismatch(_)
                | TokenError::SignatureInvalid
                | TokenError::InvalidClaims(_)
        )
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TokenError::Expired { .. })
    }
}

/// Purpose a token was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenScope {
    /// Single-use token proving control of an email address
    ActivateEmail,
    /// Session-style token presented on every authenticated request
    UserAccess,
}

impl TokenScope {
    pub const ALL: [TokenScope; 2] = [TokenScope::ActivateEmail, TokenScope::UserAccess];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::ActivateEmail => "ActivateEmail",
            TokenScope::UserAccess => "UserAccess",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown token scope '{0}'")]
pub struct UnknownScope(pub String);

impl FromStr for TokenScope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenScope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| UnknownScope(s.to_string()))
    }
}

/// Verified claims of a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub sub: SubjectId,
    pub scope: TokenScope,
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    fn from_payload(payload: &Map<String, Value>) -> Result<Self, TokenError> {
        let sub = subject_claim(payload.get("sub"))?;

        let scope = match payload.get("scope") {
            Some(Value::String(s)) => s
                .parse::<TokenScope>()
                .map_err(|e| TokenError::InvalidClaims(e.to_string()))?,
            Some(_) => {
                return Err(TokenError::InvalidClaims(
                    "'scope' claim is not a string".to_string(),
                ))
            }
            None => {
                return Err(TokenError::InvalidClaims(
                    "missing 'scope' claim".to_string(),
                ))
            }
        };

        let exp = timestamp_claim(payload.get("exp"))?;

        Ok(Self { sub, scope, exp })
    }
}

/// A freshly encoded token and the claims it carries
#[derive(Debug, Clone)]
pub struct SignedToken {
    token: String,
    claims: Claims,
    expires_at: DateTime<Utc>,
}

impl SignedToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn into_string(self) -> String {
        self.token
    }
}

impl fmt::Display for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// HMAC-SHA2 signing algorithms accepted on decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    HS256,
    HS384,
    HS512,
}

impl Algorithm {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "HS256" => Some(Algorithm::HS256),
            "HS384" => Some(Algorithm::HS384),
            "HS512" => Some(Algorithm::HS512),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Algorithm::HS256 => "HS256",
            Algorithm::HS384 => "HS384",
            Algorithm::HS512 => "HS512",
        }
    }

    fn sign(&self, secret: &[u8], message: &[u8]) -> Result<Vec<u8>, TokenError> {
        match self {
            Algorithm::HS256 => sign_with::<Hmac<Sha256>>(secret, message),
            Algorithm::HS384 => sign_with::<Hmac<Sha384>>(secret, message),
            Algorithm::HS512 => sign_with::<Hmac<Sha512>>(secret, message),
        }
    }

    fn verify(&self, secret: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TokenError> {
        match self {
            Algorithm::HS256 => verify_with::<Hmac<Sha256>>(secret, message, signature),
            Algorithm::HS384 => verify_with::<Hmac<Sha384>>(secret, message, signature),
            Algorithm::HS512 => verify_with::<Hmac<Sha512>>(secret, message, signature),
        }
    }
}

fn sign_with<M: Mac + KeyInit>(secret: &[u8], message: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut mac = <M as Mac>::new_from_slice(secret)
        .map_err(|e| TokenError::Encoding(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_with<M: Mac + KeyInit>(
    secret: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), TokenError> {
    let mut mac =
        <M as Mac>::new_from_slice(secret).map_err(|_| TokenError::SignatureInvalid)?;
    mac.update(message);
    // Constant-time comparison
    mac.verify_slice(signature)
        .map_err(|_| TokenError::SignatureInvalid)
}

/// Encode and sign a token for `subject`, expiring `ttl` from now.
///
/// The output only depends on the inputs and the wall clock second at which
/// it is called.
pub fn encode(
    subject: SubjectId,
    scope: TokenScope,
    ttl: Duration,
    secret: &[u8],
) -> Result<SignedToken, TokenError> {
    let exp = Utc::now()
        .checked_add_signed(ttl)
        .map(|at| at.timestamp())
        .ok_or_else(|| TokenError::Encoding("expiry out of range".to_string()))?;

    let claims = Claims {
        sub: subject,
        scope,
        exp,
    };
    let expires_at = claims
        .expires_at()
        .ok_or_else(|| TokenError::Encoding("expiry out of range".to_string()))?;

    let token = sign_claims(Algorithm::HS256, &claims, secret)?;

    Ok(SignedToken {
        token,
        claims,
        expires_at,
    })
}

fn sign_claims<T: Serialize>(
    algorithm: Algorithm,
    claims: &T,
    secret: &[u8],
) -> Result<String, TokenError> {
    let header = Header {
        alg: algorithm.as_str().to_string(),
        typ: Some("JWT".to_string()),
    };
    let header_json =
        serde_json::to_vec(&header).map_err(|e| TokenError::Encoding(e.to_string()))?;
    let claims_json =
        serde_json::to_vec(claims).map_err(|e| TokenError::Encoding(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );
    let signature = algorithm.sign(secret, signing_input.as_bytes())?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Verify `token` with `secret` and return its claims.
///
/// This is the only place expiry is checked.
pub fn decode(token: &str, secret: &[u8]) -> Result<Claims, TokenError> {
    decode_at(token, secret, Utc::now().timestamp())
}

fn decode_at(token: &str, secret: &[u8], now: i64) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let header: Header = decode_segment(header_b64, "header")?;
    let algorithm =
        Algorithm::parse(&header.alg).ok_or_else(|| TokenError::AlgorithmMismatch(header.alg))?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| TokenError::Malformed(format!("signature: {}", e)))?;

    let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
    algorithm.verify(secret, signing_input.as_bytes(), &signature)?;

    let payload: Map<String, Value> = decode_segment(payload_b64, "payload")?;
    let claims = Claims::from_payload(&payload)?;

    if claims.exp < now {
        return Err(TokenError::Expired {
            expired_at: claims.exp,
        });
    }

    Ok(claims)
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(format!("{}: {}", what, e)))?;

    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("{}: {}", what, e)))
}

fn subject_claim(value: Option<&Value>) -> Result<SubjectId, TokenError> {
    let number = match value {
        Some(Value::Number(n)) => n,
        Some(_) => {
            return Err(TokenError::InvalidClaims(
                "'sub' claim is not numeric".to_string(),
            ))
        }
        None => return Err(TokenError::InvalidClaims("missing 'sub' claim".to_string())),
    };

    let id = if let Some(id) = number.as_i64() {
        id
    } else {
        // Integral floats are accepted, anything else is out of range
        match number.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= 1.0 && f < i64::MAX as f64 => f as i64,
            _ => {
                return Err(TokenError::InvalidClaims(format!(
                    "'sub' claim {} is not a valid subject id",
                    number
                )))
            }
        }
    };

    if id < 1 {
        return Err(TokenError::InvalidClaims(format!(
            "'sub' claim {} is not a valid subject id",
            id
        )));
    }

    Ok(id)
}

fn timestamp_claim(value: Option<&Value>) -> Result<i64, TokenError> {
    let exp = match value {
        Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(exp), _) => exp,
            (None, Some(f)) if f.is_finite() && f.abs() < i64::MAX as f64 => f.floor() as i64,
            _ => {
                return Err(TokenError::InvalidClaims(format!(
                    "'exp' claim {} is out of range",
                    n
                )))
            }
        },
        Some(_) => {
            return Err(TokenError::InvalidClaims(
                "'exp' claim is not numeric".to_string(),
            ))
        }
        None => return Err(TokenError::InvalidClaims("missing 'exp' claim".to_string())),
    };

    if DateTime::from_timestamp(exp, 0).is_none() {
        return Err(TokenError::InvalidClaims(format!(
            "'exp' claim {} is out of range",
            exp
        )));
    }

    Ok(exp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_SECRET: &[u8] = b"test-secret-key-for-signing";

    fn forge(alg: &str, claims: Value, secret: &[u8]) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({ "alg": alg, "typ": "JWT" }).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let signing_input = format!("{}.{}", header, payload);
        let signature = match Algorithm::parse(alg) {
            Some(algorithm) => algorithm.sign(secret, signing_input.as_bytes()).unwrap(),
            None => b"not-a-real-signature".to_vec(),
        };
        format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
    }

    fn in_one_hour() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_encode_decode() {
        let before = Utc::now().timestamp();
        let token = encode(42, TokenScope::ActivateEmail, Duration::hours(1), TEST_SECRET).unwrap();
        let after = Utc::now().timestamp();

        assert_eq!(token.as_str().split('.').count(), 3);

        let claims = decode(token.as_str(), TEST_SECRET).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.scope, TokenScope::ActivateEmail);
        assert!(claims.exp >= before + 3600 && claims.exp <= after + 3600);
        assert_eq!(&claims, token.claims());
        assert_eq!(token.expires_at().timestamp(), claims.exp);
    }

    #[test]
    fn test_decode_wrong_secret() {
        let token = encode(7, TokenScope::UserAccess, Duration::hours(1), TEST_SECRET).unwrap();

        let result = decode(token.as_str(), b"wrong-secret");
        assert_eq!(result, Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_decode_expired() {
        let token = encode(7, TokenScope::UserAccess, Duration::seconds(-1), TEST_SECRET).unwrap();

        let result = decode(token.as_str(), TEST_SECRET);
        assert!(matches!(result, Err(TokenError::Expired { .. })));
    }

    #[test]
    fn test_expiry_boundary() {
        let claims = json!({ "sub": 1, "scope": "UserAccess", "exp": 1000 });
        let token = forge("HS256", claims, TEST_SECRET);

        assert!(decode_at(&token, TEST_SECRET, 1000).is_ok());
        assert_eq!(
            decode_at(&token, TEST_SECRET, 1001),
            Err(TokenError::Expired { expired_at: 1000 })
        );
    }

    #[test]
    fn test_signature_checked_before_expiry() {
        let token = encode(7, TokenScope::UserAccess, Duration::seconds(-60), TEST_SECRET).unwrap();

        let result = decode(token.as_str(), b"wrong-secret");
        assert_eq!(result, Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_rejects_non_hmac_algorithms() {
        for alg in ["none", "RS256", "ES256", "hs256"] {
            let claims = json!({ "sub": 1, "scope": "UserAccess", "exp": in_one_hour() });
            let token = forge(alg, claims, TEST_SECRET);
            let result = decode(&token, TEST_SECRET);
            assert_eq!(result, Err(TokenError::AlgorithmMismatch(alg.to_string())), "alg {}", alg);
        }
    }

    #[test]
    fn test_accepts_hmac_family() {
        for alg in ["HS384", "HS512"] {
            let claims = json!({ "sub": 9, "scope": "UserAccess", "exp": in_one_hour() });
            let token = forge(alg, claims, TEST_SECRET);
            let claims = decode(&token, TEST_SECRET).unwrap();
            assert_eq!(claims.sub, 9);
        }
    }

    #[test]
    fn test_tampered_payload() {
        let token = encode(7, TokenScope::UserAccess, Duration::hours(1), TEST_SECRET).unwrap();
        let parts: Vec<&str> = token.as_str().split('.').collect();

        let forged_payload = URL_SAFE_NO_PAD
            .encode(json!({ "sub": 1, "scope": "UserAccess", "exp": in_one_hour() }).to_string());
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(decode(&tampered, TEST_SECRET), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.???.###"] {
            let result = decode(token, TEST_SECRET);
            assert!(matches!(result, Err(TokenError::Malformed(_))), "token {:?}", token);
        }
    }

    #[test]
    fn test_subject_claim_coercion() {
        let exp = in_one_hour();

        let float_sub = json!({ "sub": 42.0, "scope": "UserAccess", "exp": exp });
        let float_sub = forge("HS256", float_sub, TEST_SECRET);
        assert_eq!(decode(&float_sub, TEST_SECRET).unwrap().sub, 42);

        let rejected = [
            json!({ "scope": "UserAccess", "exp": exp }),
            json!({ "sub": "42", "scope": "UserAccess", "exp": exp }),
            json!({ "sub": 4.5, "scope": "UserAccess", "exp": exp }),
            json!({ "sub": 0, "scope": "UserAccess", "exp": exp }),
            json!({ "sub": -3, "scope": "UserAccess", "exp": exp }),
            json!({ "sub": u64::MAX, "scope": "UserAccess", "exp": exp }),
        ];
        for claims in rejected {
            let token = forge("HS256", claims.clone(), TEST_SECRET);
            let result = decode(&token, TEST_SECRET);
            assert!(matches!(result, Err(TokenError::InvalidClaims(_))), "claims {}", claims);
        }
    }

    #[test]
    fn test_scope_and_expiry_claims_required() {
        let missing_exp = forge("HS256", json!({ "sub": 1, "scope": "UserAccess" }), TEST_SECRET);
        assert!(matches!(decode(&missing_exp, TEST_SECRET), Err(TokenError::InvalidClaims(_))));

        let unknown_scope = json!({ "sub": 1, "scope": "Admin", "exp": in_one_hour() });
        let unknown_scope = forge("HS256", unknown_scope, TEST_SECRET);
        assert!(matches!(decode(&unknown_scope, TEST_SECRET), Err(TokenError::InvalidClaims(_))));
    }

    #[test]
    fn test_token_scope_parse() {
        assert_eq!("ActivateEmail".parse::<TokenScope>(), Ok(TokenScope::ActivateEmail));
        assert_eq!("UserAccess".parse::<TokenScope>(), Ok(TokenScope::UserAccess));
        assert!("useraccess".parse::<TokenScope>().is_err());
        assert_eq!(TokenScope::UserAccess.to_string(), "UserAccess");
    }

    #[test]
    fn test_error_classification() {
        assert!(TokenError::SignatureInvalid.is_tampered());
        assert!(TokenError::Malformed("x".into()).is_tampered());
        assert!(!TokenError::Expired { expired_at: 0 }.is_tampered());
        assert!(TokenError::Expired { expired_at: 0 }.is_expired());
    }
}
