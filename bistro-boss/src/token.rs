//! Bearer tokens: compact HS256 JWTs carrying the caller's email.
//!
//! Tokens are stateless. `issue` signs whatever claim payload the caller sends
//! (it must contain `email`) and stamps `iat`/`exp` with a fixed one-hour
//! lifetime. `verify` checks structure, algorithm, signature and expiry, in
//! that order.

use std::fmt;

use base64::prelude::*;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Lifetime of every issued token.
pub const TOKEN_TTL_SECONDS: i64 = 60 * 60;

const ALGORITHM: &str = "HS256";

type HmacSha256 = Hmac<Sha256>;

/// Claim payload accepted by `POST /jwt`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub email: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenRequest {
    #[cfg(test)]
    pub fn for_email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            extra: Map::new(),
        }
    }
}

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("failed to encode token: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct TokenService {
    mac: HmacSha256,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService").finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        // HMAC pads or hashes the key to its block size, so no length is rejected.
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        Self { mac }
    }

    pub fn issue(&self, request: TokenRequest) -> Result<String, TokenError> {
        self.issue_at(request, Utc::now())
    }

    /// Sign `request` as if the current time were `now`.
    pub fn issue_at(&self, request: TokenRequest, now: DateTime<Utc>) -> Result<String, TokenError> {
        let mut extra = request.extra;
        extra.remove("iat");
        extra.remove("exp");

        let iat = now.timestamp();
        let claims = Claims {
            email: request.email,
            iat,
            exp: iat + TOKEN_TTL_SECONDS,
            extra,
        };

        let header = encode_segment(&Header {
            alg: String::from(ALGORITHM),
            typ: Some(String::from("JWT")),
        })?;
        let payload = encode_segment(&claims)?;
        let signing_input = format!("{header}.{payload}");
        let signature = BASE64_URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes()));

        Ok(format!("{signing_input}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` as if the current time were `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(raw_header), Some(raw_payload), Some(raw_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let header: Header = decode_segment(raw_header)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = BASE64_URL_SAFE_NO_PAD
            .decode(raw_signature)
            .map_err(|_| TokenError::Malformed)?;
        let signing_input = format!("{raw_header}.{raw_payload}");
        let expected = self.sign(signing_input.as_bytes());
        if !bool::from(expected.as_slice().ct_eq(signature.as_slice())) {
            return Err(TokenError::BadSignature);
        }

        let claims: Claims = decode_segment(raw_payload)?;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: DeserializeOwned>(raw: &str) -> Result<T, TokenError> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use anyhow::Result;
    use base64::prelude::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{TokenError, TokenRequest, TokenService, TOKEN_TTL_SECONDS};

    fn service() -> TokenService {
        TokenService::new("test-secret")
    }

    #[test]
    fn issued_token_verifies_back_to_email() -> Result<()> {
        let tokens = service();
        let token = tokens.issue(TokenRequest::for_email("a@b.com"))?;

        let claims = tokens.verify(&token)?;
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECONDS);
        Ok(())
    }

    #[test]
    fn token_expires_after_one_hour() -> Result<()> {
        let tokens = service();
        let issued = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let token = tokens.issue_at(TokenRequest::for_email("a@b.com"), issued)?;

        assert!(tokens
            .verify_at(&token, issued + Duration::minutes(59))
            .is_ok());
        assert!(matches!(
            tokens.verify_at(&token, issued + Duration::hours(1)),
            Err(TokenError::Expired)
        ));
        assert!(matches!(
            tokens.verify_at(&token, issued + Duration::hours(2)),
            Err(TokenError::Expired)
        ));
        Ok(())
    }

    #[test]
    fn extra_claims_survive_but_client_expiry_is_replaced() -> Result<()> {
        let tokens = service();
        let request: TokenRequest = serde_json::from_value(json!({
            "email": "a@b.com",
            "name": "Alice",
            "exp": 9_999_999_999_i64,
            "iat": 1
        }))?;
        let issued = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let token = tokens.issue_at(request, issued)?;

        let claims = tokens.verify_at(&token, issued)?;
        assert_eq!(claims.extra.get("name"), Some(&json!("Alice")));
        assert_eq!(claims.iat, issued.timestamp());
        assert_eq!(claims.exp, issued.timestamp() + TOKEN_TTL_SECONDS);
        Ok(())
    }

    #[test]
    fn tampered_payload_is_rejected() -> Result<()> {
        let tokens = service();
        let token = tokens.issue(TokenRequest::for_email("a@b.com"))?;
        let mut parts: Vec<&str> = token.split('.').collect();

        let forged = BASE64_URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&json!({"email": "admin@b.com", "iat": 0, "exp": 9_999_999_999_i64}))?,
        );
        parts[1] = &forged;
        let forged_token = parts.join(".");

        assert!(matches!(
            tokens.verify(&forged_token),
            Err(TokenError::BadSignature)
        ));
        Ok(())
    }

    #[test]
    fn token_from_another_secret_is_rejected() -> Result<()> {
        let other = TokenService::new("other-secret");
        let token = other.issue(TokenRequest::for_email("a@b.com"))?;

        assert!(matches!(
            service().verify(&token),
            Err(TokenError::BadSignature)
        ));
        Ok(())
    }

    #[test]
    fn unsigned_token_is_rejected() -> Result<()> {
        let header = BASE64_URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = BASE64_URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&json!({"email": "a@b.com", "exp": 9_999_999_999_i64}))?);
        let token = format!("{header}.{payload}.");

        assert!(matches!(
            service().verify(&token),
            Err(TokenError::UnsupportedAlgorithm(alg)) if alg == "none"
        ));
        Ok(())
    }

    #[test]
    fn any_secret_length_signs_and_verifies() -> Result<()> {
        let long_secret = "k".repeat(200);
        for secret in ["", "x", long_secret.as_str()] {
            let tokens = TokenService::new(secret);
            let token = tokens.issue(TokenRequest::for_email("a@b.com"))?;
            assert_eq!(tokens.verify(&token)?.email, "a@b.com");
        }
        Ok(())
    }

    #[test]
    fn garbage_is_malformed() {
        let tokens = service();
        assert!(matches!(tokens.verify(""), Err(TokenError::Malformed)));
        assert!(matches!(tokens.verify("abc"), Err(TokenError::Malformed)));
        assert!(matches!(tokens.verify("a.b.c.d"), Err(TokenError::Malformed)));
        assert!(matches!(
            tokens.verify("!!!.???.***"),
            Err(TokenError::Malformed)
        ));
    }
}
