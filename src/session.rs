//! Signed session tokens for cookie and bearer auth.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Error, Result};

pub const SESSION_COOKIE_NAME: &str = "custodia_session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies HS256 session tokens against an injected clock.
#[derive(Clone)]
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl_seconds: i64,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    #[must_use]
    pub fn new(secret: &SecretString, issuer: &str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let key = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            issuer: issuer.to_string(),
            ttl_seconds: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            clock,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a session for `username`.
    ///
    /// # Errors
    /// `Error::Token` if signing fails.
    pub fn issue(&self, username: &str) -> Result<IssuedSession> {
        let now = self.clock.now();
        let iat = now.timestamp();
        let exp = iat.saturating_add(self.ttl_seconds);
        let claims = Claims {
            sub: username.to_string(),
            iss: self.issuer.clone(),
            iat,
            exp,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedSession {
            token,
            expires_at: DateTime::from_timestamp(exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }

    /// Check signature, issuer and expiry.
    ///
    /// # Errors
    /// `Error::Token` for a bad signature or issuer, `Error::Unauthorized`
    /// once the session has expired.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding, &validation)?.claims;
        if claims.exp <= self.clock.now().timestamp() {
            return Err(Error::Unauthorized(format!(
                "session for {} expired",
                claims.sub
            )));
        }
        Ok(claims)
    }

    /// Verified claims carried by the request, if any.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap) -> Option<Claims> {
        let token = extract_session_token(headers)?;
        match self.verify(&token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                debug!("Rejected session token: {err}");
                None
            }
        }
    }

    /// Identity of the currently authenticated caller.
    #[must_use]
    pub fn current_user(&self, headers: &HeaderMap) -> Option<String> {
        self.resolve(headers).map(|claims| claims.sub)
    }

    /// Seconds left before `claims` expire, never negative.
    #[must_use]
    pub fn expire_seconds(&self, claims: &Claims) -> i64 {
        (claims.exp - self.clock.now().timestamp()).max(0)
    }

    /// Build an `HttpOnly` cookie carrying the session token.
    ///
    /// # Errors
    /// Fails if the token contains bytes not allowed in a header value.
    pub fn session_cookie(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let ttl = self.ttl_seconds;
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl}"
        ))
    }
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
            .then(|| val.trim().to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
