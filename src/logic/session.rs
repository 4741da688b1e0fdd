use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::Claims;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to sign session token: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

/// Token payload. The claims travel inside an envelope so expiry never collides with
/// application keys.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    exp: i64,
    claims: Value,
}

/// What the SETCREDENTIAL stage did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimsChange {
    Unchanged,
    Replaced(Claims),
    Cleared,
}

impl ClaimsChange {
    /// Classifies a SETCREDENTIAL return value against the claims the request arrived with.
    ///
    /// Null or `{}` clears an existing session. Returning the input claims untouched keeps
    /// it. Anything else is a complete replacement.
    pub fn from_stage(input: Option<&Claims>, output: Value) -> Self {
        let empty = match &output {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };

        if empty {
            if input.is_some() {
                ClaimsChange::Cleared
            } else {
                ClaimsChange::Unchanged
            }
        } else if input == Some(&output) {
            ClaimsChange::Unchanged
        } else {
            ClaimsChange::Replaced(output)
        }
    }
}

/// Signs, verifies and transports session claims.
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    cookie_name: String,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(secret: &str, cookie_name: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            cookie_name: cookie_name.into(),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, SessionError> {
        let envelope = Envelope {
            exp: (Utc::now() + self.ttl).timestamp(),
            claims: claims.clone(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &envelope,
            &self.encoding,
        )?)
    }

    /// Verifies a token. Bad signatures, expired tokens and garbage all yield `None`.
    pub fn decode(&self, token: &str) -> Option<Claims> {
        match jsonwebtoken::decode::<Envelope>(token, &self.decoding, &self.validation) {
            Ok(data) if !data.claims.claims.is_null() => Some(data.claims.claims),
            Ok(_) => None,
            Err(e) => {
                debug!("Ignoring session token: {}", e);
                None
            }
        }
    }

    /// Reads the session cookie from the request headers and decodes it.
    pub fn claims_from_headers(&self, headers: &HeaderMap) -> Option<Claims> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .and_then(|(_, token)| self.decode(token))
    }

    pub fn set_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            token,
            self.ttl.num_seconds()
        )
    }

    pub fn clear_cookie(&self) -> String {
        format!("{}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0", self.cookie_name)
    }

    /// The `Set-Cookie` value for a claims change, if one is needed.
    pub fn outbound(&self, change: &ClaimsChange) -> Result<Option<String>, SessionError> {
        match change {
            ClaimsChange::Unchanged => Ok(None),
            ClaimsChange::Replaced(claims) => Ok(Some(self.set_cookie(&self.encode(claims)?))),
            ClaimsChange::Cleared => Ok(Some(self.clear_cookie())),
        }
    }
}
