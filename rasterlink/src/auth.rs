//! Bearer token lifecycle.
//!
//! The [`Authenticator`] decides how requests to the image service are
//! authorized:
//!
//! - an explicit access token is used verbatim and never renewed;
//! - a client id / API key pair is exchanged for a token at the token
//!   endpoint, and the exchange is repeated once the token expires;
//! - with neither, requests go out unauthenticated (optionally carrying a
//!   raw `Authorization` header).

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{RasterError, RasterResult};
use crate::http::{HttpRequest, RetryingClient};

/// Seconds subtracted from `expires_in` so tokens are renewed early.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A bearer token and the instant it must be renewed at.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub access_token: String,
    /// `None` for tokens that never expire (explicit tokens, or exchanges
    /// that reported no positive lifetime).
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// True once `now` has reached the renewal instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Credentials {
    None,
    Token,
    ApiKey { client_id: String, api_key: String },
}

/// Body of the token endpoint's answer.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<serde_json::Number>,
}

/// Obtains, stores and renews the session's bearer token.
pub struct Authenticator {
    credentials: Credentials,
    auth_url: String,
    forwarded_user: Option<String>,
    authorization_header: Option<String>,
    token: Mutex<Option<AuthToken>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("auth_url", &self.auth_url)
            .field("forwarded_user", &self.forwarded_user)
            .field("has_token", &self.token.lock().is_some())
            .finish()
    }
}

impl Authenticator {
    /// Decide the authentication mode from the configuration.
    ///
    /// Fails with [`RasterError::Auth`] when only one of client id and API
    /// key is supplied.
    pub fn new(config: &SessionConfig, clock: Arc<dyn Clock>) -> RasterResult<Self> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let client_id = non_empty(&config.client_id);
        let api_key = non_empty(&config.api_key);
        let explicit = non_empty(&config.access_token);

        let mut token = None;
        let credentials = if !config.perform_auth {
            Credentials::None
        } else if let Some(access_token) = explicit {
            if client_id.is_some() || api_key.is_some() {
                warn!("Client id / API key and access token both supplied, using the access token");
            }
            token = Some(AuthToken {
                access_token,
                expires_at: None,
            });
            Credentials::Token
        } else {
            match (client_id, api_key) {
                (None, None) => {
                    debug!("No credentials supplied, trying without authorization");
                    Credentials::None
                }
                (Some(_), None) => {
                    return Err(RasterError::Auth(
                        "client id defined, but API key missing".to_string(),
                    ))
                }
                (None, Some(_)) => {
                    return Err(RasterError::Auth(
                        "API key defined, but client id missing".to_string(),
                    ))
                }
                (Some(client_id), Some(api_key)) => Credentials::ApiKey { client_id, api_key },
            }
        };

        Ok(Self {
            credentials,
            auth_url: config.auth_url.clone(),
            forwarded_user: non_empty(&config.forwarded_user),
            authorization_header: non_empty(&config.authorization_header),
            token: Mutex::new(token),
            clock,
        })
    }

    /// True when requests carry a bearer token.
    pub fn is_authenticated(&self) -> bool {
        self.credentials != Credentials::None
    }

    /// The current token, if any.
    pub fn token(&self) -> Option<AuthToken> {
        self.token.lock().clone()
    }

    /// Perform the API key exchange if the session uses one.
    pub fn authenticate(&self, http: &RetryingClient) -> RasterResult<()> {
        if let Credentials::ApiKey { client_id, api_key } = &self.credentials {
            let token = self.exchange(http, client_id, api_key)?;
            *self.token.lock() = Some(token);
        }
        Ok(())
    }

    /// Renew the token if it has expired.
    pub fn ensure_fresh(&self, http: &RetryingClient) -> RasterResult<()> {
        if !matches!(self.credentials, Credentials::ApiKey { .. }) {
            return Ok(());
        }
        let now = self.clock.now();
        let stale = match self.token.lock().as_ref() {
            Some(token) => token.is_expired(now),
            None => true,
        };
        if stale {
            info!("Access token expired, renewing");
            self.authenticate(http)?;
        }
        Ok(())
    }

    /// Headers to attach to a service request, renewing the token first
    /// when needed.
    pub fn request_headers(&self, http: &RetryingClient) -> RasterResult<Vec<(String, String)>> {
        self.ensure_fresh(http)?;

        let mut headers = Vec::new();
        match self.token.lock().as_ref() {
            Some(token) => headers.push((
                "Authorization".to_string(),
                format!("Bearer {}", token.access_token),
            )),
            None => {
                if let Some(raw) = &self.authorization_header {
                    headers.push(("Authorization".to_string(), raw.clone()));
                }
            }
        }
        if let Some(user) = &self.forwarded_user {
            headers.push(("X-Forwarded-User".to_string(), user.clone()));
        }
        Ok(headers)
    }

    fn exchange(
        &self,
        http: &RetryingClient,
        client_id: &str,
        api_key: &str,
    ) -> RasterResult<AuthToken> {
        let body = format!(
            "client_id={}&apikey={}&grant_type=api_key",
            utf8_percent_encode(client_id, NON_ALPHANUMERIC),
            utf8_percent_encode(api_key, NON_ALPHANUMERIC)
        );
        let request = HttpRequest::post(&self.auth_url, body.into_bytes())
            .with_header("Content-Type", "application/x-www-form-urlencoded");

        let issued_at = self.clock.now();
        let response = http
            .fetch(&request)
            .map_err(|e| RasterError::Auth(format!("token request failed: {}", e)))?;

        if response.body.is_empty() {
            return Err(RasterError::Auth(
                "token request failed: empty content returned by server".to_string(),
            ));
        }

        let doc: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| RasterError::Auth(format!("cannot parse token response: {}", e)))?;

        let access_token = doc
            .access_token
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RasterError::Auth("cannot retrieve access_token".to_string()))?;

        let expires_in = doc
            .expires_in
            .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
            .unwrap_or(0);
        let expires_at = (expires_in > 0).then(|| {
            issued_at + ChronoDuration::seconds(expires_in - TOKEN_EXPIRY_MARGIN_SECS)
        });

        debug!(expires_in, "Obtained access token");
        Ok(AuthToken {
            access_token,
            expires_at,
        })
    }
}
