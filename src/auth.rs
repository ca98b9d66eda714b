//! Bearer credentials for outgoing requests.
//!
//! A [`TokenProvider`] is either a fixed OAuth token or a Keystone account that is
//! exchanged for a time-limited token on demand. Keystone tokens are cached and
//! refreshed once they come within [`KEYSTONE_REFRESH_SKEW`] of expiring.

use crate::config::{Config, KeystoneCredentials};
use crate::{timestamp, Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long before expiry a cached Keystone token is considered stale.
pub const KEYSTONE_REFRESH_SKEW: Duration = Duration::from_secs(10);

/// Supplies the token sent as `Authorization: OAuth {token}`.
#[derive(Debug)]
pub enum TokenProvider {
    /// A token configured up front.
    Static(StaticToken),
    /// A token obtained from a Keystone server.
    Keystone(KeystoneToken),
}

impl TokenProvider {
    /// Builds the provider for a resolved config.
    ///
    /// Keystone credentials take precedence over a static token when both are set.
    pub fn from_config(config: &Config, http_client: reqwest::Client) -> Result<Self> {
        if let Some(credentials) = &config.keystone {
            return Ok(TokenProvider::Keystone(KeystoneToken::new(
                credentials.clone(),
                http_client,
            )));
        }
        match &config.token {
            Some(token) => Ok(TokenProvider::Static(StaticToken::new(token.clone()))),
            None => Err(crate::ConfigError::MissingField("token").into()),
        }
    }

    /// Returns a current token, refreshing a Keystone token if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] or [`Error::Transport`] if a Keystone refresh fails.
    pub async fn token(&self) -> Result<String> {
        match self {
            TokenProvider::Static(t) => Ok(t.token().to_string()),
            TokenProvider::Keystone(t) => t.token().await,
        }
    }

    /// `true` when the token can change over the client's lifetime.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, TokenProvider::Keystone(_))
    }
}

/// A token that never expires.
#[derive(Clone)]
pub struct StaticToken {
    value: String,
}

impl StaticToken {
    /// Wraps `value`.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Returns the token.
    pub fn token(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Cached token with expiry tracking.
struct TokenCache {
    token: String,
    expires_at: Instant,
}

impl TokenCache {
    fn is_reusable(&self, skew: Duration) -> bool {
        if self.token.is_empty() {
            return false;
        }
        self.expires_at
            .checked_sub(skew)
            .is_some_and(|t| Instant::now() < t)
    }
}

#[derive(Deserialize)]
struct KeystoneResponse {
    access: KeystoneAccess,
}

#[derive(Deserialize)]
struct KeystoneAccess {
    token: KeystoneIssuedToken,
}

#[derive(Deserialize)]
struct KeystoneIssuedToken {
    id: String,
    issued_at: String,
    expires: String,
}

/// A token obtained by exchanging Keystone credentials.
///
/// The cache lock is held for the whole check-then-refresh sequence, so concurrent
/// callers share a single exchange instead of each starting their own.
pub struct KeystoneToken {
    server: String,
    credentials: KeystoneCredentials,
    http_client: reqwest::Client,
    cache: Mutex<Option<TokenCache>>,
}

impl KeystoneToken {
    /// Creates a provider. The server URL is normalized to end in exactly one `/`.
    pub fn new(credentials: KeystoneCredentials, http_client: reqwest::Client) -> Self {
        let server = format!("{}/", credentials.server.trim_end_matches('/'));
        Self {
            server,
            credentials,
            http_client,
            cache: Mutex::new(None),
        }
    }

    /// The normalized server URL.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Returns the cached token, or performs one exchange if it is absent or stale.
    ///
    /// A failed exchange leaves the previous cache untouched.
    pub async fn token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.is_reusable(KEYSTONE_REFRESH_SKEW) {
                return Ok(cached.token.clone());
            }
        }

        tracing::debug!(server = %self.server, "Refreshing keystone token");
        let fresh = self.authenticate().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);

        Ok(token)
    }

    async fn authenticate(&self) -> Result<TokenCache> {
        let url = format!("{}tokens", self.server);
        let payload = serde_json::json!({
            "auth": {
                "tenantName": self.credentials.tenant,
                "passwordCredentials": {
                    "username": self.credentials.username,
                    "password": self.credentials.password,
                }
            }
        });

        let response = self
            .http_client
            .post(&url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await?;
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), url = %url, "Keystone rejected credentials");
            return Err(Error::auth(
                format!("keystone returned {}: {}", status, raw_body),
                Some(status),
            ));
        }

        let parsed: KeystoneResponse = serde_json::from_str(&raw_body).map_err(|e| {
            Error::auth(format!("malformed keystone response: {}", e), Some(status))
        })?;
        let issued = parsed.access.token;

        let issued_at = timestamp::parse(&issued.issued_at).ok_or_else(|| {
            Error::auth(
                format!("unparseable issued_at `{}`", issued.issued_at),
                Some(status),
            )
        })?;
        let expires = timestamp::parse(&issued.expires).ok_or_else(|| {
            Error::auth(
                format!("unparseable expires `{}`", issued.expires),
                Some(status),
            )
        })?;
        let lifetime = (expires - issued_at).to_std().unwrap_or(Duration::ZERO);

        tracing::debug!(lifetime_secs = lifetime.as_secs(), "Keystone token issued");

        Ok(TokenCache {
            token: issued.id,
            expires_at: Instant::now() + lifetime,
        })
    }
}

impl std::fmt::Debug for KeystoneToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoneToken")
            .field("server", &self.server)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
