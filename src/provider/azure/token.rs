//! Client-credential token cache for Microsoft Graph
//!
//! Holds at most one access token:
//! - Stored as `secrecy::SecretString` so it never shows up in logs
//! - Refreshed shortly before it expires
//! - Refreshes are serialized so concurrent callers share one token request

use std::sync::RwLock;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::graph::GraphError;

/// Scope requesting every application permission granted to the client
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Access token cache for one Azure AD client
pub struct TokenCache {
    token_url: String,
    client_id: String,
    client_secret: RwLock<SecretString>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(login_url: &str, tenant_id: &str, client_id: &str, client_secret: String) -> Self {
        Self {
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                login_url.trim_end_matches('/'),
                tenant_id
            ),
            client_id: client_id.to_string(),
            client_secret: RwLock::new(SecretString::from(client_secret)),
            cached: Mutex::new(None),
        }
    }

    /// Current access token, requesting a new one when needed
    pub async fn token(&self, http: &reqwest::Client) -> Result<String, GraphError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            tracing::trace!("graph token cache hit");
            return Ok(token.value.expose_secret().to_string());
        }

        let token = self.request(http).await?;
        let value = token.value.expose_secret().to_string();
        *cached = Some(token);
        Ok(value)
    }

    /// Drop the cached token, forcing the next call to request a new one
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    /// Authenticate with a rotated client secret from now on
    pub async fn set_client_secret(&self, secret: String) {
        {
            let mut current = self
                .client_secret
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = SecretString::from(secret);
        }
        self.invalidate().await;
    }

    fn client_secret(&self) -> String {
        self.client_secret
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .expose_secret()
            .to_string()
    }

    async fn request(&self, http: &reqwest::Client) -> Result<CachedToken, GraphError> {
        tracing::debug!(client_id = %self.client_id, "requesting graph token");
        let client_secret = self.client_secret();

        let resp = http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| GraphError::Token(e.to_string()))?;

        let token_resp: TokenResponse = resp
            .json()
            .await
            .map_err(|e| GraphError::Token(format!("invalid token response: {e}")))?;

        if let Some(err) = token_resp.error {
            let desc = token_resp.error_description.unwrap_or_else(|| err.clone());
            return Err(GraphError::Token(desc));
        }

        let access_token = token_resp
            .access_token
            .ok_or_else(|| GraphError::Token("no access_token in response".into()))?;

        Ok(CachedToken {
            value: SecretString::from(access_token),
            expires_at: Instant::now() + Duration::from_secs(token_resp.expires_in.unwrap_or(3600)),
        })
    }
}
