//! Microsoft Graph application API
//!
//! [`GraphApi`] is the seam between the Azure AD reconciler and the remote
//! directory. [`GraphClient`] implements it over HTTP; tests use an
//! in-memory directory instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use super::diff::ApplicationPatch;
use super::token::TokenCache;
use crate::provider::ProviderError;

/// Errors returned by the Graph API
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("graph api error {status}: {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("token request failed: {0}")]
    Token(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<GraphError> for ProviderError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::NotFound(what) => ProviderError::NotFound(what),
            other => ProviderError::RequestFailed(other.to_string()),
        }
    }
}

/// An application registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Directory object ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Application (client) ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    pub display_name: String,
    #[serde(default)]
    pub identifier_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_in_audience: Option<String>,
    #[serde(default)]
    pub web: WebApplication,
    #[serde(default)]
    pub optional_claims: Option<OptionalClaims>,
    #[serde(default)]
    pub required_resource_access: Vec<RequiredResourceAccess>,
    #[serde(default, skip_serializing)]
    pub password_credentials: Vec<PasswordCredential>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebApplication {
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Claims added to tokens, per token type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalClaims {
    #[serde(default)]
    pub access_token: Vec<OptionalClaim>,
    #[serde(default)]
    pub id_token: Vec<OptionalClaim>,
    #[serde(default)]
    pub saml2_token: Vec<OptionalClaim>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalClaim {
    pub name: String,
    #[serde(default)]
    pub essential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub additional_properties: Vec<String>,
}

/// Permissions requested from one resource application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredResourceAccess {
    pub resource_app_id: String,
    #[serde(default)]
    pub resource_access: Vec<ResourceAccess>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAccess {
    pub id: String,
    #[serde(rename = "type")]
    pub access_type: String,
}

/// A client secret of an application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordCredential {
    pub key_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
    /// First characters of the secret
    #[serde(default)]
    pub hint: Option<String>,
    /// Only returned when the secret is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_text: Option<String>,
}

/// Remote operations the Azure AD reconciler needs
#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Applications whose display name equals `display_name`
    async fn list_applications_by_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<Application>, GraphError>;

    /// Application by client ID
    async fn get_application_by_app_id(&self, app_id: &str) -> Result<Application, GraphError>;

    async fn create_application(&self, app: &Application) -> Result<Application, GraphError>;

    async fn update_application(
        &self,
        object_id: &str,
        patch: &ApplicationPatch,
    ) -> Result<(), GraphError>;

    async fn delete_application(&self, object_id: &str) -> Result<(), GraphError>;

    /// Create a password credential. The returned value carries the secret.
    async fn add_password(
        &self,
        object_id: &str,
        display_name: &str,
        end_date_time: DateTime<Utc>,
    ) -> Result<PasswordCredential, GraphError>;

    async fn remove_password(&self, object_id: &str, key_id: &str) -> Result<(), GraphError>;
}

#[derive(Debug, Deserialize)]
struct ODataList<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ODataError {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    code: String,
    message: String,
}

/// Escape a value for use inside a quoted OData string literal
fn odata_quote(value: &str) -> String {
    value.replace('\'', "''")
}

/// Microsoft Graph client authenticated with client credentials
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
}

impl GraphClient {
    pub fn new(
        base_url: &str,
        tokens: Arc<TokenCache>,
        timeout: Duration,
    ) -> Result<Self, GraphError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GraphError::Http(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, GraphError> {
        let token = self.tokens.token(&self.http).await?;
        Ok(request.bearer_auth(token))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, GraphError> {
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(|e| GraphError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => return Err(GraphError::NotFound(body)),
            // a revoked or rotated client secret invalidates the cached token
            StatusCode::UNAUTHORIZED => self.tokens.invalidate().await,
            _ => {}
        }

        Err(match serde_json::from_str::<ODataError>(&body) {
            Ok(err) => GraphError::Api {
                status: status.as_u16(),
                code: err.error.code,
                message: err.error.message,
            },
            Err(_) => GraphError::Api {
                status: status.as_u16(),
                code: "unknown".into(),
                message: body,
            },
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GraphError> {
        self.execute(request)
            .await?
            .json()
            .await
            .map_err(|e| GraphError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl GraphApi for GraphClient {
    #[instrument(skip(self))]
    async fn list_applications_by_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<Application>, GraphError> {
        let filter = format!("displayName eq '{}'", odata_quote(display_name));
        let list: ODataList<Application> = self
            .json(
                self.http
                    .get(self.url("/applications"))
                    .query(&[("$filter", filter.as_str())]),
            )
            .await?;
        debug!(count = list.value.len(), "listed applications");
        Ok(list.value)
    }

    #[instrument(skip(self))]
    async fn get_application_by_app_id(&self, app_id: &str) -> Result<Application, GraphError> {
        let path = format!("/applications(appId='{}')", odata_quote(app_id));
        self.json(self.http.get(self.url(&path))).await
    }

    #[instrument(skip(self, app), fields(display_name = %app.display_name))]
    async fn create_application(&self, app: &Application) -> Result<Application, GraphError> {
        self.json(self.http.post(self.url("/applications")).json(app))
            .await
    }

    #[instrument(skip(self, patch))]
    async fn update_application(
        &self,
        object_id: &str,
        patch: &ApplicationPatch,
    ) -> Result<(), GraphError> {
        let path = format!("/applications/{object_id}");
        self.execute(self.http.patch(self.url(&path)).json(patch))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_application(&self, object_id: &str) -> Result<(), GraphError> {
        let path = format!("/applications/{object_id}");
        self.execute(self.http.delete(self.url(&path))).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_password(
        &self,
        object_id: &str,
        display_name: &str,
        end_date_time: DateTime<Utc>,
    ) -> Result<PasswordCredential, GraphError> {
        let path = format!("/applications/{object_id}/addPassword");
        let body = serde_json::json!({
            "passwordCredential": {
                "displayName": display_name,
                "endDateTime": end_date_time,
            }
        });
        self.json(self.http.post(self.url(&path)).json(&body)).await
    }

    #[instrument(skip(self))]
    async fn remove_password(&self, object_id: &str, key_id: &str) -> Result<(), GraphError> {
        let path = format!("/applications/{object_id}/removePassword");
        let body = serde_json::json!({ "keyId": key_id });
        self.execute(self.http.post(self.url(&path)).json(&body))
            .await?;
        Ok(())
    }
}
