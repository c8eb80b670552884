//! Identity provider abstraction
//!
//! Every backend (Azure AD, GitHub, generic OIDC, static passthrough and the
//! test double) implements [`Provider`]. The registry in this module maps a
//! configured provider name to its constructor; call sites only ever see
//! `Arc<dyn Provider>`.

pub mod azure;
pub mod github;
pub mod mock;
pub mod oidc;
pub mod simple;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AzureConfig;
use crate::connector::{Connector, ProviderApp, ProviderCredential, TenantAppConfig};

/// Errors that can occur while talking to an identity provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Fatal until the input is fixed
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Expected absence of a remote object
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient remote failure, retried on the next pass
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },
}

/// Uniform contract of an identity provider backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Connector ID this provider produces
    fn name(&self) -> &str;

    /// Configured provider name
    fn provider_name(&self) -> &str;

    /// Owner, which selects the configuration tier
    fn owner(&self) -> &str;

    /// Gateway connector type
    fn connector_type(&self) -> &str;

    /// Reconcile the remote application for `tenant` and return a usable
    /// connector. Calling it again with unchanged state must not mutate
    /// anything remotely.
    async fn create_or_update_app(
        &self,
        tenant: &TenantAppConfig,
        previous: Option<&Connector>,
    ) -> Result<ProviderApp, ProviderError>;

    /// Remove the remote application of a tenant. Already gone is success.
    async fn delete_app(&self, name: &str) -> Result<(), ProviderError>;

    /// Issue credentials for the engine's own application (setup flow).
    async fn credentials_for_authenticated_app(
        &self,
        _app: &TenantAppConfig,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        Err(self.unsupported("credentials_for_authenticated_app"))
    }

    /// Revoke every credential of the engine's own application (setup flow).
    async fn clean_credentials_for_authenticated_app(
        &self,
        _app: &TenantAppConfig,
    ) -> Result<(), ProviderError> {
        Err(self.unsupported("clean_credentials_for_authenticated_app"))
    }

    /// Delete the engine's own application (setup flow).
    async fn delete_authenticated_app(&self, _app: &TenantAppConfig) -> Result<(), ProviderError> {
        Err(self.unsupported("delete_authenticated_app"))
    }

    /// Whether the self-renewal methods may be called
    fn supports_service_credential_renewal(&self) -> bool {
        false
    }

    /// Whether the engine's own credentials for this provider are due
    async fn should_rotate_service_credentials(
        &self,
        _app: &TenantAppConfig,
    ) -> Result<bool, ProviderError> {
        Err(self.unsupported("should_rotate_service_credentials"))
    }

    /// Rotate the engine's own credentials, returning the keys to merge into
    /// the stored credential map
    async fn rotate_service_credentials(
        &self,
        _app: &TenantAppConfig,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        Err(self.unsupported("rotate_service_credentials"))
    }

    fn unsupported(&self, operation: &'static str) -> ProviderError {
        ProviderError::Unsupported {
            provider: self.provider_name().to_string(),
            operation,
        }
    }
}

/// Serialize a connector configuration with the gateway's field names.
pub(crate) fn render_config<T: serde::Serialize>(
    provider: &str,
    config: &T,
) -> Result<String, ProviderError> {
    serde_yaml::to_string(config).map_err(|e| {
        ProviderError::InvalidConfig(format!("{provider}: failed to render connector config: {e}"))
    })
}

/// Provider implementations known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Azure,
    GitHub,
    Oidc,
    Simple,
    Mock,
}

impl ProviderKind {
    /// Resolve a configured provider name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ad" | "azure" => Some(Self::Azure),
            "github" => Some(Self::GitHub),
            "oidc" | "sso" => Some(Self::Oidc),
            "simple" => Some(Self::Simple),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

/// Build the provider for one credential entry.
///
/// Missing credential keys and unknown owners fail here, not at reconcile time.
pub fn new_provider(
    credential: &ProviderCredential,
    azure: &AzureConfig,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let kind = ProviderKind::from_name(&credential.name).ok_or_else(|| {
        ProviderError::InvalidConfig(format!("unknown provider '{}'", credential.name))
    })?;

    let provider: Arc<dyn Provider> = match kind {
        ProviderKind::Azure => Arc::new(azure::AzureProvider::from_credential(credential, azure)?),
        ProviderKind::GitHub => Arc::new(github::GitHubProvider::new(credential)?),
        ProviderKind::Oidc => Arc::new(oidc::OidcProvider::new(credential)?),
        ProviderKind::Simple => Arc::new(simple::SimpleProvider::new(credential)?),
        ProviderKind::Mock => Arc::new(mock::MockProvider::new(credential)?),
    };

    tracing::debug!(
        provider = %credential.name,
        owner = %credential.owner,
        connector = %provider.name(),
        "constructed provider"
    );

    Ok(provider)
}

/// Build every configured provider, rejecting duplicate connector IDs.
pub fn new_providers(
    credentials: &[ProviderCredential],
    azure: &AzureConfig,
) -> Result<Vec<Arc<dyn Provider>>, ProviderError> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::with_capacity(credentials.len());
    for credential in credentials {
        let provider = new_provider(credential, azure)?;
        if providers.iter().any(|p| p.name() == provider.name()) {
            return Err(ProviderError::InvalidConfig(format!(
                "duplicate connector id '{}'",
                provider.name()
            )));
        }
        providers.push(provider);
    }
    Ok(providers)
}
