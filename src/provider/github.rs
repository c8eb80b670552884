//! GitHub provider
//!
//! GitHub OAuth apps cannot be registered or given new secrets through the
//! REST API, so the remote application lifecycle is an explicit no-op here:
//! the operator registers the OAuth app once and supplies its client
//! credentials. Reconciliation renders a working `github` connector
//! restricted to the configured organization (and team, when set).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{render_config, Provider, ProviderError};
use crate::connector::{
    connector_id, Connector, ProviderApp, ProviderCredential, TenantAppConfig,
};
use crate::expiry;

pub const CONNECTOR_TYPE: &str = "github";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GitHubOrg<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    teams: Vec<&'a str>,
}

/// Gateway `github` connector configuration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GitHubConnectorConfig<'a> {
    #[serde(rename = "clientID")]
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(rename = "redirectURI")]
    redirect_uri: &'a str,
    orgs: Vec<GitHubOrg<'a>>,
    team_name_field: &'a str,
    use_login_as_id: bool,
}

/// GitHub OAuth app provider
pub struct GitHubProvider {
    id: String,
    name: String,
    owner: String,
    display_name: String,
    client_id: String,
    client_secret: String,
    organization: String,
    team: Option<String>,
}

impl GitHubProvider {
    pub fn new(credential: &ProviderCredential) -> Result<Self, ProviderError> {
        credential.tier()?;
        Ok(Self {
            id: connector_id(&credential.owner, &credential.name, None),
            name: credential.name.clone(),
            owner: credential.owner.clone(),
            display_name: credential.display_name("GitHub"),
            client_id: credential.require("client-id")?.to_string(),
            client_secret: credential.require("client-secret")?.to_string(),
            organization: credential.require("organization")?.to_string(),
            team: credential.get("team").map(String::from),
        })
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn provider_name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn connector_type(&self) -> &str {
        CONNECTOR_TYPE
    }

    async fn create_or_update_app(
        &self,
        tenant: &TenantAppConfig,
        _previous: Option<&Connector>,
    ) -> Result<ProviderApp, ProviderError> {
        let config = render_config(
            &self.name,
            &GitHubConnectorConfig {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                redirect_uri: &tenant.redirect_uri,
                orgs: vec![GitHubOrg {
                    name: &self.organization,
                    teams: self.team.as_deref().into_iter().collect(),
                }],
                team_name_field: "slug",
                use_login_as_id: false,
            },
        )?;

        Ok(ProviderApp {
            connector: Connector {
                connector_type: CONNECTOR_TYPE.to_string(),
                id: self.id.clone(),
                name: self.display_name.clone(),
                config,
            },
            // OAuth app secrets do not expire
            secret_end_date_time: expiry::nominal_static_expiry(Utc::now()),
        })
    }

    async fn delete_app(&self, name: &str) -> Result<(), ProviderError> {
        tracing::debug!(provider = %self.name, tenant = %name, "github apps are not managed remotely");
        Ok(())
    }

    async fn credentials_for_authenticated_app(
        &self,
        app: &TenantAppConfig,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        tracing::warn!(
            provider = %self.name,
            app = %app.name,
            "github app registration is manual, no credentials issued"
        );
        Ok(BTreeMap::new())
    }

    async fn clean_credentials_for_authenticated_app(
        &self,
        _app: &TenantAppConfig,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete_authenticated_app(&self, _app: &TenantAppConfig) -> Result<(), ProviderError> {
        Ok(())
    }
}
