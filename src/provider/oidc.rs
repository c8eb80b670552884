//! Generic OIDC provider for cross-cluster single sign-on
//!
//! The upstream issuer is another gateway (or any OIDC issuer) whose client
//! registration is managed outside the engine. There is nothing to create
//! remotely: the connector is rendered from the operator-supplied
//! credentials and reported with a nominal ten year expiry.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{render_config, Provider, ProviderError};
use crate::connector::{
    connector_id, Connector, ProviderApp, ProviderCredential, TenantAppConfig,
};
use crate::expiry;

pub const CONNECTOR_TYPE: &str = "oidc";

const DEFAULT_SCOPES: [&str; 5] = ["openid", "profile", "email", "groups", "offline_access"];

/// Gateway `oidc` connector configuration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OidcConnectorConfig<'a> {
    issuer: &'a str,
    #[serde(rename = "clientID")]
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(rename = "redirectURI")]
    redirect_uri: &'a str,
    scopes: &'a [String],
    insecure_enable_groups: bool,
    get_user_info: bool,
}

/// OIDC single sign-on provider
pub struct OidcProvider {
    id: String,
    name: String,
    owner: String,
    display_name: String,
    issuer: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
}

impl OidcProvider {
    pub fn new(credential: &ProviderCredential) -> Result<Self, ProviderError> {
        credential.tier()?;

        let scopes = match credential.get("scopes") {
            Some(scopes) => scopes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            id: connector_id(&credential.owner, &credential.name, None),
            name: credential.name.clone(),
            owner: credential.owner.clone(),
            display_name: credential.display_name("Single Sign-On"),
            issuer: credential.require("issuer")?.to_string(),
            client_id: credential.require("client-id")?.to_string(),
            client_secret: credential.require("client-secret")?.to_string(),
            scopes,
        })
    }
}

#[async_trait]
impl Provider for OidcProvider {
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
            &OidcConnectorConfig {
                issuer: &self.issuer,
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                redirect_uri: &tenant.redirect_uri,
                scopes: &self.scopes,
                insecure_enable_groups: true,
                get_user_info: true,
            },
        )?;

        Ok(ProviderApp {
            connector: Connector {
                connector_type: CONNECTOR_TYPE.to_string(),
                id: self.id.clone(),
                name: self.display_name.clone(),
                config,
            },
            secret_end_date_time: expiry::nominal_static_expiry(Utc::now()),
        })
    }

    async fn delete_app(&self, name: &str) -> Result<(), ProviderError> {
        tracing::debug!(provider = %self.name, tenant = %name, "nothing to delete for oidc");
        Ok(())
    }
}
