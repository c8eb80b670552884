//! Static passthrough provider
//!
//! The operator supplies a complete connector body (`connector-config`) of
//! any gateway connector type. The only field the engine owns is the
//! callback URL: it is set on the YAML mapping when the connector type has
//! one, replacing an existing value in place or appending the key.

use async_trait::async_trait;
use chrono::Utc;
use serde_yaml::{Mapping, Value};

use super::{Provider, ProviderError};
use crate::connector::{
    connector_id, Connector, ProviderApp, ProviderCredential, TenantAppConfig,
};
use crate::expiry;

/// Name of the callback field for a gateway connector type.
///
/// Connector types that never redirect back to the gateway return `None`.
pub fn redirect_uri_key(connector_type: &str) -> Option<&'static str> {
    match connector_type {
        "ldap" | "authproxy" | "keystone" | "atlassian-crowd" => None,
        _ => Some("redirectURI"),
    }
}

/// Passthrough provider
pub struct SimpleProvider {
    id: String,
    name: String,
    owner: String,
    display_name: String,
    connector_type: String,
    body: Mapping,
}

impl SimpleProvider {
    pub fn new(credential: &ProviderCredential) -> Result<Self, ProviderError> {
        credential.tier()?;

        let connector_type = credential.require("connector-type")?.to_string();
        let raw = credential.require("connector-config")?;
        let body = match serde_yaml::from_str::<Value>(raw) {
            Ok(Value::Mapping(body)) => body,
            Ok(_) => {
                return Err(ProviderError::InvalidConfig(format!(
                    "{}: connector-config must be a YAML mapping",
                    credential.name
                )))
            }
            Err(e) => {
                return Err(ProviderError::InvalidConfig(format!(
                    "{}: failed to parse connector-config: {e}",
                    credential.name
                )))
            }
        };

        let display_name = match credential.get("connector-name") {
            Some(name) => name.to_string(),
            None => credential.display_name(&connector_type),
        };

        Ok(Self {
            id: connector_id(
                &credential.owner,
                &credential.name,
                credential.get("connector-subtype"),
            ),
            name: credential.name.clone(),
            owner: credential.owner.clone(),
            display_name,
            connector_type,
            body,
        })
    }

    /// Connector body with the tenant's callback URL applied.
    fn render(&self, redirect_uri: &str) -> Result<String, ProviderError> {
        let mut body = self.body.clone();
        if let Some(key) = redirect_uri_key(&self.connector_type) {
            body.insert(
                Value::String(key.to_string()),
                Value::String(redirect_uri.to_string()),
            );
        }
        super::render_config(&self.name, &body)
    }
}

#[async_trait]
impl Provider for SimpleProvider {
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
        &self.connector_type
    }

    async fn create_or_update_app(
        &self,
        tenant: &TenantAppConfig,
        _previous: Option<&Connector>,
    ) -> Result<ProviderApp, ProviderError> {
        Ok(ProviderApp {
            connector: Connector {
                connector_type: self.connector_type.clone(),
                id: self.id.clone(),
                name: self.display_name.clone(),
                config: self.render(&tenant.redirect_uri)?,
            },
            secret_end_date_time: expiry::nominal_static_expiry(Utc::now()),
        })
    }

    async fn delete_app(&self, _name: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}
