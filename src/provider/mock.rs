//! No-op provider
//!
//! Produces a connector without touching any remote system. Useful for
//! exercising the engine end to end and for gateway smoke tests.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{render_config, Provider, ProviderError};
use crate::connector::{
    connector_id, Connector, ProviderApp, ProviderCredential, TenantAppConfig,
};
use crate::expiry;

pub const CONNECTOR_TYPE: &str = "mock";

#[derive(Serialize)]
struct MockConnectorConfig<'a> {
    #[serde(rename = "redirectURI")]
    redirect_uri: &'a str,
}

/// Provider test double
pub struct MockProvider {
    id: String,
    name: String,
    owner: String,
    display_name: String,
}

impl MockProvider {
    pub fn new(credential: &ProviderCredential) -> Result<Self, ProviderError> {
        credential.tier()?;
        Ok(Self {
            id: connector_id(&credential.owner, &credential.name, None),
            name: credential.name.clone(),
            owner: credential.owner.clone(),
            display_name: credential.display_name("Mock"),
        })
    }
}

#[async_trait]
impl Provider for MockProvider {
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
            &MockConnectorConfig {
                redirect_uri: &tenant.redirect_uri,
            },
        )?;
        Ok(ProviderApp {
            connector: Connector {
                connector_type: CONNECTOR_TYPE.to_string(),
                id: self.id.clone(),
                name: self.display_name.clone(),
                config,
            },
            secret_end_date_time: expiry::secret_end_date(
                Utc::now(),
                tenant.secret_validity_months,
            ),
        })
    }

    async fn delete_app(&self, _name: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}
