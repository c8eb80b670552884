//! Azure Active Directory provider
//!
//! Per tenant this provider owns one application registration and exactly
//! one password credential, both named after the tenant:
//! - Applications are matched by exact display name; duplicates are fatal
//! - Redirect URIs, the groups claim and the permissions copied from the
//!   engine's own (template) application are diffed and patched in one call
//! - Secrets close to expiry are revoked first, then re-issued
//!
//! The engine's own client secret is renewed through the self-renewal
//! methods: a new secret is added before expired ones are removed.

pub mod diff;
pub mod graph;
pub mod token;

#[cfg(test)]
pub mod fake;

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use self::graph::{Application, GraphApi, GraphClient, GraphError, PasswordCredential};
use self::token::TokenCache;
use super::{render_config, Provider, ProviderError};
use crate::config::AzureConfig;
use crate::connector::{
    connector_id, Connector, ProviderApp, ProviderCredential, TenantAppConfig,
};
use crate::expiry::{self, SERVICE_CREDENTIAL_RENEWAL_WINDOW, TENANT_SECRET_ROTATION_WINDOW};

pub const CONNECTOR_TYPE: &str = "microsoft";

pub const TENANT_ID_KEY: &str = "tenant-id";
pub const CLIENT_ID_KEY: &str = "client-id";
pub const CLIENT_SECRET_KEY: &str = "client-secret";

/// Gateway `microsoft` connector configuration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MicrosoftConnectorConfig<'a> {
    #[serde(rename = "clientID")]
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(rename = "redirectURI")]
    redirect_uri: &'a str,
    tenant: &'a str,
    group_name_format: &'a str,
    use_groups_as_whitelist: bool,
}

/// Graph shows the first three characters of a secret as its hint
fn secret_hint(secret: &str) -> String {
    secret.chars().take(3).collect()
}

/// Client ID and secret recorded in a previously rendered connector
fn previous_client(previous: Option<&Connector>) -> Option<(String, String)> {
    let previous = previous.filter(|c| c.connector_type == CONNECTOR_TYPE)?;
    let config: serde_yaml::Value = serde_yaml::from_str(&previous.config).ok()?;
    let client_id = config.get("clientID")?.as_str()?;
    let secret = config.get("clientSecret")?.as_str()?;
    if secret.is_empty() {
        return None;
    }
    Some((client_id.to_string(), secret.to_string()))
}

/// Azure AD provider
pub struct AzureProvider {
    id: String,
    name: String,
    owner: String,
    display_name: String,
    tenant_id: String,
    client_id: String,
    service_secret: RwLock<SecretString>,
    graph: Arc<dyn GraphApi>,
    tokens: Option<Arc<TokenCache>>,
}

impl AzureProvider {
    /// Build a provider talking to `graph`.
    pub fn new(
        credential: &ProviderCredential,
        graph: Arc<dyn GraphApi>,
    ) -> Result<Self, ProviderError> {
        credential.tier()?;
        let tenant_id = credential.require(TENANT_ID_KEY)?.to_string();
        let client_id = credential.require(CLIENT_ID_KEY)?.to_string();
        let client_secret = credential.require(CLIENT_SECRET_KEY)?.to_string();

        Ok(Self {
            id: connector_id(&credential.owner, &credential.name, None),
            name: credential.name.clone(),
            owner: credential.owner.clone(),
            display_name: credential.display_name("Azure AD"),
            tenant_id,
            client_id,
            service_secret: RwLock::new(SecretString::from(client_secret)),
            graph,
            tokens: None,
        })
    }

    /// Build a provider with a Microsoft Graph client from configuration.
    pub fn from_credential(
        credential: &ProviderCredential,
        config: &AzureConfig,
    ) -> Result<Self, ProviderError> {
        let tokens = Arc::new(TokenCache::new(
            &config.login_url,
            credential.require(TENANT_ID_KEY)?,
            credential.require(CLIENT_ID_KEY)?,
            credential.require(CLIENT_SECRET_KEY)?.to_string(),
        ));
        let graph = GraphClient::new(
            &config.graph_url,
            tokens.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
        .map_err(|e| ProviderError::InvalidConfig(format!("{}: {e}", credential.name)))?;

        Ok(Self {
            tokens: Some(tokens),
            ..Self::new(credential, Arc::new(graph))?
        })
    }

    fn current_service_hint(&self) -> String {
        let secret = self
            .service_secret
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        secret_hint(secret.expose_secret())
    }

    fn set_service_secret(&self, secret: &str) {
        let mut current = self
            .service_secret
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = SecretString::from(secret.to_string());
    }

    /// The engine's own application, source of the permission template
    async fn own_application(&self) -> Result<Application, ProviderError> {
        self.graph
            .get_application_by_app_id(&self.client_id)
            .await
            .map_err(|e| match e {
                GraphError::NotFound(_) => ProviderError::InvalidConfig(format!(
                    "{}: own application {} not found",
                    self.name, self.client_id
                )),
                other => other.into(),
            })
    }

    /// Exact display name lookup. More than one match is a configuration error.
    async fn find_application(&self, display_name: &str) -> Result<Option<Application>, ProviderError> {
        let mut matches: Vec<Application> = self
            .graph
            .list_applications_by_name(display_name)
            .await?
            .into_iter()
            .filter(|app| app.display_name == display_name)
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => Err(ProviderError::InvalidConfig(format!(
                "{}: {n} applications named '{display_name}'",
                self.name
            ))),
        }
    }

    async fn issue_secret(
        &self,
        app: &Application,
        display_name: &str,
        validity_months: u32,
    ) -> Result<(String, DateTime<Utc>), ProviderError> {
        let end = expiry::secret_end_date(Utc::now(), validity_months);
        let created = self.graph.add_password(&app.id, display_name, end).await?;
        let secret = created.secret_text.ok_or_else(|| {
            ProviderError::RequestFailed(format!(
                "{}: password credential for '{display_name}' returned without a secret",
                self.name
            ))
        })?;
        info!(
            provider = %self.name,
            app = %app.display_name,
            key_id = %created.key_id,
            "issued password credential"
        );
        Ok((secret, created.end_date_time.unwrap_or(end)))
    }

    async fn revoke_secret(
        &self,
        app: &Application,
        credential: &PasswordCredential,
    ) -> Result<(), ProviderError> {
        match self.graph.remove_password(&app.id, &credential.key_id).await {
            Ok(()) | Err(GraphError::NotFound(_)) => {
                info!(
                    provider = %self.name,
                    app = %app.display_name,
                    key_id = %credential.key_id,
                    "revoked password credential"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Make sure the tenant's application has exactly one usable secret and
    /// return its value and end date.
    async fn ensure_secret(
        &self,
        app: &Application,
        tenant: &TenantAppConfig,
        previous: Option<&Connector>,
    ) -> Result<(String, DateTime<Utc>), ProviderError> {
        let mut existing: Vec<&PasswordCredential> = app
            .password_credentials
            .iter()
            .filter(|c| c.display_name.as_deref() == Some(tenant.name.as_str()))
            .collect();
        existing.sort_by_key(|c| Reverse(c.end_date_time));

        let Some((current, duplicates)) = existing.split_first() else {
            return self
                .issue_secret(app, &tenant.name, tenant.secret_validity_months)
                .await;
        };

        for duplicate in duplicates {
            self.revoke_secret(app, duplicate).await?;
        }

        let known_secret = previous_client(previous)
            .filter(|(client_id, _)| *client_id == app.app_id)
            .map(|(_, secret)| secret)
            .filter(|secret| match current.hint.as_deref() {
                Some(hint) => secret_hint(secret) == hint,
                None => true,
            });

        match (current.end_date_time, known_secret) {
            (Some(end), Some(secret))
                if !expiry::needs_rotation(end, Utc::now(), TENANT_SECRET_ROTATION_WINDOW) =>
            {
                debug!(provider = %self.name, tenant = %tenant.name, "secret still valid");
                Ok((secret, end))
            }
            (end, known) => {
                info!(
                    provider = %self.name,
                    tenant = %tenant.name,
                    expires = ?end,
                    known_value = known.is_some(),
                    "rotating tenant secret"
                );
                self.revoke_secret(app, current).await?;
                self.issue_secret(app, &tenant.name, tenant.secret_validity_months)
                    .await
            }
        }
    }

    fn connector(
        &self,
        app: &Application,
        tenant: &TenantAppConfig,
        secret: &str,
    ) -> Result<Connector, ProviderError> {
        let config = render_config(
            &self.name,
            &MicrosoftConnectorConfig {
                client_id: &app.app_id,
                client_secret: secret,
                redirect_uri: &tenant.redirect_uri,
                tenant: &self.tenant_id,
                group_name_format: "id",
                use_groups_as_whitelist: false,
            },
        )?;

        Ok(Connector {
            connector_type: CONNECTOR_TYPE.to_string(),
            id: self.id.clone(),
            name: self.display_name.clone(),
            config,
        })
    }
}

#[async_trait]
impl Provider for AzureProvider {
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

    #[instrument(skip(self, tenant, previous), fields(provider = %self.id, tenant = %tenant.name))]
    async fn create_or_update_app(
        &self,
        tenant: &TenantAppConfig,
        previous: Option<&Connector>,
    ) -> Result<ProviderApp, ProviderError> {
        let template = self.own_application().await?;

        let app = match self.find_application(&tenant.name).await? {
            Some(app) => {
                if let Some(patch) = diff::compute_patch(&app, tenant, &template) {
                    info!(
                        redirect_uris = patch.web.is_some(),
                        optional_claims = patch.optional_claims.is_some(),
                        permissions = patch.required_resource_access.is_some(),
                        "updating application"
                    );
                    self.graph.update_application(&app.id, &patch).await?;
                }
                app
            }
            None => {
                let app = self
                    .graph
                    .create_application(&diff::desired_application(tenant, &template))
                    .await?;
                info!(app_id = %app.app_id, "created application");
                app
            }
        };

        let (secret, secret_end_date_time) = self.ensure_secret(&app, tenant, previous).await?;

        Ok(ProviderApp {
            connector: self.connector(&app, tenant, &secret)?,
            secret_end_date_time,
        })
    }

    #[instrument(skip(self), fields(provider = %self.id))]
    async fn delete_app(&self, name: &str) -> Result<(), ProviderError> {
        let Some(app) = self.find_application(name).await? else {
            debug!("application already gone");
            return Ok(());
        };

        match self.graph.delete_application(&app.id).await {
            Ok(()) | Err(GraphError::NotFound(_)) => {
                info!(app_id = %app.app_id, "deleted application");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn credentials_for_authenticated_app(
        &self,
        app: &TenantAppConfig,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let registration = match self.find_application(&app.name).await? {
            Some(registration) => registration,
            None => {
                let desired = diff::desired_application(app, &Application::default());
                self.graph.create_application(&desired).await?
            }
        };

        let (secret, _) = self
            .issue_secret(&registration, &app.name, app.secret_validity_months)
            .await?;

        Ok(BTreeMap::from([
            (TENANT_ID_KEY.to_string(), self.tenant_id.clone()),
            (CLIENT_ID_KEY.to_string(), registration.app_id),
            (CLIENT_SECRET_KEY.to_string(), secret),
        ]))
    }

    async fn clean_credentials_for_authenticated_app(
        &self,
        app: &TenantAppConfig,
    ) -> Result<(), ProviderError> {
        let Some(registration) = self.find_application(&app.name).await? else {
            return Ok(());
        };
        for credential in &registration.password_credentials {
            self.revoke_secret(&registration, credential).await?;
        }
        Ok(())
    }

    async fn delete_authenticated_app(&self, app: &TenantAppConfig) -> Result<(), ProviderError> {
        self.delete_app(&app.name).await
    }

    fn supports_service_credential_renewal(&self) -> bool {
        true
    }

    #[instrument(skip(self, app), fields(provider = %self.id))]
    async fn should_rotate_service_credentials(
        &self,
        app: &TenantAppConfig,
    ) -> Result<bool, ProviderError> {
        let own = self.own_application().await?;
        let hint = self.current_service_hint();

        let Some(current) = own
            .password_credentials
            .iter()
            .find(|c| c.hint.as_deref() == Some(hint.as_str()))
        else {
            warn!(operator = %app.name, "service secret not found on own application");
            return Ok(true);
        };

        let due = match current.end_date_time {
            Some(end) => expiry::needs_rotation(end, Utc::now(), SERVICE_CREDENTIAL_RENEWAL_WINDOW),
            None => false,
        };
        debug!(expires = ?current.end_date_time, due, "checked service secret");
        Ok(due)
    }

    #[instrument(skip(self, app), fields(provider = %self.id))]
    async fn rotate_service_credentials(
        &self,
        app: &TenantAppConfig,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let own = self.own_application().await?;

        // add first so the engine never runs without a live secret
        let (secret, _) = self
            .issue_secret(&own, &app.name, app.secret_validity_months)
            .await?;

        self.set_service_secret(&secret);
        if let Some(tokens) = &self.tokens {
            tokens.set_client_secret(secret.clone()).await;
        }

        // cleanup only, the new secret is already in use
        let now = Utc::now();
        for expired in own.password_credentials.iter().filter(|c| {
            c.display_name.as_deref() == Some(app.name.as_str())
                && c.end_date_time.is_some_and(|end| end <= now)
        }) {
            if let Err(e) = self.revoke_secret(&own, expired).await {
                warn!(
                    key_id = %expired.key_id,
                    error = %e,
                    "failed to revoke expired service secret"
                );
            }
        }

        Ok(BTreeMap::from([(CLIENT_SECRET_KEY.to_string(), secret)]))
    }
}
