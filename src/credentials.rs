//! Loading of the provider credential list and the tenant list
//!
//! Both inputs are YAML lists. Parsing problems are configuration errors:
//! the engine refuses to start rather than reconcile with a partial set.

use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::connector::{ProviderCredential, TenantAppConfig};
use crate::expiry::{self, TENANT_SECRET_ROTATION_WINDOW};
use crate::store::{CredentialStore, FileCredentialStore, StoreError};
use crate::EngineError;

/// Parse a provider credential list.
pub fn parse_credentials(contents: &str) -> Result<Vec<ProviderCredential>, EngineError> {
    let credentials: Vec<ProviderCredential> = serde_yaml::from_str(contents)
        .map_err(|e| EngineError::InvalidConfig(format!("failed to parse credentials: {e}")))?;

    let mut seen = HashSet::new();
    for credential in &credentials {
        if credential.name.is_empty() {
            return Err(EngineError::InvalidConfig(
                "credential entry without a name".into(),
            ));
        }
        if !seen.insert((credential.owner.as_str(), credential.name.as_str())) {
            return Err(EngineError::InvalidConfig(format!(
                "duplicate credential entry {}/{}",
                credential.owner, credential.name
            )));
        }
    }

    Ok(credentials)
}

/// Read and parse a provider credential list from disk.
pub fn load_credentials(path: &Path) -> Result<Vec<ProviderCredential>, EngineError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        EngineError::InvalidConfig(format!(
            "failed to read credentials {}: {e}",
            path.display()
        ))
    })?;
    let credentials = parse_credentials(&contents)?;
    tracing::info!(
        path = %path.display(),
        providers = credentials.len(),
        "loaded provider credentials"
    );
    Ok(credentials)
}

/// Credentials the engine starts with.
///
/// With self-renewal enabled the renewal document carries the most recent
/// service secrets, so it wins over the static input once it exists.
pub async fn resolve_credentials(config: &Config) -> Result<Vec<ProviderCredential>, EngineError> {
    if config.renewal.enabled {
        let store = FileCredentialStore::new(&config.renewal.store_path);
        match store.load().await {
            Ok(document) => {
                if let Some(contents) = document.credentials() {
                    let credentials = parse_credentials(contents)?;
                    tracing::info!(
                        path = %config.renewal.store_path.display(),
                        providers = credentials.len(),
                        last_rotation = document.last_rotation().unwrap_or("never"),
                        "loaded provider credentials from renewal document"
                    );
                    return Ok(credentials);
                }
                tracing::warn!("renewal document has no credentials, using input file");
            }
            Err(StoreError::NotFound { .. }) => {
                tracing::debug!("no renewal document yet, using input file");
            }
            Err(e) => return Err(e.into()),
        }
    }

    load_credentials(&config.credentials.path)
}

/// Parse a tenant list, filling in the default secret validity.
pub fn parse_tenants(
    contents: &str,
    default_validity_months: u32,
) -> Result<Vec<TenantAppConfig>, EngineError> {
    #[derive(serde::Deserialize)]
    struct TenantEntry {
        name: String,
        redirect_uri: String,
        #[serde(default)]
        identifier_uri: String,
        secret_validity_months: Option<u32>,
    }

    let entries: Vec<TenantEntry> = serde_yaml::from_str(contents)
        .map_err(|e| EngineError::InvalidConfig(format!("failed to parse tenants: {e}")))?;

    entries
        .into_iter()
        .map(|entry| {
            if entry.name.is_empty() || entry.redirect_uri.is_empty() {
                return Err(EngineError::InvalidConfig(
                    "tenant entries need a name and a redirect_uri".into(),
                ));
            }
            let secret_validity_months = entry
                .secret_validity_months
                .unwrap_or(default_validity_months);
            if !expiry::validity_outlives(secret_validity_months, TENANT_SECRET_ROTATION_WINDOW) {
                return Err(EngineError::InvalidConfig(format!(
                    "tenant {}: secret_validity_months {secret_validity_months} ends inside the rotation window",
                    entry.name
                )));
            }
            Ok(TenantAppConfig {
                name: entry.name,
                redirect_uri: entry.redirect_uri,
                identifier_uri: entry.identifier_uri,
                secret_validity_months,
            })
        })
        .collect()
}

/// Read and parse a tenant list from disk.
pub fn load_tenants(
    path: &Path,
    default_validity_months: u32,
) -> Result<Vec<TenantAppConfig>, EngineError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        EngineError::InvalidConfig(format!("failed to read tenants {}: {e}", path.display()))
    })?;
    parse_tenants(&contents, default_validity_months)
}
