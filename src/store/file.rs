//! File-backed stores
//!
//! Documents are written to a sibling temporary file and renamed into place,
//! so a reader never observes a half-written document.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{CredentialDocument, CredentialStore, GatewayConfigStore, StoreError};
use crate::assembler::Configuration;

async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn invalid(path: &Path, reason: impl std::fmt::Display) -> StoreError {
    StoreError::Invalid {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Credential document kept as a YAML file
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<CredentialDocument, StoreError> {
        let contents = read_optional(&self.path)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                path: self.path.display().to_string(),
            })?;
        serde_yaml::from_str(&contents).map_err(|e| invalid(&self.path, e))
    }

    async fn save(&self, document: &CredentialDocument) -> Result<(), StoreError> {
        let contents = serde_yaml::to_string(document).map_err(|e| invalid(&self.path, e))?;
        write_atomic(&self.path, &contents).await?;
        tracing::debug!(path = %self.path.display(), "wrote credential document");
        Ok(())
    }
}

/// Gateway configurations kept as `<tenant>.yaml` in one directory
pub struct FileGatewayConfigStore {
    dir: PathBuf,
}

impl FileGatewayConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, tenant: &str) -> Result<PathBuf, StoreError> {
        // tenant names become file names
        if tenant.is_empty()
            || tenant.starts_with('.')
            || tenant.contains(['/', '\\'])
        {
            return Err(invalid(&self.dir, format!("invalid tenant name '{tenant}'")));
        }
        Ok(self.dir.join(format!("{tenant}.yaml")))
    }
}

#[async_trait]
impl GatewayConfigStore for FileGatewayConfigStore {
    async fn load(&self, tenant: &str) -> Result<Option<Configuration>, StoreError> {
        let path = self.path(tenant)?;
        match read_optional(&path).await? {
            Some(contents) => Configuration::from_yaml(&contents)
                .map(Some)
                .map_err(|e| invalid(&path, e)),
            None => Ok(None),
        }
    }

    async fn save(&self, tenant: &str, configuration: &Configuration) -> Result<(), StoreError> {
        let path = self.path(tenant)?;
        let contents = configuration.to_yaml().map_err(|e| invalid(&path, e))?;
        write_atomic(&path, &contents).await?;
        tracing::info!(tenant = %tenant, path = %path.display(), "wrote gateway configuration");
        Ok(())
    }

    async fn delete(&self, tenant: &str) -> Result<(), StoreError> {
        let path = self.path(tenant)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Connector;
    use chrono::Utc;
    use tempfile::TempDir;

    fn configuration() -> Configuration {
        let mut configuration = Configuration::default();
        configuration.oidc.customer.connectors.push(Connector {
            connector_type: "oidc".into(),
            id: "customer-oidc".into(),
            name: "Customer SSO".into(),
            config: "issuer: https://sso.example.com\n".into(),
        });
        configuration
    }

    #[tokio::test]
    async fn test_missing_credential_document() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds.yaml"));
        assert!(matches!(store.load().await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_credential_document_persists() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/creds.yaml"));

        let mut document = CredentialDocument::default();
        document.set_credentials("- name: ad\n  owner: giantswarm\n".into());
        document.stamp_rotation(Utc::now());
        store.save(&document).await.unwrap();

        assert_eq!(store.load().await.unwrap(), document);
        assert!(!dir.path().join("nested/creds.yaml.tmp").exists());
    }

    #[tokio::test]
    async fn test_malformed_credential_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("creds.yaml");
        std::fs::write(&path, "data: [not, a, map]\n").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(matches!(store.load().await, Err(StoreError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_gateway_config_roundtrip_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileGatewayConfigStore::new(dir.path());

        assert!(store.load("foo").await.unwrap().is_none());

        store.save("foo", &configuration()).await.unwrap();
        assert_eq!(store.load("foo").await.unwrap(), Some(configuration()));
        assert!(dir.path().join("foo.yaml").exists());

        store.delete("foo").await.unwrap();
        store.delete("foo").await.unwrap();
        assert!(store.load("foo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gateway_store_rejects_path_like_tenants() {
        let dir = TempDir::new().unwrap();
        let store = FileGatewayConfigStore::new(dir.path());

        assert!(store.save("../escape", &configuration()).await.is_err());
        assert!(store.load("").await.is_err());
    }
}
