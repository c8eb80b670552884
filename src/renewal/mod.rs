//! Self-renewal of the engine's own service credentials
//!
//! A pass asks every provider that supports it whether the engine's own
//! credentials are due, rotates the ones that are, and merges the returned
//! keys into the persisted credential document.
//!
//! Rotation results are merged in memory first; the document is written once,
//! or not at all.

pub mod scheduler;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::connector::{ProviderCredential, TenantAppConfig};
use crate::events::{EventRecorder, REASON_RENEWAL_FAILED};
use crate::provider::Provider;
use crate::store::{CredentialStore, StoreError, CREDENTIALS_DATA_KEY};

/// Errors that abort a self-renewal pass
#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("credential document missing: {0}")]
    MissingSecret(String),

    #[error("credential document has no '{0}' key")]
    MissingCredentialsKey(&'static str),

    #[error("provider {owner}/{name} is not present in the credential document")]
    ProviderNotInStore { name: String, owner: String },

    #[error("invalid credential list: {0}")]
    InvalidCredentials(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Provider skipped during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProvider {
    pub connector: String,
    pub reason: String,
}

/// Outcome of a self-renewal pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewalReport {
    /// Connector IDs whose credentials were rotated and persisted
    pub rotated: Vec<String>,
    /// Connector IDs checked and not yet due
    pub up_to_date: Vec<String>,
    pub skipped: Vec<SkippedProvider>,
}

struct Rotation {
    connector: String,
    name: String,
    owner: String,
    credentials: BTreeMap<String, String>,
}

/// Merge rotated keys into the stored list. Keys a provider did not return
/// keep their stored value.
fn merge_rotations(
    stored: &mut [ProviderCredential],
    rotations: &[Rotation],
) -> Result<(), RenewalError> {
    for rotation in rotations {
        let entry = stored
            .iter_mut()
            .find(|c| c.name == rotation.name && c.owner == rotation.owner)
            .ok_or_else(|| RenewalError::ProviderNotInStore {
                name: rotation.name.clone(),
                owner: rotation.owner.clone(),
            })?;
        entry.credentials.extend(
            rotation
                .credentials
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
    Ok(())
}

/// Self-renewal manager
pub struct SelfRenewal {
    providers: Vec<Arc<dyn Provider>>,
    store: Arc<dyn CredentialStore>,
    events: Arc<dyn EventRecorder>,
    operator: TenantAppConfig,
    pass: Mutex<()>,
}

impl SelfRenewal {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        store: Arc<dyn CredentialStore>,
        events: Arc<dyn EventRecorder>,
        operator: TenantAppConfig,
    ) -> Self {
        Self {
            providers,
            store,
            events,
            operator,
            pass: Mutex::new(()),
        }
    }

    fn skip(&self, report: &mut RenewalReport, provider: &dyn Provider, reason: String) {
        self.events.warning(
            REASON_RENEWAL_FAILED,
            &format!("{}: {reason}", provider.name()),
        );
        report.skipped.push(SkippedProvider {
            connector: provider.name().to_string(),
            reason,
        });
    }

    /// Run one pass. Passes are serialized within the process.
    #[instrument(skip(self), fields(operator = %self.operator.name))]
    pub async fn run(&self) -> Result<RenewalReport, RenewalError> {
        let _pass = self.pass.lock().await;

        let mut report = RenewalReport::default();
        let mut rotations = Vec::new();

        for provider in &self.providers {
            if !provider.supports_service_credential_renewal() {
                debug!(provider = %provider.name(), "service credential renewal not supported");
                continue;
            }

            match provider.should_rotate_service_credentials(&self.operator).await {
                Ok(false) => {
                    debug!(provider = %provider.name(), "service credentials not due");
                    report.up_to_date.push(provider.name().to_string());
                    continue;
                }
                Ok(true) => {}
                Err(e) => {
                    warn!(provider = %provider.name(), error = %e, "service credential check failed");
                    self.skip(&mut report, provider.as_ref(), format!("check failed: {e}"));
                    continue;
                }
            }

            match provider.rotate_service_credentials(&self.operator).await {
                Ok(credentials) => {
                    info!(provider = %provider.name(), "rotated service credentials");
                    rotations.push(Rotation {
                        connector: provider.name().to_string(),
                        name: provider.provider_name().to_string(),
                        owner: provider.owner().to_string(),
                        credentials,
                    });
                }
                Err(e) => {
                    error!(provider = %provider.name(), error = %e, "service credential rotation failed");
                    self.skip(&mut report, provider.as_ref(), format!("rotation failed: {e}"));
                }
            }
        }

        if rotations.is_empty() {
            return Ok(report);
        }

        let mut document = self.store.load().await.map_err(|e| match e {
            StoreError::NotFound { path } => RenewalError::MissingSecret(path),
            other => RenewalError::Store(other),
        })?;

        let stored = document
            .credentials()
            .ok_or(RenewalError::MissingCredentialsKey(CREDENTIALS_DATA_KEY))?;
        let mut credentials: Vec<ProviderCredential> = serde_yaml::from_str(stored)
            .map_err(|e| RenewalError::InvalidCredentials(e.to_string()))?;

        merge_rotations(&mut credentials, &rotations)?;

        let merged = serde_yaml::to_string(&credentials)
            .map_err(|e| RenewalError::InvalidCredentials(e.to_string()))?;
        document.set_credentials(merged);
        document.stamp_rotation(Utc::now());

        self.store.save(&document).await?;

        report.rotated = rotations.into_iter().map(|r| r.connector).collect();
        info!(rotated = ?report.rotated, "persisted rotated service credentials");

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, ProviderApp};
    use crate::events::mock::RecordingEvents;
    use crate::provider::ProviderError;
    use crate::store::mock::MockCredentialStore;
    use crate::store::{CredentialDocument, FileCredentialStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        NotDue,
        Due,
        CheckFails,
        RotationFails,
    }

    struct RenewingProvider {
        id: String,
        name: String,
        owner: String,
        behavior: Behavior,
        rotations: AtomicUsize,
    }

    impl RenewingProvider {
        fn new(owner: &str, name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id: format!("{owner}-{name}"),
                name: name.into(),
                owner: owner.into(),
                behavior,
                rotations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for RenewingProvider {
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
            "mock"
        }

        async fn create_or_update_app(
            &self,
            _tenant: &TenantAppConfig,
            _previous: Option<&Connector>,
        ) -> Result<ProviderApp, ProviderError> {
            Err(ProviderError::NotFound("unused".into()))
        }

        async fn delete_app(&self, _name: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        fn supports_service_credential_renewal(&self) -> bool {
            true
        }

        async fn should_rotate_service_credentials(
            &self,
            _app: &TenantAppConfig,
        ) -> Result<bool, ProviderError> {
            match self.behavior {
                Behavior::NotDue => Ok(false),
                Behavior::CheckFails => Err(ProviderError::RequestFailed("timeout".into())),
                Behavior::Due | Behavior::RotationFails => Ok(true),
            }
        }

        async fn rotate_service_credentials(
            &self,
            _app: &TenantAppConfig,
        ) -> Result<BTreeMap<String, String>, ProviderError> {
            if let Behavior::RotationFails = self.behavior {
                return Err(ProviderError::RequestFailed("graph unavailable".into()));
            }
            self.rotations.fetch_add(1, Ordering::SeqCst);
            Ok(BTreeMap::from([(
                "client-secret".to_string(),
                format!("{}-new-secret", self.name),
            )]))
        }
    }

    const STORED: &str = r#"
- name: ad
  owner: giantswarm
  credentials:
    tenant-id: T
    client-id: C
    client-secret: old-ad-secret
- name: github
  owner: customer
  credentials:
    client-id: gh-client
    client-secret: old-gh-secret
    organization: acme
"#;

    fn document() -> CredentialDocument {
        let mut document = CredentialDocument::default();
        document.set_credentials(STORED.to_string());
        document
    }

    fn operator() -> TenantAppConfig {
        TenantAppConfig::new("dex-operator", "https://dex.example.com/callback")
    }

    fn renewal(
        providers: Vec<Arc<dyn Provider>>,
        store: Arc<dyn CredentialStore>,
        events: Arc<RecordingEvents>,
    ) -> SelfRenewal {
        SelfRenewal::new(providers, store, events, operator())
    }

    fn stored_credentials(document: &CredentialDocument) -> Vec<ProviderCredential> {
        serde_yaml::from_str(document.credentials().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_nothing_due_leaves_store_alone() {
        let store = Arc::new(MockCredentialStore::with_document(document()));
        let events = Arc::new(RecordingEvents::new());
        let renewal = renewal(
            vec![RenewingProvider::new("giantswarm", "ad", Behavior::NotDue) as Arc<dyn Provider>],
            store.clone(),
            events.clone(),
        );

        let report = renewal.run().await.unwrap();

        assert_eq!(report.up_to_date, vec!["giantswarm-ad"]);
        assert!(report.rotated.is_empty());
        assert_eq!(store.loads(), 0);
        assert_eq!(store.saves(), 0);
        assert!(events.reasons().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_merges_only_returned_keys() {
        let store = Arc::new(MockCredentialStore::with_document(document()));
        let events = Arc::new(RecordingEvents::new());
        let renewal = renewal(
            vec![RenewingProvider::new("giantswarm", "ad", Behavior::Due) as Arc<dyn Provider>],
            store.clone(),
            events,
        );

        let report = renewal.run().await.unwrap();
        assert_eq!(report.rotated, vec!["giantswarm-ad"]);
        assert_eq!(store.saves(), 1);

        let saved = store.document().unwrap();
        assert!(saved.last_rotation().is_some());

        let credentials = stored_credentials(&saved);
        assert_eq!(credentials[0].credentials["client-secret"], "ad-new-secret");
        assert_eq!(credentials[0].credentials["tenant-id"], "T");
        assert_eq!(credentials[0].credentials["client-id"], "C");

        // other providers are untouched
        let original: Vec<ProviderCredential> = serde_yaml::from_str(STORED).unwrap();
        assert_eq!(credentials[1], original[1]);
    }

    #[tokio::test]
    async fn test_failures_are_skipped_and_recorded() {
        let store = Arc::new(MockCredentialStore::with_document(document()));
        let events = Arc::new(RecordingEvents::new());
        let renewal = renewal(
            vec![
                RenewingProvider::new("giantswarm", "ad", Behavior::CheckFails) as Arc<dyn Provider>,
                RenewingProvider::new("customer", "github", Behavior::RotationFails)
                    as Arc<dyn Provider>,
            ],
            store.clone(),
            events.clone(),
        );

        let report = renewal.run().await.unwrap();

        assert_eq!(report.skipped.len(), 2);
        assert!(report.rotated.is_empty());
        assert_eq!(store.saves(), 0);
        assert_eq!(store.document().unwrap(), document());
        assert_eq!(
            events.reasons(),
            vec![REASON_RENEWAL_FAILED, REASON_RENEWAL_FAILED]
        );
        assert!(events.messages()[1].contains("graph unavailable"));
    }

    #[tokio::test]
    async fn test_rotation_failure_leaves_file_byte_identical() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("service-credentials.yaml");
        let original = serde_yaml::to_string(&document()).unwrap();
        std::fs::write(&path, &original).unwrap();

        let renewal = renewal(
            vec![
                RenewingProvider::new("giantswarm", "ad", Behavior::RotationFails)
                    as Arc<dyn Provider>,
            ],
            Arc::new(FileCredentialStore::new(&path)),
            Arc::new(RecordingEvents::new()),
        );

        renewal.run().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn test_rotated_provider_missing_from_store_is_fatal() {
        let store = Arc::new(MockCredentialStore::with_document(document()));
        let renewal = renewal(
            vec![
                RenewingProvider::new("giantswarm", "ad", Behavior::Due) as Arc<dyn Provider>,
                RenewingProvider::new("customer", "oidc", Behavior::Due) as Arc<dyn Provider>,
            ],
            store.clone(),
            Arc::new(RecordingEvents::new()),
        );

        let err = renewal.run().await.unwrap_err();
        assert!(matches!(
            err,
            RenewalError::ProviderNotInStore { ref name, .. } if name == "oidc"
        ));
        // nothing partially applied
        assert_eq!(store.saves(), 0);
        assert_eq!(store.document().unwrap(), document());
    }

    #[tokio::test]
    async fn test_missing_document_and_key() {
        let provider = || {
            vec![RenewingProvider::new("giantswarm", "ad", Behavior::Due) as Arc<dyn Provider>]
        };

        let missing = renewal(
            provider(),
            Arc::new(MockCredentialStore::new()),
            Arc::new(RecordingEvents::new()),
        );
        assert!(matches!(
            missing.run().await,
            Err(RenewalError::MissingSecret(_))
        ));

        let keyless = renewal(
            provider(),
            Arc::new(MockCredentialStore::with_document(CredentialDocument::default())),
            Arc::new(RecordingEvents::new()),
        );
        assert!(matches!(
            keyless.run().await,
            Err(RenewalError::MissingCredentialsKey("credentials"))
        ));
    }

    #[tokio::test]
    async fn test_persist_failure_is_returned() {
        let renewal = renewal(
            vec![RenewingProvider::new("giantswarm", "ad", Behavior::Due) as Arc<dyn Provider>],
            Arc::new(MockCredentialStore::failing_save(document())),
            Arc::new(RecordingEvents::new()),
        );
        assert!(matches!(renewal.run().await, Err(RenewalError::Store(_))));
    }

    #[tokio::test]
    async fn test_unsupported_providers_are_not_asked() {
        let credential = ProviderCredential {
            name: "mock".into(),
            owner: "customer".into(),
            description: String::new(),
            credentials: Default::default(),
        };
        let mock =
            crate::provider::new_provider(&credential, &crate::config::AzureConfig::default())
                .unwrap();
        let store = Arc::new(MockCredentialStore::new());
        let renewal = renewal(vec![mock], store.clone(), Arc::new(RecordingEvents::new()));

        let report = renewal.run().await.unwrap();
        assert_eq!(report, RenewalReport::default());
        assert_eq!(store.loads(), 0);
    }

    #[tokio::test]
    async fn test_azure_service_secret_renewal() {
        use crate::provider::azure::fake::FakeGraph;
        use crate::provider::azure::graph::{Application, PasswordCredential};
        use crate::provider::azure::AzureProvider;

        let graph = Arc::new(FakeGraph::new());
        graph.insert(Application {
            app_id: "C".into(),
            display_name: "dex-operator".into(),
            password_credentials: vec![PasswordCredential {
                key_id: "svc-key".into(),
                display_name: Some("dex-operator".into()),
                end_date_time: Some(Utc::now() + chrono::Duration::days(3)),
                hint: Some("old".into()),
                secret_text: None,
            }],
            ..Default::default()
        });

        let stored: Vec<ProviderCredential> = serde_yaml::from_str(STORED).unwrap();
        let ad = AzureProvider::new(&stored[0], graph.clone()).unwrap();
        let store = Arc::new(MockCredentialStore::with_document(document()));
        let renewal = renewal(
            vec![Arc::new(ad) as Arc<dyn Provider>],
            store.clone(),
            Arc::new(RecordingEvents::new()),
        );

        let report = renewal.run().await.unwrap();
        assert_eq!(report.rotated, vec!["giantswarm-ad"]);

        let saved = stored_credentials(&store.document().unwrap());
        let new_secret = &saved[0].credentials["client-secret"];
        assert_ne!(new_secret, "old-ad-secret");

        let own = graph.application("dex-operator").unwrap();
        assert!(own
            .password_credentials
            .iter()
            .any(|c| c.hint.as_deref() == Some(&new_secret[..3])));

        // second pass finds the fresh secret
        let report = renewal.run().await.unwrap();
        assert_eq!(report.up_to_date, vec!["giantswarm-ad"]);
        assert_eq!(store.saves(), 1);
    }
}
