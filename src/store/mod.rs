//! Persistence seams for the engine
//!
//! Two documents are persisted:
//! - the self-renewal credential document (`CredentialStore`)
//! - one gateway configuration per tenant (`GatewayConfigStore`)
//!
//! The file implementations are used by the binaries; a hosting system can
//! plug in its own (secret / config map) implementations behind the traits.

mod file;

pub use file::{FileCredentialStore, FileGatewayConfigStore};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembler::Configuration;

/// Annotation stamped on the credential document after every rotation
pub const LAST_ROTATION_ANNOTATION: &str = "dex-operator.giantswarm.io/last-credential-rotation";

/// Data key holding the YAML credential list
pub const CREDENTIALS_DATA_KEY: &str = "credentials";

/// Errors that can occur in store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {path}")]
    NotFound { path: String },

    #[error("invalid document {path}: {reason}")]
    Invalid { path: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata of a persisted document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Self-renewal credential document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDocument {
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl CredentialDocument {
    /// Raw YAML credential list, if present
    pub fn credentials(&self) -> Option<&str> {
        self.data.get(CREDENTIALS_DATA_KEY).map(String::as_str)
    }

    pub fn set_credentials(&mut self, yaml: String) {
        self.data.insert(CREDENTIALS_DATA_KEY.to_string(), yaml);
    }

    /// Record the time of the last rotation
    pub fn stamp_rotation(&mut self, at: DateTime<Utc>) {
        self.metadata.annotations.insert(
            LAST_ROTATION_ANNOTATION.to_string(),
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    pub fn last_rotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(LAST_ROTATION_ANNOTATION)
            .map(String::as_str)
    }
}

/// Storage of the engine's own credential document
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the document. Absence is `StoreError::NotFound`.
    async fn load(&self) -> Result<CredentialDocument, StoreError>;

    /// Replace the document
    async fn save(&self, document: &CredentialDocument) -> Result<(), StoreError>;
}

/// Storage of per-tenant gateway configurations
#[async_trait]
pub trait GatewayConfigStore: Send + Sync {
    /// Current configuration of a tenant, `None` when never written
    async fn load(&self, tenant: &str) -> Result<Option<Configuration>, StoreError>;

    async fn save(&self, tenant: &str, configuration: &Configuration) -> Result<(), StoreError>;

    /// Remove a tenant's configuration. Already gone is success.
    async fn delete(&self, tenant: &str) -> Result<(), StoreError>;
}
