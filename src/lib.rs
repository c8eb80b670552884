//! Dex Connector Engine - identity-provider reconciliation and credential lifecycle
//!
//! This library reconciles identity-provider application registrations for
//! every managed tenant, turns the results into gateway connectors, assembles
//! the two-tier connector configuration, and rotates both tenant-facing app
//! secrets and the engine's own service credentials.

pub mod assembler;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod events;
pub mod expiry;
pub mod metrics;
pub mod provider;
pub mod reconcile;
pub mod renewal;
pub mod store;

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("provider error: {0}")]
    Provider(#[from] provider::ProviderError),

    #[error("renewal error: {0}")]
    Renewal(#[from] renewal::RenewalError),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
