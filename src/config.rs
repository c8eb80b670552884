//! Configuration loading for the connector engine
//!
//! Configuration is loaded from a TOML file, with defaults that work out of
//! the box for a single-node deployment. Provider credentials and the tenant
//! list live in separate YAML documents referenced from here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::connector::DEFAULT_SECRET_VALIDITY_MONTHS;
use crate::expiry::{self, SERVICE_CREDENTIAL_RENEWAL_WINDOW};
use crate::EngineError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine-wide settings
    pub engine: EngineConfig,
    /// Provider credential input
    pub credentials: CredentialsConfig,
    /// Tenant list input
    pub tenants: TenantsConfig,
    /// Gateway configuration output
    pub gateway: GatewayConfig,
    /// Service credential self-renewal
    pub renewal: RenewalConfig,
    /// Azure AD / Microsoft Graph endpoints
    pub azure: AzureConfig,
    /// Warning events
    pub events: EventsConfig,
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name the engine uses for its own application registration
    pub operator_name: String,
    /// Seconds between two reconcile passes
    pub reconcile_interval_secs: u64,
    /// Validity of newly issued tenant secrets when the tenant sets none
    pub secret_validity_months: u32,
    /// Prometheus text file rewritten after every reconcile pass
    pub metrics_path: Option<PathBuf>,
}

/// Provider credential input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Path to the provider credential YAML
    pub path: PathBuf,
}

/// Tenant list input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantsConfig {
    /// Path to the tenant list YAML
    pub path: PathBuf,
}

/// Gateway configuration output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Directory receiving one `<tenant>.yaml` per tenant
    pub output_dir: PathBuf,
}

/// Service credential self-renewal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Enable periodic self-renewal
    pub enabled: bool,
    /// Cron expression (with seconds field)
    pub schedule: String,
    /// Path to the self-renewal credential document
    pub store_path: PathBuf,
}

/// Azure AD / Microsoft Graph endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Microsoft Graph base URL including API version
    pub graph_url: String,
    /// Login authority base URL
    pub login_url: String,
    /// Timeout for a single Graph request in seconds
    pub request_timeout_secs: u64,
}

/// Warning events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Enable webhook delivery of warnings
    pub enabled: bool,
    /// Webhook receiving warning events as JSON
    pub webhook_url: Option<String>,
    /// Minimum seconds between two deliveries
    pub min_interval_secs: u64,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("connector-engine"))
        .unwrap_or_else(|| PathBuf::from("/etc/connector-engine"))
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("connector-engine"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/connector-engine"))
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operator_name: "dex-operator".to_string(),
            reconcile_interval_secs: 300, // 5 minutes
            secret_validity_months: DEFAULT_SECRET_VALIDITY_MONTHS,
            metrics_path: None,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: config_dir().join("credentials.yaml"),
        }
    }
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            path: config_dir().join("tenants.yaml"),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            output_dir: data_dir().join("gateway"),
        }
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: "0 0 */6 * * *".to_string(), // every 6 hours
            store_path: data_dir().join("service-credentials.yaml"),
        }
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            graph_url: "https://graph.microsoft.com/v1.0".to_string(),
            login_url: "https://login.microsoftonline.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            min_interval_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self, EngineError> {
        let config_path = path
            .cloned()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .map_err(|e| EngineError::InvalidConfig(format!("failed to read config: {e}")))?;
            let config: Config = toml::from_str(&contents)
                .map_err(|e| EngineError::InvalidConfig(format!("failed to parse config: {e}")))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!(
                "no config file found at {}, using defaults",
                config_path.display()
            );
            Ok(Config::default())
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.engine.reconcile_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "engine.reconcile_interval_secs must be positive".into(),
            ));
        }
        if self.engine.operator_name.is_empty() {
            return Err(EngineError::InvalidConfig(
                "engine.operator_name must not be empty".into(),
            ));
        }
        if !expiry::validity_outlives(
            self.engine.secret_validity_months,
            SERVICE_CREDENTIAL_RENEWAL_WINDOW,
        ) {
            return Err(EngineError::InvalidConfig(format!(
                "engine.secret_validity_months {} ends inside the renewal window",
                self.engine.secret_validity_months
            )));
        }
        if self.events.enabled && self.events.webhook_url.is_none() {
            return Err(EngineError::InvalidConfig(
                "events.webhook_url is required when events are enabled".into(),
            ));
        }
        Ok(())
    }

    /// Get the reconcile interval as Duration
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.engine.reconcile_interval_secs)
    }
}
