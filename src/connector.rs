//! Connector model shared by providers, the assembler and the stores
//!
//! Providers turn a [`TenantAppConfig`] into a [`ProviderApp`]; the assembler
//! groups the resulting [`Connector`]s by [`OwnerTier`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;

/// Owner value of the platform tier
pub const OWNER_GIANTSWARM: &str = "giantswarm";
/// Owner value of the customer tier
pub const OWNER_CUSTOMER: &str = "customer";

/// Default validity of newly issued tenant secrets, in months
pub const DEFAULT_SECRET_VALIDITY_MONTHS: u32 = 6;

/// Configuration tier a connector is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerTier {
    /// Connectors owned by the platform operator
    Giantswarm,
    /// Connectors owned by the tenant's organization
    Customer,
}

impl OwnerTier {
    /// Resolve an owner string. Unknown owners have no tier.
    pub fn from_owner(owner: &str) -> Option<Self> {
        match owner {
            OWNER_GIANTSWARM => Some(Self::Giantswarm),
            OWNER_CUSTOMER => Some(Self::Customer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Giantswarm => OWNER_GIANTSWARM,
            Self::Customer => OWNER_CUSTOMER,
        }
    }
}

/// Desired state of a tenant's application, fixed for one reconcile pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantAppConfig {
    /// Tenant name, also used as application and secret display name
    pub name: String,
    /// Gateway callback URL registered with the identity provider
    pub redirect_uri: String,
    /// Application identifier URI (may be empty)
    #[serde(default)]
    pub identifier_uri: String,
    /// How long newly issued secrets stay valid
    #[serde(default = "default_validity_months")]
    pub secret_validity_months: u32,
}

fn default_validity_months() -> u32 {
    DEFAULT_SECRET_VALIDITY_MONTHS
}

impl TenantAppConfig {
    pub fn new(name: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            redirect_uri: redirect_uri.into(),
            identifier_uri: String::new(),
            secret_validity_months: DEFAULT_SECRET_VALIDITY_MONTHS,
        }
    }

    pub fn with_identifier_uri(mut self, identifier_uri: impl Into<String>) -> Self {
        self.identifier_uri = identifier_uri.into();
        self
    }

    pub fn with_secret_validity_months(mut self, months: u32) -> Self {
        self.secret_validity_months = months;
        self
    }
}

/// Credentials the engine uses to talk to one identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredential {
    /// Provider name, selects the provider implementation
    pub name: String,
    /// Owner, selects the configuration tier
    pub owner: String,
    /// Human readable description, used as connector display name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Provider specific key/value credentials
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

impl ProviderCredential {
    /// Look up an optional credential key, treating empty values as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Look up a credential key that the provider cannot work without.
    pub fn require(&self, key: &str) -> Result<&str, ProviderError> {
        self.get(key).ok_or_else(|| {
            ProviderError::InvalidConfig(format!(
                "{}: missing credential key '{key}'",
                self.name
            ))
        })
    }

    /// Resolve the owner tier, rejecting unknown owners.
    pub fn tier(&self) -> Result<OwnerTier, ProviderError> {
        OwnerTier::from_owner(&self.owner).ok_or_else(|| {
            ProviderError::InvalidConfig(format!(
                "{}: unknown owner '{}'",
                self.name, self.owner
            ))
        })
    }

    /// Description when set, otherwise the given fallback.
    pub fn display_name(&self, fallback: &str) -> String {
        if self.description.is_empty() {
            fallback.to_string()
        } else {
            self.description.clone()
        }
    }
}

/// Deterministic connector ID: `owner-provider[-subtype]`
pub fn connector_id(owner: &str, provider_name: &str, subtype: Option<&str>) -> String {
    match subtype {
        Some(subtype) if !subtype.is_empty() => format!("{owner}-{provider_name}-{subtype}"),
        _ => format!("{owner}-{provider_name}"),
    }
}

/// One identity provider integration as consumed by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    /// Gateway connector type (`microsoft`, `github`, `oidc`, ...)
    #[serde(rename = "type")]
    pub connector_type: String,
    /// Unique connector ID within a configuration
    pub id: String,
    /// Display name shown on the gateway login page
    pub name: String,
    /// Connector configuration, YAML using the gateway's field names
    pub config: String,
}

/// Result of reconciling one provider for one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderApp {
    pub connector: Connector,
    /// When the secret embedded in the connector stops working
    pub secret_end_date_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(owner: &str) -> ProviderCredential {
        ProviderCredential {
            name: "ad".into(),
            owner: owner.into(),
            description: String::new(),
            credentials: BTreeMap::from([
                ("tenant-id".to_string(), "T".to_string()),
                ("client-id".to_string(), String::new()),
            ]),
        }
    }

    #[test]
    fn test_connector_id() {
        assert_eq!(connector_id("giantswarm", "ad", None), "giantswarm-ad");
        assert_eq!(
            connector_id("customer", "simple", Some("ldap")),
            "customer-simple-ldap"
        );
        assert_eq!(connector_id("customer", "simple", Some("")), "customer-simple");
    }

    #[test]
    fn test_require_rejects_missing_and_empty_keys() {
        let cred = credential(OWNER_GIANTSWARM);
        assert_eq!(cred.require("tenant-id").unwrap(), "T");
        assert!(matches!(
            cred.require("client-id"),
            Err(ProviderError::InvalidConfig(_))
        ));
        assert!(cred.require("client-secret").is_err());
    }

    #[test]
    fn test_owner_tier() {
        assert_eq!(
            credential("giantswarm").tier().unwrap(),
            OwnerTier::Giantswarm
        );
        assert_eq!(credential("customer").tier().unwrap(), OwnerTier::Customer);
        assert!(credential("someone-else").tier().is_err());
    }

    #[test]
    fn test_tenant_config_defaults() {
        let tenant: TenantAppConfig =
            serde_yaml::from_str("name: foo\nredirect_uri: https://foo/callback\n").unwrap();
        assert_eq!(tenant.secret_validity_months, DEFAULT_SECRET_VALIDITY_MONTHS);
        assert!(tenant.identifier_uri.is_empty());
    }

    #[test]
    fn test_connector_serializes_type_field() {
        let connector = Connector {
            connector_type: "microsoft".into(),
            id: "giantswarm-ad".into(),
            name: "Azure AD".into(),
            config: "clientID: x\n".into(),
        };
        let yaml = serde_yaml::to_string(&connector).unwrap();
        assert!(yaml.contains("type: microsoft"));
        assert!(!yaml.contains("connector_type"));
    }
}
