//! Two-tier gateway configuration assembly
//!
//! A tenant's configuration groups connectors by owner tier:
//!
//! ```yaml
//! oidc:
//!   giantswarm:
//!     connectors: [...]
//!   customer:
//!     connectors: [...]
//! ```
//!
//! Each pass rebuilds it from the provider results and the previous
//! configuration. A write is only needed when the serialized form changed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::connector::{Connector, OwnerTier};
use crate::EngineError;

/// Gateway configuration of one tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub oidc: Oidc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oidc {
    #[serde(default)]
    pub giantswarm: OidcOwner,
    #[serde(default)]
    pub customer: OidcOwner,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcOwner {
    #[serde(default)]
    pub connectors: Vec<Connector>,
}

impl Configuration {
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn tier(&self, tier: OwnerTier) -> &OidcOwner {
        match tier {
            OwnerTier::Giantswarm => &self.oidc.giantswarm,
            OwnerTier::Customer => &self.oidc.customer,
        }
    }

    fn tier_mut(&mut self, tier: OwnerTier) -> &mut OidcOwner {
        match tier {
            OwnerTier::Giantswarm => &mut self.oidc.giantswarm,
            OwnerTier::Customer => &mut self.oidc.customer,
        }
    }

    /// Every connector, platform tier first
    pub fn connectors(&self) -> impl Iterator<Item = &Connector> {
        self.oidc
            .giantswarm
            .connectors
            .iter()
            .chain(self.oidc.customer.connectors.iter())
    }

    /// Connector written by a previous pass
    pub fn previous_connector(&self, id: &str) -> Option<&Connector> {
        self.connectors().find(|c| c.id == id)
    }
}

/// Result of one provider for one tenant
#[derive(Debug, Clone)]
pub struct ProviderResult {
    /// Connector ID the provider produces
    pub id: String,
    pub tier: OwnerTier,
    /// Fresh connector, `None` when the provider failed this pass
    pub connector: Option<Connector>,
}

impl ProviderResult {
    pub fn succeeded(tier: OwnerTier, connector: Connector) -> Self {
        Self {
            id: connector.id.clone(),
            tier,
            connector: Some(connector),
        }
    }

    pub fn failed(id: impl Into<String>, tier: OwnerTier) -> Self {
        Self {
            id: id.into(),
            tier,
            connector: None,
        }
    }
}

/// Outcome of an assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub configuration: Configuration,
    /// Serialized form differs from the previous configuration
    pub changed: bool,
}

/// Build the configuration for this pass.
///
/// Results are placed in their tier in the order given. A failed provider
/// keeps its previous connector; connectors of providers that are no longer
/// configured are dropped.
pub fn assemble(
    previous: &Configuration,
    results: &[ProviderResult],
) -> Result<Assembled, EngineError> {
    let mut configuration = Configuration::default();
    let mut seen = HashSet::new();

    for result in results {
        if !seen.insert(result.id.as_str()) {
            return Err(EngineError::InvalidConfig(format!(
                "duplicate connector id '{}'",
                result.id
            )));
        }

        let connector = match &result.connector {
            Some(connector) => Some(connector.clone()),
            None => {
                let kept = previous.previous_connector(&result.id).cloned();
                if kept.is_some() {
                    tracing::debug!(connector = %result.id, "keeping previous connector");
                }
                kept
            }
        };

        if let Some(connector) = connector {
            configuration.tier_mut(result.tier).connectors.push(connector);
        }
    }

    let changed = configuration.to_yaml()? != previous.to_yaml()?;

    Ok(Assembled {
        configuration,
        changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(id: &str, config: &str) -> Connector {
        Connector {
            connector_type: "mock".into(),
            id: id.into(),
            name: id.into(),
            config: config.into(),
        }
    }

    fn results() -> Vec<ProviderResult> {
        vec![
            ProviderResult::succeeded(OwnerTier::Giantswarm, connector("giantswarm-ad", "a")),
            ProviderResult::succeeded(OwnerTier::Customer, connector("customer-github", "b")),
            ProviderResult::succeeded(OwnerTier::Giantswarm, connector("giantswarm-github", "c")),
        ]
    }

    #[test]
    fn test_connectors_grouped_by_tier_in_order() {
        let assembled = assemble(&Configuration::default(), &results()).unwrap();

        let platform: Vec<_> = assembled
            .configuration
            .oidc
            .giantswarm
            .connectors
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(platform, vec!["giantswarm-ad", "giantswarm-github"]);
        assert_eq!(
            assembled.configuration.oidc.customer.connectors,
            vec![connector("customer-github", "b")]
        );
        assert!(assembled.changed);
    }

    #[test]
    fn test_repeated_assembly_keeps_owner_separation() {
        let first = assemble(&Configuration::default(), &results()).unwrap();
        let second = assemble(&first.configuration, &results()).unwrap();

        assert!(!second.changed);
        assert_eq!(second.configuration, first.configuration);
        assert!(second
            .configuration
            .oidc
            .customer
            .connectors
            .iter()
            .all(|c| c.id.starts_with("customer-")));
        assert!(second
            .configuration
            .oidc
            .giantswarm
            .connectors
            .iter()
            .all(|c| c.id.starts_with("giantswarm-")));
    }

    #[test]
    fn test_failed_provider_keeps_previous_connector() {
        let first = assemble(&Configuration::default(), &results()).unwrap();

        let mut next = results();
        next[0] = ProviderResult::failed("giantswarm-ad", OwnerTier::Giantswarm);
        let second = assemble(&first.configuration, &next).unwrap();

        assert_eq!(
            second.configuration.previous_connector("giantswarm-ad"),
            Some(&connector("giantswarm-ad", "a"))
        );
        assert!(!second.changed);
    }

    #[test]
    fn test_failed_provider_without_history_emits_nothing() {
        let assembled = assemble(
            &Configuration::default(),
            &[ProviderResult::failed("customer-oidc", OwnerTier::Customer)],
        )
        .unwrap();
        assert_eq!(assembled.configuration, Configuration::default());
        assert!(!assembled.changed);
    }

    #[test]
    fn test_unconfigured_provider_is_dropped() {
        let first = assemble(&Configuration::default(), &results()).unwrap();
        let second = assemble(&first.configuration, &results()[..2]).unwrap();

        assert!(second
            .configuration
            .previous_connector("giantswarm-github")
            .is_none());
        assert!(second.changed);
    }

    #[test]
    fn test_changed_connector_config_is_detected() {
        let first = assemble(&Configuration::default(), &results()).unwrap();
        let mut next = results();
        next[1] = ProviderResult::succeeded(OwnerTier::Customer, connector("customer-github", "b2"));

        assert!(assemble(&first.configuration, &next).unwrap().changed);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut duplicated = results();
        duplicated.push(ProviderResult::succeeded(
            OwnerTier::Customer,
            connector("giantswarm-ad", "x"),
        ));

        assert!(matches!(
            assemble(&Configuration::default(), &duplicated),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_serialized_shape() {
        let assembled = assemble(&Configuration::default(), &results()).unwrap();
        let yaml = assembled.configuration.to_yaml().unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        let first = &value["oidc"]["giantswarm"]["connectors"][0];
        assert_eq!(first["type"], serde_yaml::Value::from("mock"));
        assert_eq!(first["id"], serde_yaml::Value::from("giantswarm-ad"));
        assert_eq!(first["config"], serde_yaml::Value::from("a"));
        assert_eq!(
            Configuration::from_yaml(&yaml).unwrap(),
            assembled.configuration
        );
    }
}
